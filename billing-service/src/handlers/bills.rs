use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use salon_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{
    AddItemRequest, BillListResponse, BillResponse, CheckoutRequest, CheckoutResponse,
    CreateBillRequest, ListBillsParams,
};
use crate::middleware::{ActorContext, ApiJson, ApiQuery, ValidatedJson};
use crate::models::{BookingStatus, ItemType, ListBillsFilter};
use crate::services::NewBillItem;
use crate::startup::AppState;

fn parse_bill_id(raw: &str) -> Result<String, AppError> {
    Uuid::parse_str(raw.trim())
        .map(|id| id.to_string())
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid bill id: {}", raw)))
}

pub async fn create_bill(
    State(state): State<AppState>,
    actor: ActorContext,
    ApiJson(req): ApiJson<CreateBillRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (bill, created) = state
        .service
        .create_draft(&actor, req.customer_id, req.appointment_id)
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(BillResponse::from(bill))))
}

pub async fn list_bills(
    State(state): State<AppState>,
    actor: ActorContext,
    ApiQuery(params): ApiQuery<ListBillsParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);
    let status = params
        .status
        .as_deref()
        .map(str::parse::<BookingStatus>)
        .transpose()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

    let filter = ListBillsFilter {
        branch_id: actor.branch_id.clone(),
        status,
        customer_id: params.customer_id.filter(|c| !c.is_empty()),
        page,
        page_size,
    };
    let (bills, total) = state.service.list_bills(&filter).await?;

    Ok(Json(BillListResponse {
        bills: bills.into_iter().map(BillResponse::from).collect(),
        total,
        page,
        page_size,
        total_pages: total.div_ceil(page_size),
    }))
}

pub async fn get_bill(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let bill_id = parse_bill_id(&id)?;
    let bill = state.service.get_bill(&actor, &bill_id).await?;
    Ok(Json(BillResponse::from(bill)))
}

pub async fn add_item(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<AddItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    let bill_id = parse_bill_id(&id)?;
    let item_type = req
        .item_type
        .parse::<ItemType>()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

    let item = NewBillItem {
        item_type,
        ref_id: req.ref_id,
        quantity: req.quantity.unwrap_or(1),
        discount: req.discount.unwrap_or(0.0),
        staff_id: req.staff_id,
    };
    let bill = state.service.add_item(&actor, &bill_id, item).await?;
    Ok(Json(BillResponse::from(bill)))
}

pub async fn remove_item(
    State(state): State<AppState>,
    actor: ActorContext,
    Path((id, index)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let bill_id = parse_bill_id(&id)?;
    let index = index
        .trim()
        .parse::<usize>()
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid item index: {}", index)))?;

    let bill = state.service.remove_item(&actor, &bill_id, index).await?;
    Ok(Json(BillResponse::from(bill)))
}

pub async fn checkout(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<CheckoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let bill_id = parse_bill_id(&id)?;
    let receipt = state.service.checkout(&actor, &bill_id, req.into()).await?;
    Ok(Json(CheckoutResponse::from(receipt)))
}

pub async fn delete_bill(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let bill_id = parse_bill_id(&id)?;
    state.service.delete_bill(&actor, &bill_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
