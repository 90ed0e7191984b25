use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Bill, BillItem, BookingStatus, DiscountType, ItemType};
use crate::services::{CheckoutCommand, CheckoutReceipt};

#[derive(Debug, Default, Deserialize)]
pub struct CreateBillRequest {
    pub customer_id: Option<String>,
    pub appointment_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    #[validate(length(min = 1, message = "item_type is required"))]
    pub item_type: String,

    #[validate(length(min = 1, message = "ref_id is required"))]
    pub ref_id: String,

    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: Option<i64>,

    #[validate(range(min = 0.0, message = "discount must not be negative"))]
    pub discount: Option<f64>,

    pub staff_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    pub payment_mode: Option<String>,
    pub discount_amount: Option<f64>,
    pub discount_type: Option<String>,
    pub tax_rate: Option<f64>,
    pub prepaid_package_id: Option<String>,
    /// RFC 3339 timestamp or `YYYY-MM-DD`.
    pub bill_date: Option<String>,
}

impl From<CheckoutRequest> for CheckoutCommand {
    fn from(req: CheckoutRequest) -> Self {
        Self {
            payment_mode: req.payment_mode,
            discount_amount: req.discount_amount,
            discount_type: req.discount_type,
            tax_rate: req.tax_rate,
            prepaid_package_id: req.prepaid_package_id,
            bill_date: req.bill_date,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListBillsParams {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub status: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BillItemResponse {
    pub item_type: ItemType,
    pub ref_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: i64,
    pub discount: f64,
    pub total: f64,
    pub staff_id: Option<String>,
}

impl From<BillItem> for BillItemResponse {
    fn from(item: BillItem) -> Self {
        Self {
            item_type: item.item_type,
            ref_id: item.ref_id,
            name: item.name,
            unit_price: item.unit_price,
            quantity: item.quantity,
            discount: item.discount,
            total: item.total,
            staff_id: item.staff_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BillResponse {
    pub id: String,
    pub bill_number: Option<String>,
    pub branch_id: String,
    pub customer_id: Option<String>,
    pub appointment_id: Option<String>,
    pub created_by: String,
    pub items: Vec<BillItemResponse>,
    pub subtotal: f64,
    pub discount_amount: f64,
    pub discount_type: Option<DiscountType>,
    pub tax_rate: f64,
    pub tax_amount: f64,
    pub final_amount: f64,
    pub payment_mode: Option<String>,
    pub prepaid_package_id: Option<String>,
    pub loyalty_points_earned: i64,
    pub booking_status: BookingStatus,
    pub bill_date: String,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl From<Bill> for BillResponse {
    fn from(bill: Bill) -> Self {
        Self {
            id: bill.id,
            bill_number: bill.bill_number,
            branch_id: bill.branch_id,
            customer_id: bill.customer_id,
            appointment_id: bill.appointment_id,
            created_by: bill.created_by,
            items: bill.items.into_iter().map(BillItemResponse::from).collect(),
            subtotal: bill.subtotal,
            discount_amount: bill.discount_amount,
            discount_type: bill.discount_type,
            tax_rate: bill.tax_rate,
            tax_amount: bill.tax_amount,
            final_amount: bill.final_amount,
            payment_mode: bill.payment_mode,
            prepaid_package_id: bill.prepaid_package_id,
            loyalty_points_earned: bill.loyalty_points_earned,
            booking_status: bill.booking_status,
            bill_date: bill.bill_date.to_rfc3339(),
            created_at: bill.created_at.to_rfc3339(),
            updated_at: bill.updated_at.to_rfc3339(),
            completed_at: bill.completed_at.map(|at| at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BillListResponse {
    pub bills: Vec<BillResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub bill_id: String,
    pub bill_number: Option<String>,
    pub final_amount: f64,
    pub subtotal: f64,
    pub discount_amount: f64,
    pub discount_type: Option<DiscountType>,
    pub tax_amount: f64,
    pub loyalty_points_earned: i64,
    pub already_completed: bool,
}

impl From<CheckoutReceipt> for CheckoutResponse {
    fn from(receipt: CheckoutReceipt) -> Self {
        let bill = receipt.bill;
        Self {
            bill_id: bill.id,
            bill_number: bill.bill_number,
            final_amount: bill.final_amount,
            subtotal: bill.subtotal,
            discount_amount: bill.discount_amount,
            discount_type: bill.discount_type,
            tax_amount: bill.tax_amount,
            loyalty_points_earned: bill.loyalty_points_earned,
            already_completed: receipt.already_completed,
        }
    }
}
