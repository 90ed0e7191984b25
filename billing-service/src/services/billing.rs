//! Bill lifecycle: drafts, line items, checkout and deletion.
//!
//! Checkout runs as a validate-then-commit sequence. Nothing is written until
//! every check passes; the commit then applies stock, prepaid and bill
//! updates as conditional writes and undoes earlier steps if a later one
//! loses a race.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::*;
use salon_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::config::{CheckoutSettings, LoyaltySettings};
use crate::middleware::ActorContext;
use crate::models::{
    Bill, BillFinalization, BillItem, BookingStatus, CatalogEntry, ItemType, ListBillsFilter,
    PrepaidPackage, PrepaidStatus,
};
use crate::services::checkout::{
    calculate, ensure_can_discount, ensure_discount_allowed, loyalty_points, CheckoutInput,
    CheckoutTotals, ManualDiscount,
};
use crate::services::error::BillingError;
use crate::services::metrics::{record_checkout, record_checkout_amount, record_low_stock};
use crate::services::money::{line_total, parse_decimal, round_money, to_decimal, to_f64};
use crate::services::store::BillingStore;

/// A line to add to a draft bill.
#[derive(Debug, Clone)]
pub struct NewBillItem {
    pub item_type: ItemType,
    pub ref_id: String,
    pub quantity: i64,
    pub discount: f64,
    pub staff_id: Option<String>,
}

/// Raw checkout parameters as supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct CheckoutCommand {
    pub payment_mode: Option<String>,
    pub discount_amount: Option<f64>,
    pub discount_type: Option<String>,
    pub tax_rate: Option<f64>,
    pub prepaid_package_id: Option<String>,
    pub bill_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutReceipt {
    pub bill: Bill,
    /// True when the bill had already been checked out and nothing changed.
    pub already_completed: bool,
}

/// Products grouped by id with the total quantity sold on the bill.
fn product_demand(items: &[BillItem]) -> BTreeMap<String, i64> {
    let mut demand = BTreeMap::new();
    for item in items.iter().filter(|i| i.item_type == ItemType::Product) {
        *demand.entry(item.ref_id.clone()).or_insert(0) += item.quantity;
    }
    demand
}

fn item_label(item_type: ItemType) -> &'static str {
    match item_type {
        ItemType::Service => "Service",
        ItemType::Product => "Product",
        ItemType::Package => "Package",
        ItemType::Prepaid => "Prepaid plan",
        ItemType::Membership => "Membership plan",
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_bill_date(raw: &str) -> Result<DateTime<Utc>, BillingError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| {
            BillingError::Validation(format!(
                "Invalid bill_date '{}': expected RFC 3339 or YYYY-MM-DD",
                raw
            ))
        })
}

fn receipt_outcome(result: &Result<CheckoutReceipt, AppError>) -> &'static str {
    match result {
        Ok(receipt) if receipt.already_completed => "already_completed",
        Ok(_) => "completed",
        Err(AppError::Conflict(_)) => "conflict",
        Err(AppError::InternalError(_))
        | Err(AppError::DatabaseError(_))
        | Err(AppError::ConfigError(_))
        | Err(AppError::ServiceUnavailable) => "error",
        Err(_) => "rejected",
    }
}

#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn BillingStore>,
    checkout: CheckoutSettings,
    loyalty: LoyaltySettings,
}

impl BillingService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        checkout: CheckoutSettings,
        loyalty: LoyaltySettings,
    ) -> Self {
        Self {
            store,
            checkout,
            loyalty,
        }
    }

    pub fn store(&self) -> &Arc<dyn BillingStore> {
        &self.store
    }

    fn money(&self, value: Decimal) -> f64 {
        to_f64(value, self.checkout.money_precision)
    }

    /// Load a live bill the actor's branch may see.
    async fn load_bill(&self, actor: &ActorContext, bill_id: &str) -> Result<Bill, AppError> {
        let bill = self
            .store
            .get_bill(bill_id)
            .await?
            .filter(|bill| !bill.is_deleted)
            .ok_or(BillingError::NotFound("Bill"))?;

        if bill.branch_id != actor.branch_id {
            return Err(BillingError::Forbidden("Bill belongs to another branch".to_string()).into());
        }
        Ok(bill)
    }

    async fn load_pending_bill(
        &self,
        actor: &ActorContext,
        bill_id: &str,
    ) -> Result<Bill, AppError> {
        let bill = self.load_bill(actor, bill_id).await?;
        if bill.booking_status != BookingStatus::Pending || bill.is_finalized() {
            return Err(BillingError::Validation(
                "Only pending bills can be modified".to_string(),
            )
            .into());
        }
        Ok(bill)
    }

    /// Return the open bill for the appointment, or start a new draft.
    /// The flag is true when a new bill was created.
    #[instrument(skip(self, actor), fields(branch_id = %actor.branch_id))]
    pub async fn create_draft(
        &self,
        actor: &ActorContext,
        customer_id: Option<String>,
        appointment_id: Option<String>,
    ) -> Result<(Bill, bool), AppError> {
        let customer_id = non_blank(customer_id);
        let appointment_id = non_blank(appointment_id);

        if let Some(appointment_id) = &appointment_id {
            if let Some(existing) = self
                .store
                .find_open_bill_for_appointment(&actor.branch_id, appointment_id)
                .await?
            {
                info!(bill_id = %existing.id, "Reusing open bill for appointment");
                return Ok((existing, false));
            }
        }

        let bill = Bill::new_draft(
            actor.branch_id.clone(),
            customer_id,
            appointment_id,
            actor.user_id.clone(),
        );
        self.store.insert_bill(&bill).await?;
        info!(bill_id = %bill.id, "Draft bill created");
        Ok((bill, true))
    }

    pub async fn get_bill(&self, actor: &ActorContext, bill_id: &str) -> Result<Bill, AppError> {
        self.load_bill(actor, bill_id).await
    }

    pub async fn list_bills(&self, filter: &ListBillsFilter) -> Result<(Vec<Bill>, u64), AppError> {
        if filter.page == 0 || filter.page_size == 0 || filter.page_size > 100 {
            return Err(BillingError::Validation(
                "page must be >= 1 and page_size between 1 and 100".to_string(),
            )
            .into());
        }
        self.store.list_bills(filter).await
    }

    #[instrument(
        skip(self, actor, item),
        fields(branch_id = %actor.branch_id, item_type = item.item_type.as_str(), ref_id = %item.ref_id)
    )]
    pub async fn add_item(
        &self,
        actor: &ActorContext,
        bill_id: &str,
        item: NewBillItem,
    ) -> Result<Bill, AppError> {
        if item.quantity < 1 {
            return Err(BillingError::Validation("quantity must be at least 1".to_string()).into());
        }
        if !item.discount.is_finite() || item.discount < 0.0 {
            return Err(BillingError::Validation(
                "discount must be a non-negative number".to_string(),
            )
            .into());
        }

        let mut bill = self.load_pending_bill(actor, bill_id).await?;

        let entry = if item.item_type == ItemType::Product {
            let product = self
                .store
                .get_product(&item.ref_id)
                .await?
                .ok_or(BillingError::NotFound("Product"))?;

            let requested = bill.product_quantity(&product.id) + item.quantity;
            if product.is_active
                && product.branch_id == bill.branch_id
                && requested > product.stock_quantity
            {
                return Err(BillingError::InsufficientStock {
                    product: product.name,
                    available: product.stock_quantity,
                    requested,
                }
                .into());
            }
            CatalogEntry::from(product)
        } else {
            self.store
                .find_catalog_entry(item.item_type, &item.ref_id)
                .await?
                .ok_or(BillingError::NotFound(item_label(item.item_type)))?
        };

        if !entry.is_active {
            return Err(BillingError::Validation(format!("{} is not active", entry.name)).into());
        }
        if !entry.available_in(&bill.branch_id) {
            return Err(BillingError::Forbidden(format!(
                "{} does not belong to this branch",
                entry.name
            ))
            .into());
        }

        let dp = self.checkout.money_precision;
        let unit_price = to_decimal(entry.price);
        if item.discount != 0.0 {
            ensure_can_discount(actor.role, &self.checkout.discount_ceilings)?;
        }
        let requested_discount = parse_decimal(item.discount, "discount")?;
        let discount = round_money(requested_discount, dp);
        let gross = round_money(unit_price * Decimal::from(item.quantity), dp);
        if discount > gross {
            return Err(BillingError::Validation(
                "Line discount cannot exceed the line amount".to_string(),
            )
            .into());
        }
        ensure_discount_allowed(
            actor.role,
            requested_discount,
            gross,
            &self.checkout.discount_ceilings,
        )?;

        bill.items.push(BillItem {
            item_type: item.item_type,
            ref_id: entry.id,
            name: entry.name,
            unit_price: self.money(unit_price),
            quantity: item.quantity,
            discount: self.money(discount),
            total: self.money(line_total(unit_price, item.quantity, discount, dp)),
            staff_id: non_blank(item.staff_id),
        });

        self.save_items(bill).await
    }

    #[instrument(skip(self, actor), fields(branch_id = %actor.branch_id))]
    pub async fn remove_item(
        &self,
        actor: &ActorContext,
        bill_id: &str,
        index: usize,
    ) -> Result<Bill, AppError> {
        let mut bill = self.load_pending_bill(actor, bill_id).await?;
        if index >= bill.items.len() {
            return Err(BillingError::Validation(format!(
                "Item index {} out of range (bill has {} items)",
                index,
                bill.items.len()
            ))
            .into());
        }

        bill.items.remove(index);
        self.save_items(bill).await
    }

    async fn save_items(&self, mut bill: Bill) -> Result<Bill, AppError> {
        let subtotal: Decimal = bill.items.iter().map(|i| to_decimal(i.total)).sum();
        bill.subtotal = self.money(subtotal);

        let saved = self
            .store
            .update_items(&bill.id, bill.version, &bill.items, bill.subtotal)
            .await?;
        if !saved {
            return Err(BillingError::Conflict(
                "Bill was modified concurrently, reload and retry".to_string(),
            )
            .into());
        }

        bill.version += 1;
        bill.updated_at = Utc::now();
        Ok(bill)
    }

    #[instrument(skip(self, actor, command), fields(branch_id = %actor.branch_id))]
    pub async fn checkout(
        &self,
        actor: &ActorContext,
        bill_id: &str,
        command: CheckoutCommand,
    ) -> Result<CheckoutReceipt, AppError> {
        let result = self.run_checkout(actor, bill_id, command).await;
        record_checkout(&actor.branch_id, receipt_outcome(&result));
        result
    }

    async fn run_checkout(
        &self,
        actor: &ActorContext,
        bill_id: &str,
        command: CheckoutCommand,
    ) -> Result<CheckoutReceipt, AppError> {
        let bill = self.load_bill(actor, bill_id).await?;

        if bill.is_finalized() {
            info!(
                bill_id = %bill.id,
                bill_number = bill.bill_number.as_deref().unwrap_or_default(),
                "Bill already checked out"
            );
            return Ok(CheckoutReceipt {
                bill,
                already_completed: true,
            });
        }

        let now = Utc::now();
        let payment_mode = non_blank(command.payment_mode)
            .ok_or_else(|| BillingError::Validation("payment_mode is required".to_string()))?;
        let manual_discount =
            ManualDiscount::parse(command.discount_amount, command.discount_type.as_deref())?;
        let tax_rate = match command.tax_rate {
            Some(rate) if !rate.is_finite() || rate < 0.0 => {
                return Err(BillingError::Validation(
                    "tax_rate must be a non-negative number".to_string(),
                )
                .into())
            }
            Some(rate) => parse_decimal(rate, "tax_rate")?,
            None => self.checkout.default_tax_rate,
        };
        let bill_date = match non_blank(command.bill_date) {
            Some(raw) => parse_bill_date(&raw)?,
            None => now,
        };

        let membership_discount_percent = self.membership_discount(&bill, now).await?;
        let totals = calculate(
            &CheckoutInput {
                items: &bill.items,
                role: actor.role,
                manual_discount,
                membership_discount_percent,
                tax_rate,
            },
            &self.checkout,
        )?;

        let prepaid_package_id = non_blank(command.prepaid_package_id);
        if let Some(package_id) = &prepaid_package_id {
            let package = self.load_prepaid_package(&bill, package_id, now).await?;
            let available = to_decimal(package.remaining_balance);
            if available < totals.final_amount {
                return Err(BillingError::InsufficientPrepaidBalance {
                    available: package.remaining_balance,
                    required: self.money(totals.final_amount),
                }
                .into());
            }
        }

        let demand = product_demand(&bill.items);
        self.validate_stock(&bill, &demand).await?;

        let points = match bill.customer_id {
            Some(_) => loyalty_points(totals.final_amount, &self.loyalty),
            None => 0,
        };

        let bill = self
            .commit_checkout(
                bill,
                &totals,
                &demand,
                tax_rate,
                payment_mode,
                prepaid_package_id,
                bill_date,
                points,
                now,
            )
            .await?;

        if points > 0 {
            if let Some(customer_id) = &bill.customer_id {
                if let Err(e) = self.store.credit_loyalty_points(customer_id, points).await {
                    error!(
                        bill_id = %bill.id,
                        customer_id = %customer_id,
                        points,
                        error = ?e,
                        "Failed to credit loyalty points"
                    );
                }
            }
        }

        self.warn_low_stock(&bill, &demand).await;

        record_checkout_amount(&bill.branch_id, bill.final_amount);
        info!(
            bill_id = %bill.id,
            bill_number = bill.bill_number.as_deref().unwrap_or_default(),
            final_amount = bill.final_amount,
            payment_mode = bill.payment_mode.as_deref().unwrap_or_default(),
            "Bill checked out"
        );

        Ok(CheckoutReceipt {
            bill,
            already_completed: false,
        })
    }

    /// Discount percent from the customer's active membership, if any.
    async fn membership_discount(
        &self,
        bill: &Bill,
        now: DateTime<Utc>,
    ) -> Result<Option<Decimal>, AppError> {
        let Some(customer_id) = &bill.customer_id else {
            return Ok(None);
        };
        let Some(membership) = self.store.find_active_membership(customer_id, now).await? else {
            return Ok(None);
        };
        let Some(plan) = self.store.get_membership_plan(&membership.plan_id).await? else {
            warn!(
                membership_id = %membership.id,
                plan_id = %membership.plan_id,
                "Active membership references a missing plan"
            );
            return Ok(None);
        };

        Ok(Some(to_decimal(plan.allocated_discount)).filter(|pct| *pct > Decimal::ZERO))
    }

    async fn load_prepaid_package(
        &self,
        bill: &Bill,
        package_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PrepaidPackage, AppError> {
        let customer_id = bill.customer_id.as_deref().ok_or_else(|| {
            BillingError::Validation(
                "A prepaid package can only be used on a bill with a customer".to_string(),
            )
        })?;

        let package = self
            .store
            .get_prepaid_package(package_id)
            .await?
            .ok_or(BillingError::NotFound("Prepaid package"))?;

        if package.customer_id != customer_id {
            return Err(BillingError::Forbidden(
                "Prepaid package belongs to another customer".to_string(),
            )
            .into());
        }
        if package
            .branch_id
            .as_deref()
            .is_some_and(|branch| branch != bill.branch_id)
        {
            return Err(BillingError::Forbidden(
                "Prepaid package is not valid in this branch".to_string(),
            )
            .into());
        }
        if package.status != PrepaidStatus::Active || package.is_expired_at(now) {
            return Err(BillingError::Validation(format!(
                "Prepaid package is not active (status: {})",
                if package.is_expired_at(now) {
                    PrepaidStatus::Expired.as_str()
                } else {
                    package.status.as_str()
                }
            ))
            .into());
        }
        Ok(package)
    }

    async fn validate_stock(
        &self,
        bill: &Bill,
        demand: &BTreeMap<String, i64>,
    ) -> Result<(), AppError> {
        for (product_id, quantity) in demand {
            let product = self
                .store
                .get_product(product_id)
                .await?
                .ok_or(BillingError::NotFound("Product"))?;

            if product.branch_id != bill.branch_id {
                return Err(BillingError::Forbidden(format!(
                    "{} does not belong to this branch",
                    product.name
                ))
                .into());
            }
            if product.stock_quantity < *quantity {
                return Err(BillingError::InsufficientStock {
                    product: product.name,
                    available: product.stock_quantity,
                    requested: *quantity,
                }
                .into());
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_checkout(
        &self,
        mut bill: Bill,
        totals: &CheckoutTotals,
        demand: &BTreeMap<String, i64>,
        tax_rate: Decimal,
        payment_mode: String,
        prepaid_package_id: Option<String>,
        bill_date: DateTime<Utc>,
        points: i64,
        now: DateTime<Utc>,
    ) -> Result<Bill, AppError> {
        let mut deducted: Vec<(String, i64)> = Vec::with_capacity(demand.len());
        for (product_id, quantity) in demand {
            match self.store.decrement_stock(product_id, *quantity).await {
                Ok(true) => deducted.push((product_id.clone(), *quantity)),
                Ok(false) => {
                    self.restore_stock(&deducted).await;
                    let product = self.store.get_product(product_id).await?;
                    return Err(BillingError::InsufficientStock {
                        product: product
                            .as_ref()
                            .map_or_else(|| product_id.clone(), |p| p.name.clone()),
                        available: product.map_or(0, |p| p.stock_quantity),
                        requested: *quantity,
                    }
                    .into());
                }
                Err(e) => {
                    self.restore_stock(&deducted).await;
                    return Err(e);
                }
            }
        }

        if let Some(package_id) = &prepaid_package_id {
            match self.store.debit_prepaid(package_id, totals.final_amount).await {
                Ok(Some(package)) => {
                    info!(
                        prepaid_package_id = %package.id,
                        remaining_balance = package.remaining_balance,
                        status = package.status.as_str(),
                        "Prepaid package debited"
                    );
                }
                Ok(None) => {
                    self.restore_stock(&deducted).await;
                    let available = self
                        .store
                        .get_prepaid_package(package_id)
                        .await?
                        .map_or(0.0, |p| p.remaining_balance);
                    return Err(BillingError::InsufficientPrepaidBalance {
                        available,
                        required: self.money(totals.final_amount),
                    }
                    .into());
                }
                Err(e) => {
                    self.restore_stock(&deducted).await;
                    return Err(e);
                }
            }
        }

        let finalization = match self.store.next_bill_sequence(&bill.branch_id).await {
            Ok(seq) => BillFinalization {
                bill_number: format!("{}-{:06}", self.checkout.bill_number_prefix, seq),
                bill_date,
                subtotal: self.money(totals.subtotal),
                discount_amount: self.money(totals.discount_amount),
                discount_type: totals.discount_type,
                tax_rate: tax_rate.to_f64().unwrap_or_default(),
                tax_amount: self.money(totals.tax_amount),
                final_amount: self.money(totals.final_amount),
                payment_mode,
                prepaid_package_id: prepaid_package_id.clone(),
                loyalty_points_earned: points,
                booking_status: BookingStatus::ServiceCompleted,
                completed_at: now,
                updated_at: now,
            },
            Err(e) => {
                self.undo_commit(&deducted, prepaid_package_id.as_deref(), totals.final_amount)
                    .await;
                return Err(e);
            }
        };

        match self
            .store
            .finalize_bill(&bill.id, bill.version, &finalization)
            .await
        {
            Ok(true) => {
                finalization.apply_to(&mut bill);
                Ok(bill)
            }
            Ok(false) => {
                self.undo_commit(&deducted, prepaid_package_id.as_deref(), totals.final_amount)
                    .await;
                warn!(bill_id = %bill.id, "Bill changed during checkout, commit rolled back");
                Err(BillingError::Conflict(
                    "Bill was modified concurrently, reload and retry".to_string(),
                )
                .into())
            }
            Err(e) => {
                self.undo_commit(&deducted, prepaid_package_id.as_deref(), totals.final_amount)
                    .await;
                Err(e)
            }
        }
    }

    async fn undo_commit(
        &self,
        deducted: &[(String, i64)],
        package_id: Option<&str>,
        amount: Decimal,
    ) {
        if let Some(package_id) = package_id {
            if let Err(e) = self.store.credit_prepaid(package_id, amount).await {
                error!(
                    prepaid_package_id = %package_id,
                    amount = %amount,
                    error = ?e,
                    "Failed to refund prepaid package"
                );
            }
        }
        self.restore_stock(deducted).await;
    }

    async fn restore_stock(&self, deducted: &[(String, i64)]) {
        for (product_id, quantity) in deducted {
            if let Err(e) = self.store.increment_stock(product_id, *quantity).await {
                error!(product_id = %product_id, quantity, error = ?e, "Failed to restore stock");
            }
        }
    }

    async fn warn_low_stock(&self, bill: &Bill, demand: &BTreeMap<String, i64>) {
        for product_id in demand.keys() {
            match self.store.get_product(product_id).await {
                Ok(Some(product)) if product.stock_quantity <= product.min_stock_level => {
                    warn!(
                        product_id = %product.id,
                        product = %product.name,
                        stock_quantity = product.stock_quantity,
                        min_stock_level = product.min_stock_level,
                        "Product stock at or below minimum level"
                    );
                    record_low_stock(&bill.branch_id, &product.id);
                }
                Ok(_) => {}
                Err(e) => warn!(product_id = %product_id, error = ?e, "Low stock check failed"),
            }
        }
    }

    /// Soft-delete a bill, returning stock taken by a completed checkout.
    #[instrument(skip(self, actor), fields(branch_id = %actor.branch_id))]
    pub async fn delete_bill(&self, actor: &ActorContext, bill_id: &str) -> Result<(), AppError> {
        let bill = self.load_bill(actor, bill_id).await?;

        if !self.store.soft_delete_bill(&bill.id, Utc::now()).await? {
            return Err(BillingError::NotFound("Bill").into());
        }

        if bill.is_finalized() {
            for (product_id, quantity) in product_demand(&bill.items) {
                match self.store.get_product(&product_id).await {
                    Ok(Some(product)) if product.branch_id == bill.branch_id => {
                        if let Err(e) = self.store.increment_stock(&product_id, quantity).await {
                            error!(product_id = %product_id, quantity, error = ?e, "Failed to restore stock");
                        }
                    }
                    Ok(_) => {
                        warn!(product_id = %product_id, "Skipping stock restore for product outside the bill's branch");
                    }
                    Err(e) => {
                        error!(product_id = %product_id, error = ?e, "Failed to load product for stock restore");
                    }
                }
            }
        }

        info!(bill_id = %bill.id, completed = bill.is_finalized(), "Bill deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Product, Role};
    use crate::services::memory::InMemoryStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    /// Delegates to the in-memory store but loses every finalization race.
    struct RacingStore(Arc<InMemoryStore>);

    #[async_trait]
    impl BillingStore for RacingStore {
        async fn health_check(&self) -> Result<(), AppError> {
            self.0.health_check().await
        }
        async fn insert_bill(&self, bill: &Bill) -> Result<(), AppError> {
            self.0.insert_bill(bill).await
        }
        async fn get_bill(&self, bill_id: &str) -> Result<Option<Bill>, AppError> {
            self.0.get_bill(bill_id).await
        }
        async fn find_open_bill_for_appointment(
            &self,
            branch_id: &str,
            appointment_id: &str,
        ) -> Result<Option<Bill>, AppError> {
            self.0.find_open_bill_for_appointment(branch_id, appointment_id).await
        }
        async fn list_bills(&self, filter: &ListBillsFilter) -> Result<(Vec<Bill>, u64), AppError> {
            self.0.list_bills(filter).await
        }
        async fn update_items(
            &self,
            bill_id: &str,
            expected_version: i64,
            items: &[BillItem],
            subtotal: f64,
        ) -> Result<bool, AppError> {
            self.0.update_items(bill_id, expected_version, items, subtotal).await
        }
        async fn finalize_bill(
            &self,
            _bill_id: &str,
            _expected_version: i64,
            _finalization: &BillFinalization,
        ) -> Result<bool, AppError> {
            Ok(false)
        }
        async fn soft_delete_bill(&self, bill_id: &str, at: DateTime<Utc>) -> Result<bool, AppError> {
            self.0.soft_delete_bill(bill_id, at).await
        }
        async fn next_bill_sequence(&self, branch_id: &str) -> Result<u64, AppError> {
            self.0.next_bill_sequence(branch_id).await
        }
        async fn find_catalog_entry(
            &self,
            item_type: ItemType,
            ref_id: &str,
        ) -> Result<Option<CatalogEntry>, AppError> {
            self.0.find_catalog_entry(item_type, ref_id).await
        }
        async fn get_product(&self, product_id: &str) -> Result<Option<Product>, AppError> {
            self.0.get_product(product_id).await
        }
        async fn decrement_stock(&self, product_id: &str, quantity: i64) -> Result<bool, AppError> {
            self.0.decrement_stock(product_id, quantity).await
        }
        async fn increment_stock(&self, product_id: &str, quantity: i64) -> Result<(), AppError> {
            self.0.increment_stock(product_id, quantity).await
        }
        async fn find_active_membership(
            &self,
            customer_id: &str,
            now: DateTime<Utc>,
        ) -> Result<Option<crate::models::Membership>, AppError> {
            self.0.find_active_membership(customer_id, now).await
        }
        async fn get_membership_plan(
            &self,
            plan_id: &str,
        ) -> Result<Option<crate::models::MembershipPlan>, AppError> {
            self.0.get_membership_plan(plan_id).await
        }
        async fn get_prepaid_package(
            &self,
            package_id: &str,
        ) -> Result<Option<PrepaidPackage>, AppError> {
            self.0.get_prepaid_package(package_id).await
        }
        async fn debit_prepaid(
            &self,
            package_id: &str,
            amount: Decimal,
        ) -> Result<Option<PrepaidPackage>, AppError> {
            self.0.debit_prepaid(package_id, amount).await
        }
        async fn credit_prepaid(&self, package_id: &str, amount: Decimal) -> Result<(), AppError> {
            self.0.credit_prepaid(package_id, amount).await
        }
        async fn credit_loyalty_points(&self, customer_id: &str, points: i64) -> Result<(), AppError> {
            self.0.credit_loyalty_points(customer_id, points).await
        }
    }

    fn owner() -> ActorContext {
        ActorContext::new("owner-1", Role::Owner, "b1")
    }

    fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.insert_product(Product {
            id: "p1".into(),
            branch_id: "b1".into(),
            name: "Shampoo".into(),
            price: 250.0,
            stock_quantity: 5,
            min_stock_level: 1,
            is_active: true,
        });
        store.insert_prepaid_package(PrepaidPackage {
            id: "pp1".into(),
            customer_id: "c1".into(),
            branch_id: None,
            remaining_balance: 1000.0,
            status: PrepaidStatus::Active,
            expiry_date: None,
        });
        store
    }

    fn product_line(quantity: i64) -> NewBillItem {
        NewBillItem {
            item_type: ItemType::Product,
            ref_id: "p1".into(),
            quantity,
            discount: 0.0,
            staff_id: None,
        }
    }

    #[test]
    fn parses_both_bill_date_formats() {
        let date = parse_bill_date("2024-03-01").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        let ts = parse_bill_date("2024-03-01T10:30:00+05:30").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T05:00:00+00:00");

        assert!(parse_bill_date("01/03/2024").is_err());
    }

    #[test]
    fn demand_sums_product_lines_only() {
        let line = |item_type, ref_id: &str, quantity| BillItem {
            item_type,
            ref_id: ref_id.into(),
            name: ref_id.into(),
            unit_price: 1.0,
            quantity,
            discount: 0.0,
            total: quantity as f64,
            staff_id: None,
        };
        let demand = product_demand(&[
            line(ItemType::Product, "p1", 2),
            line(ItemType::Service, "s1", 1),
            line(ItemType::Product, "p1", 3),
        ]);
        assert_eq!(demand.len(), 1);
        assert_eq!(demand["p1"], 5);
    }

    #[tokio::test]
    async fn lost_finalization_race_rolls_back_stock_and_prepaid() {
        let memory = seeded_store();
        let service = BillingService::new(
            Arc::new(RacingStore(memory.clone())),
            CheckoutSettings::default(),
            LoyaltySettings::default(),
        );
        let actor = owner();

        let (bill, _) = service
            .create_draft(&actor, Some("c1".into()), None)
            .await
            .unwrap();
        service.add_item(&actor, &bill.id, product_line(2)).await.unwrap();

        let err = service
            .checkout(
                &actor,
                &bill.id,
                CheckoutCommand {
                    payment_mode: Some("prepaid".into()),
                    prepaid_package_id: Some("pp1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(memory.product("p1").unwrap().stock_quantity, 5);
        let package = memory.prepaid_package("pp1").unwrap();
        assert_eq!(package.remaining_balance, 1000.0);
        assert_eq!(package.status, PrepaidStatus::Active);
        assert!(!memory.bill(&bill.id).unwrap().is_finalized());
    }

    #[tokio::test]
    async fn checkout_debits_prepaid_and_marks_used_when_exhausted() {
        let memory = seeded_store();
        let service = BillingService::new(
            memory.clone(),
            CheckoutSettings::default(),
            LoyaltySettings::default(),
        );
        let actor = owner();

        let (bill, _) = service
            .create_draft(&actor, Some("c1".into()), None)
            .await
            .unwrap();
        service.add_item(&actor, &bill.id, product_line(4)).await.unwrap();

        let receipt = service
            .checkout(
                &actor,
                &bill.id,
                CheckoutCommand {
                    payment_mode: Some("prepaid".into()),
                    prepaid_package_id: Some("pp1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(receipt.bill.final_amount, 1000.0);
        assert_eq!(receipt.bill.bill_number.as_deref(), Some("BILL-000001"));
        let package = memory.prepaid_package("pp1").unwrap();
        assert_eq!(package.remaining_balance, 0.0);
        assert_eq!(package.status, PrepaidStatus::Used);
        assert_eq!(memory.product("p1").unwrap().stock_quantity, 1);
    }

    #[tokio::test]
    async fn line_discount_respects_role_ceiling() {
        let memory = seeded_store();
        let mut settings = CheckoutSettings::default();
        settings.discount_ceilings.manager_percent = dec!(10);
        let service = BillingService::new(memory, settings, LoyaltySettings::default());
        let manager = ActorContext::new("m1", Role::Manager, "b1");

        let (bill, _) = service.create_draft(&manager, None, None).await.unwrap();

        let mut line = product_line(2);
        line.discount = 60.0;
        let err = service.add_item(&manager, &bill.id, line).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let mut line = product_line(2);
        line.discount = 50.0;
        let bill = service.add_item(&manager, &bill.id, line).await.unwrap();
        assert_eq!(bill.items[0].total, 450.0);
        assert_eq!(bill.subtotal, 450.0);
    }

    #[tokio::test]
    async fn staff_line_discount_is_forbidden_however_it_converts() {
        let memory = seeded_store();
        let service =
            BillingService::new(memory, CheckoutSettings::default(), LoyaltySettings::default());
        let staff = ActorContext::new("s1", Role::Staff, "b1");

        let (bill, _) = service.create_draft(&staff, None, None).await.unwrap();
        for discount in [1e30, 1e-30] {
            let mut line = product_line(1);
            line.discount = discount;
            let err = service.add_item(&staff, &bill.id, line).await.unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)), "discount {}", discount);
        }

        let bill = service.get_bill(&staff, &bill.id).await.unwrap();
        assert!(bill.items.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_tax_rate_is_rejected() {
        let memory = seeded_store();
        let service = BillingService::new(
            memory.clone(),
            CheckoutSettings::default(),
            LoyaltySettings::default(),
        );
        let actor = owner();

        let (bill, _) = service.create_draft(&actor, None, None).await.unwrap();
        service.add_item(&actor, &bill.id, product_line(1)).await.unwrap();

        for tax_rate in [1e30, 250.0] {
            let err = service
                .checkout(
                    &actor,
                    &bill.id,
                    CheckoutCommand {
                        payment_mode: Some("cash".into()),
                        tax_rate: Some(tax_rate),
                        ..Default::default()
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "tax_rate {}", tax_rate);
        }
        assert_eq!(memory.product("p1").unwrap().stock_quantity, 5);
    }

    #[tokio::test]
    async fn loyalty_points_are_credited_to_customer() {
        let memory = seeded_store();
        let loyalty = LoyaltySettings {
            enabled: true,
            amount_per_point: dec!(100),
        };
        let service = BillingService::new(memory.clone(), CheckoutSettings::default(), loyalty);
        let actor = owner();

        let (bill, _) = service
            .create_draft(&actor, Some("c1".into()), None)
            .await
            .unwrap();
        service.add_item(&actor, &bill.id, product_line(3)).await.unwrap();
        let receipt = service
            .checkout(
                &actor,
                &bill.id,
                CheckoutCommand {
                    payment_mode: Some("card".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(receipt.bill.loyalty_points_earned, 7);
        assert_eq!(memory.loyalty_points("c1"), 7);
    }
}
