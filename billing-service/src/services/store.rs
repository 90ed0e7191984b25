//! Persistence seam for billing.
//!
//! Every mutation is a single-document conditional update so concurrent
//! requests cannot overdraw stock or prepaid balances, or double-finalize a
//! bill.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use salon_core::error::AppError;

use crate::models::{
    Bill, BillFinalization, BillItem, CatalogEntry, ItemType, ListBillsFilter, Membership,
    MembershipPlan, PrepaidPackage, Product,
};

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // ---------------------------------------------------------------------
    // Bills
    // ---------------------------------------------------------------------

    async fn insert_bill(&self, bill: &Bill) -> Result<(), AppError>;

    /// Fetch a bill by id, including soft-deleted ones.
    async fn get_bill(&self, bill_id: &str) -> Result<Option<Bill>, AppError>;

    /// Open (pending, not deleted) bill for an appointment in a branch.
    async fn find_open_bill_for_appointment(
        &self,
        branch_id: &str,
        appointment_id: &str,
    ) -> Result<Option<Bill>, AppError>;

    /// Non-deleted bills matching the filter, newest first, with total count.
    async fn list_bills(&self, filter: &ListBillsFilter) -> Result<(Vec<Bill>, u64), AppError>;

    /// Replace the item list of a pending bill whose version is still
    /// `expected_version`. Returns false when the bill changed underneath.
    async fn update_items(
        &self,
        bill_id: &str,
        expected_version: i64,
        items: &[BillItem],
        subtotal: f64,
    ) -> Result<bool, AppError>;

    /// Mark a bill at `expected_version` that has no payment yet as checked out.
    async fn finalize_bill(
        &self,
        bill_id: &str,
        expected_version: i64,
        finalization: &BillFinalization,
    ) -> Result<bool, AppError>;

    /// Soft-delete a bill. Returns false if it was already deleted.
    async fn soft_delete_bill(&self, bill_id: &str, at: DateTime<Utc>) -> Result<bool, AppError>;

    /// Next bill number sequence value for a branch, starting at 1.
    async fn next_bill_sequence(&self, branch_id: &str) -> Result<u64, AppError>;

    // ---------------------------------------------------------------------
    // Catalog and stock
    // ---------------------------------------------------------------------

    /// Non-product catalog entry (service, package, prepaid plan, membership plan).
    async fn find_catalog_entry(
        &self,
        item_type: ItemType,
        ref_id: &str,
    ) -> Result<Option<CatalogEntry>, AppError>;

    async fn get_product(&self, product_id: &str) -> Result<Option<Product>, AppError>;

    /// Decrement stock only if at least `quantity` is available.
    async fn decrement_stock(&self, product_id: &str, quantity: i64) -> Result<bool, AppError>;

    async fn increment_stock(&self, product_id: &str, quantity: i64) -> Result<(), AppError>;

    // ---------------------------------------------------------------------
    // Memberships, prepaid packages, customers
    // ---------------------------------------------------------------------

    /// Active membership for a customer that has not expired at `now`.
    async fn find_active_membership(
        &self,
        customer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Membership>, AppError>;

    async fn get_membership_plan(&self, plan_id: &str) -> Result<Option<MembershipPlan>, AppError>;

    async fn get_prepaid_package(
        &self,
        package_id: &str,
    ) -> Result<Option<PrepaidPackage>, AppError>;

    /// Debit an active package only if its balance covers `amount`; the
    /// package becomes `used` when the balance reaches zero. Returns the
    /// updated package, or None if the debit was not applied.
    async fn debit_prepaid(
        &self,
        package_id: &str,
        amount: Decimal,
    ) -> Result<Option<PrepaidPackage>, AppError>;

    /// Return `amount` to a package and reactivate it.
    async fn credit_prepaid(&self, package_id: &str, amount: Decimal) -> Result<(), AppError>;

    async fn credit_loyalty_points(&self, customer_id: &str, points: i64) -> Result<(), AppError>;
}
