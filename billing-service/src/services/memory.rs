//! In-process billing store.
//!
//! Backs the `memory` store backend and the test suite. A single mutex guards
//! all collections, so every conditional update is atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use salon_core::error::AppError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::models::{
    Bill, BillFinalization, BillItem, BookingStatus, CatalogEntry, ItemType, ListBillsFilter,
    Membership, MembershipPlan, PrepaidPackage, PrepaidStatus, Product,
};
use crate::services::money::to_decimal;
use crate::services::store::BillingStore;

#[derive(Default)]
struct MemoryState {
    bills: HashMap<String, Bill>,
    sequences: HashMap<String, u64>,
    products: HashMap<String, Product>,
    catalog: HashMap<(ItemType, String), CatalogEntry>,
    memberships: Vec<Membership>,
    membership_plans: HashMap<String, MembershipPlan>,
    prepaid_packages: HashMap<String, PrepaidPackage>,
    loyalty_points: HashMap<String, i64>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, AppError> {
        self.state
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_product(&self, product: Product) {
        self.lock().products.insert(product.id.clone(), product);
    }

    pub fn insert_catalog_entry(&self, item_type: ItemType, entry: CatalogEntry) {
        self.lock().catalog.insert((item_type, entry.id.clone()), entry);
    }

    /// Membership plans double as `membership` catalog entries.
    pub fn insert_membership_plan(&self, plan: MembershipPlan) {
        let mut state = self.lock();
        state.catalog.insert(
            (ItemType::Membership, plan.id.clone()),
            CatalogEntry {
                id: plan.id.clone(),
                name: plan.name.clone(),
                price: plan.price,
                branch_id: plan.branch_id.clone(),
                is_active: true,
            },
        );
        state.membership_plans.insert(plan.id.clone(), plan);
    }

    pub fn insert_membership(&self, membership: Membership) {
        self.lock().memberships.push(membership);
    }

    pub fn insert_prepaid_package(&self, package: PrepaidPackage) {
        self.lock().prepaid_packages.insert(package.id.clone(), package);
    }

    pub fn product(&self, product_id: &str) -> Option<Product> {
        self.lock().products.get(product_id).cloned()
    }

    pub fn prepaid_package(&self, package_id: &str) -> Option<PrepaidPackage> {
        self.lock().prepaid_packages.get(package_id).cloned()
    }

    pub fn bill(&self, bill_id: &str) -> Option<Bill> {
        self.lock().bills.get(bill_id).cloned()
    }

    pub fn loyalty_points(&self, customer_id: &str) -> i64 {
        self.lock()
            .loyalty_points
            .get(customer_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.state().map(|_| ())
    }

    async fn insert_bill(&self, bill: &Bill) -> Result<(), AppError> {
        let mut state = self.state()?;
        if state.bills.contains_key(&bill.id) {
            return Err(AppError::Conflict(anyhow::anyhow!("Bill already exists")));
        }
        state.bills.insert(bill.id.clone(), bill.clone());
        Ok(())
    }

    async fn get_bill(&self, bill_id: &str) -> Result<Option<Bill>, AppError> {
        Ok(self.state()?.bills.get(bill_id).cloned())
    }

    async fn find_open_bill_for_appointment(
        &self,
        branch_id: &str,
        appointment_id: &str,
    ) -> Result<Option<Bill>, AppError> {
        let state = self.state()?;
        Ok(state
            .bills
            .values()
            .filter(|b| {
                b.branch_id == branch_id
                    && b.appointment_id.as_deref() == Some(appointment_id)
                    && b.booking_status == BookingStatus::Pending
                    && !b.is_deleted
            })
            .max_by_key(|b| b.created_at)
            .cloned())
    }

    async fn list_bills(&self, filter: &ListBillsFilter) -> Result<(Vec<Bill>, u64), AppError> {
        let state = self.state()?;
        let mut bills: Vec<Bill> = state
            .bills
            .values()
            .filter(|b| {
                b.branch_id == filter.branch_id
                    && !b.is_deleted
                    && filter.status.map_or(true, |s| b.booking_status == s)
                    && filter
                        .customer_id
                        .as_deref()
                        .map_or(true, |c| b.customer_id.as_deref() == Some(c))
            })
            .cloned()
            .collect();
        bills.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = bills.len() as u64;
        let skip = (filter.page.saturating_sub(1) * filter.page_size) as usize;
        let page = bills
            .into_iter()
            .skip(skip)
            .take(filter.page_size as usize)
            .collect();
        Ok((page, total))
    }

    async fn update_items(
        &self,
        bill_id: &str,
        expected_version: i64,
        items: &[BillItem],
        subtotal: f64,
    ) -> Result<bool, AppError> {
        let mut state = self.state()?;
        match state.bills.get_mut(bill_id) {
            Some(bill)
                if bill.version == expected_version
                    && bill.booking_status == BookingStatus::Pending
                    && !bill.is_deleted =>
            {
                bill.items = items.to_vec();
                bill.subtotal = subtotal;
                bill.version += 1;
                bill.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize_bill(
        &self,
        bill_id: &str,
        expected_version: i64,
        finalization: &BillFinalization,
    ) -> Result<bool, AppError> {
        let mut state = self.state()?;
        match state.bills.get_mut(bill_id) {
            Some(bill)
                if bill.version == expected_version
                    && bill.payment_mode.is_none()
                    && !bill.is_deleted =>
            {
                finalization.apply_to(bill);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn soft_delete_bill(&self, bill_id: &str, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state()?;
        match state.bills.get_mut(bill_id) {
            Some(bill) if !bill.is_deleted => {
                bill.is_deleted = true;
                bill.deleted_at = Some(at);
                bill.updated_at = at;
                bill.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn next_bill_sequence(&self, branch_id: &str) -> Result<u64, AppError> {
        let mut state = self.state()?;
        let seq = state.sequences.entry(branch_id.to_string()).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }

    async fn find_catalog_entry(
        &self,
        item_type: ItemType,
        ref_id: &str,
    ) -> Result<Option<CatalogEntry>, AppError> {
        let state = self.state()?;
        if item_type == ItemType::Product {
            return Ok(state.products.get(ref_id).cloned().map(CatalogEntry::from));
        }
        Ok(state.catalog.get(&(item_type, ref_id.to_string())).cloned())
    }

    async fn get_product(&self, product_id: &str) -> Result<Option<Product>, AppError> {
        Ok(self.state()?.products.get(product_id).cloned())
    }

    async fn decrement_stock(&self, product_id: &str, quantity: i64) -> Result<bool, AppError> {
        let mut state = self.state()?;
        match state.products.get_mut(product_id) {
            Some(product) if product.stock_quantity >= quantity => {
                product.stock_quantity -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_stock(&self, product_id: &str, quantity: i64) -> Result<(), AppError> {
        let mut state = self.state()?;
        if let Some(product) = state.products.get_mut(product_id) {
            product.stock_quantity = (product.stock_quantity + quantity).max(0);
        }
        Ok(())
    }

    async fn find_active_membership(
        &self,
        customer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Membership>, AppError> {
        let state = self.state()?;
        Ok(state
            .memberships
            .iter()
            .filter(|m| m.customer_id == customer_id && m.is_active_at(now))
            .max_by_key(|m| m.expiry_date)
            .cloned())
    }

    async fn get_membership_plan(&self, plan_id: &str) -> Result<Option<MembershipPlan>, AppError> {
        Ok(self.state()?.membership_plans.get(plan_id).cloned())
    }

    async fn get_prepaid_package(
        &self,
        package_id: &str,
    ) -> Result<Option<PrepaidPackage>, AppError> {
        Ok(self.state()?.prepaid_packages.get(package_id).cloned())
    }

    async fn debit_prepaid(
        &self,
        package_id: &str,
        amount: Decimal,
    ) -> Result<Option<PrepaidPackage>, AppError> {
        let mut state = self.state()?;
        let Some(package) = state.prepaid_packages.get_mut(package_id) else {
            return Ok(None);
        };
        let balance = to_decimal(package.remaining_balance);
        if package.status != PrepaidStatus::Active || balance < amount {
            return Ok(None);
        }

        let remaining = balance - amount;
        package.remaining_balance = remaining.to_f64().unwrap_or_default();
        if remaining <= Decimal::ZERO {
            package.remaining_balance = 0.0;
            package.status = PrepaidStatus::Used;
        }
        Ok(Some(package.clone()))
    }

    async fn credit_prepaid(&self, package_id: &str, amount: Decimal) -> Result<(), AppError> {
        let mut state = self.state()?;
        if let Some(package) = state.prepaid_packages.get_mut(package_id) {
            let balance = to_decimal(package.remaining_balance) + amount;
            package.remaining_balance = balance.to_f64().unwrap_or_default();
            package.status = PrepaidStatus::Active;
        }
        Ok(())
    }

    async fn credit_loyalty_points(&self, customer_id: &str, points: i64) -> Result<(), AppError> {
        let mut state = self.state()?;
        *state
            .loyalty_points
            .entry(customer_id.to_string())
            .or_insert(0) += points;
        Ok(())
    }
}
