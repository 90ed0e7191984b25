//! Bill model for salon-billing-service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::opt_chrono_datetime_as_bson_datetime;

/// Kind of catalog entity a bill line refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Service,
    Product,
    Package,
    Prepaid,
    Membership,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Service => "service",
            ItemType::Product => "product",
            ItemType::Package => "package",
            ItemType::Prepaid => "prepaid",
            ItemType::Membership => "membership",
        }
    }

    /// Collection holding the catalog entries for this item type.
    pub fn catalog_collection(&self) -> &'static str {
        match self {
            ItemType::Service => "services",
            ItemType::Product => "products",
            ItemType::Package => "packages",
            ItemType::Prepaid => "prepaid_plans",
            ItemType::Membership => "membership_plans",
        }
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "service" => Ok(ItemType::Service),
            "product" => Ok(ItemType::Product),
            "package" => Ok(ItemType::Package),
            "prepaid" => Ok(ItemType::Prepaid),
            "membership" => Ok(ItemType::Membership),
            other => Err(format!("Invalid item type: {}", other)),
        }
    }
}

/// Booking status of a bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    ServiceCompleted,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::ServiceCompleted => "service-completed",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "service-completed" => Ok(BookingStatus::ServiceCompleted),
            other => Err(format!("Invalid booking status: {}", other)),
        }
    }
}

/// Source of the discount applied at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Fix,
    Percentage,
    Membership,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Fix => "fix",
            DiscountType::Percentage => "percentage",
            DiscountType::Membership => "membership",
        }
    }
}

/// One sold unit on a bill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillItem {
    pub item_type: ItemType,
    pub ref_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: i64,
    pub discount: f64,
    pub total: f64,
    pub staff_id: Option<String>,
}

/// Bill document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    #[serde(rename = "_id")]
    pub id: String,
    pub bill_number: Option<String>,
    pub branch_id: String,
    pub customer_id: Option<String>,
    pub appointment_id: Option<String>,
    pub created_by: String,
    pub items: Vec<BillItem>,
    pub subtotal: f64,
    pub discount_amount: f64,
    pub discount_type: Option<DiscountType>,
    pub tax_rate: f64,
    pub tax_amount: f64,
    pub final_amount: f64,
    pub payment_mode: Option<String>,
    pub prepaid_package_id: Option<String>,
    #[serde(default)]
    pub loyalty_points_earned: i64,
    pub booking_status: BookingStatus,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub version: i64,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub bill_date: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Bill {
    /// Create an empty draft bill in `branch_id`.
    pub fn new_draft(
        branch_id: String,
        customer_id: Option<String>,
        appointment_id: Option<String>,
        created_by: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            bill_number: None,
            branch_id,
            customer_id,
            appointment_id,
            created_by,
            items: Vec::new(),
            subtotal: 0.0,
            discount_amount: 0.0,
            discount_type: None,
            tax_rate: 0.0,
            tax_amount: 0.0,
            final_amount: 0.0,
            payment_mode: None,
            prepaid_package_id: None,
            loyalty_points_earned: 0,
            booking_status: BookingStatus::Pending,
            is_deleted: false,
            version: 0,
            bill_date: now,
            created_at: now,
            updated_at: now,
            completed_at: None,
            deleted_at: None,
        }
    }

    /// A bill counts as checked out once it is completed with a payment mode.
    /// Stock has already been deducted for such a bill.
    pub fn is_finalized(&self) -> bool {
        self.booking_status == BookingStatus::ServiceCompleted && self.payment_mode.is_some()
    }

    /// Total quantity of `product_id` across the bill's product lines.
    pub fn product_quantity(&self, product_id: &str) -> i64 {
        self.items
            .iter()
            .filter(|item| item.item_type == ItemType::Product && item.ref_id == product_id)
            .map(|item| item.quantity)
            .sum()
    }
}

/// Fields written when a bill is checked out.
#[derive(Debug, Clone, Serialize)]
pub struct BillFinalization {
    pub bill_number: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub bill_date: DateTime<Utc>,
    pub subtotal: f64,
    pub discount_amount: f64,
    pub discount_type: Option<DiscountType>,
    pub tax_rate: f64,
    pub tax_amount: f64,
    pub final_amount: f64,
    pub payment_mode: String,
    pub prepaid_package_id: Option<String>,
    pub loyalty_points_earned: i64,
    pub booking_status: BookingStatus,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub completed_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl BillFinalization {
    /// Apply the finalization to an in-memory bill copy.
    pub fn apply_to(&self, bill: &mut Bill) {
        bill.bill_number = Some(self.bill_number.clone());
        bill.bill_date = self.bill_date;
        bill.subtotal = self.subtotal;
        bill.discount_amount = self.discount_amount;
        bill.discount_type = self.discount_type;
        bill.tax_rate = self.tax_rate;
        bill.tax_amount = self.tax_amount;
        bill.final_amount = self.final_amount;
        bill.payment_mode = Some(self.payment_mode.clone());
        bill.prepaid_package_id = self.prepaid_package_id.clone();
        bill.loyalty_points_earned = self.loyalty_points_earned;
        bill.booking_status = self.booking_status;
        bill.completed_at = Some(self.completed_at);
        bill.updated_at = self.updated_at;
        bill.version += 1;
    }
}

/// Filter parameters for listing bills.
#[derive(Debug, Clone)]
pub struct ListBillsFilter {
    pub branch_id: String,
    pub status: Option<BookingStatus>,
    pub customer_id: Option<String>,
    pub page: u64,
    pub page_size: u64,
}
