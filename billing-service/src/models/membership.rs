//! Customer memberships and their plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Active,
    Expired,
    Cancelled,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Expired => "expired",
            MembershipStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    #[serde(rename = "_id")]
    pub id: String,
    pub customer_id: String,
    pub plan_id: String,
    pub status: MembershipStatus,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expiry_date: DateTime<Utc>,
}

impl Membership {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == MembershipStatus::Active && self.expiry_date > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipPlan {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub price: f64,
    /// Percentage discount granted on every bill.
    #[serde(default)]
    pub allocated_discount: f64,
    #[serde(default)]
    pub branch_id: Option<String>,
}
