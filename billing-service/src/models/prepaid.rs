//! Prepaid packages drawn down at checkout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::opt_chrono_datetime_as_bson_datetime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrepaidStatus {
    Active,
    Used,
    Expired,
}

impl PrepaidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrepaidStatus::Active => "active",
            PrepaidStatus::Used => "used",
            PrepaidStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepaidPackage {
    #[serde(rename = "_id")]
    pub id: String,
    pub customer_id: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    pub remaining_balance: f64,
    pub status: PrepaidStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub expiry_date: Option<DateTime<Utc>>,
}

impl PrepaidPackage {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PrepaidStatus::Expired || self.expiry_date.is_some_and(|d| d <= now)
    }
}
