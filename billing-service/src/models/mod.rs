//! Domain models for salon-billing-service.

mod bill;
mod catalog;
mod membership;
mod prepaid;
mod role;

pub use bill::{
    Bill, BillFinalization, BillItem, BookingStatus, DiscountType, ItemType, ListBillsFilter,
};
pub use catalog::{CatalogEntry, Product};
pub use membership::{Membership, MembershipPlan, MembershipStatus};
pub use prepaid::{PrepaidPackage, PrepaidStatus};
pub use role::Role;

// Helper module for optional DateTime<Utc> as BSON DateTime
pub(crate) mod opt_chrono_datetime_as_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(dt) => bson::DateTime::from_chrono(*dt).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<bson::DateTime> = Option::deserialize(deserializer)?;
        Ok(opt.map(|dt| dt.to_chrono()))
    }
}
