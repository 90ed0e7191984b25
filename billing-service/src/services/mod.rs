//! Services module for salon-billing-service.

pub mod billing;
pub mod checkout;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod money;
pub mod mongo;
pub mod store;

pub use billing::{BillingService, CheckoutCommand, CheckoutReceipt, NewBillItem};
pub use error::BillingError;
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use mongo::MongoStore;
pub use store::BillingStore;
