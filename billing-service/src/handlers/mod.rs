pub mod bills;
pub mod health;

pub use bills::{add_item, checkout, create_bill, delete_bill, get_bill, list_bills, remove_item};
pub use health::{health_check, metrics_handler, readiness_check};
