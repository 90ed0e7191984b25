use salon_core::error::AppError;
use thiserror::Error;

/// Business-rule failures raised by billing operations.
#[derive(Error, Debug, PartialEq)]
pub enum BillingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    #[error("Insufficient prepaid balance: available {available}, required {required}")]
    InsufficientPrepaidBalance { available: f64, required: f64 },

    #[error("{0}")]
    Conflict(String),
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        let message = anyhow::anyhow!(err.to_string());
        match err {
            BillingError::Validation(_)
            | BillingError::InsufficientStock { .. }
            | BillingError::InsufficientPrepaidBalance { .. } => AppError::BadRequest(message),
            BillingError::Forbidden(_) => AppError::Forbidden(message),
            BillingError::NotFound(_) => AppError::NotFound(message),
            BillingError::Conflict(_) => AppError::Conflict(message),
        }
    }
}
