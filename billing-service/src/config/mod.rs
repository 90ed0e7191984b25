use rust_decimal::Decimal;
use salon_core::config as core_config;
use salon_core::error::AppError;
use secrecy::Secret;
use std::env;
use std::str::FromStr;

use crate::models::Role;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub mongodb: MongoConfig,
    pub checkout: CheckoutSettings,
    pub loyalty: LoyaltySettings,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: Secret<String>,
    pub database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongodb,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(StoreBackend::Mongodb),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

/// Rules applied when totalling and finalizing a bill.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// Decimal places kept on every stored amount.
    pub money_precision: u32,
    /// Tax percentage used when a checkout request omits `tax_rate`.
    pub default_tax_rate: Decimal,
    pub discount_ceilings: DiscountCeilings,
    pub bill_number_prefix: String,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            money_precision: 2,
            default_tax_rate: Decimal::ZERO,
            discount_ceilings: DiscountCeilings::default(),
            bill_number_prefix: "BILL".to_string(),
        }
    }
}

/// Maximum manual discount, as a percentage of the discounted amount, each
/// role may apply. Owners are never capped.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountCeilings {
    pub manager_percent: Decimal,
    pub staff_percent: Decimal,
}

impl Default for DiscountCeilings {
    fn default() -> Self {
        Self {
            manager_percent: Decimal::ZERO,
            staff_percent: Decimal::ZERO,
        }
    }
}

impl DiscountCeilings {
    /// `None` means the role may discount without limit.
    pub fn ceiling(&self, role: Role) -> Option<Decimal> {
        match role {
            Role::Owner => None,
            Role::Manager => Some(self.manager_percent),
            Role::Staff => Some(self.staff_percent),
        }
    }
}

/// Loyalty points accrual, loaded once at startup.
#[derive(Debug, Clone)]
pub struct LoyaltySettings {
    pub enabled: bool,
    /// Amount a customer must spend to earn one point.
    pub amount_per_point: Decimal,
}

impl Default for LoyaltySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            amount_per_point: Decimal::ONE_HUNDRED,
        }
    }
}

impl BillingConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_prod = lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string()) == "prod";
        let get = |key: &str, default: Option<&str>| get_env(&lookup, key, default, is_prod);

        let store = parse_value::<StoreBackend>("BILLING_STORE", &get("BILLING_STORE", Some("mongodb"))?)?;
        let uri = match store {
            StoreBackend::Mongodb => get("MONGODB_URI", None)?,
            StoreBackend::Memory => lookup("MONGODB_URI").unwrap_or_default(),
        };

        let checkout = CheckoutSettings {
            money_precision: parse_value(
                "CHECKOUT_MONEY_PRECISION",
                &get("CHECKOUT_MONEY_PRECISION", Some("2"))?,
            )?,
            default_tax_rate: parse_value(
                "CHECKOUT_DEFAULT_TAX_RATE",
                &get("CHECKOUT_DEFAULT_TAX_RATE", Some("0"))?,
            )?,
            discount_ceilings: DiscountCeilings {
                manager_percent: parse_value(
                    "CHECKOUT_MANAGER_MAX_DISCOUNT_PERCENT",
                    &get("CHECKOUT_MANAGER_MAX_DISCOUNT_PERCENT", Some("0"))?,
                )?,
                staff_percent: parse_value(
                    "CHECKOUT_STAFF_MAX_DISCOUNT_PERCENT",
                    &get("CHECKOUT_STAFF_MAX_DISCOUNT_PERCENT", Some("0"))?,
                )?,
            },
            bill_number_prefix: get("BILL_NUMBER_PREFIX", Some("BILL"))?,
        };

        if checkout.money_precision > 6 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CHECKOUT_MONEY_PRECISION must be between 0 and 6"
            )));
        }
        if checkout.default_tax_rate.is_sign_negative() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CHECKOUT_DEFAULT_TAX_RATE must not be negative"
            )));
        }

        let loyalty = LoyaltySettings {
            enabled: parse_value("LOYALTY_ENABLED", &get("LOYALTY_ENABLED", Some("false"))?)?,
            amount_per_point: parse_value(
                "LOYALTY_AMOUNT_PER_POINT",
                &get("LOYALTY_AMOUNT_PER_POINT", Some("100"))?,
            )?,
        };

        if loyalty.enabled && loyalty.amount_per_point <= Decimal::ZERO {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LOYALTY_AMOUNT_PER_POINT must be positive"
            )));
        }

        Ok(BillingConfig {
            common,
            service_name: "salon-billing-service".to_string(),
            otlp_endpoint: lookup("OTLP_ENDPOINT").filter(|s| !s.is_empty()),
            store,
            mongodb: MongoConfig {
                uri: Secret::new(uri),
                database: get("MONGODB_DATABASE", Some("salon_billing"))?,
            },
            checkout,
            loyalty,
        })
    }
}

fn get_env<F>(lookup: &F, key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => Ok(val),
        None => {
            if is_prod && default.is_none() {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
    })
}
