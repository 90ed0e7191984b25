//! Catalog entities referenced by bill lines.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Retail product with tracked stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: String,
    pub branch_id: String,
    pub name: String,
    pub price: f64,
    pub stock_quantity: i64,
    #[serde(default)]
    pub min_stock_level: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Common projection over services, packages, prepaid plans and membership
/// plans. Entries without a branch are sold in every branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl CatalogEntry {
    pub fn available_in(&self, branch_id: &str) -> bool {
        self.branch_id.as_deref().map_or(true, |b| b == branch_id)
    }
}

impl From<Product> for CatalogEntry {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            name: product.name,
            price: product.price,
            branch_id: Some(product.branch_id),
            is_active: product.is_active,
        }
    }
}
