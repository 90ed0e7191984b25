#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use salon_billing::config::BillingConfig;
use salon_billing::models::{
    CatalogEntry, ItemType, Membership, MembershipPlan, MembershipStatus, PrepaidPackage,
    PrepaidStatus, Product,
};
use salon_billing::services::InMemoryStore;
use salon_billing::startup::Application;
use salon_core::config::Config as CoreConfig;
use serde_json::{json, Value};
use std::sync::Arc;

pub const BRANCH_ID: &str = "branch-main";
pub const OTHER_BRANCH_ID: &str = "branch-north";
pub const OWNER_ID: &str = "user-owner";
pub const CUSTOMER_ID: &str = "customer-1";

pub struct TestApp {
    pub address: String,
    pub store: Arc<InMemoryStore>,
    pub client: Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with adjusted configuration, e.g. discount ceilings or loyalty.
    pub async fn spawn_with(configure: impl FnOnce(&mut BillingConfig)) -> Self {
        let common = CoreConfig {
            port: 0,
            log_level: "info".to_string(),
        };
        let mut config = BillingConfig::from_lookup(common, |key| match key {
            "BILLING_STORE" => Some("memory".to_string()),
            _ => None,
        })
        .expect("Failed to build test configuration");
        configure(&mut config);

        let store = Arc::new(InMemoryStore::new());
        let app = Application::build_with_store(config, store.clone())
            .await
            .expect("Failed to build test application");
        let address = format!("http://127.0.0.1:{}", app.port());

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = Client::new();
        for _ in 0..50 {
            if client.get(format!("{}/health", address)).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            store,
            client,
        }
    }

    // ---------------------------------------------------------------------
    // Seeding
    // ---------------------------------------------------------------------

    pub fn seed_product(&self, id: &str, price: f64, stock: i64) {
        self.seed_product_in(id, BRANCH_ID, price, stock, 0);
    }

    pub fn seed_product_in(&self, id: &str, branch_id: &str, price: f64, stock: i64, min_stock: i64) {
        self.store.insert_product(Product {
            id: id.to_string(),
            branch_id: branch_id.to_string(),
            name: format!("Product {}", id),
            price,
            stock_quantity: stock,
            min_stock_level: min_stock,
            is_active: true,
        });
    }

    pub fn seed_service(&self, id: &str, price: f64) {
        self.store.insert_catalog_entry(
            ItemType::Service,
            CatalogEntry {
                id: id.to_string(),
                name: format!("Service {}", id),
                price,
                branch_id: None,
                is_active: true,
            },
        );
    }

    pub fn seed_membership(&self, customer_id: &str, discount_percent: f64) {
        self.seed_membership_with(
            customer_id,
            discount_percent,
            MembershipStatus::Active,
            Utc::now() + Duration::days(335),
        );
    }

    pub fn seed_membership_with(
        &self,
        customer_id: &str,
        discount_percent: f64,
        status: MembershipStatus,
        expiry_date: DateTime<Utc>,
    ) {
        let plan_id = format!("plan-{}", customer_id);
        self.store.insert_membership_plan(MembershipPlan {
            id: plan_id.clone(),
            name: "Gold".to_string(),
            price: 5000.0,
            allocated_discount: discount_percent,
            branch_id: None,
        });
        self.store.insert_membership(Membership {
            id: format!("membership-{}", customer_id),
            customer_id: customer_id.to_string(),
            plan_id,
            status,
            start_date: Utc::now() - Duration::days(30),
            expiry_date,
        });
    }

    pub fn seed_prepaid(&self, id: &str, customer_id: &str, balance: f64) {
        self.seed_prepaid_with(id, customer_id, balance, None);
    }

    pub fn seed_prepaid_with(
        &self,
        id: &str,
        customer_id: &str,
        balance: f64,
        expiry_date: Option<DateTime<Utc>>,
    ) {
        self.store.insert_prepaid_package(PrepaidPackage {
            id: id.to_string(),
            customer_id: customer_id.to_string(),
            branch_id: None,
            remaining_balance: balance,
            status: PrepaidStatus::Active,
            expiry_date,
        });
    }

    pub fn stock(&self, product_id: &str) -> i64 {
        self.store
            .product(product_id)
            .map(|p| p.stock_quantity)
            .expect("product seeded")
    }

    // ---------------------------------------------------------------------
    // Requests
    // ---------------------------------------------------------------------

    /// Request carrying actor headers for `role` in the main branch.
    pub fn request(&self, method: Method, path: &str, role: &str) -> RequestBuilder {
        self.request_in(method, path, role, BRANCH_ID)
    }

    pub fn request_in(&self, method: Method, path: &str, role: &str, branch_id: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.address, path))
            .header("X-User-ID", format!("user-{}", role))
            .header("X-User-Role", role)
            .header("X-Branch-ID", branch_id)
    }

    /// Create a draft bill for the test customer and return its id.
    pub async fn create_bill(&self) -> String {
        self.create_bill_with(json!({ "customer_id": CUSTOMER_ID })).await
    }

    pub async fn create_bill_with(&self, body: Value) -> String {
        let response = self
            .request(Method::POST, "/api/bills", "owner")
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request");
        assert!(response.status().is_success());
        let bill: Value = response.json().await.expect("Failed to parse JSON");
        bill["id"].as_str().expect("bill id").to_string()
    }

    pub async fn add_item(&self, bill_id: &str, role: &str, body: Value) -> Response {
        self.request(Method::POST, &format!("/api/bills/{}/items", bill_id), role)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn add_ok(&self, bill_id: &str, item_type: &str, ref_id: &str, quantity: i64) -> Value {
        let response = self
            .add_item(
                bill_id,
                "owner",
                json!({ "item_type": item_type, "ref_id": ref_id, "quantity": quantity }),
            )
            .await;
        assert_eq!(response.status(), 200);
        response.json().await.expect("Failed to parse JSON")
    }

    pub async fn checkout(&self, bill_id: &str, role: &str, body: Value) -> Response {
        self.request(Method::POST, &format!("/api/bills/{}/checkout", bill_id), role)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_bill(&self, bill_id: &str) -> Response {
        self.request(Method::GET, &format!("/api/bills/{}", bill_id), "owner")
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete_bill(&self, bill_id: &str) -> Response {
        self.request(Method::DELETE, &format!("/api/bills/{}", bill_id), "owner")
            .send()
            .await
            .expect("Failed to execute request")
    }
}

pub async fn error_message(response: Response) -> String {
    let body: Value = response.json().await.expect("Failed to parse JSON");
    body["error"].as_str().unwrap_or_default().to_string()
}
