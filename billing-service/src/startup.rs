//! Application startup and lifecycle management.

use crate::config::{BillingConfig, StoreBackend};
use crate::handlers::{
    add_item, checkout, create_bill, delete_bill, get_bill, health_check, list_bills,
    metrics_handler, readiness_check, remove_item,
};
use crate::services::{BillingService, BillingStore, InMemoryStore, MongoStore};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use salon_core::error::AppError;
use salon_core::middleware::{make_request_span, metrics_middleware, request_id_middleware};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub service: BillingService,
}

impl AppState {
    pub fn new(config: BillingConfig, store: Arc<dyn BillingStore>) -> Self {
        let service = BillingService::new(
            store,
            config.checkout.clone(),
            config.loyalty.clone(),
        );
        Self { config, service }
    }
}

/// HTTP router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/bills", post(create_bill).get(list_bills))
        .route("/bills/:id", get(get_bill).delete(delete_bill))
        .route("/bills/:id/items", post(add_item))
        .route("/bills/:id/items/:index", delete(remove_item))
        .route("/bills/:id/checkout", post(checkout));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn connect_store(config: &BillingConfig) -> Result<Arc<dyn BillingStore>, AppError> {
    match config.store {
        StoreBackend::Mongodb => {
            let store = MongoStore::connect(
                config.mongodb.uri.expose_secret(),
                &config.mongodb.database,
            )
            .await?;
            store.initialize_indexes().await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; bills are lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        let store = connect_store(&config).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize billing store");
            e
        })?;
        Self::build_with_store(config, store).await
    }

    /// Build against an already constructed store.
    pub async fn build_with_store(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
    ) -> Result<Self, AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let router = build_router(AppState::new(config, store));

        tracing::info!(port = port, "Salon billing service listener bound");
        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = "salon-billing-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );
        axum::serve(self.listener, self.router).await
    }
}
