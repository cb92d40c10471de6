//! Stitchflow API Library
//!
//! Lot lifecycle and reconciliation engine for garment production
//! tracking: cutting, outsourced finishing, ironing, stock, dispatch and
//! returns, with shortage/defect accounting at every handoff.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod services;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: services::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let services = services::AppServices::new(db.clone(), event_sender.clone());
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

// Common query parameters for list endpoints
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

// Common response wrappers
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<axum::Json<ApiResponse<T>>, errors::ServiceError>;

/// Assembles the engine's routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/lots", post(handlers::lots::create_lot))
        .route("/lots", get(handlers::lots::list_lots))
        .route("/lots/:id", get(handlers::lots::get_lot))
        .route("/lots/:id", delete(handlers::lots::delete_lot))
        .route("/lots/:id/journey", get(handlers::lots::get_journey))
        .route(
            "/lots/by-number/:lot_number",
            get(handlers::lots::get_lot_by_number),
        )
        .route(
            "/lots/by-number/:lot_number/journey",
            get(handlers::lots::get_journey_by_number),
        )
        .route("/lots/:id/stages", post(handlers::stages::record_sent))
        .route("/lots/:id/stages", get(handlers::stages::list_stages))
        .route("/lots/:id/receipts", post(handlers::stages::record_receipt))
        .route("/stages/:id/receipt", put(handlers::stages::edit_receipt))
        .route("/stages/:id/payments", post(handlers::stages::record_payment))
        .route("/stages/:id", delete(handlers::stages::delete_stage))
        .route("/stocks", post(handlers::stock::create_stock))
        .route("/stocks", get(handlers::stock::list_stocks))
        .route("/stocks/:id", get(handlers::stock::get_stock))
        .route("/stocks/:id", delete(handlers::stock::delete_stock))
        .route("/stocks/:id/dispatch", post(handlers::stock::dispatch_stock))
        .route("/stocks/:id/returns", post(handlers::stock::return_stock))
}

/// Full application router including the health probe
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", api_routes())
        .with_state(state)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn success_response_carries_timestamp() {
        let response = ApiResponse::success("ok");
        assert!(response.success);
        DateTime::parse_from_rfc3339(&response.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn error_response_has_no_data() {
        let response = ApiResponse::<()>::error("oops".into());
        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.message.as_deref(), Some("oops"));
    }
}
