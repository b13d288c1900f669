//! HTTP interface of the order server.
//!
//! # Route Structure
//!
//! ```text
//! GET  /api/health              - Liveness and build info (HEAD also answered)
//!
//! # Public
//! POST /api/orders/public       - Storefront order submission
//! GET  /api/products            - Catalog (?all=true includes unavailable)
//!
//! # Staff (Bearer token when configured)
//! GET    /api/orders            - Orders with items (?status, customerId, dateFrom, dateTo)
//! GET    /api/orders/{id}       - One order with items
//! PATCH  /api/orders/{id}/status - Change status
//! DELETE /api/orders/{id}       - Cancel
//! POST   /api/products          - Add a product
//! ```

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequestParts, Path, Query, State,
    },
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode, Uri},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::IDEMPOTENCY_HEADER;
use crate::catalog::{self, NewProduct, Product};
use crate::db::DbState;
use crate::diagnostics;
use crate::error::AppError;
use crate::models::{Order, OrderFilter, OrderStatus, OrderSubmission, ValidationErrors};
use crate::orders;

/// Shared handler state, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: Arc<DbState>,
    staff_token: Option<String>,
}

impl AppState {
    pub fn new(db: Arc<DbState>, staff_token: Option<String>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { db, staff_token }),
        }
    }

    pub fn db(&self) -> Arc<DbState> {
        self.inner.db.clone()
    }
}

/// Build the full router with tracing and CORS.
///
/// `frontend_url` restricts CORS to one origin; without it any origin is
/// accepted.
pub fn build_router(state: AppState, frontend_url: Option<&str>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/orders/public", post(submit_public_order))
        .route("/api/orders", get(list_orders))
        .route("/api/orders/{id}", get(get_order).delete(cancel_order))
        .route("/api/orders/{id}/status", patch(update_status))
        .route("/api/products", get(list_products).post(create_product))
        .fallback(not_found)
        .with_state(state)
        .layer(cors_layer(frontend_url))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match frontend_url.map(HeaderValue::from_str) {
        Some(Ok(origin)) => base.allow_origin(origin),
        Some(Err(e)) => {
            warn!(error = %e, "Invalid frontend URL for CORS, allowing any origin");
            base.allow_origin(Any)
        }
        None => base.allow_origin(Any),
    }
}

/// Run blocking database work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// Staff authentication
// ---------------------------------------------------------------------------

/// Extractor guarding staff routes.
///
/// Passes when no staff token is configured, otherwise requires
/// `Authorization: Bearer <token>`.
pub struct StaffAuth;

impl FromRequestParts<AppState> for StaffAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.inner.staff_token.as_deref() else {
            return Ok(Self);
        };
        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        if presented == Some(expected) {
            Ok(Self)
        } else {
            Err(AppError::Unauthorized)
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    let mut body = diagnostics::get_about_info();
    if let Value::Object(map) = &mut body {
        map.insert("status".into(), json!("ok"));
        map.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
    }
    Json(body)
}

async fn submit_public_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<OrderSubmission>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(submission) =
        payload.map_err(|e| AppError::Validation(ValidationErrors::single("body", e.body_text())))?;
    let key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let db = state.db();
    let receipt = blocking(move || {
        orders::submit_public_order(&db, &submission, key.as_deref()).map_err(AppError::from)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Order created",
            "orderId": receipt.order_id,
            "totalAmount": receipt.total_amount,
            "deduplicated": receipt.deduplicated,
        })),
    ))
}

async fn list_orders(
    _staff: StaffAuth,
    State(state): State<AppState>,
    filter: Result<Query<OrderFilter>, QueryRejection>,
) -> Result<Json<Vec<Order>>, AppError> {
    let Query(filter) = filter.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let db = state.db();
    let orders = blocking(move || orders::list_orders(&db, &filter).map_err(AppError::from)).await?;
    Ok(Json(orders))
}

async fn get_order(
    _staff: StaffAuth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Order>, AppError> {
    let db = state.db();
    blocking(move || orders::get_order(&db, id).map_err(AppError::from))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    #[serde(default)]
    status: String,
}

async fn update_status(
    _staff: StaffAuth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<StatusUpdate>,
) -> Result<Json<Value>, AppError> {
    let status = OrderStatus::parse(&body.status).ok_or_else(|| {
        let allowed: Vec<&str> = OrderStatus::ALL.iter().map(|s| s.as_str()).collect();
        AppError::BadRequest(format!(
            "invalid status {:?}, expected one of: {}",
            body.status,
            allowed.join(", ")
        ))
    })?;
    let db = state.db();
    blocking(move || orders::update_status(&db, id, status).map_err(AppError::from)).await?;
    Ok(Json(json!({ "success": true, "message": "Status updated" })))
}

async fn cancel_order(
    _staff: StaffAuth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let db = state.db();
    blocking(move || orders::cancel_order(&db, id).map_err(AppError::from)).await?;
    info!(order_id = id, "Order cancelled");
    Ok(Json(json!({ "success": true, "message": "Order cancelled" })))
}

#[derive(Debug, Default, Deserialize)]
struct ProductQuery {
    #[serde(default)]
    all: bool,
}

async fn list_products(
    State(state): State<AppState>,
    query: Result<Query<ProductQuery>, QueryRejection>,
) -> Result<Json<Vec<Product>>, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let db = state.db();
    let products =
        blocking(move || catalog::list_products(&db, !query.all).map_err(AppError::from)).await?;
    Ok(Json(products))
}

async fn create_product(
    _staff: StaffAuth,
    State(state): State<AppState>,
    payload: Result<Json<NewProduct>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(input) =
        payload.map_err(|e| AppError::Validation(ValidationErrors::single("body", e.body_text())))?;
    let db = state.db();
    let product = blocking(move || catalog::create_product(&db, input).map_err(AppError::from)).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "route not found", "path": uri.path() })),
    )
}
