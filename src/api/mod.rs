//! HTTP surface for orders.

pub mod dto;

use axum::async_trait;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, State};
use axum::http::{request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;

use crate::catalog::CatalogProduct;
use crate::domain::{Order, Principal};
use crate::service::OrderService;
use crate::store::{OrderFilter, OrderSort, Page};
use crate::{OrderError, ProductId, Result};
use dto::*;

/// Set by the authenticating gateway in front of this service.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Clone)]
pub struct AppState {
    pub service: OrderService,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "storefront-orders"})) }))
        .route("/api/v1/orders", get(list_all_orders).post(create_order))
        .route("/api/v1/orders/me", get(list_my_orders))
        .route("/api/v1/orders/:id", get(get_order).delete(delete_order))
        .route("/api/v1/orders/:id/status", patch(update_status))
        .route("/api/v1/orders/:id/delivery", patch(update_delivery))
        .route("/api/v1/orders/:id/items", post(add_item))
        .route("/api/v1/orders/:id/items/:item_id", patch(update_item).delete(remove_item))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = OrderError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        let id = header(parts, USER_ID_HEADER).and_then(|v| Uuid::parse_str(v).ok()).ok_or(OrderError::Unauthenticated)?;
        let is_administrator = header(parts, USER_ROLE_HEADER).is_some_and(|r| r.eq_ignore_ascii_case("admin"));
        Ok(Principal { id, is_administrator })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// JSON body whose rejections are reported as [`OrderError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(OrderError))]
struct AppJson<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(OrderError))]
struct AppPath<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(OrderError))]
struct AppQuery<T>(T);

impl From<JsonRejection> for OrderError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(detail = %rejection.body_text(), "rejected request body");
        let msg = match rejection {
            JsonRejection::JsonDataError(_) => "request body has a missing field or a field of the wrong type",
            JsonRejection::JsonSyntaxError(_) => "request body is not valid JSON",
            JsonRejection::MissingJsonContentType(_) => "expected an application/json request body",
            _ => "request body could not be read",
        };
        Self::Validation(msg.to_string())
    }
}

impl From<PathRejection> for OrderError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(detail = %rejection.body_text(), "rejected path parameters");
        Self::Validation("path identifiers must be UUIDs".to_string())
    }
}

impl From<QueryRejection> for OrderError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::debug!(detail = %rejection.body_text(), "rejected query string");
        Self::Validation("query string has a parameter of the wrong type".to_string())
    }
}

impl OrderError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyItems | Self::InvalidQuantity(_) | Self::UnsupportedStatus(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ProductsNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let msg = match &self {
            Self::StorageUnavailable(detail) => {
                tracing::error!(%detail, "storage failure");
                "Storage temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };
        let mut body = json!({"error": self.code(), "msg": msg});
        if let Self::ProductsNotFound(ids) = &self {
            body["missing"] = json!(ids);
        }
        (self.status_code(), Json(body)).into_response()
    }
}

/// Product projections for `orders`. The write they follow has already been
/// committed, so a catalog failure renders `product: null` instead of an error.
async fn projections(service: &OrderService, orders: &[Order]) -> HashMap<ProductId, CatalogProduct> {
    service.products_for(orders).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "product projections unavailable, rendering orders without them");
        HashMap::new()
    })
}

async fn present(service: &OrderService, orders: &[Order]) -> Json<Vec<OrderOut>> {
    let products = projections(service, orders).await;
    Json(orders.iter().map(|o| OrderOut::from_order(o, &products)).collect())
}

async fn present_one(service: &OrderService, order: Order) -> Json<OrderOut> {
    let products = projections(service, std::slice::from_ref(&order)).await;
    Json(OrderOut::from_order(&order, &products))
}

async fn create_order(State(s): State<AppState>, principal: Principal, AppJson(r): AppJson<CreateOrderRequest>) -> Result<(StatusCode, Json<OrderOut>)> {
    r.validate().map_err(|e| OrderError::Validation(e.to_string()))?;
    let order = s.service.create_order(&principal, &r.item_pairs(), r.delivery()).await?;
    Ok((StatusCode::CREATED, present_one(&s.service, order).await))
}

async fn list_my_orders(State(s): State<AppState>, principal: Principal, AppQuery(p): AppQuery<ListParams>) -> Result<Json<Vec<OrderOut>>> {
    let orders = s.service.list_orders_for_user(&principal, Page::new(p.limit, p.offset)).await?;
    Ok(present(&s.service, &orders).await)
}

async fn list_all_orders(State(s): State<AppState>, principal: Principal, AppQuery(p): AppQuery<AdminListParams>) -> Result<Json<Vec<OrderOut>>> {
    let filter = OrderFilter::from_query(p.email.as_deref(), p.statuses.as_deref());
    let sort = OrderSort::parse(p.sort.as_deref());
    let orders = s.service.list_all_orders(&principal, &filter, sort, Page::new(p.limit, p.offset)).await?;
    Ok(present(&s.service, &orders).await)
}

async fn get_order(State(s): State<AppState>, principal: Principal, AppPath(id): AppPath<Uuid>) -> Result<Json<OrderOut>> {
    let order = s.service.get_order_secure(&principal, id).await?;
    Ok(present_one(&s.service, order).await)
}

async fn delete_order(State(s): State<AppState>, principal: Principal, AppPath(id): AppPath<Uuid>) -> Result<StatusCode> {
    s.service.admin_delete_order(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_status(
    State(s): State<AppState>, principal: Principal, AppPath(id): AppPath<Uuid>, AppJson(r): AppJson<StatusUpdateRequest>,
) -> Result<Json<OrderOut>> {
    let order = s.service.admin_update_status(&principal, id, &r.status).await?;
    Ok(present_one(&s.service, order).await)
}

async fn update_delivery(
    State(s): State<AppState>, principal: Principal, AppPath(id): AppPath<Uuid>, AppJson(fields): AppJson<Map<String, Value>>,
) -> Result<Json<OrderOut>> {
    let order = s.service.admin_update_delivery(&principal, id, &fields).await?;
    Ok(present_one(&s.service, order).await)
}

async fn add_item(
    State(s): State<AppState>, principal: Principal, AppPath(id): AppPath<Uuid>, AppJson(r): AppJson<AddItemRequest>,
) -> Result<Json<OrderOut>> {
    let order = s.service.admin_add_item(&principal, id, r.product_id, r.quantity).await?;
    Ok(present_one(&s.service, order).await)
}

async fn update_item(
    State(s): State<AppState>, principal: Principal, AppPath((id, item_id)): AppPath<(Uuid, Uuid)>, AppJson(r): AppJson<UpdateItemRequest>,
) -> Result<Json<OrderOut>> {
    let order = s.service.admin_update_item_quantity(&principal, id, item_id, r.quantity).await?;
    Ok(present_one(&s.service, order).await)
}

async fn remove_item(State(s): State<AppState>, principal: Principal, AppPath((id, item_id)): AppPath<(Uuid, Uuid)>) -> Result<Json<OrderOut>> {
    let order = s.service.admin_remove_item(&principal, id, item_id).await?;
    Ok(present_one(&s.service, order).await)
}
