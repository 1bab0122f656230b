//! Cart endpoints. Carts are keyed by an opaque client key (in practice the
//! table session id) and live server-side so the checkout pipeline prices the
//! same items the customer sees.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::cart::{AddItemInput, CartItem};
use crate::errors::ServiceError;
use crate::models::{OrderTotals, Variant};
use crate::{ApiResponse, AppState};

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub items: Vec<CartItem>,
    pub totals: OrderTotals,
}

impl CartView {
    fn for_key(state: &AppState, key: &str) -> Self {
        let cart = state.carts.get(key);
        let totals = cart.totals();
        Self {
            items: cart.items,
            totals,
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartItemSelector {
    pub product_id: String,
    #[serde(default)]
    pub variant: Variant,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuantityRequest {
    pub product_id: String,
    #[serde(default)]
    pub variant: Variant,
    /// New absolute quantity. Zero or negative removes the line.
    pub quantity: i64,
}

#[utoipa::path(
    get,
    path = "/carts/{key}",
    params(("key" = String, Path, description = "Cart key (table session)")),
    responses((status = 200, description = "Current cart contents", body = ApiResponse<CartView>)),
    tag = "carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    Json(ApiResponse::success(CartView::for_key(&state, &key)))
}

#[utoipa::path(
    get,
    path = "/carts/{key}/totals",
    params(("key" = String, Path, description = "Cart key (table session)")),
    responses((status = 200, description = "Server-computed totals", body = ApiResponse<OrderTotals>)),
    tag = "carts"
)]
pub async fn get_totals(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    Json(ApiResponse::success(state.carts.totals(&key)))
}

#[utoipa::path(
    post,
    path = "/carts/{key}/items",
    params(("key" = String, Path, description = "Cart key (table session)")),
    request_body = AddItemInput,
    responses(
        (status = 200, description = "Item added or merged", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid variant or payload", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
    ),
    tag = "carts"
)]
pub async fn add_item(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(input): Json<AddItemInput>,
) -> Result<impl IntoResponse, ServiceError> {
    state.carts.add_item(&key, input).await?;
    Ok(Json(ApiResponse::success(CartView::for_key(&state, &key))))
}

#[utoipa::path(
    put,
    path = "/carts/{key}/items",
    params(("key" = String, Path, description = "Cart key (table session)")),
    request_body = UpdateQuantityRequest,
    responses((status = 200, description = "Quantity updated", body = ApiResponse<CartView>)),
    tag = "carts"
)]
pub async fn update_quantity(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .carts
        .update_quantity(&key, &request.product_id, &request.variant, request.quantity)
        .await?;
    Ok(Json(ApiResponse::success(CartView::for_key(&state, &key))))
}

#[utoipa::path(
    delete,
    path = "/carts/{key}/items",
    params(("key" = String, Path, description = "Cart key (table session)")),
    request_body = CartItemSelector,
    responses((status = 200, description = "Item removed (absent item is a no-op)", body = ApiResponse<CartView>)),
    tag = "carts"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(selector): Json<CartItemSelector>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .carts
        .remove_item(&key, &selector.product_id, &selector.variant)
        .await?;
    Ok(Json(ApiResponse::success(CartView::for_key(&state, &key))))
}

#[utoipa::path(
    delete,
    path = "/carts/{key}",
    params(("key" = String, Path, description = "Cart key (table session)")),
    responses((status = 200, description = "Cart cleared", body = ApiResponse<CartView>)),
    tag = "carts"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    state.carts.clear(&key).await?;
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(CartView::for_key(&state, &key))),
    ))
}
