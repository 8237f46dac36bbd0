//! Customer order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CustomerId, ItemWithQuantity, OrderId};
use domain::{Order, OrderRepository, OrderService};
use saga::PaymentWebhook;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from the order and webhook handlers.
pub struct AppState<R: OrderRepository> {
    pub orders: Arc<OrderService<R>>,
    pub webhook: PaymentWebhook,
    pub payment_success_url: String,
}

impl<R: OrderRepository> AppState<R> {
    fn redirect_url(&self, customer_id: &CustomerId, order_id: &OrderId) -> String {
        format!(
            "{}?customerID={customer_id}&orderID={order_id}",
            self.payment_success_url
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<ItemWithQuantity>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub customer_id: CustomerId,
    pub order_id: OrderId,
    pub redirect_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order: Order,
}

/// POST /api/customer/{customer_id}/orders: reserve stock and place an order.
#[tracing::instrument(skip(state, payload))]
pub async fn create<R: OrderRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(customer_id): Path<String>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    let Json(req) = payload?;
    let customer_id = CustomerId::new(customer_id);
    let order = state
        .orders
        .create_order(customer_id.clone(), req.items)
        .await?;

    let response = CreateOrderResponse {
        redirect_url: state.redirect_url(&customer_id, &order.id),
        customer_id,
        order_id: order.id,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/customer/{customer_id}/orders/{order_id}: one of the customer's orders.
#[tracing::instrument(skip(state))]
pub async fn get<R: OrderRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path((customer_id, order_id)): Path<(String, String)>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = OrderId::parse(&order_id)
        .map_err(|e| ApiError::bad_request(format!("Invalid order id: {e}")))?;

    let order = state
        .orders
        .get_order(order_id, &CustomerId::new(customer_id))
        .await?;
    Ok(Json(OrderResponse { order }))
}
