//! Payment provider webhook.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use common::OrderId;
use domain::OrderRepository;
use saga::{SIGNATURE_HEADER, WebhookOutcome};
use serde::{Deserialize, Serialize};

use super::orders::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
}

/// POST /api/webhook: turns a signed, paid checkout into an `order.paid`
/// broadcast.
///
/// The body is taken raw since the signature covers its exact bytes.
#[tracing::instrument(skip_all)]
pub async fn receive<R: OrderRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let outcome = state.webhook.handle(&body, signature).await?;

    let response = match outcome {
        WebhookOutcome::Published { order_id } => WebhookResponse {
            status: "published".to_string(),
            order_id: Some(order_id),
        },
        WebhookOutcome::Ignored => WebhookResponse {
            status: "ignored".to_string(),
            order_id: None,
        },
    };
    Ok(Json(response))
}
