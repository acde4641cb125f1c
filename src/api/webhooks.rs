use super::AppState;
use crate::error::AppResult;
use crate::services::webhook_processor::WebhookOutcome;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use tracing::info;

/// Headers gateways put their payload signature in, checked in order.
const SIGNATURE_HEADERS: [&str; 3] = ["x-paystack-signature", "x-webhook-signature", "x-signature"];

pub fn extract_signature(headers: &HeaderMap) -> Option<String> {
    SIGNATURE_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    })
}

/// POST /webhooks/{provider}
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookOutcome>> {
    info!(provider = %provider, bytes = body.len(), "Received webhook");

    let signature = extract_signature(&headers);
    let outcome = state
        .engine
        .webhooks
        .process_webhook(&provider.to_lowercase(), &body, signature.as_deref())
        .await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn signature_header_precedence() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_signature(&headers), None);
        headers.insert("x-signature", HeaderValue::from_static("generic"));
        assert_eq!(extract_signature(&headers).as_deref(), Some("generic"));
        headers.insert("x-paystack-signature", HeaderValue::from_static("paystack"));
        assert_eq!(extract_signature(&headers).as_deref(), Some("paystack"));
    }
}
