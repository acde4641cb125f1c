use super::AppState;
use crate::error::{AppError, AppResult};
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// GET /files/{*key}: serve a proof through a signed, expiring link.
pub async fn serve_proof(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> AppResult<Response> {
    let storage = state
        .local_storage
        .as_ref()
        .ok_or_else(|| AppError::not_found("Proof file", &key))?;

    if !storage.verify_signature(&key, query.expires, &query.signature, Utc::now()) {
        warn!(key = %key, "rejected proof download with bad or expired signature");
        return Err(AppError::forbidden("Link is invalid or has expired"));
    }

    let bytes = storage.read(&key).await.map_err(|e| {
        warn!(key = %key, error = %e, "proof file unavailable");
        AppError::not_found("Proof file", &key)
    })?;

    Ok(([(header::CONTENT_TYPE, content_type_for(&key))], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for("a/b.PNG"), "image/png");
        assert_eq!(content_type_for("a/b.pdf"), "application/pdf");
        assert_eq!(content_type_for("a/b.bin"), "application/octet-stream");
    }
}
