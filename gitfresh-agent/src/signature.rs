//! GitHub webhook signature verification (`X-Hub-Signature-256`).
//!
//! Mounted as a layer in front of the webhook dispatcher: a delivery whose
//! body does not match its HMAC-SHA256 signature is answered here and never
//! reaches the handler.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Largest webhook body accepted (GitHub caps payloads at 25 MB).
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Shared secret for one agent run. An empty secret disables verification.
#[derive(Clone)]
pub struct WebhookSecret(Arc<str>);

impl WebhookSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Arc::from(secret.into()))
    }

    pub fn is_disabled(&self) -> bool {
        self.0.is_empty()
    }

    /// `sha256=<hex>` signature GitHub would send for `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        let digest = self
            .mac()
            .map(|mut mac| {
                mac.update(body);
                hex::encode(mac.finalize().into_bytes())
            })
            .unwrap_or_default();
        format!("{SIGNATURE_PREFIX}{digest}")
    }

    /// Constant-time check of a `sha256=<hex>` header value against `body`.
    pub fn verify(&self, body: &[u8], header: Option<&str>) -> bool {
        let Some(hex_sig) = header.and_then(|h| h.strip_prefix(SIGNATURE_PREFIX)) else {
            return false;
        };
        let Ok(expected) = hex::decode(hex_sig.trim()) else {
            return false;
        };
        let Some(mut mac) = self.mac() else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }

    // HMAC takes keys of any length, so this is only `None` in theory.
    fn mac(&self) -> Option<HmacSha256> {
        HmacSha256::new_from_slice(self.0.as_bytes()).ok()
    }
}

/// `axum::middleware::from_fn_with_state` layer rejecting unsigned deliveries.
pub async fn require_signature(
    State(secret): State<WebhookSecret>,
    request: Request,
    next: Next,
) -> Response {
    if secret.is_disabled() {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "unreadable webhook body");
            return (StatusCode::BAD_REQUEST, "error reading request data").into_response();
        }
    };

    let header = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if !secret.verify(&bytes, header) {
        tracing::warn!(
            has_signature = header.is_some(),
            uri = %parts.uri,
            "rejected webhook with invalid signature",
        );
        return (StatusCode::UNAUTHORIZED, "invalid webhook signature").into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
