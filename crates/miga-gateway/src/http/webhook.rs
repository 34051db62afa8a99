//! Webhook ingress (POST /chat/webhook).
//!
//! Verifies `X-Timestamp`/`X-Signature` (hex HMAC-SHA256 over
//! `timestamp "." raw_body`, constant-time compare, ±300 s skew window),
//! extracts the inbound message, and enqueues a job. The 2xx goes out as
//! soon as the job is accepted; all pipeline work happens behind the queue.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

use miga_core::types::InboundJob;
use miga_queue::QueueError;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Maximum tolerated clock skew between sender and gateway.
const MAX_SKEW_SECS: i64 = 300;

pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    match &state.config.gateway.shared_secret {
        Some(secret) => {
            verify_signature(&headers, &body, secret, Utc::now().timestamp())
                .map_err(|code| auth_error(code))?;
        }
        None => {
            // Development mode: no shared secret configured.
            debug!("webhook signature verification bypassed (no shared secret)");
        }
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "invalid JSON in webhook body");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid JSON body"})),
        )
    })?;

    let Some(job) = extract_job(&payload) else {
        // Outbound echoes and empty events are acknowledged and dropped.
        return Ok((StatusCode::OK, Json(json!({"ok": true, "ignored": true}))));
    };

    info!(
        conversation_id = job.conversation_id,
        account_id = job.account_id,
        "webhook accepted"
    );

    match state.queue.enqueue(job).await {
        Ok(()) => Ok((StatusCode::ACCEPTED, Json(json!({"ok": true})))),
        Err(QueueError::Overflow) | Err(QueueError::Closed) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "queue overflow", "code": "QUEUE_OVERFLOW"})),
        )),
        Err(e) => {
            warn!(error = %e, "enqueue failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            ))
        }
    }
}

// ── Signature verification ────────────────────────────────────────────────

/// Accept iff the presented signature equals
/// `hex(HMAC-SHA256(secret, ts || "." || body))` and the timestamp is
/// within the skew window. `verify_slice` compares in constant time.
fn verify_signature(
    headers: &HeaderMap,
    body: &[u8],
    secret: &str,
    now_unix: i64,
) -> Result<(), &'static str> {
    let (Some(ts_header), Some(sig_header)) = (
        headers.get("x-timestamp").and_then(|v| v.to_str().ok()),
        headers.get("x-signature").and_then(|v| v.to_str().ok()),
    ) else {
        return Err("MISSING_AUTH_HEADERS");
    };

    let ts: i64 = ts_header.parse().map_err(|_| "STALE_TIMESTAMP")?;
    if (now_unix - ts).abs() > MAX_SKEW_SECS {
        return Err("STALE_TIMESTAMP");
    }

    let presented = hex::decode(sig_header).map_err(|_| "INVALID_SIGNATURE")?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "INVALID_SIGNATURE")?;
    mac.update(ts_header.as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.verify_slice(&presented).map_err(|_| "INVALID_SIGNATURE")
}

/// Pull the job fields out of the provider payload. Tolerates both nested
/// (Chatwoot-shaped) and flat field layouts. Returns `None` for events
/// that should be acknowledged without work.
fn extract_job(payload: &Value) -> Option<InboundJob> {
    // Only inbound customer messages produce replies.
    if let Some(message_type) = payload.get("message_type").and_then(|v| v.as_str()) {
        if message_type != "incoming" {
            return None;
        }
    }

    let content = payload.get("content").and_then(|v| v.as_str())?.trim();
    if content.is_empty() {
        return None;
    }

    let conversation_id = payload
        .get("conversation")
        .and_then(|c| c.get("id"))
        .or_else(|| payload.get("conversation_id"))
        .and_then(|v| v.as_i64())?;
    let account_id = payload
        .get("account")
        .and_then(|a| a.get("id"))
        .or_else(|| payload.get("account_id"))
        .and_then(|v| v.as_i64())?;
    let contact_id = payload
        .get("sender")
        .and_then(|s| s.get("id"))
        .or_else(|| payload.get("contact_id"))
        .and_then(|v| v.as_i64());

    Some(InboundJob {
        conversation_id,
        account_id,
        contact_id,
        content: content.to_string(),
        received_at: Utc::now(),
    })
}

fn auth_error(code: &'static str) -> (StatusCode, Json<Value>) {
    warn!(code, "webhook authentication failed");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "authentication failed", "code": code})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, ts: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(ts.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn headers_for(ts: i64, sig: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", ts.to_string().parse().unwrap());
        headers.insert("x-signature", sig.parse().unwrap());
        headers
    }

    #[test]
    fn valid_signature_is_accepted() {
        let now = 1_700_000_000;
        let body = br#"{"content":"hola"}"#;
        let sig = sign("s3cret", now, body);
        assert!(verify_signature(&headers_for(now, &sig), body, "s3cret", now).is_ok());
    }

    #[test]
    fn missing_headers_are_rejected() {
        let err = verify_signature(&HeaderMap::new(), b"{}", "s", 0).unwrap_err();
        assert_eq!(err, "MISSING_AUTH_HEADERS");
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let now = 1_700_000_000;
        let body = b"{}";
        let sig = sign("s", now - 301, body);
        let err = verify_signature(&headers_for(now - 301, &sig), body, "s", now).unwrap_err();
        assert_eq!(err, "STALE_TIMESTAMP");

        // Exactly at the boundary is still accepted.
        let sig = sign("s", now - 300, body);
        assert!(verify_signature(&headers_for(now - 300, &sig), body, "s", now).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let now = 1_700_000_000;
        let sig = sign("s", now, br#"{"content":"hola"}"#);
        let err = verify_signature(
            &headers_for(now, &sig),
            br#"{"content":"chau"}"#,
            "s",
            now,
        )
        .unwrap_err();
        assert_eq!(err, "INVALID_SIGNATURE");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = 1_700_000_000;
        let body = b"{}";
        let sig = sign("other", now, body);
        let err = verify_signature(&headers_for(now, &sig), body, "s", now).unwrap_err();
        assert_eq!(err, "INVALID_SIGNATURE");
    }

    #[test]
    fn nested_payload_extracts() {
        let payload = json!({
            "message_type": "incoming",
            "content": "¿tienen rosca?",
            "conversation": {"id": 42},
            "account": {"id": 3},
            "sender": {"id": 7}
        });
        let job = extract_job(&payload).unwrap();
        assert_eq!(job.conversation_id, 42);
        assert_eq!(job.account_id, 3);
        assert_eq!(job.contact_id, Some(7));
    }

    #[test]
    fn flat_payload_extracts() {
        let payload = json!({
            "content": "hola",
            "conversation_id": 9,
            "account_id": 1
        });
        let job = extract_job(&payload).unwrap();
        assert_eq!(job.conversation_id, 9);
        assert_eq!(job.contact_id, None);
    }

    #[test]
    fn outbound_and_empty_events_are_ignored() {
        assert!(extract_job(&json!({
            "message_type": "outgoing",
            "content": "hola",
            "conversation_id": 1, "account_id": 1
        }))
        .is_none());
        assert!(extract_job(&json!({
            "message_type": "incoming",
            "content": "   ",
            "conversation_id": 1, "account_id": 1
        }))
        .is_none());
    }
}
