use crate::{errors::ServiceError, AppState};
use axum::{body::Bytes, extract::State, http::HeaderMap, response::IntoResponse};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Verify signature whenever a secret is configured; unsigned or
    // invalid deliveries are rejected with no state change.
    if let Some(secret) = state.config.payment_webhook_secret.clone() {
        let tolerance = state.config.payment_webhook_tolerance_secs.unwrap_or(300);
        if !verify_signature(&headers, &body, &secret, tolerance) {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let json: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid json: {}", e)))?;

    let event_id = json
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ServiceError::ValidationError("missing event id".to_string()))?
        .to_string();
    let event_type = json
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let Some(intent_id) = extract_intent_id(&json) else {
        info!(event_type, "Webhook without intent reference; acknowledged");
        return Ok((axum::http::StatusCode::OK, "ok"));
    };
    let failure_reason = json
        .pointer("/data/object/failure_message")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    // Ack fast and reconcile off the request path; gateway retries on
    // timeout, and processing is idempotent by event id.
    let reconciliation = state.services.reconciliation.clone();
    tokio::spawn(async move {
        if let Err(e) = reconciliation
            .process_webhook_event(
                &event_id,
                &event_type,
                &intent_id,
                failure_reason.as_deref(),
            )
            .await
        {
            warn!(event_id, error = %e, "Webhook reconciliation failed; gateway will retry");
        }
    });

    Ok((axum::http::StatusCode::OK, "ok"))
}

fn extract_intent_id(json: &Value) -> Option<String> {
    json.pointer("/data/object/id")
        .or_else(|| json.get("intent_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

pub(crate) fn verify_signature(
    headers: &HeaderMap,
    payload: &Bytes,
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    // Generic HMAC: x-timestamp and x-signature headers
    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            if let Ok(ts_i) = ts.parse::<i64>() {
                let now = chrono::Utc::now().timestamp();
                if (now - ts_i).unsigned_abs() > tolerance_secs {
                    return false;
                }
            }
            return check_hmac(ts, payload, secret, sig);
        }
    }
    // Stripe-like support: Stripe-Signature with t=, v1=
    if let Some(sig) = headers
        .get("stripe-signature")
        .and_then(|h| h.to_str().ok())
    {
        let mut ts = "";
        let mut v1 = "";
        for part in sig.split(',') {
            let mut it = part.split('=');
            match (it.next(), it.next()) {
                (Some("t"), Some(val)) => ts = val,
                (Some("v1"), Some(val)) => v1 = val,
                _ => {}
            }
        }
        if !ts.is_empty() && !v1.is_empty() {
            return check_hmac(ts, payload, secret, v1);
        }
    }
    false
}

fn check_hmac(timestamp: &str, payload: &Bytes, secret: &str, signature: &str) -> bool {
    let signed = format!(
        "{}.{}",
        timestamp,
        std::str::from_utf8(payload).unwrap_or("")
    );
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let signed = format!("{}.{}", timestamp, std::str::from_utf8(payload).unwrap());
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_passes() {
        let secret = "whsec_test";
        let payload = Bytes::from_static(b"{\"id\":\"evt_1\"}");
        let ts = chrono::Utc::now().timestamp();
        let sig = sign(secret, ts, &payload);

        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_str(&ts.to_string()).unwrap());
        headers.insert("x-signature", HeaderValue::from_str(&sig).unwrap());

        assert!(verify_signature(&headers, &payload, secret, 300));
    }

    #[test]
    fn wrong_secret_fails() {
        let payload = Bytes::from_static(b"{}");
        let ts = chrono::Utc::now().timestamp();
        let sig = sign("whsec_other", ts, &payload);

        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_str(&ts.to_string()).unwrap());
        headers.insert("x-signature", HeaderValue::from_str(&sig).unwrap());

        assert!(!verify_signature(&headers, &payload, "whsec_test", 300));
    }

    #[test]
    fn stale_timestamp_fails() {
        let secret = "whsec_test";
        let payload = Bytes::from_static(b"{}");
        let ts = chrono::Utc::now().timestamp() - 3600;
        let sig = sign(secret, ts, &payload);

        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_str(&ts.to_string()).unwrap());
        headers.insert("x-signature", HeaderValue::from_str(&sig).unwrap());

        assert!(!verify_signature(&headers, &payload, secret, 300));
    }

    #[test]
    fn stripe_style_header_passes() {
        let secret = "whsec_test";
        let payload = Bytes::from_static(b"{\"id\":\"evt_2\"}");
        let ts = chrono::Utc::now().timestamp();
        let sig = sign(secret, ts, &payload);

        let mut headers = HeaderMap::new();
        headers.insert(
            "stripe-signature",
            HeaderValue::from_str(&format!("t={},v1={}", ts, sig)).unwrap(),
        );

        assert!(verify_signature(&headers, &payload, secret, 300));
    }

    #[test]
    fn missing_headers_fail() {
        let payload = Bytes::from_static(b"{}");
        assert!(!verify_signature(&HeaderMap::new(), &payload, "secret", 300));
    }

    #[test]
    fn tampered_payload_fails() {
        let secret = "whsec_test";
        let payload = Bytes::from_static(b"{\"amount\":100}");
        let ts = chrono::Utc::now().timestamp();
        let sig = sign(secret, ts, &payload);

        let tampered = Bytes::from_static(b"{\"amount\":999}");
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_str(&ts.to_string()).unwrap());
        headers.insert("x-signature", HeaderValue::from_str(&sig).unwrap());

        assert!(!verify_signature(&headers, &tampered, secret, 300));
    }

    #[test]
    fn intent_id_extraction() {
        let nested: Value =
            serde_json::from_str(r#"{"data":{"object":{"id":"pi_123"}}}"#).unwrap();
        assert_eq!(extract_intent_id(&nested).as_deref(), Some("pi_123"));

        let flat: Value = serde_json::from_str(r#"{"intent_id":"pi_456"}"#).unwrap();
        assert_eq!(extract_intent_id(&flat).as_deref(), Some("pi_456"));

        let none: Value = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(extract_intent_id(&none), None);
    }
}
