//! Webhook delivery (spec §4.7 "Retries"): retries up to `retry_count`
//! times with exponential backoff; payloads are HMAC-SHA256-signed so
//! receivers can verify authenticity.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::HookError;
use crate::models::HookRegistration;

use super::EventPayload;

type HmacSha256 = Hmac<Sha256>;

/// Sign a JSON payload body with the hook's shared secret (the hook's
/// `target` URL's fragment is never used as a secret; instead the secret
/// is looked up from the first `X-Webhook-Secret` header entry, matching
/// how the registration stores delivery parameters per spec §3).
fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn find_secret(registration: &HookRegistration) -> Option<&str> {
    registration
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("x-webhook-secret"))
        .map(|(_, v)| v.as_str())
}

/// Deliver `payload` to the webhook, retrying with exponential backoff up
/// to `registration.retry_count` times, each attempt bounded by
/// `registration.timeout_secs`.
pub async fn deliver(registration: &HookRegistration, payload: &EventPayload) -> Result<Option<String>, HookError> {
    let body = serde_json::to_vec(payload).map_err(|e| HookError::Delivery(e.to_string()))?;
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(registration.timeout_secs))
        .build()
        .map_err(|e| HookError::Delivery(e.to_string()))?;

    let method = registration
        .method
        .as_deref()
        .unwrap_or("POST")
        .parse::<reqwest::Method>()
        .unwrap_or(reqwest::Method::POST);

    let mut last_err = None;
    for attempt in 0..=registration.retry_count {
        let mut request = client.request(method.clone(), &registration.target).body(body.clone());
        for (key, value) in &registration.headers {
            if key.eq_ignore_ascii_case("x-webhook-secret") {
                continue;
            }
            request = request.header(key, value);
        }
        if let Some(secret) = find_secret(registration) {
            request = request.header("X-Webhook-Signature", sign(secret, &body));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                let status = response.status().as_u16();
                return Ok(Some(format!("status={status}")));
            }
            Ok(response) => {
                last_err = Some(format!("status={}", response.status().as_u16()));
            }
            Err(e) => {
                last_err = Some(e.to_string());
            }
        }

        if attempt < registration.retry_count {
            let backoff = std::time::Duration::from_millis(200 * 2u64.pow(attempt));
            tokio::time::sleep(backoff).await;
        }
    }

    Err(HookError::Delivery(last_err.unwrap_or_else(|| "unknown error".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_same_secret_and_body() {
        let a = sign("secret", b"body");
        let b = sign("secret", b"body");
        assert_eq!(a, b);
    }

    #[test]
    fn signature_changes_with_body() {
        let a = sign("secret", b"body1");
        let b = sign("secret", b"body2");
        assert_ne!(a, b);
    }
}
