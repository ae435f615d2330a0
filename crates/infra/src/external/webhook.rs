//! Outbound webhook delivery with request signing.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{classify_reqwest, classify_status, ExternalError, WebhookSender};

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 over `"{timestamp}.{body}"`.
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut msg = Vec::with_capacity(24 + body.len());
    msg.extend_from_slice(timestamp.to_string().as_bytes());
    msg.push(b'.');
    msg.extend_from_slice(body);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(&msg);
    hex::encode(mac.finalize().into_bytes())
}

/// `t=<timestamp>,v1=<signature>` header value.
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> String {
    format!("t={},v1={}", timestamp, sign(secret, timestamp, body))
}

/// Verify a `t=...,v1=...` signature header against a raw body.
pub fn verify(secret: &str, header: &str, body: &[u8]) -> bool {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => signature = Some(v),
            _ => {}
        }
    }
    let (Some(ts), Some(sig)) = (timestamp, signature) else {
        return false;
    };
    let Ok(raw) = hex::decode(sig) else {
        return false;
    };

    // Constant-time comparison via the mac itself.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    let mut msg = Vec::with_capacity(24 + body.len());
    msg.extend_from_slice(ts.to_string().as_bytes());
    msg.push(b'.');
    msg.extend_from_slice(body);
    mac.update(&msg);
    mac.verify_slice(&raw).is_ok()
}

/// HTTP webhook sender used for `WebhookNotification` retries.
#[derive(Debug, Clone)]
pub struct HttpWebhookSender {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(
        &self,
        url: &str,
        payload: &serde_json::Value,
        secret: &str,
    ) -> Result<(), ExternalError> {
        // Bytes signed == bytes sent.
        let body = serde_json::to_vec(payload)
            .map_err(|e| ExternalError::Permanent(format!("payload serialize: {e}")))?;
        let ts = Utc::now().timestamp();
        let signature = signature_header(secret, ts, &body);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Timestamp", ts.to_string())
            .header("X-Signature", signature)
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| classify_reqwest(&e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(response.status()))
        }
    }
}
