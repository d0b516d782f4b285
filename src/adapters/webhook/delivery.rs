//! Signed webhook delivery. At-least-once, best effort.
//!
//! Each envelope is POSTed with `X-Bridge-Signature` and `X-Bridge-Timestamp` plus any
//! configured extra headers. Transport errors and non-2xx responses are retried through
//! the same bounded backoff as outbound sends; the caller only ever sees a log line.

use super::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER, sign};
use crate::domain::DomainError;
use crate::domain::entities::rfc3339;
use crate::ports::WebhookPort;
use crate::shared::config::WebhookSettings;
use crate::shared::shutdown::CancelRx;
use crate::usecases::send_policy::RetryPolicy;
use chrono::Utc;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(7);

#[derive(Clone)]
pub struct WebhookDelivery {
    client: Client,
    url: String,
    secret: String,
    headers: HashMap<String, String>,
    attempts: u32,
    base_delay: Duration,
    cancel: CancelRx,
}

impl WebhookDelivery {
    pub fn new(settings: &WebhookSettings, cancel: CancelRx) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DomainError::Webhook(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            url: settings.url.clone(),
            secret: settings.secret.clone(),
            headers: settings.headers.clone(),
            attempts: DEFAULT_ATTEMPTS,
            base_delay: settings.base_delay,
            cancel,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post_once(&self, payload: &[u8]) -> Result<(), DomainError> {
        let mut req = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(TIMESTAMP_HEADER, rfc3339(Utc::now()));
        if !self.secret.is_empty() {
            req = req.header(SIGNATURE_HEADER, sign(&self.secret, payload));
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let res = req
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| DomainError::Webhook(format!("request failed: {}", e)))?;
        if !res.status().is_success() {
            return Err(DomainError::Webhook(format!("status {}", res.status())));
        }
        Ok(())
    }

    /// Posts `payload` under the shared [`RetryPolicy`]. The wait between attempts is
    /// interrupted by cancellation.
    pub async fn deliver(&self, payload: &[u8]) -> Result<(), DomainError> {
        let mut cancel = self.cancel.clone();
        RetryPolicy::new(self.attempts, self.base_delay)
            .run(&mut cancel, || self.post_once(payload))
            .await?;
        debug!(url = %self.url, "webhook delivered");
        Ok(())
    }
}

impl WebhookPort for WebhookDelivery {
    /// Fire-and-forget delivery on a detached task.
    fn dispatch(&self, payload: Vec<u8>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.deliver(&payload).await {
                warn!(url = %this.url, error = %e, "webhook delivery gave up");
            }
        });
    }
}
