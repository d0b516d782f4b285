//! Engine control client. Implements EngineControlPort over the engine's REST surface.

use crate::adapters::http::control::{ControlResponse, MarkReadRequest, SendRequest, TypingRequest};
use crate::domain::DomainError;
use crate::ports::{EngineControlPort, PresenceMedia};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EngineApiClient {
    client: Client,
    base_url: String,
}

impl EngineApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DomainError::Control(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<ControlResponse, DomainError> {
        let res = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| DomainError::Control(format!("{} failed: {}", path, e)))?;
        let status = res.status();
        let parsed: ControlResponse = res
            .json()
            .await
            .map_err(|e| DomainError::Control(format!("{} returned {}: {}", path, status, e)))?;
        if !status.is_success() || !parsed.success {
            return Err(DomainError::Control(format!(
                "{} returned {}: {}",
                path, status, parsed.message
            )));
        }
        Ok(parsed)
    }
}

#[async_trait::async_trait]
impl EngineControlPort for EngineApiClient {
    async fn send_text(&self, to: &str, text: &str) -> Result<String, DomainError> {
        let body = SendRequest {
            recipient: to.to_string(),
            message: text.to_string(),
            media_path: None,
        };
        let res = self.post("/api/send", &body).await?;
        Ok(res.id.unwrap_or_default())
    }

    async fn set_typing(
        &self,
        chat: &str,
        typing: bool,
        media: PresenceMedia,
    ) -> Result<(), DomainError> {
        let body = TypingRequest {
            recipient: chat.to_string(),
            typing,
            media,
        };
        self.post("/api/typing", &body).await.map(|_| ())
    }

    async fn mark_read(
        &self,
        chat: &str,
        ids: &[String],
        sender: Option<&str>,
        receipt_type: Option<&str>,
    ) -> Result<(), DomainError> {
        if chat.is_empty() || ids.is_empty() {
            return Ok(());
        }
        let body = MarkReadRequest {
            recipient: chat.to_string(),
            message_ids: ids.to_vec(),
            sender: sender.filter(|s| !s.trim().is_empty()).map(str::to_string),
            receipt_type: receipt_type.map(str::to_string),
        };
        self.post("/api/markread", &body).await.map(|_| ())
    }
}
