//! Business backend adapter. Implements BusinessPort with a single JSON POST.

use crate::domain::DomainError;
use crate::ports::{BusinessPort, BusinessReply};
use reqwest::Client;
use std::time::Duration;
use tracing::info;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpBusinessBackend {
    client: Client,
    url: String,
}

impl HttpBusinessBackend {
    pub fn new(url: impl Into<String>) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DomainError::Backend(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl BusinessPort for HttpBusinessBackend {
    async fn ask(
        &self,
        session_id: &str,
        message: &str,
        channel: &str,
    ) -> Result<BusinessReply, DomainError> {
        let body = serde_json::json!({
            "sessionId": session_id,
            "message": message,
            "channel": channel,
        });
        let res = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::Backend(format!("request failed: {}", e)))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(DomainError::Backend(format!("backend error {}: {}", status, text)));
        }
        let reply: BusinessReply = res
            .json()
            .await
            .map_err(|e| DomainError::Backend(format!("invalid response: {}", e)))?;
        info!(
            session = session_id,
            score = reply.lead_score,
            category = %reply.category,
            reply_len = reply.reply.chars().count(),
            "backend reply"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_ask_posts_session_and_parses_reply() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path("/api/chat/message").json_body(json!({
                "sessionId": "wa-549111",
                "message": "hola\nprecio?",
                "channel": "whatsapp"
            }));
            then.status(200)
                .json_body(json!({"reply": "Hola!", "leadScore": 42.0, "category": "warm"}));
        });
        let backend = HttpBusinessBackend::new(server.url("/api/chat/message")).unwrap();
        let reply = backend
            .ask("wa-549111", "hola\nprecio?", "whatsapp")
            .await
            .unwrap();
        m.assert_calls(1);
        assert_eq!(reply.reply, "Hola!");
        assert_eq!(reply.category, "warm");
        assert_eq!(reply.lead_score, 42.0);
    }

    #[tokio::test]
    async fn test_missing_fields_default() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(200).json_body(json!({}));
        });
        let backend = HttpBusinessBackend::new(server.url("/chat")).unwrap();
        let reply = backend.ask("wa-1", "x", "whatsapp").await.unwrap();
        assert!(reply.reply.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_backend_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(500).body("boom");
        });
        let backend = HttpBusinessBackend::new(server.url("/chat")).unwrap();
        assert!(matches!(
            backend.ask("wa-1", "x", "whatsapp").await,
            Err(DomainError::Backend(_))
        ));
    }
}
