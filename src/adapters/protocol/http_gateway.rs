//! HTTP protocol gateway. Implements ProtocolGateway against a sidecar that owns the
//! chat-protocol session.
//!
//! Wire contract (JSON unless noted):
//! - `POST /send/text {to, text}` -> `{id}`
//! - `POST /media/upload?kind=<kind>` raw bytes -> `UploadedMedia`
//! - `POST /send/media {to, media}` -> `{id}`
//! - `POST /send/status {media}` -> `{id}`
//! - `POST /presence/chat {chat, composing, media}`
//! - `POST /presence {available}`
//! - `POST /receipts {chat, sender?, ids, receipt_type}`
//! - `GET /contacts/name?jid=` and `GET /groups/name?jid=` -> `{name}`
//! - `POST /media/download {ticket}` -> raw bytes
//!
//! Raw events flow the other way: the sidecar pushes them to the engine's `/events`.

use crate::domain::{DomainError, MediaKind, MediaTicket};
use crate::ports::{Capabilities, OutboundMedia, PresenceMedia, ProtocolGateway, UploadedMedia};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct NameResponse {
    #[serde(default)]
    name: Option<String>,
}

pub struct HttpProtocolGateway {
    client: Client,
    base_url: String,
    capabilities: Capabilities,
}

impl HttpProtocolGateway {
    pub fn new(base_url: impl Into<String>, capabilities: Capabilities) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DomainError::Gateway(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            capabilities,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, DomainError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let text = res.text().await.unwrap_or_else(|_| "unknown".to_string());
        Err(DomainError::Gateway(format!("gateway error {}: {}", status, text)))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, DomainError> {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| DomainError::Gateway(format!("request failed: {}", e)))?;
        Self::check(res)
            .await?
            .json::<T>()
            .await
            .map_err(|e| DomainError::Gateway(format!("invalid response: {}", e)))
    }

    async fn post_unit(&self, path: &str, body: &serde_json::Value) -> Result<(), DomainError> {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| DomainError::Gateway(format!("request failed: {}", e)))?;
        Self::check(res).await.map(|_| ())
    }

    async fn lookup_name(&self, path: &str, jid: &str) -> Result<Option<String>, DomainError> {
        let res = self
            .client
            .get(self.url(path))
            .query(&[("jid", jid)])
            .send()
            .await
            .map_err(|e| DomainError::Gateway(format!("request failed: {}", e)))?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: NameResponse = Self::check(res)
            .await?
            .json()
            .await
            .map_err(|e| DomainError::Gateway(format!("invalid response: {}", e)))?;
        Ok(body.name.filter(|n| !n.trim().is_empty()))
    }
}

#[async_trait::async_trait]
impl ProtocolGateway for HttpProtocolGateway {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<String, DomainError> {
        let r: IdResponse = self
            .post_json("/send/text", &json!({ "to": to, "text": text }))
            .await?;
        Ok(r.id)
    }

    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadedMedia, DomainError> {
        let res = self
            .client
            .post(self.url("/media/upload"))
            .query(&[("kind", kind.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| DomainError::Gateway(format!("upload failed: {}", e)))?;
        Self::check(res)
            .await?
            .json()
            .await
            .map_err(|e| DomainError::Gateway(format!("invalid upload response: {}", e)))
    }

    async fn send_media(&self, to: &str, media: &OutboundMedia) -> Result<String, DomainError> {
        let r: IdResponse = self
            .post_json("/send/media", &json!({ "to": to, "media": media }))
            .await?;
        Ok(r.id)
    }

    async fn send_status(&self, media: &OutboundMedia) -> Result<String, DomainError> {
        if !self.capabilities.status {
            return Err(DomainError::Unsupported("status posts".into()));
        }
        let r: IdResponse = self
            .post_json("/send/status", &json!({ "media": media }))
            .await?;
        Ok(r.id)
    }

    async fn set_chat_presence(
        &self,
        chat: &str,
        composing: bool,
        media: PresenceMedia,
    ) -> Result<(), DomainError> {
        self.post_unit(
            "/presence/chat",
            &json!({ "chat": chat, "composing": composing, "media": media }),
        )
        .await
    }

    async fn send_presence(&self, available: bool) -> Result<(), DomainError> {
        self.post_unit("/presence", &json!({ "available": available }))
            .await
    }

    async fn mark_read(
        &self,
        chat: &str,
        sender: Option<&str>,
        ids: &[String],
        receipt_type: &str,
    ) -> Result<(), DomainError> {
        self.post_unit(
            "/receipts",
            &json!({
                "chat": chat,
                "sender": sender,
                "ids": ids,
                "receipt_type": receipt_type,
            }),
        )
        .await
    }

    async fn contact_name(&self, jid: &str) -> Result<Option<String>, DomainError> {
        self.lookup_name("/contacts/name", jid).await
    }

    async fn group_name(&self, jid: &str) -> Result<Option<String>, DomainError> {
        self.lookup_name("/groups/name", jid).await
    }

    async fn download(&self, ticket: &MediaTicket) -> Result<Vec<u8>, DomainError> {
        let res = self
            .client
            .post(self.url("/media/download"))
            .json(&json!({ "ticket": ticket }))
            .send()
            .await
            .map_err(|e| DomainError::Media(format!("download failed: {}", e)))?;
        let bytes = Self::check(res)
            .await?
            .bytes()
            .await
            .map_err(|e| DomainError::Media(format!("download body: {}", e)))?;
        Ok(bytes.to_vec())
    }
}
