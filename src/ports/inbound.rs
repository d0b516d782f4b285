//! Inbound port. The engine calls registered behavior into the application.

use crate::domain::events::{GroupEvent, MessageEvent, PresenceEvent, ReceiptEvent};
use crate::domain::{DomainError, Envelope};

/// Behavior callbacks invoked by the event loop after forwarding.
///
/// Every method defaults to a no-op. Returned errors are logged by the engine and
/// never stop the loop.
#[async_trait::async_trait]
pub trait EventHandlers: Send + Sync {
    /// Inbound message (never called for messages authored by this account).
    async fn on_message(&self, _env: &Envelope, _raw: &MessageEvent) -> Result<(), DomainError> {
        Ok(())
    }

    async fn on_receipt(&self, _env: &Envelope, _raw: &ReceiptEvent) -> Result<(), DomainError> {
        Ok(())
    }

    async fn on_presence(&self, _env: &Envelope, _raw: &PresenceEvent) -> Result<(), DomainError> {
        Ok(())
    }

    async fn on_group_update(&self, _env: &Envelope, _raw: &GroupEvent) -> Result<(), DomainError> {
        Ok(())
    }

    /// Side-effect failure (sink write) observed while handling an event.
    async fn on_error(&self, _err: &DomainError) {}
}

/// Handlers that do nothing; forwarding still happens.
pub struct NoopHandlers;

#[async_trait::async_trait]
impl EventHandlers for NoopHandlers {}
