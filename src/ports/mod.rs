//! Port traits. API boundaries for the hexagon.
//!
//! - Inbound: Called by the event loop into application behavior
//! - Outbound: Called by application into infrastructure

pub mod inbound;
pub mod outbound;

pub use inbound::{EventHandlers, NoopHandlers};
pub use outbound::{
    BusinessPort, BusinessReply, Capabilities, EngineControlPort, EnvelopeSink, HistoryEntry,
    HistoryPort, OutboundMedia, PresenceMedia, ProfileSnapshotPort, ProtocolGateway,
    UploadedMedia, WebhookPort,
};
