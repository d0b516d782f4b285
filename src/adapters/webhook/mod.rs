//! Webhook adapter: outbound signed delivery and the shared signature helpers.

pub mod delivery;
pub mod signature;

pub use delivery::WebhookDelivery;
