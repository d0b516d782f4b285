//! Cross-cutting helpers: configuration and cancellation.

pub mod config;
pub mod shutdown;
