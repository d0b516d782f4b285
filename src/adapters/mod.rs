//! Infrastructure adapters. Implement outbound ports.
//!
//! Protocol gateway, storage, webhooks, HTTP servers and clients. Map errors to DomainError.

pub mod backend;
pub mod engine_api;
pub mod http;
pub mod persistence;
pub mod protocol;
pub mod webhook;
