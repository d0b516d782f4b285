//! whatsbridge: chat protocol bridge with Hexagonal Architecture.
//!
//! The engine normalizes protocol events into envelopes and forwards them to a folder
//! sink and a signed webhook. The ingestion server receives those envelopes, keeps
//! per-chat profiles and answers debounced bursts through a business backend.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;
