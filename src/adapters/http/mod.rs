//! HTTP servers: the engine control surface and the webhook ingestion endpoint.

pub mod control;
pub mod ingest;
