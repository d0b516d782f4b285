//! Application use cases. Orchestrate domain logic via ports.

pub mod aggregator;
pub mod audio;
pub mod dedupe;
pub mod engine;
pub mod filters;
pub mod media;
pub mod normalizer;
pub mod profile_service;
pub mod router;
pub mod send_policy;

#[cfg(test)]
pub mod testing;

pub use aggregator::Aggregator;
pub use dedupe::DedupeCache;
pub use engine::Engine;
pub use profile_service::ProfileStore;
pub use router::Router;
