pub mod client;

pub use client::EngineApiClient;
