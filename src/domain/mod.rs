//! Core domain layer. No external I/O dependencies.
//!
//! Entities and business rules live here. Dependencies flow inward.

pub mod entities;
pub mod errors;
pub mod events;
pub mod jid;
pub mod profile;

pub use entities::{Direction, Envelope, MediaKind, MediaTicket, event_type};
pub use errors::DomainError;
pub use events::RawEvent;
pub use profile::Profile;
