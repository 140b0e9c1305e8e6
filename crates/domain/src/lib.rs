//! Domain layer for VoiceRelay
//!
//! Contains the value types shared by every layer: provider identities,
//! speech requests and results, audio formats and content-derived cache keys.
//! This layer performs no I/O.

pub mod entities;
pub mod errors;
pub mod value_objects;

pub use entities::*;
pub use errors::DomainError;
pub use value_objects::*;
