//! Domain Layer - Core chat types and subscription bookkeeping.
//!
//! This layer contains the core domain types for live chat relaying
//! with no I/O. All types here are pure Rust with serialization support.

/// Chat records, parsed messages and published updates.
pub mod streaming;

/// Subscriber and resource tracking.
pub mod subscription;

/// Persisted session records.
pub mod session;
