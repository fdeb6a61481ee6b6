//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that define how the polling
//! engine talks to the upstream platform and the message parser.

/// Port interfaces for external systems (chat API, message parser).
pub mod ports;
