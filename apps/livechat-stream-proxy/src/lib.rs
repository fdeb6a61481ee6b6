#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! LiveChat Stream Proxy - Live Chat Multiplexer
//!
//! Polls the live chat of every channel some subscriber is interested in
//! and republishes each message on one shared update stream. Many
//! subscribers share one poller per channel, and all pollers share one
//! rate-limited upstream dispatcher.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core chat types and bookkeeping
//!   - `streaming`: Raw chat records, parsed messages, published updates
//!   - `subscription`: Subscriber → resource reference counting
//!   - `session`: Persisted session records
//!
//! - **Application**: Port definitions
//!   - `ports`: Upstream chat API and message parser interfaces
//!
//! - **Infrastructure**: Engine, adapters and ambient services
//!   - `dispatcher`: Shared upstream call queue
//!   - `poller`: Per-resource polling state machine
//!   - `register`: Active poller registry
//!   - `emitter`: Subscriber fan-out
//!   - `bootstrap`: Credential acquisition
//!   - `youtube`: YouTube Data API adapter
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Subscribers ──register──> ChatEmitter ──> ChannelRegister ──> ChannelPoller (per channel)
//!                                                                   │
//!                                                 ApiDispatcher <───┘
//!                                                       │
//!                                                 YouTube Data API
//!
//! ChannelPoller ──MessageUpdate──> shared update stream ──> all subscribers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core chat types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Polling engine, adapters and ambient services.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{ChatMessage, ChatMessageKind, ChatPage, MessageUpdate, UpdateKind};
pub use domain::subscription::{
    Membership, ResourceId, ResourceInfo, SubscriberId, SubscriptionRegistry, SubscriptionStats,
};

// Ports
pub use application::ports::{ApiError, ChatApi, MessageParser};

// Polling engine
pub use infrastructure::bootstrap::{Credential, SetupError, StaticToken, TokenSource, spawn_setup};
pub use infrastructure::dispatcher::{ApiDispatcher, DispatcherConfig, DispatcherStats};
pub use infrastructure::emitter::{ChatEmitter, EmitterConfig, EmitterError, EmitterStats};
pub use infrastructure::poller::{PollerConfig, RetryConfig, StopReason};
pub use infrastructure::register::ChannelRegister;

// Infrastructure config
pub use infrastructure::config::{
    AuthMode, ConfigError, Credentials, ProxyConfig, RetryCancelScope, StreamEndedPolicy,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Upstream adapter
pub use infrastructure::youtube::{YouTubeClient, YouTubeMessageParser};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
