//! Infrastructure Layer - Adapters and runtime machinery.
//!
//! This layer contains the polling engine (dispatcher, pollers, register,
//! fan-out), the concrete upstream adapter, and the ambient services.

/// Shared upstream call dispatcher.
pub mod dispatcher;

/// Per-resource polling state machine.
pub mod poller;

/// Active poller registry.
pub mod register;

/// Subscriber fan-out.
pub mod emitter;

/// Credential acquisition and capability setup.
pub mod bootstrap;

/// YouTube Data API adapter.
pub mod youtube;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
