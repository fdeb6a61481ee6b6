//! Configuration Module
//!
//! Configuration loading for the proxy service.

mod settings;

pub use settings::{
    AuthMode, ChannelSettings, ConfigError, Credentials, DEFAULT_API_BASE_URL, DispatchSettings,
    PollingSettings, ProxyConfig, RetryCancelScope, ServerSettings, StreamEndedPolicy,
};
