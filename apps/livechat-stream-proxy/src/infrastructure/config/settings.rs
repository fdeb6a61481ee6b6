//! Proxy Configuration Settings
//!
//! Configuration types for the chat proxy, loaded from environment variables.

use std::time::Duration;

/// Default upstream API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// How the proxy authenticates against the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Static API key (read-only public data).
    #[default]
    ApiKey,
    /// OAuth bearer token delivered by the external token workflow.
    OAuth,
}

impl AuthMode {
    /// Parse auth mode from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "oauth" | "oauth2" => Self::OAuth,
            _ => Self::ApiKey,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::OAuth => "oauth",
        }
    }
}

/// What a poller does once the upstream reports the stream has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamEndedPolicy {
    /// Treat it like any other failure and keep retrying.
    #[default]
    Retry,
    /// Stop polling the resource.
    Terminate,
}

impl StreamEndedPolicy {
    /// Parse policy from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "terminate" | "stop" => Self::Terminate,
            _ => Self::Retry,
        }
    }

    /// Get the policy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Terminate => "terminate",
        }
    }
}

/// How far a stop received during a retry cool-down reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryCancelScope {
    /// Only the retrying resource stops.
    #[default]
    Local,
    /// Every poller and the dispatcher stop.
    Global,
}

impl RetryCancelScope {
    /// Parse scope from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "global" => Self::Global,
            _ => Self::Local,
        }
    }

    /// Get the scope name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Global => "global",
        }
    }
}

/// Upstream API credentials.
#[derive(Clone, Default)]
pub struct Credentials {
    api_key: Option<String>,
    access_token: Option<String>,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: Option<String>, access_token: Option<String>) -> Self {
        Self {
            api_key,
            access_token,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Get the OAuth access token.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("access_token", &redact(&self.access_token))
            .finish()
    }
}

/// Poller retry and pacing settings.
#[derive(Debug, Clone)]
pub struct PollingSettings {
    /// Delay before restarting a failed poller.
    pub retry_interval: Duration,
    /// Multiplier applied to the delay after each consecutive failure.
    pub retry_multiplier: f64,
    /// Upper bound for the retry delay.
    pub retry_max: Duration,
    /// Jitter factor as a fraction of the delay.
    pub retry_jitter: f64,
    /// Behavior once the upstream stream has ended.
    pub stream_ended: StreamEndedPolicy,
    /// Reach of a stop received during a retry cool-down.
    pub retry_cancel_scope: RetryCancelScope,
    /// Wait the upstream-requested interval between page fetches.
    pub honor_polling_interval: bool,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(30),
            retry_multiplier: 1.0,
            retry_max: Duration::from_secs(300),
            retry_jitter: 0.0,
            stream_ended: StreamEndedPolicy::Retry,
            retry_cancel_scope: RetryCancelScope::Local,
            honor_polling_interval: true,
        }
    }
}

/// Upstream call dispatch settings.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Maximum number of upstream calls in flight at once.
    pub concurrency: usize,
    /// Minimum spacing between the start of two upstream calls.
    pub call_spacing: Duration,
    /// HTTP request timeout.
    pub http_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            call_spacing: Duration::ZERO,
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Output channel settings.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Capacity of the shared update channel.
    pub updates_capacity: usize,
    /// Capacity of the shared error channel.
    pub errors_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            updates_capacity: 1_024,
            errors_capacity: 16,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Authentication mode.
    pub auth_mode: AuthMode,
    /// API credentials.
    pub credentials: Credentials,
    /// Upstream API base URL.
    pub api_base_url: String,
    /// Channels the binary subscribes to at startup.
    pub channels: Vec<String>,
    /// Poller settings.
    pub polling: PollingSettings,
    /// Dispatcher settings.
    pub dispatch: DispatchSettings,
    /// Output channel settings.
    pub channel: ChannelSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential required by the auth mode is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let auth_mode = std::env::var("YOUTUBE_AUTH_MODE")
            .map(|s| AuthMode::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let api_key = std::env::var("YOUTUBE_API_KEY").ok();
        let access_token = std::env::var("YOUTUBE_ACCESS_TOKEN").ok();

        if auth_mode == AuthMode::ApiKey {
            match api_key.as_deref() {
                None => return Err(ConfigError::MissingEnvVar("YOUTUBE_API_KEY".to_string())),
                Some("") => return Err(ConfigError::EmptyValue("YOUTUBE_API_KEY".to_string())),
                Some(_) => {}
            }
        }

        let api_base_url = std::env::var("YOUTUBE_API_BASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let channels = std::env::var("LIVECHAT_PROXY_CHANNELS")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        let defaults = PollingSettings::default();
        let polling = PollingSettings {
            retry_interval: parse_env_duration_secs(
                "LIVECHAT_PROXY_RETRY_INTERVAL_SECS",
                defaults.retry_interval,
            ),
            retry_multiplier: parse_env_f64(
                "LIVECHAT_PROXY_RETRY_MULTIPLIER",
                defaults.retry_multiplier,
            ),
            retry_max: parse_env_duration_secs("LIVECHAT_PROXY_RETRY_MAX_SECS", defaults.retry_max),
            retry_jitter: parse_env_f64("LIVECHAT_PROXY_RETRY_JITTER", defaults.retry_jitter),
            stream_ended: std::env::var("LIVECHAT_PROXY_STREAM_ENDED")
                .map(|s| StreamEndedPolicy::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            retry_cancel_scope: std::env::var("LIVECHAT_PROXY_RETRY_CANCEL_SCOPE")
                .map(|s| RetryCancelScope::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            honor_polling_interval: parse_env_bool(
                "LIVECHAT_PROXY_HONOR_POLLING_INTERVAL",
                defaults.honor_polling_interval,
            ),
        };

        let dispatch = DispatchSettings {
            concurrency: parse_env_usize(
                "LIVECHAT_PROXY_DISPATCH_CONCURRENCY",
                DispatchSettings::default().concurrency,
            )
            .max(1),
            call_spacing: parse_env_duration_millis(
                "LIVECHAT_PROXY_CALL_SPACING_MS",
                DispatchSettings::default().call_spacing,
            ),
            http_timeout: parse_env_duration_secs(
                "LIVECHAT_PROXY_HTTP_TIMEOUT_SECS",
                DispatchSettings::default().http_timeout,
            ),
        };

        let channel = ChannelSettings {
            updates_capacity: parse_env_usize(
                "LIVECHAT_PROXY_UPDATES_CAPACITY",
                ChannelSettings::default().updates_capacity,
            )
            .max(1),
            errors_capacity: parse_env_usize(
                "LIVECHAT_PROXY_ERRORS_CAPACITY",
                ChannelSettings::default().errors_capacity,
            )
            .max(1),
        };

        let server = ServerSettings {
            health_port: parse_env_u16(
                "LIVECHAT_PROXY_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            auth_mode,
            credentials: Credentials::new(api_key, access_token),
            api_base_url,
            channels,
            polling,
            dispatch,
            channel,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_finite_f64(&v))
        .unwrap_or(default)
}

/// `inf` and `NaN` parse as `f64` but are never valid settings.
fn parse_finite_f64(value: &str) -> Option<f64> {
    value.trim().parse().ok().filter(|v: &f64| v.is_finite())
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("oauth", AuthMode::OAuth)]
    #[test_case("OAuth2", AuthMode::OAuth)]
    #[test_case("api_key", AuthMode::ApiKey)]
    #[test_case("garbage", AuthMode::ApiKey)]
    fn auth_mode_parsing(input: &str, expected: AuthMode) {
        assert_eq!(AuthMode::from_str_case_insensitive(input), expected);
    }

    #[test_case("terminate", StreamEndedPolicy::Terminate)]
    #[test_case("STOP", StreamEndedPolicy::Terminate)]
    #[test_case("retry", StreamEndedPolicy::Retry)]
    #[test_case("", StreamEndedPolicy::Retry)]
    fn stream_ended_parsing(input: &str, expected: StreamEndedPolicy) {
        assert_eq!(StreamEndedPolicy::from_str_case_insensitive(input), expected);
    }

    #[test_case("global", RetryCancelScope::Global)]
    #[test_case("local", RetryCancelScope::Local)]
    #[test_case("other", RetryCancelScope::Local)]
    fn cancel_scope_parsing(input: &str, expected: RetryCancelScope) {
        assert_eq!(RetryCancelScope::from_str_case_insensitive(input), expected);
    }

    #[test]
    fn polling_defaults_match_fixed_backoff() {
        let settings = PollingSettings::default();
        assert_eq!(settings.retry_interval, Duration::from_secs(30));
        assert!((settings.retry_multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(settings.stream_ended, StreamEndedPolicy::Retry);
        assert_eq!(settings.retry_cancel_scope, RetryCancelScope::Local);
    }

    #[test]
    fn dispatch_defaults_are_serialized() {
        assert_eq!(DispatchSettings::default().concurrency, 1);
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::new(Some("secret-key".to_string()), None);
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test_case("1.5", Some(1.5))]
    #[test_case(" 0.1 ", Some(0.1))]
    #[test_case("inf", None)]
    #[test_case("-infinity", None)]
    #[test_case("NaN", None)]
    #[test_case("fast", None)]
    fn float_settings_must_be_finite(input: &str, expected: Option<f64>) {
        assert_eq!(parse_finite_f64(input), expected);
    }

    #[test]
    fn channel_list_parsing() {
        assert_eq!(parse_list(" UC1, ,UC2,"), vec!["UC1", "UC2"]);
        assert!(parse_list("").is_empty());
    }
}
