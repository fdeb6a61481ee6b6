//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Chat messages published to subscribers
//! - **Upstream**: API calls by kind and outcome, call latency, queue depth
//! - **Pollers**: Active pollers and retry transitions
//! - **Subscriptions**: Subscribed resources
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "livechat_proxy_messages_published_total",
        "Total chat messages published to the shared update stream"
    );

    describe_counter!(
        "livechat_proxy_upstream_calls_total",
        "Total upstream API calls by kind and outcome"
    );
    describe_histogram!(
        "livechat_proxy_upstream_call_seconds",
        "Upstream API call latency"
    );
    describe_gauge!(
        "livechat_proxy_dispatch_queue_depth",
        "Calls waiting in the dispatcher queue"
    );

    describe_gauge!(
        "livechat_proxy_active_pollers",
        "Number of resources with a running poller"
    );
    describe_counter!(
        "livechat_proxy_poller_retries_total",
        "Total poller retry transitions by reason"
    );

    describe_gauge!(
        "livechat_proxy_subscribed_resources",
        "Number of resources with at least one subscriber"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for upstream call kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Live video lookup for a channel.
    FindLiveVideo,
    /// Live chat id resolution for a video.
    ResolveLiveChat,
    /// Page of chat messages.
    ListMessages,
}

impl CallKind {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FindLiveVideo => "find_live_video",
            Self::ResolveLiveChat => "resolve_live_chat",
            Self::ListMessages => "list_messages",
        }
    }
}

/// Metric labels for poller retry reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Channel has no live video.
    NoLiveVideo,
    /// Live chat has ended.
    StreamEnded,
    /// Upstream call failed.
    Upstream,
}

impl RetryReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoLiveVideo => "no_live_video",
            Self::StreamEnded => "stream_ended",
            Self::Upstream => "upstream",
        }
    }
}

/// Record messages published for a resource.
pub fn record_messages_published(count: u64) {
    counter!("livechat_proxy_messages_published_total").increment(count);
}

/// Record a finished upstream call.
///
/// `outcome` is `"ok"` or an error kind label.
pub fn record_upstream_call(kind: CallKind, outcome: &'static str, duration: Duration) {
    counter!(
        "livechat_proxy_upstream_calls_total",
        "call" => kind.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "livechat_proxy_upstream_call_seconds",
        "call" => kind.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Update the dispatcher queue depth.
#[allow(clippy::cast_precision_loss)]
pub fn set_dispatch_queue_depth(depth: usize) {
    gauge!("livechat_proxy_dispatch_queue_depth").set(depth as f64);
}

/// Update the active poller count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_pollers(count: usize) {
    gauge!("livechat_proxy_active_pollers").set(count as f64);
}

/// Record a poller entering its retry cool-down.
pub fn record_poller_retry(reason: RetryReason) {
    counter!(
        "livechat_proxy_poller_retries_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the subscribed resource count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribed_resources(count: usize) {
    gauge!("livechat_proxy_subscribed_resources").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_kind_as_str() {
        assert_eq!(CallKind::FindLiveVideo.as_str(), "find_live_video");
        assert_eq!(CallKind::ResolveLiveChat.as_str(), "resolve_live_chat");
        assert_eq!(CallKind::ListMessages.as_str(), "list_messages");
    }

    #[test]
    fn retry_reason_as_str() {
        assert_eq!(RetryReason::NoLiveVideo.as_str(), "no_live_video");
        assert_eq!(RetryReason::StreamEnded.as_str(), "stream_ended");
        assert_eq!(RetryReason::Upstream.as_str(), "upstream");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_messages_published(3);
        record_upstream_call(CallKind::ListMessages, "ok", Duration::from_millis(5));
        set_active_pollers(2);
    }
}
