//! Upstream API Dispatcher
//!
//! Every poller submits its upstream calls here instead of calling the
//! chat API directly. A single worker task pulls envelopes off an
//! unbounded queue and runs them against the current capability, with at
//! most `concurrency` calls in flight and an optional minimum spacing
//! between call starts. With the default concurrency of 1 all upstream
//! traffic is serialized.
//!
//! # Architecture
//!
//! ```text
//! Poller A ─┐                                  ┌─> ChatApi call ─┐
//! Poller B ─┼─> submit() ─> queue ─> worker ───┤   (≤ N at once) ├─> oneshot reply
//! Poller C ─┘                        │         └─> ChatApi call ─┘
//!                                    └─ capability read at call start
//! ```
//!
//! Each envelope carries a single oneshot reply holding a `Result`, so the
//! caller observes exactly one outcome per call. Envelopes dropped by a
//! stopped dispatcher resolve to [`ApiError::DispatcherStopped`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ApiError, ChatApi};
use crate::domain::streaming::ChatPage;
use crate::infrastructure::config::DispatchSettings;
use crate::infrastructure::metrics::{self, CallKind};

// =============================================================================
// Calls
// =============================================================================

/// One upstream call, described as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    /// Find the video currently live on a channel.
    FindLiveVideo {
        /// Channel to search.
        channel_id: String,
    },
    /// Resolve the active live chat of a video.
    ResolveLiveChat {
        /// Live video id.
        video_id: String,
    },
    /// Fetch the next page of a live chat.
    ListMessages {
        /// Live chat id.
        live_chat_id: String,
        /// Continuation token of the previous page.
        page_token: Option<String>,
    },
}

impl ApiCall {
    /// Metric label for this call.
    #[must_use]
    pub const fn kind(&self) -> CallKind {
        match self {
            Self::FindLiveVideo { .. } => CallKind::FindLiveVideo,
            Self::ResolveLiveChat { .. } => CallKind::ResolveLiveChat,
            Self::ListMessages { .. } => CallKind::ListMessages,
        }
    }

    async fn execute(&self, api: &dyn ChatApi) -> Result<ApiResponse, ApiError> {
        match self {
            Self::FindLiveVideo { channel_id } => api
                .find_live_video(channel_id)
                .await
                .map(ApiResponse::LiveVideo),
            Self::ResolveLiveChat { video_id } => api
                .active_live_chat_id(video_id)
                .await
                .map(ApiResponse::LiveChat),
            Self::ListMessages {
                live_chat_id,
                page_token,
            } => api
                .list_messages(live_chat_id, page_token.as_deref())
                .await
                .map(ApiResponse::Page),
        }
    }
}

/// Result payload of an [`ApiCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiResponse {
    /// Live video id, if the channel is live.
    LiveVideo(Option<String>),
    /// Active live chat id, if the chat is open.
    LiveChat(Option<String>),
    /// Page of chat messages.
    Page(ChatPage),
}

impl ApiResponse {
    /// Unwrap a [`ApiResponse::LiveVideo`].
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] for any other variant.
    pub fn into_live_video(self) -> Result<Option<String>, ApiError> {
        match self {
            Self::LiveVideo(video) => Ok(video),
            other => Err(other.mismatch("live video")),
        }
    }

    /// Unwrap a [`ApiResponse::LiveChat`].
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] for any other variant.
    pub fn into_live_chat(self) -> Result<Option<String>, ApiError> {
        match self {
            Self::LiveChat(chat) => Ok(chat),
            other => Err(other.mismatch("live chat")),
        }
    }

    /// Unwrap a [`ApiResponse::Page`].
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] for any other variant.
    pub fn into_page(self) -> Result<ChatPage, ApiError> {
        match self {
            Self::Page(page) => Ok(page),
            other => Err(other.mismatch("message page")),
        }
    }

    fn mismatch(&self, expected: &str) -> ApiError {
        let got = match self {
            Self::LiveVideo(_) => "live video",
            Self::LiveChat(_) => "live chat",
            Self::Page(_) => "message page",
        };
        ApiError::Decode(format!("expected {expected} response, got {got}"))
    }
}

/// A submitted call and its single-use reply channel.
#[derive(Debug)]
pub struct CallEnvelope {
    /// The call to run.
    pub call: ApiCall,
    /// Receives the outcome exactly once.
    pub reply: oneshot::Sender<Result<ApiResponse, ApiError>>,
}

/// Outcome of a submitted call.
///
/// Resolves once the dispatcher has run the call, or to
/// [`ApiError::DispatcherStopped`] if the envelope was dropped unrun.
#[derive(Debug)]
#[must_use = "a submitted call must be awaited to observe its outcome"]
pub struct PendingCall {
    rx: oneshot::Receiver<Result<ApiResponse, ApiError>>,
}

impl Future for PendingCall {
    type Output = Result<ApiResponse, ApiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|reply| reply.unwrap_or(Err(ApiError::DispatcherStopped)))
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum calls in flight at once (at least 1).
    pub concurrency: usize,
    /// Minimum spacing between two call starts.
    pub call_spacing: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            call_spacing: Duration::ZERO,
        }
    }
}

impl From<&DispatchSettings> for DispatcherConfig {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            concurrency: settings.concurrency.max(1),
            call_spacing: settings.call_spacing,
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Calls waiting in the queue.
    pub queued: usize,
    /// Calls currently running against the upstream.
    pub in_flight: usize,
    /// Calls completed since start.
    pub completed: u64,
    /// Whether a capability is installed.
    pub has_capability: bool,
    /// Whether the dispatcher has been stopped.
    pub stopped: bool,
}

#[derive(Default)]
struct Shared {
    capability: RwLock<Option<Arc<dyn ChatApi>>>,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    completed: AtomicU64,
}

/// Shared upstream call dispatcher.
pub struct ApiDispatcher {
    queue: mpsc::UnboundedSender<CallEnvelope>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl ApiDispatcher {
    /// Start the dispatcher worker on the current runtime.
    ///
    /// No capability is installed; calls fail with
    /// [`ApiError::NoCapability`] until [`Self::set_capability`] runs.
    #[must_use]
    pub fn spawn(config: DispatcherConfig) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let cancel = CancellationToken::new();

        tokio::spawn(run_worker(rx, Arc::clone(&shared), cancel.clone(), config));

        Self {
            queue,
            shared,
            cancel,
        }
    }

    /// Start the dispatcher with a capability already installed.
    #[must_use]
    pub fn with_capability(config: DispatcherConfig, capability: Arc<dyn ChatApi>) -> Self {
        let dispatcher = Self::spawn(config);
        dispatcher.set_capability(capability);
        dispatcher
    }

    /// Enqueue a call. Never waits.
    pub fn submit(&self, call: ApiCall) -> PendingCall {
        let (reply, rx) = oneshot::channel();
        let depth = self.shared.queued.fetch_add(1, Ordering::Relaxed) + 1;

        if self.queue.send(CallEnvelope { call, reply }).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!("Call submitted to stopped dispatcher");
        } else {
            metrics::set_dispatch_queue_depth(depth);
        }

        PendingCall { rx }
    }

    /// Swap the capability used by calls that have not started yet.
    pub fn set_capability(&self, capability: Arc<dyn ChatApi>) {
        *self.shared.capability.write() = Some(capability);
        tracing::info!("Upstream capability installed");
    }

    /// Whether a capability is installed.
    #[must_use]
    pub fn has_capability(&self) -> bool {
        self.shared.capability.read().is_some()
    }

    /// Stop the worker. Queued calls resolve to
    /// [`ApiError::DispatcherStopped`]; calls already running complete.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("Stopping API dispatcher");
            self.cancel.cancel();
        }
    }

    /// Whether [`Self::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            queued: self.shared.queued.load(Ordering::Relaxed),
            in_flight: self.shared.in_flight.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            has_capability: self.has_capability(),
            stopped: self.is_stopped(),
        }
    }
}

impl Drop for ApiDispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ApiDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiDispatcher")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<CallEnvelope>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    config: DispatcherConfig,
) {
    let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut last_start: Option<Instant> = None;

    loop {
        let envelope = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let depth = shared.queued.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::set_dispatch_queue_depth(depth);

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        if let Some(last) = last_start
            && !config.call_spacing.is_zero()
        {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep_until(last + config.call_spacing) => {}
            }
        }
        last_start = Some(Instant::now());

        let capability = shared.capability.read().clone();
        tokio::spawn(execute(envelope, capability, permit, Arc::clone(&shared)));
    }

    let dropped = rx.len();
    rx.close();
    shared.queued.store(0, Ordering::Relaxed);
    metrics::set_dispatch_queue_depth(0);
    tracing::info!(dropped, "API dispatcher stopped");
}

async fn execute(
    envelope: CallEnvelope,
    capability: Option<Arc<dyn ChatApi>>,
    _permit: OwnedSemaphorePermit,
    shared: Arc<Shared>,
) {
    let CallEnvelope { call, reply } = envelope;
    let kind = call.kind();

    shared.in_flight.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();
    let result = match capability {
        Some(api) => call.execute(api.as_ref()).await,
        None => Err(ApiError::NoCapability),
    };
    let outcome = result.as_ref().map_or_else(ApiError::kind, |_| "ok");
    metrics::record_upstream_call(kind, outcome, started.elapsed());
    shared.in_flight.fetch_sub(1, Ordering::Relaxed);
    shared.completed.fetch_add(1, Ordering::Relaxed);

    if let Err(e) = &result {
        tracing::debug!(call = kind.as_str(), error = %e, "Upstream call failed");
    }
    if reply.send(result).is_err() {
        tracing::debug!(call = kind.as_str(), "Caller dropped pending call");
    }
}

// =============================================================================
// Tests
// =============================================================================
