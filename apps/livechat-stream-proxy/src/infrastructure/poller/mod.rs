//! Channel Poller
//!
//! One poller task per live resource. It resolves the channel's live chat,
//! pages through new messages and publishes every message on the shared
//! update channel until it is stopped or the chat fails.
//!
//! # State Machine
//!
//! ```text
//!             ┌──────────── cool-down elapsed ─────────────┐
//!             v                                            │
//!  ──> Starting ── resolved ──> Listening ── error ──> Retrying
//!        │                       │    ^  │                 │
//!        │ error ────────────────┼────┼──┼──────────────> Retrying
//!        │                       │    └──┘ page            │ stop
//!        │ stop                  │ stop with call in flight │
//!        v                       v                          v
//!     Stopped <─── drained ── Draining                   Stopped
//! ```
//!
//! A stop never abandons a call that has already been handed to the
//! dispatcher: the poller waits for its reply and, for a page fetch,
//! still publishes the page before stopping. Pages are published in
//! fetch order and the page cursor only moves forward, so no message is
//! replayed within one listening session.

mod retry;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use retry::{RetryConfig, RetryPolicy};

use crate::application::ports::{ApiError, MessageParser};
use crate::domain::streaming::{ChatPage, MessageUpdate, PageCursor, published_time};
use crate::domain::subscription::ResourceId;
use crate::infrastructure::config::{PollingSettings, RetryCancelScope, StreamEndedPolicy};
use crate::infrastructure::dispatcher::{ApiCall, ApiDispatcher, ApiResponse, PendingCall};
use crate::infrastructure::metrics::{self, RetryReason};

// =============================================================================
// Errors
// =============================================================================

/// Why a poller left `Starting` or `Listening` for `Retrying`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// The channel is not live.
    #[error("no live video found for channel")]
    NoLiveVideo,

    /// The live chat is over.
    #[error("the live has ended")]
    StreamEnded,

    /// An upstream call failed.
    #[error(transparent)]
    Upstream(#[from] ApiError),
}

impl PollError {
    /// Metric label for this error.
    #[must_use]
    pub const fn reason(&self) -> RetryReason {
        match self {
            Self::NoLiveVideo => RetryReason::NoLiveVideo,
            Self::StreamEnded => RetryReason::StreamEnded,
            Self::Upstream(_) => RetryReason::Upstream,
        }
    }
}

// =============================================================================
// States
// =============================================================================

/// Why a poller reached `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stop signal received with no call in flight.
    Cancelled,
    /// Stop signal received during a page fetch; the fetch was drained.
    Drained,
    /// Chat ended and the policy is to terminate.
    StreamEnded,
    /// Register-wide shutdown interrupted a publish.
    Shutdown,
    /// Nobody reads the update channel any more.
    OutputClosed,
    /// Retry attempts ran out.
    RetriesExhausted,
}

impl StopReason {
    /// Reason label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Drained => "drained",
            Self::StreamEnded => "stream_ended",
            Self::Shutdown => "shutdown",
            Self::OutputClosed => "output_closed",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// Poller state.
#[derive(Debug)]
pub enum PollerState {
    /// Resolving the channel's live chat.
    Starting,
    /// Paging through the live chat.
    Listening {
        /// Active live chat id.
        live_chat_id: String,
        /// Position of the next fetch.
        cursor: PageCursor,
    },
    /// Stop requested while a page fetch was in flight.
    Draining {
        /// The in-flight fetch.
        pending: PendingCall,
    },
    /// Waiting out the cool-down after a failure.
    Retrying {
        /// The failure.
        error: PollError,
    },
    /// Terminal.
    Stopped(StopReason),
}

impl PollerState {
    /// State name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Listening { .. } => "listening",
            Self::Draining { .. } => "draining",
            Self::Retrying { .. } => "retrying",
            Self::Stopped(_) => "stopped",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Cool-down policy.
    pub retry: RetryConfig,
    /// Behavior once the chat has ended.
    pub stream_ended: StreamEndedPolicy,
    /// Reach of a stop received during the cool-down.
    pub cancel_scope: RetryCancelScope,
    /// Wait the upstream-requested interval between fetches.
    pub honor_polling_interval: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            stream_ended: StreamEndedPolicy::Retry,
            cancel_scope: RetryCancelScope::Local,
            honor_polling_interval: true,
        }
    }
}

impl From<&PollingSettings> for PollerConfig {
    fn from(settings: &PollingSettings) -> Self {
        Self {
            retry: RetryConfig::from(settings),
            stream_ended: settings.stream_ended,
            cancel_scope: settings.retry_cancel_scope,
            honor_polling_interval: settings.honor_polling_interval,
        }
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Polls one resource's live chat.
pub struct ChannelPoller {
    resource: ResourceId,
    dispatcher: Arc<ApiDispatcher>,
    parser: Arc<dyn MessageParser>,
    output: mpsc::Sender<MessageUpdate>,
    config: PollerConfig,
    retry: RetryPolicy,
    /// Kill signal for this resource.
    cancel: CancellationToken,
    /// Register-wide shutdown; parent of `cancel`.
    shutdown: CancellationToken,
}

impl ChannelPoller {
    /// Create a poller. Nothing runs until [`Self::run`].
    #[must_use]
    pub fn new(
        resource: ResourceId,
        dispatcher: Arc<ApiDispatcher>,
        parser: Arc<dyn MessageParser>,
        output: mpsc::Sender<MessageUpdate>,
        config: PollerConfig,
        cancel: CancellationToken,
        shutdown: CancellationToken,
    ) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        Self {
            resource,
            dispatcher,
            parser,
            output,
            config,
            retry,
            cancel,
            shutdown,
        }
    }

    /// Resource this poller serves.
    #[must_use]
    pub const fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// Drive the state machine from `Starting` until `Stopped`.
    pub async fn run(mut self) -> StopReason {
        let mut state = PollerState::Starting;
        loop {
            if let PollerState::Stopped(reason) = state {
                tracing::info!(
                    resource = %self.resource,
                    reason = reason.as_str(),
                    "Poller stopped"
                );
                return reason;
            }
            state = self.step(state).await;
        }
    }

    /// Run one transition.
    pub async fn step(&mut self, state: PollerState) -> PollerState {
        match state {
            PollerState::Starting => self.start().await,
            PollerState::Listening {
                live_chat_id,
                cursor,
            } => self.listen(live_chat_id, cursor).await,
            PollerState::Draining { pending } => self.drain(pending).await,
            PollerState::Retrying { error } => self.cool_down(error).await,
            stopped @ PollerState::Stopped(_) => stopped,
        }
    }

    async fn start(&mut self) -> PollerState {
        if self.cancel.is_cancelled() {
            return PollerState::Stopped(StopReason::Cancelled);
        }

        let video = match self
            .await_call(ApiCall::FindLiveVideo {
                channel_id: self.resource.to_string(),
            })
            .await
        {
            None => return PollerState::Stopped(StopReason::Cancelled),
            Some(result) => result.and_then(ApiResponse::into_live_video),
        };
        let video_id = match video {
            Ok(Some(video_id)) => video_id,
            Ok(None) => return retrying(PollError::NoLiveVideo),
            Err(e) => return retrying(e.into()),
        };

        let chat = match self
            .await_call(ApiCall::ResolveLiveChat {
                video_id: video_id.clone(),
            })
            .await
        {
            None => return PollerState::Stopped(StopReason::Cancelled),
            Some(result) => result.and_then(ApiResponse::into_live_chat),
        };
        let live_chat_id = match chat {
            Ok(Some(chat_id)) if !chat_id.is_empty() => chat_id,
            Ok(_) => return retrying(PollError::StreamEnded),
            Err(e) => return retrying(e.into()),
        };

        self.retry.reset();
        tracing::info!(
            resource = %self.resource,
            video_id = %video_id,
            live_chat_id = %live_chat_id,
            "Listening to live chat"
        );
        PollerState::Listening {
            live_chat_id,
            cursor: PageCursor::start(),
        }
    }

    async fn listen(&mut self, live_chat_id: String, mut cursor: PageCursor) -> PollerState {
        // A stop seen while the previous page was published must not
        // lead to another fetch.
        if self.cancel.is_cancelled() {
            return PollerState::Stopped(StopReason::Cancelled);
        }

        let mut pending = self.dispatcher.submit(ApiCall::ListMessages {
            live_chat_id: live_chat_id.clone(),
            page_token: cursor.token().map(str::to_string),
        });

        let result = tokio::select! {
            biased;
            result = &mut pending => result,
            () = self.cancel.cancelled() => return PollerState::Draining { pending },
        };

        let page = match result.and_then(ApiResponse::into_page) {
            Ok(page) => page,
            Err(e) => return retrying(e.into()),
        };

        let advanced = cursor.advance(&page);
        let interval = effective_interval(&page, &self.config);
        if let Err(reason) = self.publish(page).await {
            return PollerState::Stopped(reason);
        }
        if !advanced {
            return retrying(PollError::StreamEnded);
        }

        if let Some(interval) = interval {
            tokio::select! {
                () = self.cancel.cancelled() => return PollerState::Stopped(StopReason::Cancelled),
                () = tokio::time::sleep(interval) => {}
            }
        }

        PollerState::Listening {
            live_chat_id,
            cursor,
        }
    }

    async fn drain(&self, pending: PendingCall) -> PollerState {
        tracing::debug!(resource = %self.resource, "Stop during fetch, draining reply");
        match pending.await.and_then(ApiResponse::into_page) {
            Ok(page) => match self.publish(page).await {
                Ok(()) => PollerState::Stopped(StopReason::Drained),
                Err(reason) => PollerState::Stopped(reason),
            },
            Err(e) => {
                tracing::debug!(resource = %self.resource, error = %e, "Drained fetch failed");
                PollerState::Stopped(StopReason::Cancelled)
            }
        }
    }

    async fn cool_down(&mut self, error: PollError) -> PollerState {
        metrics::record_poller_retry(error.reason());

        if error == PollError::StreamEnded && self.config.stream_ended == StreamEndedPolicy::Terminate
        {
            tracing::info!(resource = %self.resource, "Live chat ended, terminating poller");
            return PollerState::Stopped(StopReason::StreamEnded);
        }

        let Some(delay) = self.retry.next_delay() else {
            tracing::warn!(resource = %self.resource, error = %error, "Retry attempts exhausted");
            return PollerState::Stopped(StopReason::RetriesExhausted);
        };

        tracing::warn!(
            resource = %self.resource,
            error = %error,
            attempt = self.retry.attempt_count(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Poller failed, retrying"
        );

        tokio::select! {
            () = self.cancel.cancelled() => {
                if self.config.cancel_scope == RetryCancelScope::Global {
                    tracing::warn!(resource = %self.resource, "Stop during cool-down, stopping all pollers");
                    self.shutdown.cancel();
                    self.dispatcher.stop();
                }
                PollerState::Stopped(StopReason::Cancelled)
            }
            () = tokio::time::sleep(delay) => PollerState::Starting,
        }
    }

    /// Await a call's reply. A stop during the wait still consumes the
    /// reply before returning `None`.
    async fn await_call(&self, call: ApiCall) -> Option<Result<ApiResponse, ApiError>> {
        let mut pending = self.dispatcher.submit(call);
        tokio::select! {
            biased;
            result = &mut pending => Some(result),
            () = self.cancel.cancelled() => {
                let _ = pending.await;
                None
            }
        }
    }

    /// Publish every message of a page in order.
    ///
    /// Only register-wide shutdown interrupts a publish blocked on a full
    /// channel; a per-resource stop lets the page finish.
    async fn publish(&self, page: ChatPage) -> Result<(), StopReason> {
        let mut published = 0;

        for item in page.items {
            if item.snippet.is_none() {
                continue;
            }
            let update = MessageUpdate::new_message(
                published_time(&item),
                self.parser.parse(&item),
                self.resource.clone(),
            );

            let sent = match self.output.try_send(update) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(StopReason::OutputClosed),
                Err(mpsc::error::TrySendError::Full(update)) => tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => Err(StopReason::Shutdown),
                    sent = self.output.send(update) => sent.map_err(|_| StopReason::OutputClosed),
                },
            };

            if let Err(reason) = sent {
                metrics::record_messages_published(published);
                return Err(reason);
            }
            published += 1;
        }

        metrics::record_messages_published(published);
        tracing::trace!(resource = %self.resource, published, "Page published");
        Ok(())
    }
}

impl std::fmt::Debug for ChannelPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPoller")
            .field("resource", &self.resource)
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

const fn retrying(error: PollError) -> PollerState {
    PollerState::Retrying { error }
}

/// How long the poller sleeps between fetches when the upstream asks for it.
#[must_use]
pub fn effective_interval(page: &ChatPage, config: &PollerConfig) -> Option<Duration> {
    page.polling_interval
        .filter(|interval| config.honor_polling_interval && !interval.is_zero())
}

// =============================================================================
// Tests
// =============================================================================
