//! Channel Register
//!
//! Owns the active poller registry: at most one poller task per resource,
//! each with its own kill signal. The kill signal is a child of the
//! register-wide shutdown token, so [`ChannelRegister::stop_all`] reaches
//! every poller with a single cancel.
//!
//! Pollers that stop on their own (stream ended with the terminate policy,
//! retries exhausted, output closed) are reaped lazily the next time the
//! registry is touched.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::application::ports::{ChatApi, MessageParser};
use crate::domain::streaming::MessageUpdate;
use crate::domain::subscription::ResourceId;
use crate::infrastructure::dispatcher::ApiDispatcher;
use crate::infrastructure::metrics;
use crate::infrastructure::poller::{ChannelPoller, PollerConfig, StopReason};

struct PollerHandle {
    cancel: CancellationToken,
    join: JoinHandle<StopReason>,
}

impl PollerHandle {
    fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Creates and destroys channel pollers keyed by resource.
pub struct ChannelRegister {
    dispatcher: Arc<ApiDispatcher>,
    parser: Arc<dyn MessageParser>,
    config: PollerConfig,
    pollers: Mutex<HashMap<ResourceId, PollerHandle>>,
    /// Deregistered pollers that may still be draining.
    retiring: Mutex<Vec<JoinHandle<StopReason>>>,
    shutdown: CancellationToken,
}

impl ChannelRegister {
    /// Create an empty register.
    #[must_use]
    pub fn new(
        dispatcher: Arc<ApiDispatcher>,
        parser: Arc<dyn MessageParser>,
        config: PollerConfig,
    ) -> Self {
        Self {
            dispatcher,
            parser,
            config,
            pollers: Mutex::new(HashMap::new()),
            retiring: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start a poller for `resource` publishing to `output`.
    ///
    /// Returns `false` without starting anything when the resource already
    /// has a poller, when no upstream capability is installed yet, or after
    /// shutdown.
    pub fn register_channel(
        &self,
        resource: ResourceId,
        output: mpsc::Sender<MessageUpdate>,
    ) -> bool {
        if self.shutdown.is_cancelled() {
            tracing::warn!(resource = %resource, "Register is shut down, not starting poller");
            return false;
        }
        if !self.dispatcher.has_capability() {
            tracing::info!(resource = %resource, "No upstream capability yet, not starting poller");
            return false;
        }

        let mut pollers = self.pollers.lock();
        reap(&mut pollers);
        if pollers.contains_key(&resource) {
            tracing::debug!(resource = %resource, "Poller already running");
            return false;
        }

        let cancel = self.shutdown.child_token();
        let poller = ChannelPoller::new(
            resource.clone(),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.parser),
            output,
            self.config.clone(),
            cancel.clone(),
            self.shutdown.clone(),
        );
        let span = tracing::info_span!("poller", resource = %resource);
        let join = tokio::spawn(poller.run().instrument(span));

        tracing::info!(resource = %resource, "Poller started");
        pollers.insert(resource, PollerHandle { cancel, join });
        metrics::set_active_pollers(pollers.len());
        true
    }

    /// Send the kill signal to `resource`'s poller and forget it.
    ///
    /// Returns `false` if the resource has no running poller.
    pub fn deregister_channel(&self, resource: &ResourceId) -> bool {
        let mut pollers = self.pollers.lock();
        reap(&mut pollers);
        let Some(handle) = pollers.remove(resource) else {
            return false;
        };
        metrics::set_active_pollers(pollers.len());
        drop(pollers);

        handle.cancel.cancel();
        let mut retiring = self.retiring.lock();
        retiring.retain(|join| !join.is_finished());
        retiring.push(handle.join);

        tracing::info!(resource = %resource, "Poller stop requested");
        true
    }

    /// Swap the upstream capability used for calls not yet started.
    pub fn set_credential(&self, capability: Arc<dyn ChatApi>) {
        self.dispatcher.set_capability(capability);
    }

    /// Stop every poller and the dispatcher, then wait for all poller
    /// tasks (including retiring ones) to finish.
    pub async fn stop_all(&self) {
        self.shutdown.cancel();
        self.dispatcher.stop();

        let handles: Vec<_> = {
            let mut pollers = self.pollers.lock();
            let mut retiring = self.retiring.lock();
            pollers
                .drain()
                .map(|(_, handle)| handle.join)
                .chain(retiring.drain(..))
                .collect()
        };
        metrics::set_active_pollers(0);

        let count = handles.len();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Poller task failed");
            }
        }
        tracing::info!(pollers = count, "All pollers stopped");
    }

    /// Whether `resource` has a running poller.
    #[must_use]
    pub fn is_active(&self, resource: &ResourceId) -> bool {
        let mut pollers = self.pollers.lock();
        reap(&mut pollers);
        pollers.contains_key(resource)
    }

    /// Resources with a running poller, sorted.
    #[must_use]
    pub fn active_resources(&self) -> Vec<ResourceId> {
        let mut pollers = self.pollers.lock();
        reap(&mut pollers);
        let mut resources: Vec<_> = pollers.keys().cloned().collect();
        resources.sort();
        resources
    }

    /// Whether the register has been shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// The shared dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<ApiDispatcher> {
        &self.dispatcher
    }
}

impl Drop for ChannelRegister {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for ChannelRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegister")
            .field("pollers", &self.pollers.lock().len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

fn reap(pollers: &mut HashMap<ResourceId, PollerHandle>) {
    let before = pollers.len();
    pollers.retain(|resource, handle| {
        let finished = handle.is_finished();
        if finished {
            tracing::debug!(resource = %resource, "Reaping finished poller");
        }
        !finished
    });
    if pollers.len() != before {
        metrics::set_active_pollers(pollers.len());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{ApiError, MockMessageParser};
    use crate::domain::streaming::{ChatMessage, ChatMessageKind, ChatPage};
    use crate::infrastructure::config::StreamEndedPolicy;
    use crate::infrastructure::dispatcher::DispatcherConfig;

    /// Always live, every page empty with a fresh token.
    struct Quiet;

    #[async_trait]
    impl ChatApi for Quiet {
        async fn find_live_video(&self, _channel_id: &str) -> Result<Option<String>, ApiError> {
            Ok(Some("live".to_string()))
        }

        async fn active_live_chat_id(&self, _video_id: &str) -> Result<Option<String>, ApiError> {
            Ok(Some("chat".to_string()))
        }

        async fn list_messages(
            &self,
            _live_chat_id: &str,
            _page_token: Option<&str>,
        ) -> Result<ChatPage, ApiError> {
            Ok(ChatPage::new(Vec::new(), "next").with_polling_interval(Duration::from_secs(1)))
        }
    }

    /// Chat already over.
    struct Ended;

    #[async_trait]
    impl ChatApi for Ended {
        async fn find_live_video(&self, _channel_id: &str) -> Result<Option<String>, ApiError> {
            Ok(Some("live".to_string()))
        }

        async fn active_live_chat_id(&self, _video_id: &str) -> Result<Option<String>, ApiError> {
            Ok(None)
        }

        async fn list_messages(
            &self,
            _live_chat_id: &str,
            _page_token: Option<&str>,
        ) -> Result<ChatPage, ApiError> {
            Err(ApiError::Transport("unreachable".to_string()))
        }
    }

    fn parser() -> Arc<dyn MessageParser> {
        let mut parser = MockMessageParser::new();
        parser.expect_parse().returning(|item| ChatMessage {
            id: item.id.clone(),
            kind: ChatMessageKind::Other,
            author: crate::domain::streaming::ChatAuthor::default(),
            text: String::new(),
            amount: None,
        });
        Arc::new(parser)
    }

    fn register_with(api: Option<Arc<dyn ChatApi>>, config: PollerConfig) -> ChannelRegister {
        let dispatcher = ApiDispatcher::spawn(DispatcherConfig::default());
        if let Some(api) = api {
            dispatcher.set_capability(api);
        }
        ChannelRegister::new(Arc::new(dispatcher), parser(), config)
    }

    #[tokio::test]
    async fn register_without_capability_is_noop() {
        let register = register_with(None, PollerConfig::default());
        let (tx, _rx) = mpsc::channel(8);

        assert!(!register.register_channel(ResourceId::new("UC1"), tx));
        assert!(register.active_resources().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn double_register_keeps_one_poller() {
        let register = register_with(Some(Arc::new(Quiet)), PollerConfig::default());
        let (tx, _rx) = mpsc::channel(8);

        assert!(register.register_channel(ResourceId::new("UC1"), tx.clone()));
        assert!(!register.register_channel(ResourceId::new("UC1"), tx));
        assert_eq!(register.active_resources(), vec![ResourceId::new("UC1")]);

        register.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn deregister_unknown_is_noop() {
        let register = register_with(Some(Arc::new(Quiet)), PollerConfig::default());
        assert!(!register.deregister_channel(&ResourceId::new("nobody")));
    }

    #[tokio::test(start_paused = true)]
    async fn deregister_then_register_starts_fresh_poller() {
        let register = register_with(Some(Arc::new(Quiet)), PollerConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        let resource = ResourceId::new("UC1");

        assert!(register.register_channel(resource.clone(), tx.clone()));
        assert!(register.deregister_channel(&resource));
        assert!(!register.is_active(&resource));
        assert!(!register.deregister_channel(&resource));
        assert!(register.register_channel(resource.clone(), tx));
        assert!(register.is_active(&resource));

        register.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_joins_pollers_and_stops_dispatcher() {
        let register = register_with(Some(Arc::new(Quiet)), PollerConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        register.register_channel(ResourceId::new("UC1"), tx.clone());
        register.register_channel(ResourceId::new("UC2"), tx.clone());
        register.deregister_channel(&ResourceId::new("UC2"));

        register.stop_all().await;

        assert!(register.active_resources().is_empty());
        assert!(register.dispatcher().is_stopped());
        assert!(!register.register_channel(ResourceId::new("UC3"), tx));
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_poller_is_reaped() {
        let config = PollerConfig {
            stream_ended: StreamEndedPolicy::Terminate,
            ..PollerConfig::default()
        };
        let register = register_with(Some(Arc::new(Ended)), config);
        let (tx, _rx) = mpsc::channel(8);
        let resource = ResourceId::new("UC1");

        assert!(register.register_channel(resource.clone(), tx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!register.is_active(&resource));
    }
}
