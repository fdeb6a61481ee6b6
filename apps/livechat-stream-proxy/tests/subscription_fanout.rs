//! Subscription Fan-out Integration Tests
//!
//! Tests reference counting of subscribers onto pollers, capability
//! arrival, setup failures and closing the shared streams.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use tokio::sync::oneshot;
use tokio::time::timeout;

use livechat_stream_proxy::infrastructure::config::{
    ChannelSettings, DispatchSettings, PollingSettings, ServerSettings,
};
use livechat_stream_proxy::{
    ApiDispatcher, ApiError, AuthMode, ChannelRegister, ChatApi, ChatEmitter, ChatPage,
    Credentials, DispatcherConfig, EmitterConfig, EmitterError, Membership, PollerConfig,
    ProxyConfig, ResourceId, ResourceInfo, SetupError, SubscriberId, YouTubeMessageParser,
    spawn_setup,
};

/// Upstream with nothing live anywhere; pollers sit in their cool-down.
struct NothingLive;

#[async_trait]
impl ChatApi for NothingLive {
    async fn find_live_video(&self, _channel_id: &str) -> Result<Option<String>, ApiError> {
        Ok(None)
    }

    async fn active_live_chat_id(&self, _video_id: &str) -> Result<Option<String>, ApiError> {
        Ok(None)
    }

    async fn list_messages(
        &self,
        _live_chat_id: &str,
        _page_token: Option<&str>,
    ) -> Result<ChatPage, ApiError> {
        Ok(ChatPage::default())
    }
}

fn emitter(capability: Option<Arc<dyn ChatApi>>) -> Arc<ChatEmitter> {
    let dispatcher = match capability {
        Some(capability) => ApiDispatcher::with_capability(DispatcherConfig::default(), capability),
        None => ApiDispatcher::spawn(DispatcherConfig::default()),
    };
    let register = ChannelRegister::new(
        Arc::new(dispatcher),
        Arc::new(YouTubeMessageParser),
        PollerConfig::default(),
    );
    Arc::new(ChatEmitter::new(
        Arc::new(register),
        &EmitterConfig::default(),
    ))
}

fn proxy_config(auth_mode: AuthMode, api_key: Option<&str>) -> ProxyConfig {
    ProxyConfig {
        auth_mode,
        credentials: Credentials::new(api_key.map(str::to_string), None),
        api_base_url: "http://127.0.0.1:9".to_string(),
        channels: Vec::new(),
        polling: PollingSettings::default(),
        dispatch: DispatchSettings::default(),
        channel: ChannelSettings::default(),
        server: ServerSettings::default(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Register(usize, usize),
    Deregister(usize, usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize, 0..3usize).prop_map(|(s, r)| Op::Register(s, r)),
        (0..3usize, 0..3usize).prop_map(|(s, r)| Op::Deregister(s, r)),
    ]
}

proptest! {
    #[test]
    fn poller_runs_iff_resource_has_subscribers(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        rt.block_on(async {
            let emitter = emitter(Some(Arc::new(NothingLive)));
            let mut model: HashMap<usize, HashSet<usize>> = HashMap::new();

            for op in ops {
                match op {
                    Op::Register(s, r) => {
                        let membership = emitter
                            .register(SubscriberId::new(format!("s{s}")), &ResourceInfo::channel(format!("r{r}")))
                            .unwrap();
                        let set = model.entry(r).or_default();
                        let expected = if set.contains(&s) {
                            Membership::AlreadyPresent
                        } else if set.is_empty() {
                            Membership::FirstSubscriber
                        } else {
                            Membership::Joined
                        };
                        set.insert(s);
                        prop_assert_eq!(membership, expected);
                    }
                    Op::Deregister(s, r) => {
                        let membership = emitter
                            .deregister(&SubscriberId::new(format!("s{s}")), &ResourceInfo::channel(format!("r{r}")))
                            .unwrap();
                        let removed = model.get_mut(&r).is_some_and(|set| set.remove(&s));
                        let now_empty = model.get(&r).is_none_or(HashSet::is_empty);
                        let expected = match (removed, now_empty) {
                            (false, _) => Membership::NotPresent,
                            (true, true) => Membership::LastSubscriber,
                            (true, false) => Membership::Left,
                        };
                        prop_assert_eq!(membership, expected);
                    }
                }

                for r in 0..3usize {
                    let resource = ResourceId::new(format!("r{r}"));
                    let wanted = model.get(&r).is_some_and(|set| !set.is_empty());
                    prop_assert_eq!(emitter.is_polling(&resource), wanted);
                    prop_assert_eq!(
                        emitter.subscribers(&resource).len(),
                        model.get(&r).map_or(0, HashSet::len)
                    );
                }
            }

            emitter.close().await;
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[tokio::test(start_paused = true)]
async fn double_register_runs_one_poller() {
    let emitter = emitter(Some(Arc::new(NothingLive)));
    let alice = SubscriberId::new("alice");
    let channel = ResourceInfo::channel("UC1");

    assert_eq!(
        emitter.register(alice.clone(), &channel),
        Some(Membership::FirstSubscriber)
    );
    assert_eq!(
        emitter.register(alice.clone(), &channel),
        Some(Membership::AlreadyPresent)
    );
    assert_eq!(emitter.stats().active_pollers, 1);

    assert_eq!(
        emitter.deregister(&alice, &channel),
        Some(Membership::LastSubscriber)
    );
    assert!(!emitter.is_polling(&ResourceId::new("UC1")));
    emitter.close().await;
}

#[tokio::test(start_paused = true)]
async fn deregister_unknown_is_noop() {
    let emitter = emitter(Some(Arc::new(NothingLive)));
    emitter.register(SubscriberId::new("alice"), &ResourceInfo::channel("UC1"));

    assert_eq!(
        emitter.deregister(&SubscriberId::new("bob"), &ResourceInfo::channel("UC1")),
        Some(Membership::NotPresent)
    );
    assert_eq!(
        emitter.deregister(&SubscriberId::new("alice"), &ResourceInfo::channel("UC9")),
        Some(Membership::NotPresent)
    );
    assert!(emitter.is_polling(&ResourceId::new("UC1")));
    assert_eq!(emitter.stats().active_pollers, 1);
    emitter.close().await;
}

#[tokio::test(start_paused = true)]
async fn video_resources_are_ignored() {
    let emitter = emitter(Some(Arc::new(NothingLive)));
    let video = ResourceInfo::Video {
        video_id: "v1".to_string(),
    };

    assert_eq!(emitter.register(SubscriberId::new("alice"), &video), None);
    assert_eq!(emitter.deregister(&SubscriberId::new("alice"), &video), None);
    assert_eq!(emitter.stats().active_pollers, 0);
}

#[tokio::test(start_paused = true)]
async fn subscriptions_wait_for_capability() {
    let emitter = emitter(None);
    let resource = ResourceId::new("UC1");

    emitter.register(SubscriberId::new("alice"), &ResourceInfo::channel("UC1"));
    assert!(!emitter.is_polling(&resource));
    assert_eq!(emitter.subscribers(&resource).len(), 1);

    emitter.set_capability(Arc::new(NothingLive));
    assert!(emitter.is_polling(&resource));
    emitter.close().await;
}

#[tokio::test]
async fn api_key_setup_installs_capability() {
    let emitter = emitter(None);
    emitter.register(SubscriberId::new("alice"), &ResourceInfo::channel("UC1"));

    let (_tx, rx) = oneshot::channel();
    spawn_setup(
        Arc::clone(&emitter),
        proxy_config(AuthMode::ApiKey, Some("key")),
        rx,
    )
    .await
    .unwrap();

    assert!(emitter.stats().dispatcher.has_capability);
    assert!(emitter.is_polling(&ResourceId::new("UC1")));
    emitter.close().await;
}

#[tokio::test]
async fn setup_failure_is_reported_once() {
    let emitter = emitter(None);
    let mut errors = emitter.take_errors().unwrap();
    assert!(emitter.take_errors().is_none());

    let (tx, rx) = oneshot::channel();
    drop(tx);
    spawn_setup(Arc::clone(&emitter), proxy_config(AuthMode::OAuth, None), rx)
        .await
        .unwrap();

    let error = errors.recv().await.unwrap();
    assert!(matches!(
        error,
        EmitterError::Setup(SetupError::TokenSourceClosed)
    ));
    assert!(errors.try_recv().is_err());
    assert!(!emitter.stats().dispatcher.has_capability);
}

#[tokio::test(start_paused = true)]
async fn close_ends_both_streams() {
    let emitter = emitter(Some(Arc::new(NothingLive)));
    let mut updates = emitter.take_updates().unwrap();
    let mut errors = emitter.take_errors().unwrap();
    emitter.register(SubscriberId::new("alice"), &ResourceInfo::channel("UC1"));
    emitter.register(SubscriberId::new("bob"), &ResourceInfo::channel("UC2"));

    emitter.close().await;
    emitter.close().await;

    let closed = timeout(Duration::from_secs(1), updates.recv()).await.unwrap();
    assert!(closed.is_none());
    assert!(errors.recv().await.is_none());

    let stats = emitter.stats();
    assert!(stats.closed);
    assert_eq!(stats.active_pollers, 0);
    assert_eq!(stats.subscriptions.resource_count, 0);
    assert_eq!(
        emitter.register(SubscriberId::new("carol"), &ResourceInfo::channel("UC3")),
        None
    );
}
