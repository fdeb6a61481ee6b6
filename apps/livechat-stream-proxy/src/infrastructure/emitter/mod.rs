//! Subscriber Fan-out
//!
//! Maps subscribers to resources and reference-counts them: a resource is
//! polled while at least one subscriber wants it and released when the
//! last one leaves. All subscribers share one update stream and one error
//! stream; consumers filter updates by [`MessageUpdate::resource`].
//!
//! Registry mutation and the matching poller start/stop happen under the
//! same lock, so "resource became wanted" and "resource became unwanted"
//! reach the [`ChannelRegister`] in one total order per resource.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::application::ports::ChatApi;
use crate::domain::streaming::MessageUpdate;
use crate::domain::subscription::{
    Membership, ResourceId, ResourceInfo, SubscriberId, SubscriptionRegistry, SubscriptionStats,
};
use crate::infrastructure::bootstrap::SetupError;
use crate::infrastructure::config::ChannelSettings;
use crate::infrastructure::dispatcher::DispatcherStats;
use crate::infrastructure::metrics;
use crate::infrastructure::register::ChannelRegister;

// =============================================================================
// Errors
// =============================================================================

/// Notification on the shared error stream.
#[derive(Debug, thiserror::Error)]
pub enum EmitterError {
    /// No usable upstream capability could be built.
    #[error("setup failed: {0}")]
    Setup(#[from] SetupError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Emitter configuration.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Capacity of the shared update channel.
    pub updates_capacity: usize,
    /// Capacity of the shared error channel.
    pub errors_capacity: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self::from(&ChannelSettings::default())
    }
}

impl From<&ChannelSettings> for EmitterConfig {
    fn from(settings: &ChannelSettings) -> Self {
        Self {
            updates_capacity: settings.updates_capacity.max(1),
            errors_capacity: settings.errors_capacity.max(1),
        }
    }
}

// =============================================================================
// Emitter
// =============================================================================

/// Point-in-time emitter statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EmitterStats {
    /// Subscription counts.
    pub subscriptions: SubscriptionStats,
    /// Resources with a running poller.
    pub active_pollers: usize,
    /// Dispatcher counters.
    pub dispatcher: DispatcherStats,
    /// Whether [`ChatEmitter::close`] has run.
    pub closed: bool,
}

/// Multiplexes subscribers onto per-resource pollers.
pub struct ChatEmitter {
    register: Arc<ChannelRegister>,
    registry: Mutex<SubscriptionRegistry>,
    updates_tx: Mutex<Option<mpsc::Sender<MessageUpdate>>>,
    errors_tx: Mutex<Option<mpsc::Sender<EmitterError>>>,
    updates_rx: Mutex<Option<mpsc::Receiver<MessageUpdate>>>,
    errors_rx: Mutex<Option<mpsc::Receiver<EmitterError>>>,
    closed: AtomicBool,
}

impl ChatEmitter {
    /// Create an emitter over a register.
    #[must_use]
    pub fn new(register: Arc<ChannelRegister>, config: &EmitterConfig) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(config.updates_capacity.max(1));
        let (errors_tx, errors_rx) = mpsc::channel(config.errors_capacity.max(1));

        Self {
            register,
            registry: Mutex::new(SubscriptionRegistry::new()),
            updates_tx: Mutex::new(Some(updates_tx)),
            errors_tx: Mutex::new(Some(errors_tx)),
            updates_rx: Mutex::new(Some(updates_rx)),
            errors_rx: Mutex::new(Some(errors_rx)),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe `subscriber` to a resource.
    ///
    /// The first subscriber of a resource starts its poller. Returns `None`
    /// for resource kinds other than a channel, and after [`Self::close`].
    pub fn register(&self, subscriber: SubscriberId, info: &ResourceInfo) -> Option<Membership> {
        let Some(resource) = info.resource_id() else {
            tracing::debug!(subscriber = %subscriber, ?info, "Ignoring unsupported resource kind");
            return None;
        };
        if self.is_closed() {
            return None;
        }
        let output = self.updates_tx.lock().clone()?;

        let mut registry = self.registry.lock();
        let membership = registry.add(subscriber.clone(), resource.clone());
        if membership.starts_resource() {
            self.register.register_channel(resource.clone(), output);
        }
        metrics::set_subscribed_resources(registry.stats().resource_count);

        tracing::debug!(
            subscriber = %subscriber,
            resource = %resource,
            ?membership,
            "Subscriber registered"
        );
        Some(membership)
    }

    /// Unsubscribe `subscriber` from a resource.
    ///
    /// The last subscriber leaving stops the resource's poller. Unknown
    /// pairs are a no-op ([`Membership::NotPresent`]).
    pub fn deregister(&self, subscriber: &SubscriberId, info: &ResourceInfo) -> Option<Membership> {
        let resource = info.resource_id()?;
        if self.is_closed() {
            return None;
        }

        let mut registry = self.registry.lock();
        let membership = registry.remove(subscriber, &resource);
        if membership.releases_resource() {
            self.register.deregister_channel(&resource);
        }
        metrics::set_subscribed_resources(registry.stats().resource_count);

        tracing::debug!(
            subscriber = %subscriber,
            resource = %resource,
            ?membership,
            "Subscriber deregistered"
        );
        Some(membership)
    }

    /// Install or swap the upstream capability.
    ///
    /// Resources that gained subscribers before any capability existed get
    /// their pollers now.
    pub fn set_capability(&self, capability: Arc<dyn ChatApi>) {
        self.register.set_credential(capability);

        let Some(output) = self.updates_tx.lock().clone() else {
            return;
        };
        let registry = self.registry.lock();
        let mut started = 0;
        for resource in registry.resources() {
            if self.register.register_channel(resource, output.clone()) {
                started += 1;
            }
        }
        if started > 0 {
            tracing::info!(started, "Started pollers for waiting subscriptions");
        }
    }

    /// The shared update stream. Handed out once.
    pub fn take_updates(&self) -> Option<mpsc::Receiver<MessageUpdate>> {
        self.updates_rx.lock().take()
    }

    /// The shared error stream. Handed out once.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<EmitterError>> {
        self.errors_rx.lock().take()
    }

    /// Push a notification onto the error stream.
    ///
    /// Dropped with a warning if the stream is full or closed.
    pub fn report_error(&self, error: EmitterError) {
        let Some(errors) = self.errors_tx.lock().clone() else {
            tracing::warn!(error = %error, "Error stream closed, dropping error");
            return;
        };
        if let Err(e) = errors.try_send(error) {
            tracing::warn!(error = %e, "Error stream unavailable, dropping error");
        }
    }

    /// Subscribers of a resource.
    #[must_use]
    pub fn subscribers(&self, resource: &ResourceId) -> Vec<SubscriberId> {
        self.registry.lock().subscribers(resource)
    }

    /// Whether `resource` currently has a running poller.
    #[must_use]
    pub fn is_polling(&self, resource: &ResourceId) -> bool {
        self.register.is_active(resource)
    }

    /// Stop every poller, then close both streams. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Closing chat emitter");

        let released = self.registry.lock().drain();
        metrics::set_subscribed_resources(0);
        self.register.stop_all().await;

        self.updates_tx.lock().take();
        self.errors_tx.lock().take();
        tracing::info!(resources = released.len(), "Chat emitter closed");
    }

    /// Whether [`Self::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> EmitterStats {
        EmitterStats {
            subscriptions: self.registry.lock().stats(),
            active_pollers: self.register.active_resources().len(),
            dispatcher: self.register.dispatcher().stats(),
            closed: self.is_closed(),
        }
    }
}

impl std::fmt::Debug for ChatEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEmitter")
            .field("register", &self.register)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
