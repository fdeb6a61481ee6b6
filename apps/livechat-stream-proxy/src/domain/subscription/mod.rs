//! Subscription Tracking Types
//!
//! Domain types for tracking which downstream subscribers want which
//! live chat resources.
//!
//! # Design
//!
//! The registry keeps, per resource, the set of subscribers that asked for
//! it. A resource is "wanted" while its set is non-empty; the transitions
//! empty → non-empty and non-empty → empty are reported back to the caller
//! so it can start or stop the upstream poller for that resource.
//!
//! Many subscribers can share one resource while only one upstream polling
//! session runs for it.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque identifier of one live chat resource (a platform channel id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a new resource id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque identifier of one downstream consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Create a new subscriber id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// Resource Info
// =============================================================================

/// What a subscriber asks to follow.
///
/// Only the channel shape is served by the poller; other shapes belong to
/// collaborators and are ignored by the fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceInfo {
    /// A platform channel whose current live stream should be followed.
    Channel {
        /// Platform channel id.
        channel_id: String,
    },
    /// A single platform video.
    Video {
        /// Platform video id.
        video_id: String,
    },
}

impl ResourceInfo {
    /// Shorthand for a channel resource.
    #[must_use]
    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self::Channel {
            channel_id: channel_id.into(),
        }
    }

    /// Resource id for shapes the poller understands.
    #[must_use]
    pub fn resource_id(&self) -> Option<ResourceId> {
        match self {
            Self::Channel { channel_id } => Some(ResourceId::new(channel_id.clone())),
            Self::Video { .. } => None,
        }
    }
}

// =============================================================================
// Membership Changes
// =============================================================================

/// Outcome of adding or removing one (subscriber, resource) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// The resource had no subscriber before this one (0 → 1).
    FirstSubscriber,
    /// The subscriber joined a resource that was already wanted.
    Joined,
    /// The pair was already registered.
    AlreadyPresent,
    /// The last subscriber left (1 → 0); the resource key is gone.
    LastSubscriber,
    /// The subscriber left; others still want the resource.
    Left,
    /// The pair was not registered.
    NotPresent,
}

impl Membership {
    /// Whether the resource just became wanted.
    #[must_use]
    pub const fn starts_resource(self) -> bool {
        matches!(self, Self::FirstSubscriber)
    }

    /// Whether the resource just became unwanted.
    #[must_use]
    pub const fn releases_resource(self) -> bool {
        matches!(self, Self::LastSubscriber)
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Mapping from resource to the set of subscribers that want it.
///
/// Not synchronized; the owner serializes access so that the registry
/// change and the matching poller start/stop happen in one critical section.
///
/// # Example
///
/// ```rust
/// use livechat_stream_proxy::domain::subscription::{
///     Membership, ResourceId, SubscriberId, SubscriptionRegistry,
/// };
///
/// let mut registry = SubscriptionRegistry::new();
/// let channel = ResourceId::new("UC123");
///
/// assert_eq!(registry.add(SubscriberId::new("a"), channel.clone()), Membership::FirstSubscriber);
/// assert_eq!(registry.add(SubscriberId::new("b"), channel.clone()), Membership::Joined);
/// assert_eq!(registry.remove(&SubscriberId::new("a"), &channel), Membership::Left);
/// assert_eq!(registry.remove(&SubscriberId::new("b"), &channel), Membership::LastSubscriber);
/// assert!(!registry.contains(&channel));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    resources: HashMap<ResourceId, HashSet<SubscriberId>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber to a resource.
    pub fn add(&mut self, subscriber: SubscriberId, resource: ResourceId) -> Membership {
        match self.resources.get_mut(&resource) {
            Some(subscribers) => {
                if subscribers.insert(subscriber) {
                    Membership::Joined
                } else {
                    Membership::AlreadyPresent
                }
            }
            None => {
                self.resources.insert(resource, HashSet::from([subscriber]));
                Membership::FirstSubscriber
            }
        }
    }

    /// Remove a subscriber from a resource.
    ///
    /// Removing the last subscriber removes the resource key.
    pub fn remove(&mut self, subscriber: &SubscriberId, resource: &ResourceId) -> Membership {
        let Some(subscribers) = self.resources.get_mut(resource) else {
            return Membership::NotPresent;
        };

        if !subscribers.remove(subscriber) {
            return Membership::NotPresent;
        }

        if subscribers.is_empty() {
            self.resources.remove(resource);
            Membership::LastSubscriber
        } else {
            Membership::Left
        }
    }

    /// Whether any subscriber wants the resource.
    #[must_use]
    pub fn contains(&self, resource: &ResourceId) -> bool {
        self.resources.contains_key(resource)
    }

    /// Whether this exact pair is registered.
    #[must_use]
    pub fn is_subscribed(&self, subscriber: &SubscriberId, resource: &ResourceId) -> bool {
        self.resources
            .get(resource)
            .is_some_and(|subscribers| subscribers.contains(subscriber))
    }

    /// Subscribers of a resource.
    #[must_use]
    pub fn subscribers(&self, resource: &ResourceId) -> Vec<SubscriberId> {
        self.resources
            .get(resource)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All wanted resources.
    #[must_use]
    pub fn resources(&self) -> Vec<ResourceId> {
        self.resources.keys().cloned().collect()
    }

    /// Remove everything, returning the resources that were wanted.
    pub fn drain(&mut self) -> Vec<ResourceId> {
        self.resources.drain().map(|(resource, _)| resource).collect()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let unique: HashSet<&SubscriberId> = self.resources.values().flatten().collect();
        SubscriptionStats {
            resource_count: self.resources.len(),
            subscriber_count: unique.len(),
            subscription_count: self.resources.values().map(HashSet::len).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Number of wanted resources.
    pub resource_count: usize,
    /// Number of distinct subscribers.
    pub subscriber_count: usize,
    /// Number of (subscriber, resource) pairs.
    pub subscription_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
