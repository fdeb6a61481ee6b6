//! Session Records
//!
//! Persisted record tying one chat session to its per-platform source ids.
//! Storage belongs to another subsystem; the proxy only carries the shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::subscription::ResourceInfo;

/// A stored chat session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Primary key.
    pub id: u64,
    /// Discord source id, if any.
    #[serde(default)]
    pub discord: Option<String>,
    /// Twitch source id, if any.
    #[serde(default)]
    pub twitch: Option<String>,
    /// YouTube channel id, if any.
    #[serde(default)]
    pub youtube: Option<String>,
    /// Creation time.
    pub create_time: DateTime<Utc>,
    /// Last update time.
    pub update_time: DateTime<Utc>,
    /// Whether the session is switched on.
    #[serde(default)]
    pub is_on: bool,
    /// Soft-delete flag.
    #[serde(default)]
    pub is_deleted: bool,
}

impl Session {
    /// New session, switched on, stamped now.
    #[must_use]
    pub fn new(id: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            discord: None,
            twitch: None,
            youtube: None,
            create_time: now,
            update_time: now,
            is_on: true,
            is_deleted: false,
        }
    }

    /// On and not deleted.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_on && !self.is_deleted
    }

    /// Bump the update time.
    pub fn touch(&mut self) {
        self.update_time = Utc::now();
    }

    /// YouTube channel to follow for this session, if it is active.
    #[must_use]
    pub fn youtube_channel(&self) -> Option<ResourceInfo> {
        if !self.is_active() {
            return None;
        }
        self.youtube
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(ResourceInfo::channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_active() {
        let session = Session::new(7);
        assert!(session.is_active());
        assert_eq!(session.create_time, session.update_time);
    }

    #[test]
    fn deleted_session_is_inactive() {
        let mut session = Session::new(7);
        session.is_deleted = true;
        assert!(!session.is_active());
    }

    #[test]
    fn touch_moves_update_time_forward() {
        let mut session = Session::new(7);
        let created = session.create_time;
        session.touch();
        assert!(session.update_time >= created);
    }

    #[test]
    fn youtube_channel_only_for_active_sessions() {
        let mut session = Session::new(7);
        assert_eq!(session.youtube_channel(), None);

        session.youtube = Some("UC123".to_string());
        assert_eq!(session.youtube_channel(), Some(ResourceInfo::channel("UC123")));

        session.is_on = false;
        assert_eq!(session.youtube_channel(), None);
    }

    #[test]
    fn deserializes_with_missing_platforms() {
        let json = r#"{
            "id": 1,
            "youtube": "UC123",
            "createTime": "2024-01-01T00:00:00Z",
            "updateTime": "2024-01-02T00:00:00Z",
            "isOn": true
        }"#;

        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.youtube.as_deref(), Some("UC123"));
        assert!(session.discord.is_none());
        assert!(!session.is_deleted);
    }
}
