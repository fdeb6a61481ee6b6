//! Live Chat Streaming Types
//!
//! Core domain types for chat traffic: the raw upstream chat records, the
//! parsed message payload, and the update envelope published to
//! subscribers. The raw records mirror the upstream JSON shape so the HTTP
//! adapter can deserialize straight into them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::subscription::ResourceId;

// =============================================================================
// Raw Upstream Records
// =============================================================================

/// One raw live chat record as returned by the upstream API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatItem {
    /// Upstream message id.
    #[serde(default)]
    pub id: String,
    /// Message body; records without one are skipped.
    #[serde(default)]
    pub snippet: Option<LiveChatSnippet>,
    /// Author of the message.
    #[serde(default)]
    pub author_details: Option<AuthorDetails>,
}

/// Message body of a raw chat record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatSnippet {
    /// Upstream event type, e.g. `textMessageEvent`.
    #[serde(default, rename = "type")]
    pub event_type: String,
    /// RFC 3339 publication time.
    #[serde(default)]
    pub published_at: String,
    /// Rendered message text.
    #[serde(default)]
    pub display_message: String,
    /// Paid message details, when the record is a super chat.
    #[serde(default)]
    pub super_chat_details: Option<SuperChatDetails>,
}

/// Paid message details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperChatDetails {
    /// Human readable amount, e.g. `$5.00`.
    #[serde(default)]
    pub amount_display_string: String,
    /// Text attached to the payment.
    #[serde(default)]
    pub user_comment: String,
}

/// Author of a raw chat record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorDetails {
    /// Author channel id.
    #[serde(default)]
    pub channel_id: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
    /// Avatar URL.
    #[serde(default)]
    pub profile_image_url: String,
    /// Author owns the stream.
    #[serde(default)]
    pub is_chat_owner: bool,
    /// Author moderates the chat.
    #[serde(default)]
    pub is_chat_moderator: bool,
    /// Author is a channel member.
    #[serde(default)]
    pub is_chat_sponsor: bool,
    /// Author channel is verified.
    #[serde(default)]
    pub is_verified: bool,
}

/// One page of chat records plus where to resume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatPage {
    /// Records in upstream order.
    pub items: Vec<LiveChatItem>,
    /// Continuation token for the next fetch. Empty means the upstream
    /// stopped handing out cursors.
    pub next_page_token: String,
    /// Minimum wait the upstream asks for before the next fetch.
    pub polling_interval: Option<Duration>,
}

impl ChatPage {
    /// Build a page with items and a continuation token.
    #[must_use]
    pub fn new(items: Vec<LiveChatItem>, next_page_token: impl Into<String>) -> Self {
        Self {
            items,
            next_page_token: next_page_token.into(),
            polling_interval: None,
        }
    }

    /// Set the requested polling interval.
    #[must_use]
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }
}

// =============================================================================
// Page Cursor
// =============================================================================

/// Position in a live chat stream.
///
/// Starts empty and only ever moves to the token of the page just fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor(Option<String>);

impl PageCursor {
    /// Cursor for the first fetch.
    #[must_use]
    pub const fn start() -> Self {
        Self(None)
    }

    /// Token to send with the next fetch.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Move to the continuation token of a fetched page.
    ///
    /// Returns `false` when the page carried no continuation, leaving the
    /// cursor untouched.
    pub fn advance(&mut self, page: &ChatPage) -> bool {
        if page.next_page_token.is_empty() {
            return false;
        }
        self.0 = Some(page.next_page_token.clone());
        true
    }
}

// =============================================================================
// Parsed Messages
// =============================================================================

/// Kind of chat message after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMessageKind {
    /// Plain text message.
    Text,
    /// Paid message.
    SuperChat,
    /// New or renewed membership.
    Membership,
    /// Anything else (polls, bans, system notices).
    Other,
}

/// Author of a parsed message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatAuthor {
    /// Author channel id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Avatar URL.
    pub avatar_url: String,
    /// Stream owner.
    pub is_owner: bool,
    /// Chat moderator.
    pub is_moderator: bool,
    /// Channel member.
    pub is_member: bool,
}

/// User-facing chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Upstream message id.
    pub id: String,
    /// Parsed kind.
    pub kind: ChatMessageKind,
    /// Author.
    pub author: ChatAuthor,
    /// Message text.
    pub text: String,
    /// Paid amount, when any.
    pub amount: Option<String>,
}

// =============================================================================
// Message Updates
// =============================================================================

/// What happened to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// A message appeared.
    New,
    /// A message was edited. Reserved.
    Edited,
    /// A message was removed. Reserved.
    Deleted,
}

/// A message published to subscribers.
///
/// Every subscriber reads the same stream; `resource` tells them which
/// live chat the message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUpdate {
    /// Upstream publication time, or receive time when unparsable.
    pub update_time: DateTime<Utc>,
    /// Update kind.
    pub kind: UpdateKind,
    /// Parsed message.
    pub message: ChatMessage,
    /// Resource of origin.
    pub resource: ResourceId,
}

impl MessageUpdate {
    /// A freshly seen message.
    #[must_use]
    pub const fn new_message(
        update_time: DateTime<Utc>,
        message: ChatMessage,
        resource: ResourceId,
    ) -> Self {
        Self {
            update_time,
            kind: UpdateKind::New,
            message,
            resource,
        }
    }
}

/// Publication time of a record, falling back to now.
#[must_use]
pub fn published_time(item: &LiveChatItem) -> DateTime<Utc> {
    item.snippet
        .as_ref()
        .and_then(|snippet| DateTime::parse_from_rfc3339(&snippet.published_at).ok())
        .map_or_else(Utc::now, |time| time.with_timezone(&Utc))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn item_published_at(published_at: &str) -> LiveChatItem {
        LiveChatItem {
            id: "m1".to_string(),
            snippet: Some(LiveChatSnippet {
                published_at: published_at.to_string(),
                ..LiveChatSnippet::default()
            }),
            author_details: None,
        }
    }

    #[test]
    fn published_time_parses_rfc3339() {
        let item = item_published_at("2024-03-01T12:30:00+02:00");

        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
        assert_eq!(published_time(&item), expected);
    }

    #[test]
    fn published_time_falls_back_to_now() {
        let before = Utc::now();
        let parsed = published_time(&item_published_at("yesterday-ish"));
        let after = Utc::now();

        assert!(parsed >= before && parsed <= after);
    }

    #[test]
    fn published_time_without_snippet_is_now() {
        let before = Utc::now();
        let parsed = published_time(&LiveChatItem::default());

        assert!(parsed >= before);
    }

    #[test]
    fn cursor_advances_to_page_token() {
        let mut cursor = PageCursor::start();
        assert_eq!(cursor.token(), None);

        assert!(cursor.advance(&ChatPage::new(vec![], "T1")));
        assert_eq!(cursor.token(), Some("T1"));

        assert!(cursor.advance(&ChatPage::new(vec![], "T2")));
        assert_eq!(cursor.token(), Some("T2"));
    }

    #[test]
    fn cursor_ignores_empty_token() {
        let mut cursor = PageCursor::start();
        cursor.advance(&ChatPage::new(vec![], "T1"));

        assert!(!cursor.advance(&ChatPage::new(vec![], "")));
        assert_eq!(cursor.token(), Some("T1"));
    }

    #[test]
    fn raw_item_deserializes_from_upstream_json() {
        let json = r#"{
            "id": "abc",
            "snippet": {
                "type": "textMessageEvent",
                "publishedAt": "2024-03-01T10:30:00Z",
                "displayMessage": "hello"
            },
            "authorDetails": {
                "channelId": "UCx",
                "displayName": "viewer",
                "isChatModerator": true
            }
        }"#;

        let item: LiveChatItem = serde_json::from_str(json).unwrap();

        let snippet = item.snippet.unwrap();
        assert_eq!(snippet.event_type, "textMessageEvent");
        assert_eq!(snippet.display_message, "hello");
        let author = item.author_details.unwrap();
        assert!(author.is_chat_moderator);
        assert!(!author.is_chat_owner);
    }

    #[test]
    fn update_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&UpdateKind::New).unwrap(), "\"new\"");
    }
}
