//! Maps YouTube live chat records to chat messages.

use crate::application::ports::MessageParser;
use crate::domain::streaming::{ChatAuthor, ChatMessage, ChatMessageKind, LiveChatItem};

/// [`MessageParser`] for YouTube `liveChatMessage` resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct YouTubeMessageParser;

impl YouTubeMessageParser {
    fn kind(event_type: &str) -> ChatMessageKind {
        match event_type {
            "textMessageEvent" => ChatMessageKind::Text,
            "superChatEvent" | "superStickerEvent" => ChatMessageKind::SuperChat,
            "newSponsorEvent" | "memberMilestoneChatEvent" | "membershipGiftingEvent"
            | "giftMembershipReceivedEvent" => ChatMessageKind::Membership,
            _ => ChatMessageKind::Other,
        }
    }
}

impl MessageParser for YouTubeMessageParser {
    fn parse(&self, item: &LiveChatItem) -> ChatMessage {
        let author = item
            .author_details
            .as_ref()
            .map(|details| ChatAuthor {
                id: details.channel_id.clone(),
                name: details.display_name.clone(),
                avatar_url: details.profile_image_url.clone(),
                is_owner: details.is_chat_owner,
                is_moderator: details.is_chat_moderator,
                is_member: details.is_chat_sponsor,
            })
            .unwrap_or_default();

        let Some(snippet) = item.snippet.as_ref() else {
            return ChatMessage {
                id: item.id.clone(),
                kind: ChatMessageKind::Other,
                author,
                text: String::new(),
                amount: None,
            };
        };

        let super_chat = snippet.super_chat_details.as_ref();
        let text = if snippet.display_message.is_empty() {
            super_chat
                .map(|details| details.user_comment.clone())
                .unwrap_or_default()
        } else {
            snippet.display_message.clone()
        };

        ChatMessage {
            id: item.id.clone(),
            kind: Self::kind(&snippet.event_type),
            author,
            text,
            amount: super_chat
                .map(|details| details.amount_display_string.clone())
                .filter(|amount| !amount.is_empty()),
        }
    }
}
