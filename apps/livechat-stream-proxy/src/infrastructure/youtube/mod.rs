//! YouTube Adapter
//!
//! Concrete upstream for the chat ports: an HTTP client for the YouTube
//! Data API v3 live streaming endpoints and a parser for its
//! `liveChatMessage` records.
//!
//! # Endpoints
//!
//! - `GET /search?part=id&channelId=…&eventType=live&type=video`
//! - `GET /videos?part=liveStreamingDetails&id=…`
//! - `GET /liveChat/messages?liveChatId=…&part=snippet,authorDetails&pageToken=…`

mod client;
mod parser;

pub use client::{YouTubeClient, YouTubeClientConfig};
pub use parser::YouTubeMessageParser;
