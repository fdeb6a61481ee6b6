//! YouTube Data API v3 client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::application::ports::{ApiError, ChatApi};
use crate::domain::streaming::{ChatPage, LiveChatItem};
use crate::infrastructure::bootstrap::Credential;
use crate::infrastructure::config::{DEFAULT_API_BASE_URL, ProxyConfig};

/// Error reasons that mean the credential's budget is spent.
const QUOTA_REASONS: &[&str] = &[
    "quotaExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
];

/// Client configuration.
#[derive(Debug, Clone)]
pub struct YouTubeClientConfig {
    /// API base URL, without trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for YouTubeClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ProxyConfig> for YouTubeClientConfig {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            timeout: config.dispatch.http_timeout,
        }
    }
}

/// [`ChatApi`] over the YouTube Data API.
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    client: Client,
    base_url: String,
    credential: Credential,
}

impl YouTubeClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &YouTubeClientConfig, credential: Credential) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credential,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}/{path}", self.base_url);
        let request = self.client.get(&url).query(query);
        let request = match &self.credential {
            Credential::ApiKey(key) => request.query(&[("key", key.as_str())]),
            Credential::OAuth(source) => {
                let token = source
                    .token()
                    .await
                    .map_err(|e| ApiError::Transport(e.to_string()))?;
                request.bearer_auth(token)
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !status.is_success() {
            let error = error_from_body(status.as_u16(), &body);
            tracing::debug!(path, status = status.as_u16(), error = %error, "YouTube API error");
            return Err(error);
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatApi for YouTubeClient {
    async fn find_live_video(&self, channel_id: &str) -> Result<Option<String>, ApiError> {
        let response: SearchListResponse = self
            .get(
                "search",
                &[
                    ("part", "id"),
                    ("channelId", channel_id),
                    ("eventType", "live"),
                    ("type", "video"),
                ],
            )
            .await?;

        Ok(response
            .items
            .into_iter()
            .find_map(|item| item.id.video_id.filter(|id| !id.is_empty())))
    }

    async fn active_live_chat_id(&self, video_id: &str) -> Result<Option<String>, ApiError> {
        let response: VideoListResponse = self
            .get("videos", &[("part", "liveStreamingDetails"), ("id", video_id)])
            .await?;

        Ok(response
            .items
            .into_iter()
            .filter_map(|video| video.live_streaming_details)
            .filter_map(|details| details.active_live_chat_id)
            .find(|id| !id.is_empty()))
    }

    async fn list_messages(
        &self,
        live_chat_id: &str,
        page_token: Option<&str>,
    ) -> Result<ChatPage, ApiError> {
        let mut query = vec![("liveChatId", live_chat_id), ("part", "snippet,authorDetails")];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response: LiveChatMessageListResponse =
            self.get("liveChat/messages", &query).await?;

        let page = ChatPage::new(response.items, response.next_page_token.unwrap_or_default());
        Ok(match response.polling_interval_millis {
            Some(millis) => page.with_polling_interval(Duration::from_millis(millis)),
            None => page,
        })
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchListResponse {
    items: Vec<SearchResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchResult {
    id: SearchResultId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchResultId {
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VideoListResponse {
    items: Vec<Video>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Video {
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LiveStreamingDetails {
    active_live_chat_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LiveChatMessageListResponse {
    items: Vec<LiveChatItem>,
    next_page_token: Option<String>,
    polling_interval_millis: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    message: String,
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorDetail {
    reason: String,
}

fn error_from_body(status: u16, body: &str) -> ApiError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).unwrap_or_default();
    let message = if parsed.error.message.is_empty() {
        body.to_string()
    } else {
        parsed.error.message
    };

    let quota = status == 429
        || parsed
            .error
            .errors
            .iter()
            .any(|detail| QUOTA_REASONS.contains(&detail.reason.as_str()));

    if quota {
        ApiError::Quota(message)
    } else {
        ApiError::Status { status, message }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::infrastructure::bootstrap::StaticToken;

    async fn client(server: &MockServer, credential: Credential) -> YouTubeClient {
        YouTubeClient::new(
            &YouTubeClientConfig {
                base_url: server.uri(),
                timeout: Duration::from_secs(5),
            },
            credential,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn finds_live_video_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("channelId", "UC1"))
            .and(query_param("eventType", "live"))
            .and(query_param("key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{ "id": { "kind": "youtube#video", "videoId": "vid-1" } }]
            })))
            .mount(&server)
            .await;

        let api = client(&server, Credential::ApiKey("k".to_string())).await;
        assert_eq!(api.find_live_video("UC1").await, Ok(Some("vid-1".to_string())));
    }

    #[tokio::test]
    async fn no_search_results_means_not_live() {
        let server = MockServer::start().await;
        Mock::given(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "items": [] })))
            .mount(&server)
            .await;

        let api = client(&server, Credential::ApiKey("k".to_string())).await;
        assert_eq!(api.find_live_video("UC1").await, Ok(None));
    }

    #[tokio::test]
    async fn resolves_active_chat_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(path("/videos"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{ "liveStreamingDetails": { "activeLiveChatId": "chat-1" } }]
            })))
            .mount(&server)
            .await;

        let api = client(&server, Credential::OAuth(Arc::new(StaticToken::new("tok")))).await;
        assert_eq!(
            api.active_live_chat_id("vid-1").await,
            Ok(Some("chat-1".to_string()))
        );
    }

    #[tokio::test]
    async fn ended_stream_has_no_chat() {
        let server = MockServer::start().await;
        Mock::given(path("/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{ "liveStreamingDetails": { "actualEndTime": "2024-05-01T13:00:00Z" } }]
            })))
            .mount(&server)
            .await;

        let api = client(&server, Credential::ApiKey("k".to_string())).await;
        assert_eq!(api.active_live_chat_id("vid-1").await, Ok(None));
    }

    #[tokio::test]
    async fn lists_messages_with_page_token() {
        let server = MockServer::start().await;
        Mock::given(path("/liveChat/messages"))
            .and(query_param("liveChatId", "chat-1"))
            .and(query_param("pageToken", "T1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nextPageToken": "T2",
                "pollingIntervalMillis": 2000,
                "items": [{
                    "id": "m1",
                    "snippet": {
                        "type": "textMessageEvent",
                        "publishedAt": "2024-05-01T12:00:00Z",
                        "displayMessage": "hello"
                    },
                    "authorDetails": { "channelId": "UCa", "displayName": "Ann" }
                }]
            })))
            .mount(&server)
            .await;

        let api = client(&server, Credential::ApiKey("k".to_string())).await;
        let page = api.list_messages("chat-1", Some("T1")).await.unwrap();

        assert_eq!(page.next_page_token, "T2");
        assert_eq!(page.polling_interval, Some(Duration::from_secs(2)));
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "m1");
    }

    #[tokio::test]
    async fn quota_reason_maps_to_quota_error() {
        let server = MockServer::start().await;
        Mock::given(path("/liveChat/messages"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {
                    "code": 403,
                    "message": "The request cannot be completed because you have exceeded your quota.",
                    "errors": [{ "reason": "quotaExceeded", "domain": "youtube.quota" }]
                }
            })))
            .mount(&server)
            .await;

        let api = client(&server, Credential::ApiKey("k".to_string())).await;
        let err = api.list_messages("chat-1", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Quota(_)));
    }

    #[tokio::test]
    async fn other_status_maps_to_status_error() {
        let server = MockServer::start().await;
        Mock::given(path("/liveChat/messages"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": { "code": 404, "message": "liveChatNotFound", "errors": [{ "reason": "liveChatNotFound" }] }
            })))
            .mount(&server)
            .await;

        let api = client(&server, Credential::ApiKey("k".to_string())).await;
        assert_eq!(
            api.list_messages("chat-1", None).await,
            Err(ApiError::Status {
                status: 404,
                message: "liveChatNotFound".to_string()
            })
        );
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let api = client(&server, Credential::ApiKey("k".to_string())).await;
        assert!(matches!(
            api.find_live_video("UC1").await,
            Err(ApiError::Decode(_))
        ));
    }
}
