//! LiveChat Stream Proxy Binary
//!
//! Subscribes to the configured channels and logs their live chat.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin livechat-stream-proxy
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `YOUTUBE_API_KEY`: YouTube Data API key (in `api_key` mode)
//!
//! ## Optional
//! - `YOUTUBE_AUTH_MODE`: api_key | oauth (default: api_key)
//! - `YOUTUBE_ACCESS_TOKEN`: OAuth access token (in `oauth` mode)
//! - `LIVECHAT_PROXY_CHANNELS`: Comma separated channel ids to follow
//! - `LIVECHAT_PROXY_RETRY_INTERVAL_SECS`: Poller cool-down (default: 30)
//! - `LIVECHAT_PROXY_STREAM_ENDED`: retry | terminate (default: retry)
//! - `LIVECHAT_PROXY_RETRY_CANCEL_SCOPE`: local | global (default: local)
//! - `LIVECHAT_PROXY_DISPATCH_CONCURRENCY`: Upstream calls in flight (default: 1)
//! - `LIVECHAT_PROXY_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use livechat_stream_proxy::infrastructure::bootstrap::{self, StaticToken, TokenSource};
use livechat_stream_proxy::infrastructure::dispatcher::{ApiDispatcher, DispatcherConfig};
use livechat_stream_proxy::infrastructure::emitter::{ChatEmitter, EmitterConfig, EmitterError};
use livechat_stream_proxy::infrastructure::health::{HealthServer, HealthServerState};
use livechat_stream_proxy::infrastructure::poller::PollerConfig;
use livechat_stream_proxy::infrastructure::register::ChannelRegister;
use livechat_stream_proxy::infrastructure::telemetry;
use livechat_stream_proxy::{
    AuthMode, MessageUpdate, ProxyConfig, ResourceInfo, SubscriberId, YouTubeMessageParser,
    init_metrics,
};
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Subscriber id used for the channels followed by this binary.
const LOCAL_SUBSCRIBER: &str = "livechat-stream-proxy";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting LiveChat Stream Proxy");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = ProxyConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Polling engine
    let dispatcher = Arc::new(ApiDispatcher::spawn(DispatcherConfig::from(&config.dispatch)));
    let register = Arc::new(ChannelRegister::new(
        dispatcher,
        Arc::new(YouTubeMessageParser),
        PollerConfig::from(&config.polling),
    ));
    let emitter = Arc::new(ChatEmitter::new(
        register,
        &EmitterConfig::from(&config.channel),
    ));

    let updates = emitter
        .take_updates()
        .context("update stream already taken")?;
    let errors = emitter.take_errors().context("error stream already taken")?;
    let updates_task = tokio::spawn(log_updates(updates));
    let errors_task = tokio::spawn(watch_errors(errors, shutdown_token.clone()));

    // Credentials arrive asynchronously; subscriptions made before then
    // start polling once the capability is installed.
    let oauth_rx = deliver_token_source(&config);
    bootstrap::spawn_setup(Arc::clone(&emitter), config.clone(), oauth_rx);

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&emitter),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let subscriber = SubscriberId::new(LOCAL_SUBSCRIBER);
    for channel in &config.channels {
        emitter.register(subscriber.clone(), &ResourceInfo::channel(channel.as_str()));
    }
    if config.channels.is_empty() {
        tracing::warn!("No channels configured, set LIVECHAT_PROXY_CHANNELS");
    }

    tracing::info!(channels = config.channels.len(), "Stream proxy ready");

    await_shutdown(shutdown_token.clone()).await;

    let closed = tokio::time::timeout(SHUTDOWN_TIMEOUT, emitter.close())
        .await
        .is_ok();
    if !closed {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Pollers did not stop in time"
        );
    }
    join_consumers(closed, [("updates", updates_task), ("errors", errors_task)]).await;

    tracing::info!("Stream proxy stopped");
    Ok(())
}

/// Hand the OAuth token source to the bootstrap, the way the external
/// token workflow would.
fn deliver_token_source(config: &ProxyConfig) -> bootstrap::TokenSourceReceiver {
    let (tx, rx) = oneshot::channel::<Arc<dyn TokenSource>>();
    if config.auth_mode == AuthMode::OAuth
        && let Some(token) = config.credentials.access_token()
    {
        let _ = tx.send(Arc::new(StaticToken::new(token)));
    }
    rx
}

/// Log every published chat message.
async fn log_updates(mut updates: mpsc::Receiver<MessageUpdate>) {
    while let Some(update) = updates.recv().await {
        tracing::info!(
            resource = %update.resource,
            author = %update.message.author.name,
            kind = ?update.message.kind,
            time = %update.update_time,
            text = %update.message.text,
            "Chat message"
        );
    }
    tracing::debug!("Update stream closed");
}

/// Log errors; a setup failure shuts the proxy down.
async fn watch_errors(mut errors: mpsc::Receiver<EmitterError>, shutdown_token: CancellationToken) {
    while let Some(error) = errors.recv().await {
        match error {
            EmitterError::Setup(e) => {
                tracing::error!(error = %e, "Upstream setup failed, shutting down");
                shutdown_token.cancel();
            }
        }
    }
}

/// Wait for the stream consumer tasks.
///
/// Their streams only end once the emitter has closed, so after a timed
/// out close they are aborted instead of awaited forever.
async fn join_consumers<const N: usize>(closed: bool, tasks: [(&'static str, JoinHandle<()>); N]) {
    for (name, task) in tasks {
        if !closed {
            task.abort();
        }
        match task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => tracing::debug!(task = name, "Consumer task aborted"),
            Err(e) => tracing::error!(task = name, error = %e, "Consumer task failed"),
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    tracing::info!(
        auth_mode = config.auth_mode.as_str(),
        channels = config.channels.len(),
        retry_interval_secs = config.polling.retry_interval.as_secs(),
        stream_ended = config.polling.stream_ended.as_str(),
        retry_cancel_scope = config.polling.retry_cancel_scope.as_str(),
        dispatch_concurrency = config.dispatch.concurrency,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        api_base_url = %config.api_base_url,
        credentials = ?config.credentials,
        "Upstream endpoint"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT) or an internal shutdown.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {}
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
