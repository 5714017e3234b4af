//! Standalone session authentication server
//!
//! Serves the authentication routes over HTTP with an in-memory user store.
//! One-time codes are mailed through the SMTP relay when one is configured,
//! otherwise only their delivery is logged.

use rustpress_session_auth::{
    config::load_dotenv, telemetry, AuthDependencies, AuthError, AuthPlugin, CacheStore,
    LogNotifier, MemoryCache, MemoryUserStore, Notifier, Plugin, RedisCache, ServerConfig,
    SmtpNotifier, API_PREFIX,
};

use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv()?;
    let server = ServerConfig::from_env()?;
    telemetry::init(&server.log_level)?;

    let cache: Arc<dyn CacheStore> = match &server.redis_url {
        Some(url) => {
            let redis = RedisCache::from_url(url)?;
            redis.ping().await?;
            Arc::new(redis)
        }
        None => {
            tracing::warn!("REDIS_URL not set, one-time codes are kept in process memory");
            Arc::new(MemoryCache::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &server.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "Delivering one-time codes by SMTP");
            Arc::new(SmtpNotifier::new(smtp)?)
        }
        None => {
            tracing::warn!("SMTP_HOST not set, one-time codes will not be delivered");
            Arc::new(LogNotifier)
        }
    };

    let plugin = AuthPlugin::new();
    plugin
        .activate(AuthDependencies {
            users: Arc::new(MemoryUserStore::new()),
            cache,
            notifier,
        })
        .await?;

    let routes = plugin
        .routes()
        .ok_or_else(|| AuthError::Config("plugin did not activate".to_string()))?;
    let app = axum::Router::new().nest(API_PREFIX, routes);

    let addr = format!("{}:{}", server.host, server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        address = %addr,
        prefix = API_PREFIX,
        "Session authentication server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    plugin.deactivate().await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
