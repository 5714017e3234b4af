//! RustPress Session Authentication Plugin
//!
//! Credential and session core for RustPress providing:
//! - User registration and login
//! - Argon2id password hashing (`base64(salt)$base64(digest)` records)
//! - JWT access and refresh tokens
//! - Cache-backed one-time codes with rate limiting and single-use redemption
//! - Optional one-time-code step on login
//! - Bearer authentication middleware
//!
//! # Configuration
//!
//! All configuration is loaded from environment variables:
//! - `JWT_SECRET` - Secret key for signing JWTs (required, min 32 chars)
//! - `JWT_ACCESS_EXPIRATION` - Access token expiration in seconds (default: 86400)
//! - `JWT_REFRESH_EXPIRATION` - Refresh token expiration in seconds (default: 604800)
//! - `JWT_ISSUER` - JWT issuer claim (default: "rustpress")
//! - `JWT_AUDIENCE` - JWT audience claim (default: "rustpress-api")
//! - `OTP_LENGTH`, `OTP_TTL`, `OTP_MAX_REQUESTS`, `OTP_REQUEST_WINDOW`, `OTP_MAX_ATTEMPTS` - one-time code policy
//! - `REQUIRE_LOGIN_OTP` - Require an emailed code after the password check (default: false)
//! - `MIN_PASSWORD_LENGTH` - Password length floor (default: 8)
//! - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_FROM_EMAIL` - mail relay for codes (server binary)
//!
//! # Usage
//!
//! ```rust,ignore
//! use rustpress_session_auth::{AuthDependencies, AuthPlugin, Plugin};
//!
//! let plugin = AuthPlugin::new();
//! plugin.activate(AuthDependencies::in_memory()).await?;
//!
//! let app = plugin.routes().expect("plugin is active");
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod hasher;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod otp;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod token;

// Re-export commonly used types
pub use cache::{CacheStore, MemoryCache, RedisCache};
pub use config::{AuthConfig, ServerConfig, SmtpConfig};
pub use error::{AuthError, TeardownError, TokenFault};
pub use extractors::AuthUser;
pub use handlers::{AuthState, API_PREFIX};
pub use hasher::CredentialHasher;
pub use middleware::RequestAuthenticator;
pub use models::*;
pub use notifier::{LogNotifier, Notifier, RecordingNotifier, SmtpNotifier};
pub use otp::{IssuedOtp, OtpPolicy, OtpPurpose, OtpService};
pub use service::AuthService;
pub use store::{MemoryUserStore, UserLookup, UserStore};
pub use token::{TokenPair, TokenService};

use async_trait::async_trait;
use axum::Router;
use std::sync::Arc;
use tokio::sync::RwLock;

// ============================================
// Plugin Types (Standalone - no external deps)
// ============================================

/// Plugin state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Inactive,
    Active,
    Error,
}

/// Plugin metadata
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
}

/// External collaborators the plugin is wired to
#[derive(Clone)]
pub struct AuthDependencies {
    pub users: Arc<dyn UserStore>,
    pub cache: Arc<dyn CacheStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl AuthDependencies {
    /// Process-local store, cache and logging notifier
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(MemoryUserStore::new()),
            cache: Arc::new(MemoryCache::new()),
            notifier: Arc::new(LogNotifier),
        }
    }
}

/// Plugin lifecycle trait
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Get plugin information
    fn info(&self) -> &PluginInfo;

    /// Get current plugin state
    async fn state(&self) -> PluginState;

    /// Activate the plugin with configuration from the environment
    async fn activate(&self, deps: AuthDependencies) -> Result<(), AuthError>;

    /// Deactivate the plugin, closing every collaborator
    async fn deactivate(&self) -> Result<(), TeardownError>;

    /// Get plugin routes
    fn routes(&self) -> Option<Router>;
}

// ============================================
// Auth Plugin Implementation
// ============================================

/// RustPress Session Authentication Plugin
pub struct AuthPlugin {
    info: PluginInfo,
    state: RwLock<PluginState>,
    config: RwLock<Option<AuthConfig>>,
    auth_service: RwLock<Option<Arc<AuthService>>>,
    deps: RwLock<Option<AuthDependencies>>,
}

impl AuthPlugin {
    /// Create a new auth plugin instance
    pub fn new() -> Self {
        Self {
            info: PluginInfo {
                id: "rustpress-session-auth".into(),
                name: "RustPress Session Authentication".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                description: "Credential, token and one-time code authentication for RustPress"
                    .into(),
            },
            state: RwLock::new(PluginState::Inactive),
            config: RwLock::new(None),
            auth_service: RwLock::new(None),
            deps: RwLock::new(None),
        }
    }

    /// Get the authentication configuration
    pub async fn config(&self) -> Option<AuthConfig> {
        self.config.read().await.clone()
    }

    /// Get the authentication service
    pub async fn auth_service(&self) -> Option<Arc<AuthService>> {
        self.auth_service.read().await.clone()
    }

    /// Activate with an explicit configuration
    pub async fn activate_with(
        &self,
        config: AuthConfig,
        deps: AuthDependencies,
    ) -> Result<(), AuthError> {
        tracing::info!("Activating RustPress Session Authentication plugin");

        if let Err(err) = config.validate() {
            tracing::error!(reason = err.kind(), "Invalid authentication configuration: {}", err);
            *self.state.write().await = PluginState::Error;
            return Err(err);
        }

        let tokens = Arc::new(TokenService::new(&config));
        let otp = Arc::new(OtpService::new(
            deps.cache.clone(),
            deps.notifier.clone(),
            OtpPolicy::from(&config),
        ));
        let auth_service = Arc::new(AuthService::new(
            config.clone(),
            deps.users.clone(),
            tokens,
            otp,
        ));

        *self.deps.write().await = Some(deps);
        *self.config.write().await = Some(config);
        *self.auth_service.write().await = Some(auth_service);
        *self.state.write().await = PluginState::Active;

        tracing::info!("RustPress Session Authentication plugin activated successfully");
        Ok(())
    }
}

impl Default for AuthPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for AuthPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    async fn state(&self) -> PluginState {
        *self.state.read().await
    }

    async fn activate(&self, deps: AuthDependencies) -> Result<(), AuthError> {
        let config = match AuthConfig::from_env() {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(reason = err.kind(), "Failed to load configuration: {}", err);
                *self.state.write().await = PluginState::Error;
                return Err(err);
            }
        };

        self.activate_with(config, deps).await
    }

    async fn deactivate(&self) -> Result<(), TeardownError> {
        tracing::info!("Deactivating RustPress Session Authentication plugin");

        let deps = self.deps.write().await.take();
        *self.auth_service.write().await = None;
        *self.config.write().await = None;
        *self.state.write().await = PluginState::Inactive;

        let Some(deps) = deps else {
            return Ok(());
        };

        TeardownError::collect([
            ("cache", deps.cache.close().await),
            ("users", deps.users.close().await),
            ("notifier", deps.notifier.close().await),
        ])?;

        tracing::info!("RustPress Session Authentication plugin deactivated");
        Ok(())
    }

    fn routes(&self) -> Option<Router> {
        let service = self.auth_service.try_read().ok()?.clone()?;
        Some(create_routes(service))
    }
}

/// Create authentication routes
///
/// Call this after activating the plugin to get the router with all auth endpoints.
pub fn create_routes(auth_service: Arc<AuthService>) -> Router {
    handlers::create_routes(auth_service)
}

// ============================================
// Module Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    struct StuckNotifier;

    #[async_trait]
    impl Notifier for StuckNotifier {
        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), AuthError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), AuthError> {
            Err(AuthError::Transient("mail relay unreachable".into()))
        }
    }

    struct StuckUsers(MemoryUserStore);

    #[async_trait]
    impl UserStore for StuckUsers {
        async fn find(&self, lookup: UserLookup<'_>) -> Result<Option<User>, AuthError> {
            self.0.find(lookup).await
        }

        async fn create(&self, user: User) -> Result<User, AuthError> {
            self.0.create(user).await
        }

        async fn save(&self, user: User) -> Result<User, AuthError> {
            self.0.save(user).await
        }

        async fn close(&self) -> Result<(), AuthError> {
            Err(AuthError::Internal)
        }
    }

    #[test]
    fn test_plugin_info() {
        let plugin = AuthPlugin::new();
        assert_eq!(plugin.info.id, "rustpress-session-auth");
        assert_eq!(plugin.info.name, "RustPress Session Authentication");
    }

    #[tokio::test]
    async fn test_plugin_initial_state() {
        let plugin = AuthPlugin::new();
        assert_eq!(plugin.state().await, PluginState::Inactive);
        assert!(plugin.routes().is_none());
    }

    #[tokio::test]
    async fn test_activate_and_deactivate() {
        let plugin = AuthPlugin::new();
        plugin
            .activate_with(test_config(), AuthDependencies::in_memory())
            .await
            .unwrap();

        assert_eq!(plugin.state().await, PluginState::Active);
        assert!(plugin.auth_service().await.is_some());
        assert!(plugin.routes().is_some());

        plugin.deactivate().await.unwrap();
        assert_eq!(plugin.state().await, PluginState::Inactive);
        assert!(plugin.auth_service().await.is_none());
        assert!(plugin.config().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_sets_error_state() {
        let plugin = AuthPlugin::new();
        let config = AuthConfig {
            jwt_secret: "short".into(),
            ..test_config()
        };

        let result = plugin
            .activate_with(config, AuthDependencies::in_memory())
            .await;
        assert!(matches!(result, Err(AuthError::Config(_))));
        assert_eq!(plugin.state().await, PluginState::Error);
    }

    #[tokio::test]
    async fn test_teardown_reports_every_failure() {
        let plugin = AuthPlugin::new();
        let deps = AuthDependencies {
            users: Arc::new(StuckUsers(MemoryUserStore::new())),
            cache: Arc::new(MemoryCache::new()),
            notifier: Arc::new(StuckNotifier),
        };
        plugin.activate_with(test_config(), deps).await.unwrap();

        let err = plugin.deactivate().await.unwrap_err();
        let components: Vec<_> = err.failures.iter().map(|(name, _)| *name).collect();
        assert_eq!(components, ["users", "notifier"]);
        assert_eq!(plugin.state().await, PluginState::Inactive);
    }

    #[tokio::test]
    async fn test_deactivate_when_inactive() {
        assert!(AuthPlugin::new().deactivate().await.is_ok());
    }
}
