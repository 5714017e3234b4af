//! Authentication Configuration
//!
//! All configuration values are loaded from environment variables.
//! No hardcoded secrets or sensitive data.

use crate::error::AuthError;
use std::env;
use std::io::ErrorKind;
use std::str::FromStr;
use std::time::Duration;

/// Longest token lifetime accepted, in seconds (ten years)
pub const MAX_TOKEN_LIFETIME: i64 = 10 * 365 * 24 * 60 * 60;

/// Authentication configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// JWT secret key for signing tokens (from JWT_SECRET env var)
    pub jwt_secret: String,

    /// Access token lifetime in seconds (from JWT_ACCESS_EXPIRATION env var)
    pub access_token_expiration: i64,

    /// Refresh token lifetime in seconds (from JWT_REFRESH_EXPIRATION env var)
    pub refresh_token_expiration: i64,

    /// JWT issuer (from JWT_ISSUER env var)
    pub jwt_issuer: String,

    /// JWT audience (from JWT_AUDIENCE env var)
    pub jwt_audience: String,

    /// Digits per one-time code (from OTP_LENGTH env var)
    pub otp_length: u32,

    /// One-time code lifetime in seconds (from OTP_TTL env var)
    pub otp_ttl: u64,

    /// Codes that may be requested per owner per window (from OTP_MAX_REQUESTS env var)
    pub otp_max_requests: i64,

    /// Issuance window in seconds (from OTP_REQUEST_WINDOW env var)
    pub otp_request_window: u64,

    /// Wrong guesses that burn an outstanding code (from OTP_MAX_ATTEMPTS env var)
    pub otp_max_attempts: i64,

    /// Require an emailed one-time code after the password check (from REQUIRE_LOGIN_OTP env var)
    pub require_login_otp: bool,

    /// Minimum password length (from MIN_PASSWORD_LENGTH env var)
    pub min_password_length: usize,
}

impl AuthConfig {
    /// Load configuration from environment variables
    ///
    /// Every missing or unparsable value is reported, not just the first one.
    pub fn from_env() -> Result<Self, AuthError> {
        let mut problems = Vec::new();

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                problems.push("missing required environment variable: JWT_SECRET".to_string());
                String::new()
            }
        };

        let config = Self {
            jwt_secret,
            access_token_expiration: parse_var("JWT_ACCESS_EXPIRATION", 86_400, &mut problems), // 24 hours
            refresh_token_expiration: parse_var("JWT_REFRESH_EXPIRATION", 604_800, &mut problems), // 7 days
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "rustpress".to_string()),
            jwt_audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| "rustpress-api".to_string()),
            otp_length: parse_var("OTP_LENGTH", 6, &mut problems),
            otp_ttl: parse_var("OTP_TTL", 300, &mut problems), // 5 minutes
            otp_max_requests: parse_var("OTP_MAX_REQUESTS", 5, &mut problems),
            otp_request_window: parse_var("OTP_REQUEST_WINDOW", 900, &mut problems),
            otp_max_attempts: parse_var("OTP_MAX_ATTEMPTS", 5, &mut problems),
            require_login_otp: env::var("REQUIRE_LOGIN_OTP")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            min_password_length: parse_var("MIN_PASSWORD_LENGTH", 8, &mut problems),
        };

        if !problems.is_empty() {
            return Err(AuthError::Config(problems.join("; ")));
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.jwt_secret.len() < 32 {
            return Err(AuthError::Config(
                "JWT_SECRET must be at least 32 characters".to_string(),
            ));
        }

        if self.access_token_expiration <= 0 {
            return Err(AuthError::Config(
                "JWT_ACCESS_EXPIRATION must be positive".to_string(),
            ));
        }

        if self.refresh_token_expiration > MAX_TOKEN_LIFETIME {
            return Err(AuthError::Config(format!(
                "JWT_REFRESH_EXPIRATION must not exceed {MAX_TOKEN_LIFETIME} seconds"
            )));
        }

        if self.refresh_token_expiration <= self.access_token_expiration {
            return Err(AuthError::Config(
                "JWT_REFRESH_EXPIRATION must be greater than JWT_ACCESS_EXPIRATION".to_string(),
            ));
        }

        if !(4..=10).contains(&self.otp_length) {
            return Err(AuthError::Config(
                "OTP_LENGTH must be between 4 and 10".to_string(),
            ));
        }

        if self.otp_ttl == 0 || self.otp_request_window == 0 {
            return Err(AuthError::Config(
                "OTP_TTL and OTP_REQUEST_WINDOW must be positive".to_string(),
            ));
        }

        if self.otp_max_requests <= 0 || self.otp_max_attempts <= 0 {
            return Err(AuthError::Config(
                "OTP_MAX_REQUESTS and OTP_MAX_ATTEMPTS must be positive".to_string(),
            ));
        }

        if self.min_password_length < 8 {
            return Err(AuthError::Config(
                "MIN_PASSWORD_LENGTH must be at least 8".to_string(),
            ));
        }

        Ok(())
    }

    pub fn otp_ttl(&self) -> Duration {
        Duration::from_secs(self.otp_ttl)
    }

    pub fn otp_request_window(&self) -> Duration {
        Duration::from_secs(self.otp_request_window)
    }
}

/// Outbound mail relay settings (from the SMTP_* env vars)
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender address (from SMTP_FROM_EMAIL env var)
    pub from: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .finish()
    }
}

impl SmtpConfig {
    /// Load the relay settings.
    ///
    /// Returns `None` when `SMTP_HOST` is unset. Once it is set, every other
    /// SMTP variable is required.
    pub fn from_env() -> Result<Option<Self>, AuthError> {
        let Some(host) = env::var("SMTP_HOST").ok().filter(|host| !host.is_empty()) else {
            return Ok(None);
        };

        let mut problems = Vec::new();
        let port = match env::var("SMTP_PORT") {
            Ok(_) => parse_var("SMTP_PORT", 0, &mut problems),
            Err(_) => {
                problems.push("SMTP_PORT environment variable is required".to_string());
                0
            }
        };

        let config = Self {
            host,
            port,
            username: required_var("SMTP_USERNAME", &mut problems),
            password: required_var("SMTP_PASSWORD", &mut problems),
            from: required_var("SMTP_FROM_EMAIL", &mut problems),
        };

        if !problems.is_empty() {
            return Err(AuthError::Config(problems.join("; ")));
        }

        Ok(Some(config))
    }
}

/// Process-level settings for the standalone server binary
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Redis connection string; the in-process cache is used when unset
    pub redis_url: Option<String>,
    pub log_level: String,
    /// Mail relay for one-time codes; codes are only logged when unset
    pub smtp: Option<SmtpConfig>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, AuthError> {
        let mut problems = Vec::new();

        let config = Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("SERVER_PORT", 8080, &mut problems),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            smtp: SmtpConfig::from_env()?,
        };

        if !problems.is_empty() {
            return Err(AuthError::Config(problems.join("; ")));
        }

        Ok(config)
    }
}

/// Load `.env` then `.env.local` into the process environment.
///
/// Missing files are fine; variables already set are never overridden.
pub fn load_dotenv() -> Result<(), AuthError> {
    for file in [".env", ".env.local"] {
        match dotenvy::from_filename(file) {
            Ok(_) => {}
            Err(dotenvy::Error::Io(err)) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(AuthError::Config(format!("error loading {file}: {err}")));
            }
        }
    }
    Ok(())
}

fn required_var(key: &str, problems: &mut Vec<String>) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => {
            problems.push(format!("{key} environment variable is required"));
            String::new()
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T, problems: &mut Vec<String>) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            problems.push(format!("invalid value for environment variable {key}: {raw:?}"));
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "a".repeat(32),
        access_token_expiration: 900,
        refresh_token_expiration: 604_800,
        jwt_issuer: "test".to_string(),
        jwt_audience: "test".to_string(),
        otp_length: 6,
        otp_ttl: 300,
        otp_max_requests: 5,
        otp_request_window: 900,
        otp_max_attempts: 3,
        require_login_otp: false,
        min_password_length: 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_short_secret() {
        let config = AuthConfig {
            jwt_secret: "short".to_string(),
            ..test_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_refresh_must_outlive_access() {
        let config = AuthConfig {
            refresh_token_expiration: 900,
            ..test_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_lifetimes_are_bounded() {
        let config = AuthConfig {
            access_token_expiration: 1_000_000_000_000_000,
            refresh_token_expiration: 1_000_000_000_000_001,
            ..test_config()
        };
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));

        let config = AuthConfig {
            refresh_token_expiration: MAX_TOKEN_LIFETIME,
            ..test_config()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_otp_length_bounds() {
        let config = AuthConfig {
            otp_length: 3,
            ..test_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_defaults() {
        temp_env::with_vars(
            vec![
                ("JWT_SECRET", Some("s".repeat(40))),
                ("JWT_ACCESS_EXPIRATION", None),
                ("OTP_LENGTH", None),
                ("REQUIRE_LOGIN_OTP", Some("TRUE".to_string())),
            ],
            || {
                let config = AuthConfig::from_env().unwrap();
                assert_eq!(config.access_token_expiration, 86_400);
                assert_eq!(config.otp_length, 6);
                assert!(config.require_login_otp);
                assert!(config.validate().is_ok());
            },
        );
    }

    #[test]
    fn test_from_env_reports_every_problem() {
        temp_env::with_vars(
            vec![
                ("JWT_SECRET", None),
                ("OTP_TTL", Some("five minutes")),
            ],
            || {
                let err = AuthConfig::from_env().unwrap_err();
                let AuthError::Config(message) = err else {
                    panic!("expected a configuration error");
                };
                assert!(message.contains("JWT_SECRET"));
                assert!(message.contains("OTP_TTL"));
            },
        );
    }

    #[test]
    fn test_smtp_is_optional() {
        temp_env::with_vars(vec![("SMTP_HOST", None::<&str>)], || {
            assert!(SmtpConfig::from_env().unwrap().is_none());
        });
    }

    #[test]
    fn test_smtp_requires_every_setting() {
        temp_env::with_vars(
            vec![
                ("SMTP_HOST", Some("smtp.example.com")),
                ("SMTP_PORT", Some("587")),
                ("SMTP_USERNAME", Some("mailer")),
                ("SMTP_PASSWORD", None),
                ("SMTP_FROM_EMAIL", None),
            ],
            || {
                let AuthError::Config(message) = SmtpConfig::from_env().unwrap_err() else {
                    panic!("expected a configuration error");
                };
                assert!(message.contains("SMTP_PASSWORD"));
                assert!(message.contains("SMTP_FROM_EMAIL"));
                assert!(!message.contains("SMTP_USERNAME"));
            },
        );
    }

    #[test]
    fn test_smtp_from_env() {
        temp_env::with_vars(
            vec![
                ("SMTP_HOST", Some("smtp.example.com")),
                ("SMTP_PORT", Some("465")),
                ("SMTP_USERNAME", Some("mailer")),
                ("SMTP_PASSWORD", Some("hunter2")),
                ("SMTP_FROM_EMAIL", Some("no-reply@example.com")),
            ],
            || {
                let smtp = SmtpConfig::from_env().unwrap().unwrap();
                assert_eq!(smtp.host, "smtp.example.com");
                assert_eq!(smtp.port, 465);
                assert_eq!(smtp.from, "no-reply@example.com");
                assert!(!format!("{smtp:?}").contains("hunter2"));
            },
        );
    }
}
