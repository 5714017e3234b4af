//! Outbound notifications
//!
//! Delivery of one-time codes. The transport is pluggable; the crate ships an
//! SMTP notifier and a logging notifier for development setups without mail.

use crate::config::SmtpConfig;
use crate::error::AuthError;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Mutex;

/// Port served with implicit TLS; every other port upgrades via STARTTLS
const SMTPS_PORT: u16 = 465;

/// Delivers a message to an address
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination: &str, subject: &str, body: &str) -> Result<(), AuthError>;

    async fn close(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Notifier that only records the delivery in the log
///
/// The message body is never logged since it carries the code.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, destination: &str, subject: &str, _body: &str) -> Result<(), AuthError> {
        tracing::info!(destination, subject, "Notification dispatched");
        Ok(())
    }
}

/// Plain-text mail over an authenticated SMTP relay
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, AuthError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|err| AuthError::Config(format!("invalid SMTP_FROM_EMAIL: {err}")))?;

        let builder = if config.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|err| AuthError::Config(format!("invalid SMTP relay {}: {err}", config.host)))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, destination: &str, subject: &str, body: &str) -> Result<(), AuthError> {
        let to: Mailbox = destination
            .parse()
            .map_err(|err| AuthError::NotificationFailed(format!("invalid recipient: {err}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|err| AuthError::NotificationFailed(err.to_string()))?;

        self.transport.send(message).await.map_err(|err| {
            tracing::warn!(destination, subject, "SMTP delivery failed: {}", err);
            AuthError::NotificationFailed(err.to_string())
        })?;

        tracing::debug!(destination, subject, "Mail delivered");
        Ok(())
    }
}

/// A message captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub destination: String,
    pub subject: String,
    pub body: String,
}

/// In-memory notifier that keeps every message, with switchable failure
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.lock() {
            *flag = failing;
        }
    }

    /// Messages delivered so far
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Most recent message for `destination`
    pub fn last_to(&self, destination: &str) -> Option<SentMessage> {
        self.sent()
            .into_iter()
            .rev()
            .find(|message| message.destination == destination)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, destination: &str, subject: &str, body: &str) -> Result<(), AuthError> {
        let failing = self.failing.lock().map(|flag| *flag).unwrap_or(false);
        if failing {
            return Err(AuthError::NotificationFailed(format!(
                "delivery to {destination} refused"
            )));
        }

        let mut sent = self.sent.lock().map_err(|_| AuthError::Internal)?;
        sent.push(SentMessage {
            destination: destination.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
