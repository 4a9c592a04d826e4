//! Outbound notifications.

use futures_util::future::BoxFuture;
use serde::Serialize;

/// The welcome message sent after registration.
#[derive(Debug, Clone, Serialize)]
pub struct WelcomeMessage {
    pub recipient: String,
    pub user_id: i64,
    pub activation_token: String,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to send mail to {recipient}: {reason}")]
pub struct MailError {
    pub recipient: String,
    pub reason: String,
}

/// Delivers notifications. Called from background tasks only.
pub trait Mailer: Send + Sync + 'static {
    fn send_welcome(&self, message: WelcomeMessage) -> BoxFuture<'static, Result<(), MailError>>;
}

/// Mailer that only records the message in the log.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_welcome(&self, message: WelcomeMessage) -> BoxFuture<'static, Result<(), MailError>> {
        Box::pin(async move {
            tracing::info!(
                recipient = %message.recipient,
                user_id = message.user_id,
                "Welcome email dispatched"
            );
            Ok(())
        })
    }
}
