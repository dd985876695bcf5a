//! Error types for the inbox relay.

/// Top-level error type for a relay run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Configuration-related errors. Always fatal, raised before any network call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox session errors (connect, login, select, search, store).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IMAP login failed for {user}: {reason}")]
    AuthFailed { user: String, reason: String },

    #[error("IMAP command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("IMAP connection closed")]
    Closed,
}

/// Per-message errors. Recovered locally: the message is skipped.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Failed to fetch message {id}: {reason}")]
    Fetch { id: String, reason: String },

    #[error("Message {id} could not be parsed as RFC 822")]
    Unparseable { id: String },
}

/// Notification delivery errors. Recovered locally: logged, message still acknowledged.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sendMessage rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_wraps_into_top_level() {
        let err: Error = ConfigError::MissingEnvVar("EMAIL".into()).into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required environment variable: EMAIL"
        );
    }

    #[test]
    fn delivery_rejection_mentions_status() {
        let err = DeliveryError::Rejected {
            status: 400,
            body: "Bad Request: chat not found".into(),
        };
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("chat not found"));
    }
}
