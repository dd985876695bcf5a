//! Mailbox collaborator: the IMAP operations one relay run needs.

pub mod imap;
pub mod message;

use std::fmt;

use async_trait::async_trait;

use crate::error::MailboxError;

pub use imap::{ImapMailbox, ImapSession};
pub use message::RawMessage;

/// Mailbox-unique message identifier (an IMAP UID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u32);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An authenticated mailbox session. Connect and login happen when the
/// implementation is constructed; one session serves exactly one run.
#[async_trait]
pub trait Mailbox: Send {
    async fn select(&mut self, mailbox: &str) -> Result<(), MailboxError>;

    /// Identifiers of every message not yet flagged as read.
    async fn search_unseen(&mut self) -> Result<Vec<MessageId>, MailboxError>;

    /// Raw RFC 822 source. Must not change the message's read flag.
    async fn fetch_raw(&mut self, id: MessageId) -> Result<Vec<u8>, MailboxError>;

    /// Flag the message as read. Idempotent.
    async fn mark_read(&mut self, id: MessageId) -> Result<(), MailboxError>;

    async fn logout(&mut self) -> Result<(), MailboxError>;
}
