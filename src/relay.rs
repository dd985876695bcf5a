//! One relay run: list unseen → for each: fetch, classify, extract,
//! notify, acknowledge → log out.
//!
//! Connection and listing failures abort the run. Everything that goes
//! wrong with a single message is logged and the loop moves on.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scraper::Html;
use tracing::{error, info, warn};

use crate::classify::{Classification, classify_document};
use crate::config::{RelayConfig, RulesConfig};
use crate::error::{MailboxError, MessageError};
use crate::extract::{extract_primary, extract_secondary_url};
use crate::mailbox::{Mailbox, MessageId, RawMessage};
use crate::notify::{Notification, Notifier};

/// Why an eligible message was acknowledged without a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The message has no `text/html` part.
    NoHtmlBody,
    /// Primary path found no link under the configured origin.
    NoLink,
    /// Secondary path found no URL after the label.
    NoViewUrl,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoHtmlBody => "no HTML body",
            Self::NoLink => "no tracker link",
            Self::NoViewUrl => "no view URL",
        })
    }
}

/// What to do with one message, decided without any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Not ours: leave it unseen.
    Ignore,
    /// Ours, but nothing to forward: acknowledge only.
    Skip(SkipReason),
    /// Forward this notification, then acknowledge.
    Send(Notification),
}

/// Classify and extract a decoded message.
pub fn plan_message(rules: &RulesConfig, message: &RawMessage) -> (Classification, Plan) {
    let html = message.html.as_deref().unwrap_or_default();
    let doc = Html::parse_document(html);

    let class = classify_document(rules, &message.from, &doc);
    let plan = match class {
        Classification::Ineligible => Plan::Ignore,
        _ if html.trim().is_empty() => Plan::Skip(SkipReason::NoHtmlBody),
        Classification::Primary => {
            let result = extract_primary(rules, &doc);
            match result.link {
                Some(link) => Plan::Send(Notification::task(
                    &link,
                    result.excerpt.as_deref(),
                    &rules.cta_text,
                )),
                None => Plan::Skip(SkipReason::NoLink),
            }
        }
        Classification::Secondary => {
            // classify_document only yields Secondary when the rule exists.
            let Some(rule) = &rules.secondary else {
                return (class, Plan::Skip(SkipReason::NoViewUrl));
            };
            match extract_secondary_url(&doc, rules.table_skip, &rule.label) {
                Some(url) => Plan::Send(Notification::view(&rule.prefix, &url)),
                None => Plan::Skip(SkipReason::NoViewUrl),
            }
        }
    };
    (class, plan)
}

/// Per-run counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Unseen messages iterated.
    pub examined: usize,
    /// Delivered and acknowledged.
    pub forwarded: usize,
    /// Delivery attempted and failed; still acknowledged.
    pub delivery_failed: usize,
    /// Sender matched no rule; left unseen.
    pub ineligible: usize,
    /// Eligible but nothing to forward; acknowledged.
    pub skipped: usize,
    /// Fetch or decode failed; left unseen.
    pub failed: usize,
    /// `mark_read` calls that failed.
    pub ack_failed: usize,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            examined: 0,
            forwarded: 0,
            delivery_failed: 0,
            ineligible: 0,
            skipped: 0,
            failed: 0,
            ack_failed: 0,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined {}, forwarded {}, delivery failed {}, ineligible {}, skipped {}, failed {}, \
             ack failed {} ({} ms)",
            self.examined,
            self.forwarded,
            self.delivery_failed,
            self.ineligible,
            self.skipped,
            self.failed,
            self.ack_failed,
            (self.finished_at - self.started_at).num_milliseconds()
        )
    }
}

/// Runs the pipeline over one mailbox session.
pub struct Relay {
    rules: RulesConfig,
    mailbox_name: String,
    notifier: Arc<dyn Notifier>,
}

impl Relay {
    pub fn new(config: &RelayConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_rules(config.rules.clone(), &config.mailbox.mailbox, notifier)
    }

    pub fn with_rules(
        rules: RulesConfig,
        mailbox_name: impl Into<String>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            rules,
            mailbox_name: mailbox_name.into(),
            notifier,
        }
    }

    /// Process every unseen message once, then log out.
    ///
    /// Returns an error only when selecting or listing the mailbox fails; the
    /// session is logged out on a best-effort basis before returning.
    pub async fn run(&self, mailbox: &mut dyn Mailbox) -> Result<RunSummary, MailboxError> {
        let mut summary = RunSummary::new(Utc::now());

        let ids = match self.list_unseen(mailbox).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(mailbox = %self.mailbox_name, "Listing unseen messages failed: {e}");
                if let Err(logout_err) = mailbox.logout().await {
                    warn!("Logout after failure also failed: {logout_err}");
                }
                return Err(e);
            }
        };

        if ids.is_empty() {
            info!(mailbox = %self.mailbox_name, "No unseen messages");
        } else {
            info!(mailbox = %self.mailbox_name, count = ids.len(), "Found unseen messages");
        }

        for id in ids {
            summary.examined += 1;
            self.process(mailbox, id, &mut summary).await;
        }

        if let Err(e) = mailbox.logout().await {
            warn!("IMAP logout failed: {e}");
        }

        summary.finished_at = Utc::now();
        info!("Run finished: {summary}");
        Ok(summary)
    }

    async fn list_unseen(&self, mailbox: &mut dyn Mailbox) -> Result<Vec<MessageId>, MailboxError> {
        mailbox.select(&self.mailbox_name).await?;
        mailbox.search_unseen().await
    }

    async fn process(&self, mailbox: &mut dyn Mailbox, id: MessageId, summary: &mut RunSummary) {
        let message = match self.fetch(mailbox, id).await {
            Ok(message) => message,
            Err(e) => {
                error!(uid = %id, "Skipping message: {e}");
                summary.failed += 1;
                return;
            }
        };

        let (class, plan) = plan_message(&self.rules, &message);
        let subject = message.subject.as_deref().unwrap_or("(no subject)");

        match plan {
            Plan::Ignore => {
                info!(uid = %id, from = %message.from, "Skipping message from ineligible sender");
                summary.ineligible += 1;
            }
            Plan::Skip(reason) => {
                info!(uid = %id, class = %class, subject = %subject, "Nothing to forward: {reason}");
                summary.skipped += 1;
                self.acknowledge(mailbox, id, summary).await;
            }
            Plan::Send(notification) => {
                match self.notifier.post(&notification).await {
                    Ok(()) => {
                        info!(uid = %id, class = %class, subject = %subject, "Forwarded notification");
                        summary.forwarded += 1;
                    }
                    Err(e) => {
                        error!(uid = %id, class = %class, "Notification delivery failed: {e}");
                        summary.delivery_failed += 1;
                    }
                }
                self.acknowledge(mailbox, id, summary).await;
            }
        }
    }

    async fn fetch(&self, mailbox: &mut dyn Mailbox, id: MessageId) -> Result<RawMessage, MessageError> {
        let raw = mailbox
            .fetch_raw(id)
            .await
            .map_err(|e| MessageError::Fetch {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        RawMessage::parse(&raw).ok_or_else(|| MessageError::Unparseable { id: id.to_string() })
    }

    async fn acknowledge(&self, mailbox: &mut dyn Mailbox, id: MessageId, summary: &mut RunSummary) {
        match mailbox.mark_read(id).await {
            Ok(()) => info!(uid = %id, "Marked as read"),
            Err(e) => {
                warn!(uid = %id, "Failed to mark as read: {e}");
                summary.ack_failed += 1;
            }
        }
    }
}
