//! Notification formatting and delivery.

pub mod telegram;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DeliveryError;
use crate::extract::TrackedLink;

pub use telegram::TelegramNotifier;

/// Telegram's limit for one message, counted here on the text as sent.
pub const MAX_MESSAGE_CHARS: usize = 4096;
/// Longest excerpt forwarded, in characters of escaped text. Messages are
/// truncated to fit rather than split, since splitting HTML could cut a tag.
pub const MAX_EXCERPT_CHARS: usize = 3000;
const MAX_TITLE_CHARS: usize = 500;

/// How the destination should interpret the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
}

/// One formatted message for the destination channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub parse_mode: Option<ParseMode>,
}

impl Notification {
    /// Tracker notification: title, optional excerpt, call-to-action link.
    ///
    /// Sections are separated by a blank line. The title, URL and CTA are
    /// escaped here; `excerpt` must already be escaped text as produced by
    /// [`crate::html::clean_element`]. The excerpt is shortened so the whole
    /// text stays within [`MAX_MESSAGE_CHARS`].
    pub fn task(link: &TrackedLink, excerpt: Option<&str>, cta_text: &str) -> Self {
        let mut text = truncate_escaped(&escape_html(&link.text), MAX_TITLE_CHARS);
        let footer = format!(
            "\n\n<a href='{}'>{}</a>",
            escape_html(&link.url),
            escape_html(cta_text)
        );
        if let Some(excerpt) = excerpt.filter(|e| !e.is_empty()) {
            let used = text.chars().count() + footer.chars().count() + 2;
            let budget = MAX_MESSAGE_CHARS.saturating_sub(used).min(MAX_EXCERPT_CHARS);
            if budget > 0 {
                text.push_str("\n\n");
                text.push_str(&truncate_escaped(excerpt, budget));
            }
        }
        text.push_str(&footer);
        Self {
            text,
            parse_mode: Some(ParseMode::Html),
        }
    }

    /// Second-system notification: exactly `"<prefix> <url>"`, sent as plain text.
    pub fn view(prefix: &str, url: &str) -> Self {
        Self {
            text: format!("{prefix} {url}"),
            parse_mode: None,
        }
    }
}

/// Delivers notifications to one destination. A single attempt per call.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Escape text for Telegram's HTML parse mode (also safe inside quoted attributes).
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Shorten escaped text to at most `max` characters, ending in `…`.
///
/// Never cuts inside an entity such as `&amp;`.
fn truncate_escaped(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let Some(keep) = max.checked_sub(1) else {
        return String::new();
    };
    let cut = text.char_indices().nth(keep).map_or(text.len(), |(i, _)| i);
    let mut kept = &text[..cut];
    if let Some(amp) = kept.rfind('&')
        && !kept[amp..].contains(';')
    {
        kept = &kept[..amp];
    }
    format!("{}…", kept.trim_end())
}
