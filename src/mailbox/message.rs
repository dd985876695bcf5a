//! Decoding of fetched RFC 822 messages.

use mail_parser::{MessageParser, PartType};

/// The parts of a fetched message the relay looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Decoded `From` header: `Name <address>` or just the address.
    pub from: String,
    pub subject: Option<String>,
    /// First `text/html` part. Plain-text-only messages have none.
    pub html: Option<String>,
}

impl RawMessage {
    /// Parse raw message bytes. Returns `None` if nothing could be parsed.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let from = parsed
            .from()
            .and_then(|addr| addr.first())
            .map(|a| match (a.name(), a.address()) {
                (Some(name), Some(address)) => format!("{name} <{address}>"),
                (None, Some(address)) => address.to_string(),
                (Some(name), None) => name.to_string(),
                (None, None) => String::new(),
            })
            .unwrap_or_default();

        let html = parsed.parts.iter().find_map(|part| match &part.body {
            PartType::Html(html) => Some(html.to_string()),
            _ => None,
        });

        Some(Self {
            from,
            subject: parsed.subject().map(str::to_string),
            html,
        })
    }
}
