//! Sender classifier: decides whether a message is relayed and which
//! extraction ruleset applies.
//!
//! Rules are evaluated in order, first match wins:
//! 1. secondary sender + marker in the inspected table → `Secondary`
//! 2. sender matches an allowed filter → `Primary`
//! 3. otherwise → `Ineligible`

use std::fmt;

use scraper::Html;
use tracing::debug;

use crate::config::{RulesConfig, SecondaryRule};
use crate::html::{element_text, nth_table};

/// Which extraction ruleset applies to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Tracker notification: task link + excerpt.
    Primary,
    /// Second-system notification: a single labelled view URL.
    Secondary,
    /// Not relayed; left unseen.
    Ineligible,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Ineligible => "ineligible",
        })
    }
}

/// Classify a message from its `From` header and raw HTML body.
pub fn classify(rules: &RulesConfig, from: &str, body: &str) -> Classification {
    classify_document(rules, from, &Html::parse_document(body))
}

/// Classify against an already-parsed body.
pub fn classify_document(rules: &RulesConfig, from: &str, doc: &Html) -> Classification {
    if let Some(rule) = &rules.secondary
        && is_secondary(rule, rules.table_skip, from, doc)
    {
        return Classification::Secondary;
    }

    if is_sender_allowed(&rules.allowed_senders, from) {
        return Classification::Primary;
    }

    debug!(from = %from, "Sender matches no rule");
    Classification::Ineligible
}

fn is_secondary(rule: &SecondaryRule, table_skip: usize, from: &str, doc: &Html) -> bool {
    if !sender_matches(from, &rule.sender) {
        return false;
    }
    // Fewer tables than required means "not secondary", never an error.
    let Some(table) = nth_table(doc, table_skip) else {
        debug!(from = %from, "Secondary sender but inspected table is missing");
        return false;
    };
    let found = element_text(table).contains(&rule.marker);
    if !found {
        debug!(from = %from, marker = %rule.marker, "Secondary sender without marker");
    }
    found
}

/// Check a `From` header against the allowed-sender filters.
///
/// - Empty list → deny all
/// - `*` in list → allow all
/// - otherwise → case-insensitive substring match of any entry
pub fn is_sender_allowed(allowed: &[String], from: &str) -> bool {
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    allowed.iter().any(|a| sender_matches(from, a))
}

fn sender_matches(from: &str, pattern: &str) -> bool {
    !pattern.is_empty() && from.to_lowercase().contains(&pattern.to_lowercase())
}
