//! Relay configuration, built once from environment variables at start-up
//! and passed by reference into every stage.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

// ── Defaults ────────────────────────────────────────────────────────

pub const DEFAULT_IMAP_HOST: &str = "imap.mail.ru";
pub const DEFAULT_IMAP_PORT: u16 = 993;
pub const DEFAULT_MAILBOX: &str = "INBOX";
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_TELEGRAM_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_CTA_TEXT: &str = "Перейти к задаче";
pub const DEFAULT_SECONDARY_LABEL: &str = "Просмотр:";
pub const DEFAULT_SECONDARY_PREFIX: &str = "Битрикс";
pub const DEFAULT_EXCERPT_STYLE: &str = "padding: 12px 16px;background: rgb(240, 240, 240)";

/// Leading boilerplate matches skipped by default: the tracker template puts
/// header/logo markup first, so the second match is the actionable one.
pub const DEFAULT_SKIP: usize = 1;

// ── Types ───────────────────────────────────────────────────────────

/// Everything a single run needs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mailbox: MailboxConfig,
    pub telegram: TelegramConfig,
    pub rules: RulesConfig,
}

/// IMAP account settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    /// Mailbox to select, usually `INBOX`.
    pub mailbox: String,
}

/// Telegram Bot API destination.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: SecretString,
    pub chat_id: String,
    pub disable_preview: bool,
    pub timeout: Duration,
}

/// Classification and extraction rules.
#[derive(Debug, Clone)]
pub struct RulesConfig {
    /// Substrings matched (case-insensitively) against the `From` header.
    pub allowed_senders: Vec<String>,
    /// Only links whose `href` starts with this prefix are considered.
    pub link_origin: String,
    /// Boilerplate links to skip before picking one.
    pub link_skip: usize,
    pub excerpt: ExcerptStrategy,
    /// Boilerplate blocks to skip before picking the excerpt block.
    pub excerpt_skip: usize,
    /// Boilerplate tables to skip before the table the secondary rule inspects.
    pub table_skip: usize,
    pub secondary: Option<SecondaryRule>,
    /// Call-to-action text rendered for the task link.
    pub cta_text: String,
}

impl RulesConfig {
    /// Rules with every optional knob at its default.
    pub fn new(allowed_senders: Vec<String>, link_origin: impl Into<String>) -> Self {
        Self {
            allowed_senders,
            link_origin: link_origin.into(),
            link_skip: DEFAULT_SKIP,
            excerpt: ExcerptStrategy::default(),
            excerpt_skip: DEFAULT_SKIP,
            table_skip: DEFAULT_SKIP,
            secondary: None,
            cta_text: DEFAULT_CTA_TEXT.to_string(),
        }
    }

    pub fn with_secondary(mut self, rule: SecondaryRule) -> Self {
        self.secondary = Some(rule);
        self
    }

    pub fn with_excerpt(mut self, strategy: ExcerptStrategy) -> Self {
        self.excerpt = strategy;
        self
    }
}

/// Notifications from a second system (CRM) that carry only a view URL.
#[derive(Debug, Clone)]
pub struct SecondaryRule {
    /// Substring matched against the `From` header.
    pub sender: String,
    /// Substring that must appear in the inspected table.
    pub marker: String,
    /// Text that precedes the URL inside that table.
    pub label: String,
    /// Prefix put in front of the URL in the notification.
    pub prefix: String,
}

impl SecondaryRule {
    pub fn new(sender: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            marker: marker.into(),
            label: DEFAULT_SECONDARY_LABEL.to_string(),
            prefix: DEFAULT_SECONDARY_PREFIX.to_string(),
        }
    }
}

/// Which blocks the excerpt is taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExcerptStrategy {
    /// Every `<tr>` in the body.
    Rows,
    /// `<td>` cells whose inline style contains `signature`.
    StyledCells { signature: String },
}

impl Default for ExcerptStrategy {
    fn default() -> Self {
        Self::StyledCells {
            signature: DEFAULT_EXCERPT_STYLE.to_string(),
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────────

impl RelayConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (environment, test map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let mailbox = MailboxConfig {
            imap_host: env.or("IMAP_HOST", DEFAULT_IMAP_HOST),
            imap_port: env.parsed("IMAP_PORT", DEFAULT_IMAP_PORT)?,
            username: env.required("EMAIL")?,
            password: SecretString::from(env.required("MAIL_PASSWORD")?),
            mailbox: env.or("IMAP_MAILBOX", DEFAULT_MAILBOX),
        };

        let telegram = TelegramConfig {
            api_base: env
                .or("TELEGRAM_API_BASE", DEFAULT_TELEGRAM_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            bot_token: SecretString::from(env.required("TELEGRAM_BOT_TOKEN")?),
            chat_id: env.required("TELEGRAM_CHAT_ID")?,
            disable_preview: env.flag("TELEGRAM_DISABLE_PREVIEW", false)?,
            timeout: Duration::from_secs(
                env.parsed("TELEGRAM_TIMEOUT_SECS", DEFAULT_TELEGRAM_TIMEOUT_SECS)?,
            ),
        };

        let allowed_senders = split_list(&env.required("SENDER_EMAIL")?);
        if allowed_senders.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "SENDER_EMAIL".into(),
                message: "no sender filters given".into(),
            });
        }

        let excerpt = match env.get("EXCERPT_STRATEGY").as_deref() {
            None | Some("styled-cells") => ExcerptStrategy::StyledCells {
                signature: env.or("EXCERPT_STYLE", DEFAULT_EXCERPT_STYLE),
            },
            Some("rows") => ExcerptStrategy::Rows,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "EXCERPT_STRATEGY".into(),
                    message: format!("expected `styled-cells` or `rows`, got `{other}`"),
                });
            }
        };

        let secondary = match (env.get("SECONDARY_SENDER"), env.get("SECONDARY_MARKER")) {
            (Some(sender), Some(marker)) => Some(SecondaryRule {
                sender,
                marker,
                label: env.or("SECONDARY_LABEL", DEFAULT_SECONDARY_LABEL),
                prefix: env.or("SECONDARY_PREFIX", DEFAULT_SECONDARY_PREFIX),
            }),
            _ => None,
        };

        let rules = RulesConfig {
            allowed_senders,
            link_origin: env.required("LINK_ORIGIN")?,
            link_skip: env.parsed("LINK_SKIP", DEFAULT_SKIP)?,
            excerpt,
            excerpt_skip: env.parsed("EXCERPT_SKIP", DEFAULT_SKIP)?,
            table_skip: env.parsed("TABLE_SKIP", DEFAULT_SKIP)?,
            secondary,
            cta_text: env.or("CTA_TEXT", DEFAULT_CTA_TEXT),
        };

        Ok(Self {
            mailbox,
            telegram,
            rules,
        })
    }
}

/// Blank values count as unset.
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got `{other}`"),
            }),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("EMAIL", "robot@mail.ru"),
            ("MAIL_PASSWORD", "hunter2"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "-100200300"),
            ("SENDER_EMAIL", "youtrack@tracker.example, noreply@tracker.example"),
            ("LINK_ORIGIN", "https://tracker.example/"),
        ])
    }

    fn load(env: &HashMap<&str, &str>) -> Result<RelayConfig, ConfigError> {
        RelayConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn minimal_env_uses_defaults() {
        let cfg = load(&base_env()).unwrap();
        assert_eq!(cfg.mailbox.imap_host, "imap.mail.ru");
        assert_eq!(cfg.mailbox.imap_port, 993);
        assert_eq!(cfg.mailbox.mailbox, "INBOX");
        assert_eq!(cfg.mailbox.password.expose_secret(), "hunter2");
        assert_eq!(cfg.telegram.api_base, "https://api.telegram.org");
        assert_eq!(cfg.telegram.timeout, Duration::from_secs(15));
        assert!(!cfg.telegram.disable_preview);
        assert_eq!(
            cfg.rules.allowed_senders,
            vec!["youtrack@tracker.example", "noreply@tracker.example"]
        );
        assert_eq!(cfg.rules.link_skip, 1);
        assert_eq!(cfg.rules.excerpt, ExcerptStrategy::default());
        assert!(cfg.rules.secondary.is_none());
    }

    #[test]
    fn missing_required_value_is_reported_by_name() {
        for key in [
            "EMAIL",
            "MAIL_PASSWORD",
            "TELEGRAM_BOT_TOKEN",
            "TELEGRAM_CHAT_ID",
            "SENDER_EMAIL",
            "LINK_ORIGIN",
        ] {
            let mut env = base_env();
            env.remove(key);
            match load(&env) {
                Err(ConfigError::MissingEnvVar(k)) => assert_eq!(k, key),
                other => panic!("expected MissingEnvVar({key}), got {other:?}"),
            }
        }
    }

    #[test]
    fn blank_required_value_counts_as_missing() {
        let mut env = base_env();
        env.insert("EMAIL", "   ");
        assert!(matches!(load(&env), Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn sender_list_of_only_commas_is_invalid() {
        let mut env = base_env();
        env.insert("SENDER_EMAIL", " , ,");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut env = base_env();
        env.insert("IMAP_PORT", "imaps");
        match load(&env) {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "IMAP_PORT"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn secondary_rule_requires_sender_and_marker() {
        let mut env = base_env();
        env.insert("SECONDARY_SENDER", "bitrix@crm.example");
        assert!(load(&env).unwrap().rules.secondary.is_none());

        env.insert("SECONDARY_MARKER", "Борисевич");
        let rule = load(&env).unwrap().rules.secondary.unwrap();
        assert_eq!(rule.sender, "bitrix@crm.example");
        assert_eq!(rule.marker, "Борисевич");
        assert_eq!(rule.label, "Просмотр:");
        assert_eq!(rule.prefix, "Битрикс");
    }

    #[test]
    fn excerpt_strategy_parsing() {
        let mut env = base_env();
        env.insert("EXCERPT_STRATEGY", "rows");
        assert_eq!(load(&env).unwrap().rules.excerpt, ExcerptStrategy::Rows);

        env.insert("EXCERPT_STRATEGY", "styled-cells");
        env.insert("EXCERPT_STYLE", "background: red");
        assert_eq!(
            load(&env).unwrap().rules.excerpt,
            ExcerptStrategy::StyledCells {
                signature: "background: red".into()
            }
        );

        env.insert("EXCERPT_STRATEGY", "columns");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn preview_flag_and_skips() {
        let mut env = base_env();
        env.insert("TELEGRAM_DISABLE_PREVIEW", "yes");
        env.insert("LINK_SKIP", "0");
        env.insert("TABLE_SKIP", "2");
        env.insert("TELEGRAM_API_BASE", "http://127.0.0.1:8081/");
        let cfg = load(&env).unwrap();
        assert!(cfg.telegram.disable_preview);
        assert_eq!(cfg.rules.link_skip, 0);
        assert_eq!(cfg.rules.table_skip, 2);
        assert_eq!(cfg.telegram.api_base, "http://127.0.0.1:8081");

        env.insert("TELEGRAM_DISABLE_PREVIEW", "maybe");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let cfg = load(&base_env()).unwrap();
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("123:abc"));
    }
}
