//! Inbox relay: forwards tracker notification emails to a Telegram chat.

pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod html;
pub mod mailbox;
pub mod notify;
pub mod relay;
