//! The inbox side of the poller: a small session trait over the mail
//! server, the IMAP implementation of it, and message parsing.

pub mod inbox;
pub mod parse;

pub use inbox::ImapConnector;
pub use parse::{InboundTask, parse_message, subject_due_date};

use crate::config::MailConfig;

/// Server-side message identifier, stable within a mailbox.
pub type Uid = u32;

/// An authenticated session with the configured mailbox selected.
pub trait MailSession {
    /// Unseen messages whose subject contains `marker`, oldest first.
    fn search_unseen(&mut self, marker: &str) -> anyhow::Result<Vec<Uid>>;

    /// Full raw message. Must leave the message unseen.
    fn fetch(&mut self, uid: Uid) -> anyhow::Result<Vec<u8>>;

    fn mark_read(&mut self, uid: Uid) -> anyhow::Result<()>;

    fn logout(&mut self) -> anyhow::Result<()>;
}

pub trait MailConnector {
    /// Connects, authenticates and selects `config.mailbox`.
    fn connect(&self, config: &MailConfig) -> anyhow::Result<Box<dyn MailSession>>;
}
