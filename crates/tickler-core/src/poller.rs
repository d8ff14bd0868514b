use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{MailConfig, OnError};
use crate::datastore::TaskStore;
use crate::mail::{MailConnector, MailSession, Uid, parse_message};
use crate::notify::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Unseen marker messages the search returned.
    pub found: usize,
    pub inserted: usize,
    /// Messages without a usable text body; marked read, nothing inserted.
    pub skipped_empty: usize,
    pub failed: usize,
    /// True when `OnError::Abort` stopped the cycle early.
    pub aborted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Inserted,
    Empty,
}

/// Turns unseen marker messages into tasks, one cycle per call.
pub struct Poller<C> {
    config: MailConfig,
    connector: C,
    state: PollState,
}

impl<C: MailConnector> Poller<C> {
    pub fn new(config: MailConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            state: PollState::Idle,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Runs one Idle -> Polling -> Idle cycle. Session failures (connect,
    /// login, select, search) end the cycle with an error; per-message
    /// failures follow `mail.on_error`.
    #[instrument(skip(self, store, notifier), fields(host = %self.config.host))]
    pub fn poll_once(
        &mut self,
        store: &TaskStore,
        notifier: &dyn Notifier,
        today: NaiveDate,
    ) -> anyhow::Result<CycleReport> {
        if self.state == PollState::Polling {
            return Err(anyhow!("a mail poll cycle is already running"));
        }

        self.state = PollState::Polling;
        debug!("poll cycle started");
        let result = self.run_cycle(store, notifier, today);
        self.state = PollState::Idle;

        match &result {
            Ok(report) => info!(
                found = report.found,
                inserted = report.inserted,
                skipped_empty = report.skipped_empty,
                failed = report.failed,
                aborted = report.aborted,
                "poll cycle finished"
            ),
            Err(err) => error!(error = %format!("{err:#}"), "poll cycle failed"),
        }
        result
    }

    fn run_cycle(
        &self,
        store: &TaskStore,
        notifier: &dyn Notifier,
        today: NaiveDate,
    ) -> anyhow::Result<CycleReport> {
        let mut session = self
            .connector
            .connect(&self.config)
            .context("could not open mail session")?;

        let uids = match session.search_unseen(&self.config.marker) {
            Ok(uids) => uids,
            Err(err) => {
                close(session.as_mut());
                return Err(err.context("could not search mailbox"));
            }
        };

        let mut report = CycleReport {
            found: uids.len(),
            ..CycleReport::default()
        };

        for uid in uids {
            match process_message(session.as_mut(), uid, store, notifier, today) {
                Ok(Outcome::Inserted) => report.inserted += 1,
                Ok(Outcome::Empty) => report.skipped_empty += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(uid, error = %format!("{err:#}"), "failed to turn message into task");
                    if self.config.on_error == OnError::Abort {
                        warn!(uid, "aborting poll cycle; remaining messages left unread");
                        report.aborted = true;
                        break;
                    }
                }
            }
        }

        close(session.as_mut());
        Ok(report)
    }
}

/// Insert first, mark read second: a message is only marked read once its
/// task is stored.
fn process_message(
    session: &mut dyn MailSession,
    uid: Uid,
    store: &TaskStore,
    notifier: &dyn Notifier,
    today: NaiveDate,
) -> anyhow::Result<Outcome> {
    let raw = session.fetch(uid)?;
    let inbound = parse_message(&raw).with_context(|| format!("message {uid}"))?;

    let body = inbound.body.as_deref().unwrap_or_default();
    let outcome = match store.add_task(body, today, inbound.due)? {
        Some(task) => {
            info!(uid, id = %task.id, "task created from mail");
            notifier.task_added(&task);
            Outcome::Inserted
        }
        None => {
            warn!(uid, subject = %inbound.subject, "message has no text body; nothing inserted");
            Outcome::Empty
        }
    };

    session.mark_read(uid)?;
    Ok(outcome)
}

fn close(session: &mut dyn MailSession) {
    if let Err(err) = session.logout() {
        warn!(error = %format!("{err:#}"), "mail logout failed");
    }
}
