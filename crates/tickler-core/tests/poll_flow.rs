use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::NaiveDate;
use tickler_core::config::{MailConfig, OnError};
use tickler_core::datastore::TaskStore;
use tickler_core::mail::{MailConnector, MailSession, Uid};
use tickler_core::notify::Notifier;
use tickler_core::poller::{PollState, Poller};
use tickler_core::render::render_rows;
use tickler_core::task::Task;

#[derive(Default)]
struct Inbox {
    messages: Vec<(Uid, Vec<u8>, bool)>,
    refuse_connect: bool,
    logouts: usize,
}

#[derive(Clone, Default)]
struct FakeConnector {
    inbox: Rc<RefCell<Inbox>>,
}

struct FakeSession {
    inbox: Rc<RefCell<Inbox>>,
}

impl FakeConnector {
    fn with_messages(messages: &[(Uid, &str)]) -> Self {
        let connector = Self::default();
        connector.inbox.borrow_mut().messages = messages
            .iter()
            .map(|(uid, raw)| (*uid, raw.as_bytes().to_vec(), false))
            .collect();
        connector
    }

    fn seen(&self) -> Vec<Uid> {
        self.inbox
            .borrow()
            .messages
            .iter()
            .filter(|(_, _, seen)| *seen)
            .map(|(uid, _, _)| *uid)
            .collect()
    }
}

impl MailConnector for FakeConnector {
    fn connect(&self, _config: &MailConfig) -> anyhow::Result<Box<dyn MailSession>> {
        if self.inbox.borrow().refuse_connect {
            return Err(anyhow!("connection refused"));
        }
        Ok(Box::new(FakeSession {
            inbox: Rc::clone(&self.inbox),
        }))
    }
}

impl MailSession for FakeSession {
    fn search_unseen(&mut self, marker: &str) -> anyhow::Result<Vec<Uid>> {
        let marker = marker.to_ascii_lowercase();
        Ok(self
            .inbox
            .borrow()
            .messages
            .iter()
            .filter(|(_, raw, seen)| {
                let text = String::from_utf8_lossy(raw).to_ascii_lowercase();
                !seen
                    && text
                        .lines()
                        .any(|line| line.starts_with("subject:") && line.contains(&marker))
            })
            .map(|(uid, _, _)| *uid)
            .collect())
    }

    fn fetch(&mut self, uid: Uid) -> anyhow::Result<Vec<u8>> {
        self.inbox
            .borrow()
            .messages
            .iter()
            .find(|(id, _, _)| *id == uid)
            .map(|(_, raw, _)| raw.clone())
            .ok_or_else(|| anyhow!("no message {uid}"))
    }

    fn mark_read(&mut self, uid: Uid) -> anyhow::Result<()> {
        let mut inbox = self.inbox.borrow_mut();
        let entry = inbox
            .messages
            .iter_mut()
            .find(|(id, _, _)| *id == uid)
            .ok_or_else(|| anyhow!("no message {uid}"))?;
        entry.2 = true;
        Ok(())
    }

    fn logout(&mut self) -> anyhow::Result<()> {
        self.inbox.borrow_mut().logouts += 1;
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    added: RefCell<Vec<String>>,
}

impl Notifier for Recorder {
    fn task_added(&self, task: &Task) {
        self.added.borrow_mut().push(task.text.clone());
    }

    fn due_today(&self, _count: usize) {}
}

fn mail_config(on_error: OnError) -> MailConfig {
    MailConfig {
        user: "me@example.com".to_string(),
        password: "secret".to_string(),
        host: "imap.example.com".to_string(),
        port: 993,
        mailbox: "INBOX".to_string(),
        marker: "todo".to_string(),
        poll_interval: Duration::from_secs(60),
        on_error,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

const WITH_DUE: &str = "Subject: todo, 25/12/2024\r\n\r\nBuy a tree\r\n";
const NO_DUE: &str = "Subject: todo\r\n\r\nCall the bank\r\n";
const BAD_DATE: &str = "Subject: todo, someday\r\n\r\nNever inserted\r\n";
const LATER: &str = "Subject: todo\r\n\r\nWater plants\r\n";
const NOT_A_TASK: &str = "Subject: lunch?\r\n\r\nhungry\r\n";

#[test]
fn marker_messages_become_tasks_and_are_marked_read() {
    let store = TaskStore::open_in_memory().expect("open store");
    let connector = FakeConnector::with_messages(&[(1, WITH_DUE), (2, NO_DUE), (3, NOT_A_TASK)]);
    let recorder = Recorder::default();
    let today = date(2024, 12, 20);

    let mut poller = Poller::new(mail_config(OnError::Skip), connector.clone());
    let report = poller
        .poll_once(&store, &recorder, today)
        .expect("cycle succeeds");

    assert_eq!(report.found, 2);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(poller.state(), PollState::Idle);

    let tasks = store.list_tasks().expect("list");
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].text, "Buy a tree");
    assert_eq!(tasks[0].due, Some(date(2024, 12, 25)));
    assert_eq!(tasks[0].added, today);
    assert_eq!(tasks[1].text, "Call the bank");
    assert_eq!(tasks[1].due, None);

    assert_eq!(connector.seen(), vec![1, 2]);
    assert_eq!(connector.inbox.borrow().logouts, 1);
    assert_eq!(
        *recorder.added.borrow(),
        vec!["Buy a tree".to_string(), "Call the bank".to_string()]
    );

    let again = poller
        .poll_once(&store, &recorder, today)
        .expect("second cycle");
    assert_eq!(again.found, 0);
    assert_eq!(store.list_tasks().expect("list").len(), 2);
}

#[test]
fn abort_policy_stops_at_the_first_bad_message() {
    let store = TaskStore::open_in_memory().expect("open store");
    let connector = FakeConnector::with_messages(&[(1, NO_DUE), (2, BAD_DATE), (3, LATER)]);
    let recorder = Recorder::default();

    let mut poller = Poller::new(mail_config(OnError::Abort), connector.clone());
    let report = poller
        .poll_once(&store, &recorder, date(2024, 12, 20))
        .expect("cycle completes with logged failure");

    assert!(report.aborted);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(connector.seen(), vec![1]);

    let texts: Vec<String> = store
        .list_tasks()
        .expect("list")
        .into_iter()
        .map(|t| t.text)
        .collect();
    assert_eq!(texts, vec!["Call the bank".to_string()]);
}

#[test]
fn skip_policy_isolates_the_bad_message() {
    let store = TaskStore::open_in_memory().expect("open store");
    let connector = FakeConnector::with_messages(&[(1, NO_DUE), (2, BAD_DATE), (3, LATER)]);
    let recorder = Recorder::default();

    let mut poller = Poller::new(mail_config(OnError::Skip), connector.clone());
    let report = poller
        .poll_once(&store, &recorder, date(2024, 12, 20))
        .expect("cycle succeeds");

    assert!(!report.aborted);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(connector.seen(), vec![1, 3]);
    assert_eq!(store.list_tasks().expect("list").len(), 2);
}

#[test]
fn connection_failure_leaves_store_untouched() {
    let store = TaskStore::open_in_memory().expect("open store");
    let connector = FakeConnector::with_messages(&[(1, NO_DUE)]);
    connector.inbox.borrow_mut().refuse_connect = true;
    let recorder = Recorder::default();

    let mut poller = Poller::new(mail_config(OnError::Skip), connector.clone());
    let err = poller
        .poll_once(&store, &recorder, date(2024, 12, 20))
        .expect_err("connect fails");
    assert!(format!("{err:#}").contains("connection refused"));
    assert_eq!(poller.state(), PollState::Idle);
    assert!(store.list_tasks().expect("list").is_empty());
    assert!(connector.seen().is_empty());

    connector.inbox.borrow_mut().refuse_connect = false;
    let report = poller
        .poll_once(&store, &recorder, date(2024, 12, 20))
        .expect("next cycle recovers");
    assert_eq!(report.inserted, 1);
}

#[test]
fn message_without_text_is_read_but_not_inserted() {
    let store = TaskStore::open_in_memory().expect("open store");
    let empty = "Subject: todo\r\nContent-Type: text/plain\r\n\r\n   \r\n";
    let connector = FakeConnector::with_messages(&[(9, empty)]);
    let recorder = Recorder::default();

    let mut poller = Poller::new(mail_config(OnError::Skip), connector.clone());
    let report = poller
        .poll_once(&store, &recorder, date(2024, 12, 20))
        .expect("cycle succeeds");

    assert_eq!(report.skipped_empty, 1);
    assert_eq!(report.inserted, 0);
    assert_eq!(connector.seen(), vec![9]);
    assert!(store.list_tasks().expect("list").is_empty());
    assert!(recorder.added.borrow().is_empty());
}

#[test]
fn polled_tasks_render_in_store_order() {
    let store = TaskStore::open_in_memory().expect("open store");
    store
        .add_task("typed by hand", date(2024, 12, 1), None)
        .expect("add");
    let connector = FakeConnector::with_messages(&[(1, WITH_DUE)]);
    let mut poller = Poller::new(mail_config(OnError::Skip), connector);
    poller
        .poll_once(&store, &Recorder::default(), date(2024, 12, 25))
        .expect("cycle succeeds");

    let rows = render_rows(&store.list_tasks().expect("list"), date(2024, 12, 25));
    assert_eq!(rows.len(), 2);
    assert!(rows[0].text.starts_with("typed by hand ADDED: 01/12/2024"));
    assert_eq!(rows[1].text, "Buy a tree ADDED: 25/12/2024 | DUE: 25/12/2024");
}
