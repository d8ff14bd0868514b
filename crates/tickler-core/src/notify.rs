use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use notify_rust::{Notification, Timeout};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::datastore::TaskStore;
use crate::render::row_text;
use crate::task::Task;

pub const APP_NAME: &str = "Tickler";
const ICON: &str = "task-due";
const TIMEOUT_MS: u32 = 5000;

/// Receives the user-facing events. Implementations must not fail the
/// caller: delivery problems are logged and dropped.
pub trait Notifier {
    fn task_added(&self, task: &Task);

    fn due_today(&self, count: usize);
}

/// Desktop notification with the configured sound attached.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    sound: Option<PathBuf>,
}

impl DesktopNotifier {
    pub fn new(sound: Option<PathBuf>) -> Self {
        if let Some(path) = &sound
            && !path.exists()
        {
            warn!(sound = %path.display(), "notification sound not found");
        }
        Self { sound }
    }

    fn show(&self, body: &str) {
        let mut notification = Notification::new();
        notification
            .summary(APP_NAME)
            .body(body)
            .icon(ICON)
            .timeout(Timeout::Milliseconds(TIMEOUT_MS));

        if let Some(sound) = &self.sound {
            attach_sound(&mut notification, sound);
        }

        if let Err(err) = notification.show() {
            warn!(error = %err, "couldn't show notification");
        }
    }
}

impl Notifier for DesktopNotifier {
    fn task_added(&self, task: &Task) {
        info!(id = %task.id, "notifying task added");
        self.show(&format!("Task added: {}", row_text(task)));
    }

    fn due_today(&self, count: usize) {
        info!(count, "notifying due-today reminder");
        let body = if count == 1 {
            "1 task is due today".to_string()
        } else {
            format!("{count} tasks are due today")
        };
        self.show(&body);
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn attach_sound(notification: &mut Notification, sound: &Path) {
    notification.hint(notify_rust::Hint::SoundFile(sound.display().to_string()));
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn attach_sound(_notification: &mut Notification, sound: &Path) {
    debug!(sound = %sound.display(), "sound hints unsupported on this platform");
}

/// Logs events without showing anything.
#[derive(Debug, Clone, Default)]
pub struct QuietNotifier;

impl Notifier for QuietNotifier {
    fn task_added(&self, task: &Task) {
        debug!(id = %task.id, "task added (notifications off)");
    }

    fn due_today(&self, count: usize) {
        debug!(count, "tasks due today (notifications off)");
    }
}

/// `notify.enabled`, on unless set to a false value.
pub fn notifications_enabled(cfg: &Config) -> bool {
    cfg.get_bool("notify.enabled").unwrap_or(true)
}

pub fn notifier_from_config(cfg: &Config) -> Box<dyn Notifier> {
    if !notifications_enabled(cfg) {
        debug!("notifications disabled");
        return Box::new(QuietNotifier);
    }
    let sound = cfg.get("notify.sound").map(PathBuf::from);
    Box::new(DesktopNotifier::new(sound))
}

/// Fires the reminder when at least one task is due on `today`.
#[tracing::instrument(skip(store, notifier))]
pub fn remind_if_due(
    store: &TaskStore,
    notifier: &dyn Notifier,
    today: NaiveDate,
) -> anyhow::Result<bool> {
    let count = store.count_due_on(today)?;
    if count == 0 {
        debug!("nothing due today");
        return Ok(false);
    }
    notifier.due_today(count);
    Ok(true)
}
