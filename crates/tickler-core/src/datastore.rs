use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::datetime::{DATE_FORMAT, format_date};
use crate::task::{Task, TaskId, normalize_text};

const LEGACY_ISO_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY,
        task TEXT NOT NULL,
        added_date TEXT NOT NULL,
        due_date DATE
    );
";

/// The task table. Every write goes through here, both from the front
/// end and from the mail poller.
#[derive(Debug)]
pub struct TaskStore {
    pub db_path: Option<PathBuf>,
    conn: Connection,
}

impl TaskStore {
    #[tracing::instrument(skip(db_path))]
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = db_path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database {}", db_path.display()))?;
        conn.execute_batch(SCHEMA)
            .context("failed to initialize tasks table")?;

        info!(db = %db_path.display(), "opened task store");

        Ok(Self {
            db_path: Some(db_path.to_path_buf()),
            conn,
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        conn.execute_batch(SCHEMA)
            .context("failed to initialize tasks table")?;
        debug!("opened in-memory task store");
        Ok(Self {
            db_path: None,
            conn,
        })
    }

    /// Inserts a task. Text that is empty after trimming is ignored and
    /// leaves the table untouched.
    #[tracing::instrument(skip(self, text))]
    pub fn add_task(
        &self,
        text: &str,
        added: NaiveDate,
        due: Option<NaiveDate>,
    ) -> anyhow::Result<Option<Task>> {
        let Some(text) = normalize_text(text) else {
            debug!("ignoring task with empty text");
            return Ok(None);
        };

        self.conn
            .execute(
                "INSERT INTO tasks (task, added_date, due_date) VALUES (?1, ?2, ?3)",
                params![text, format_date(added), due.map(format_date)],
            )
            .context("failed to insert task")?;
        let id = TaskId(self.conn.last_insert_rowid());

        info!(%id, due = ?due, "task added");
        Ok(Some(Task {
            id,
            text,
            added,
            due,
        }))
    }

    #[tracing::instrument(skip(self))]
    pub fn list_tasks(&self) -> anyhow::Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, task, added_date, due_date FROM tasks ORDER BY id")?;
        let rows = stmt.query_map([], raw_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_task());
        }

        debug!(count = out.len(), "loaded tasks");
        Ok(out)
    }

    pub fn get_task(&self, id: TaskId) -> anyhow::Result<Option<Task>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, task, added_date, due_date FROM tasks WHERE id = ?1",
                params![id.0],
                raw_row,
            )
            .optional()
            .with_context(|| format!("failed to load task {id}"))?;

        Ok(raw.map(RawRow::into_task))
    }

    /// Replaces the text of one task. Returns false when the id is unknown
    /// or the new text is empty.
    #[tracing::instrument(skip(self, text), fields(id = %id))]
    pub fn update_text(&self, id: TaskId, text: &str) -> anyhow::Result<bool> {
        let Some(text) = normalize_text(text) else {
            debug!("ignoring edit with empty text");
            return Ok(false);
        };

        let changed = self
            .conn
            .execute(
                "UPDATE tasks SET task = ?1 WHERE id = ?2",
                params![text, id.0],
            )
            .with_context(|| format!("failed to update task {id}"))?;
        info!(changed, "task text updated");
        Ok(changed > 0)
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    pub fn delete_task(&self, id: TaskId) -> anyhow::Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id.0])
            .with_context(|| format!("failed to delete task {id}"))?;
        info!(removed, "task deleted");
        Ok(removed > 0)
    }

    /// Rewrites every task whose text equals `current`. Rows with
    /// identical text cannot be told apart, so all of them change.
    #[tracing::instrument(skip(self, current, text))]
    pub fn update_text_matching(&self, current: &str, text: &str) -> anyhow::Result<usize> {
        let Some(text) = normalize_text(text) else {
            debug!("ignoring edit with empty text");
            return Ok(0);
        };

        let changed = self
            .conn
            .execute(
                "UPDATE tasks SET task = ?1 WHERE task = ?2",
                params![text, current],
            )
            .context("failed to update tasks by text")?;
        info!(changed, "task text updated by match");
        Ok(changed)
    }

    /// Deletes every task whose text equals `text`.
    #[tracing::instrument(skip(self, text))]
    pub fn delete_matching(&self, text: &str) -> anyhow::Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM tasks WHERE task = ?1", params![text])
            .context("failed to delete tasks by text")?;
        info!(removed, "tasks deleted by match");
        Ok(removed)
    }

    pub fn count_due_on(&self, date: NaiveDate) -> anyhow::Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE due_date = ?1",
                params![format_date(date)],
                |row| row.get(0),
            )
            .context("failed to count due tasks")?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

struct RawRow {
    id: i64,
    text: String,
    added: String,
    due: Option<String>,
}

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        text: row.get(1)?,
        added: row.get(2)?,
        due: row.get(3)?,
    })
}

impl RawRow {
    /// Never fails: a date that reads as neither `DD/MM/YYYY` nor ISO is
    /// logged and replaced, so one bad row cannot hide the others.
    fn into_task(self) -> Task {
        let added = read_date(&self.added).unwrap_or_else(|| {
            warn!(id = self.id, raw = %self.added, "unreadable added date; showing epoch");
            NaiveDate::default()
        });

        // Older databases stored a missing due date as the text "None".
        let due = match self.due.as_deref().map(str::trim) {
            None | Some("") | Some("None") => None,
            Some(raw) => {
                let due = read_date(raw);
                if due.is_none() {
                    warn!(id = self.id, raw, "unreadable due date; treating as none");
                }
                due
            }
        };

        Task {
            id: TaskId(self.id),
            text: self.text,
            added,
            due,
        }
    }
}

fn read_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(raw, LEGACY_ISO_FORMAT))
        .ok()
}
