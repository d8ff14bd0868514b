use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::Serialize;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{DueCategory, classify, format_date};
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

pub const OVERDUE: Rgb = Rgb(0xBF, 0x61, 0x6A);
pub const DUE_TODAY: Rgb = Rgb(0xEB, 0xCB, 0x8B);
pub const ON_TRACK: Rgb = Rgb(0xA3, 0xBE, 0x8C);
pub const BAND_EVEN: Rgb = Rgb(0x43, 0x4C, 0x5E);
pub const BAND_ODD: Rgb = Rgb(0x4C, 0x56, 0x6A);

pub fn foreground(category: DueCategory) -> Rgb {
    match category {
        DueCategory::Overdue => OVERDUE,
        DueCategory::DueToday => DUE_TODAY,
        DueCategory::Upcoming | DueCategory::None => ON_TRACK,
    }
}

pub fn band(index: usize) -> Rgb {
    if index % 2 == 0 { BAND_EVEN } else { BAND_ODD }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayRow {
    pub handle: TaskId,
    pub text: String,
    pub category: DueCategory,
    pub foreground: Rgb,
    pub background: Rgb,
}

pub fn row_text(task: &Task) -> String {
    let mut text = format!("{} ADDED: {}", task.text, format_date(task.added));
    if let Some(due) = task.due {
        text.push_str(&format!(" | DUE: {}", format_date(due)));
    }
    text
}

/// One row per task, in the order given. Colors depend on the due date
/// and the row position only.
pub fn render_rows(tasks: &[Task], today: NaiveDate) -> Vec<DisplayRow> {
    tasks
        .iter()
        .enumerate()
        .map(|(index, task)| {
            let category = classify(task.due, today);
            DisplayRow {
                handle: task.id,
                text: row_text(task),
                category,
                foreground: foreground(category),
                background: band(index),
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn print_task_list(&mut self, tasks: &[Task], today: NaiveDate) -> anyhow::Result<()> {
        let rows = render_rows(tasks, today);
        let color = self.color && io::stdout().is_terminal();
        let mut out = io::stdout().lock();
        if rows.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }
        write_rows(&mut out, &rows, color)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn print_json(&mut self, tasks: &[Task]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, tasks)?;
        writeln!(out)?;
        Ok(())
    }
}

fn write_rows<W: Write>(mut writer: W, rows: &[DisplayRow], color: bool) -> anyhow::Result<()> {
    let handles: Vec<String> = rows.iter().map(|row| row.handle.to_string()).collect();
    let id_width = handles
        .iter()
        .map(|h| UnicodeWidthStr::width(h.as_str()))
        .max()
        .unwrap_or(0)
        .max("ID".len());
    let text_width = rows
        .iter()
        .map(|row| UnicodeWidthStr::width(row.text.as_str()))
        .max()
        .unwrap_or(0);

    writeln!(writer, "{:id_width$} Task", "ID")?;
    writeln!(writer, "{:-<id_width$} {:-<text_width$}", "", "")?;

    for (row, handle) in rows.iter().zip(handles) {
        let padding = text_width.saturating_sub(UnicodeWidthStr::width(row.text.as_str()));
        let line = format!(
            "{handle:>id_width$} {}{}",
            row.text,
            " ".repeat(padding)
        );
        if color {
            writeln!(writer, "{}", paint(&line, row.foreground, row.background))?;
        } else {
            writeln!(writer, "{line}")?;
        }
    }

    Ok(())
}

fn paint(text: &str, fg: Rgb, bg: Rgb) -> String {
    format!(
        "\x1b[38;2;{};{};{}m\x1b[48;2;{};{};{}m{text}\x1b[0m",
        fg.0, fg.1, fg.2, bg.0, bg.1, bg.2
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn task(id: i64, text: &str, due: Option<NaiveDate>) -> Task {
        Task {
            id: TaskId(id),
            text: text.to_string(),
            added: date(2024, 12, 1),
            due,
        }
    }

    #[test]
    fn one_row_per_task_in_store_order() {
        let today = date(2024, 12, 25);
        let tasks = vec![
            task(7, "late", Some(date(2024, 12, 20))),
            task(2, "now", Some(today)),
            task(9, "later", Some(date(2025, 1, 1))),
            task(4, "whenever", None),
        ];

        let rows = render_rows(&tasks, today);
        assert_eq!(rows.len(), tasks.len());
        let handles: Vec<TaskId> = rows.iter().map(|r| r.handle).collect();
        assert_eq!(handles, vec![TaskId(7), TaskId(2), TaskId(9), TaskId(4)]);

        let fgs: Vec<Rgb> = rows.iter().map(|r| r.foreground).collect();
        assert_eq!(fgs, vec![OVERDUE, DUE_TODAY, ON_TRACK, ON_TRACK]);
        assert_eq!(rows[0].category, DueCategory::Overdue);
        assert_eq!(rows[3].category, DueCategory::None);
    }

    #[test]
    fn background_alternates_by_position_only() {
        let today = date(2024, 12, 25);
        let tasks: Vec<Task> = (0..5).map(|i| task(i, "same", Some(today))).collect();
        let rows = render_rows(&tasks, today);
        let bgs: Vec<Rgb> = rows.iter().map(|r| r.background).collect();
        assert_eq!(bgs, vec![BAND_EVEN, BAND_ODD, BAND_EVEN, BAND_ODD, BAND_EVEN]);
    }

    #[test]
    fn row_text_carries_added_and_due_labels() {
        let with_due = task(1, "pay rent", Some(date(2024, 12, 25)));
        assert_eq!(
            row_text(&with_due),
            "pay rent ADDED: 01/12/2024 | DUE: 25/12/2024"
        );
        let without = task(1, "pay rent", None);
        assert_eq!(row_text(&without), "pay rent ADDED: 01/12/2024");
    }

    #[test]
    fn rendering_is_idempotent() {
        let today = date(2024, 12, 25);
        let tasks = vec![task(1, "a", None), task(2, "b", Some(today))];
        assert_eq!(render_rows(&tasks, today), render_rows(&tasks, today));
    }

    #[test]
    fn plain_table_pads_to_widest_row() {
        let today = date(2024, 12, 25);
        let tasks = vec![task(1, "a", None), task(10, "longer task", None)];
        let rows = render_rows(&tasks, today);
        let mut buf = Vec::new();
        write_rows(&mut buf, &rows, false).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with(" 1 a ADDED"));
        assert_eq!(lines[2].len(), lines[3].len());
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn colored_rows_use_truecolor_escapes() {
        let today = date(2024, 12, 25);
        let rows = render_rows(&[task(1, "x", Some(date(2024, 1, 1)))], today);
        let mut buf = Vec::new();
        write_rows(&mut buf, &rows, true).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("\x1b[38;2;191;97;106m"));
        assert!(text.contains("\x1b[48;2;67;76;94m"));
        assert_eq!(OVERDUE, Rgb(191, 97, 106));
    }

    #[test]
    fn invalid_color_setting_is_rejected() {
        let mut cfg = Config::default();
        cfg.apply_overrides(vec![("color".to_string(), "sometimes".to_string())]);
        assert!(Renderer::new(&cfg).is_err());
    }
}
