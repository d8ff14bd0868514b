use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use tracing::{debug, info, instrument};

use crate::cli::Command;
use crate::config::{Config, MailConfig};
use crate::datastore::TaskStore;
use crate::datetime::{Clock, parse_date};
use crate::mail::ImapConnector;
use crate::notify::{Notifier, notifier_from_config, remind_if_due};
use crate::poller::Poller;
use crate::render::Renderer;
use crate::scheduler::Scheduler;
use crate::task::TaskId;

const DEFAULT_REMINDER_INTERVAL: Duration = Duration::from_secs(3600);

#[instrument(skip(store, cfg, clock, renderer))]
pub fn dispatch(
    store: &TaskStore,
    cfg: &Config,
    clock: &Clock,
    renderer: &mut Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let today = clock.today();
    debug!(%today, "dispatching command");

    match command {
        Command::Add { due, text } => {
            let notifier = notifier_from_config(cfg);
            cmd_add(store, notifier.as_ref(), renderer, &text.join(" "), due.as_deref(), today)
        }
        Command::List { json } => cmd_list(store, renderer, json, today),
        Command::Edit {
            by_text,
            target,
            text,
        } => cmd_edit(store, renderer, by_text, &target, &text.join(" "), today),
        Command::Delete { by_text, target } => cmd_delete(store, renderer, by_text, &target, today),
        Command::Poll => cmd_poll(store, cfg, renderer, today),
        Command::Remind => {
            let notifier = notifier_from_config(cfg);
            cmd_remind(store, notifier.as_ref(), today)
        }
        Command::Watch { ticks } => cmd_watch(store, cfg, clock, renderer, ticks),
        Command::Show => cmd_show(cfg),
    }
}

#[instrument(skip(store, notifier, renderer, text))]
fn cmd_add(
    store: &TaskStore,
    notifier: &dyn Notifier,
    renderer: &mut Renderer,
    text: &str,
    due: Option<&str>,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command add");

    let due = due.map(parse_date).transpose().context("invalid --due")?;
    let Some(task) = store.add_task(text, today, due)? else {
        debug!("empty task text; nothing added");
        return Ok(());
    };

    println!("Created task {}.", task.id);
    notifier.task_added(&task);
    renderer.print_task_list(&store.list_tasks()?, today)
}

#[instrument(skip(store, renderer))]
fn cmd_list(
    store: &TaskStore,
    renderer: &mut Renderer,
    json: bool,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command list");
    let tasks = store.list_tasks()?;
    if json {
        renderer.print_json(&tasks)
    } else {
        renderer.print_task_list(&tasks, today)
    }
}

#[instrument(skip(store, renderer, text))]
fn cmd_edit(
    store: &TaskStore,
    renderer: &mut Renderer,
    by_text: bool,
    target: &str,
    text: &str,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command edit");

    let changed = if by_text {
        store.update_text_matching(target, text)?
    } else {
        let id: TaskId = target.parse()?;
        if store.get_task(id)?.is_none() {
            return Err(anyhow!("no task with id {id}"));
        }
        usize::from(store.update_text(id, text)?)
    };

    if changed == 0 {
        println!("No tasks modified.");
        return Ok(());
    }
    println!("Modified {changed} task{}.", plural(changed));
    renderer.print_task_list(&store.list_tasks()?, today)
}

#[instrument(skip(store, renderer))]
fn cmd_delete(
    store: &TaskStore,
    renderer: &mut Renderer,
    by_text: bool,
    target: &str,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command delete");

    let removed = if by_text {
        store.delete_matching(target)?
    } else {
        let id: TaskId = target.parse()?;
        if !store.delete_task(id)? {
            return Err(anyhow!("no task with id {id}"));
        }
        1
    };

    if removed == 0 {
        println!("No tasks deleted.");
        return Ok(());
    }
    println!("Deleted {removed} task{}.", plural(removed));
    renderer.print_task_list(&store.list_tasks()?, today)
}

#[instrument(skip(store, cfg, renderer))]
fn cmd_poll(
    store: &TaskStore,
    cfg: &Config,
    renderer: &mut Renderer,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command poll");

    let mail = MailConfig::from_config(cfg)?;
    let notifier = notifier_from_config(cfg);
    let mut poller = Poller::new(mail, ImapConnector);
    let report = poller.poll_once(store, notifier.as_ref(), today)?;

    println!(
        "Found {} message{}, created {} task{}, {} failed.",
        report.found,
        plural(report.found),
        report.inserted,
        plural(report.inserted),
        report.failed
    );
    if report.inserted > 0 {
        renderer.print_task_list(&store.list_tasks()?, today)?;
    }
    Ok(())
}

#[instrument(skip(store, notifier))]
fn cmd_remind(store: &TaskStore, notifier: &dyn Notifier, today: NaiveDate) -> anyhow::Result<()> {
    info!("command remind");
    if !remind_if_due(store, notifier, today)? {
        println!("Nothing due today.");
    }
    Ok(())
}

/// Single-threaded event loop: the mail poll and the due-today reminder
/// run on their own timers and every store write is followed by a
/// re-render.
#[instrument(skip(store, cfg, clock, renderer))]
fn cmd_watch(
    store: &TaskStore,
    cfg: &Config,
    clock: &Clock,
    renderer: &mut Renderer,
    ticks: Option<u64>,
) -> anyhow::Result<()> {
    info!("command watch");

    let mail = MailConfig::from_config(cfg)?;
    let reminder_every = cfg
        .get_secs("notify.reminder_interval")?
        .unwrap_or(DEFAULT_REMINDER_INTERVAL);
    let poll_every = mail.poll_interval;
    let notifier = notifier_from_config(cfg);
    let mut poller = Poller::new(mail, ImapConnector);

    renderer.print_task_list(&store.list_tasks()?, clock.today())?;

    let mut scheduler = Scheduler::new(Instant::now());
    scheduler.every("mail-poll", poll_every, || {
        let today = clock.today();
        let report = poller.poll_once(store, notifier.as_ref(), today)?;
        if report.inserted > 0 {
            renderer.print_task_list(&store.list_tasks()?, today)?;
        }
        Ok(())
    });
    scheduler.every("due-reminder", reminder_every, || {
        remind_if_due(store, notifier.as_ref(), clock.today()).map(|_| ())
    });

    info!(
        poll_secs = poll_every.as_secs(),
        reminder_secs = reminder_every.as_secs(),
        "watching"
    );
    let fired = scheduler.run(ticks);
    info!(fired, "watch finished");
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    for path in &cfg.loaded_files {
        println!("# loaded {}", path.display());
    }
    for (key, value) in cfg.iter() {
        if key == "mail.password" {
            println!("{key} = ********");
        } else {
            println!("{key} = {value}");
        }
    }
    Ok(())
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}
