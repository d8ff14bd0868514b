pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod mail;
pub mod notify;
pub mod poller;
pub mod render;
pub mod scheduler;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli = cli::GlobalCli::parse_from(
    raw_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting tickler"
  );

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  debug!(overrides = cli.rc_overrides.len(), "applying rc overrides");
  cfg.apply_overrides(
    cli
      .rc_overrides
      .into_iter()
      .map(|kv| (kv.key, kv.value))
  );

  let db_path =
    config::resolve_db_path(
      &cfg,
      cli.db.as_deref()
    )
    .context(
      "failed to resolve task \
       database path"
    )?;

  let store =
    datastore::TaskStore::open(
      &db_path
    )
    .with_context(|| {
      format!(
        "failed to open task store at \
         {}",
        db_path.display()
      )
    })?;

  let clock = datetime::Clock::new(
    cfg.get("date.timezone").as_deref()
  )?;
  let mut renderer =
    render::Renderer::new(&cfg)?;
  let command = cli.command.unwrap_or(
    cli::Command::List { json: false }
  );

  commands::dispatch(
    &store,
    &cfg,
    &clock,
    &mut renderer,
    command
  )?;

  info!("done");
  Ok(())
}
