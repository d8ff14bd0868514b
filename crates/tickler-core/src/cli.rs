use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tickler",
    version,
    about = "To-do list with an email inbox bridge",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Override a config key, e.g. --rc mail.marker=task
    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    /// Config file (default: $TICKLERRC, then ~/.ticklerrc)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Task database file (overrides data.location)
    #[arg(long = "db", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Add a task
    Add {
        /// Due date, DD/MM/YYYY
        #[arg(long)]
        due: Option<String>,

        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Show all tasks in store order
    List {
        #[arg(long)]
        json: bool,
    },

    /// Replace a task's text
    Edit {
        /// Treat TARGET as the current task text instead of an id
        #[arg(long = "match")]
        by_text: bool,

        target: String,

        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Delete a task
    Delete {
        /// Treat TARGET as the task text instead of an id; every task with
        /// exactly that text is deleted
        #[arg(long = "match")]
        by_text: bool,

        target: String,
    },

    /// Run one mail poll cycle
    Poll,

    /// Notify if any task is due today
    Remind,

    /// Poll mail and remind on timers until interrupted
    Watch {
        /// Stop after this many timer firings
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Print the effective configuration
    Show,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> GlobalCli {
        GlobalCli::try_parse_from(args.iter().copied()).expect("valid args")
    }

    #[test]
    fn add_joins_words_and_takes_due() {
        let cli = parse(&["tickler", "add", "buy", "milk", "--due", "25/12/2024"]);
        assert_eq!(
            cli.command,
            Some(Command::Add {
                due: Some("25/12/2024".to_string()),
                text: vec!["buy".to_string(), "milk".to_string()],
            })
        );
    }

    #[test]
    fn edit_and_delete_by_match() {
        let cli = parse(&["tickler", "edit", "--match", "old text", "new", "text"]);
        assert_eq!(
            cli.command,
            Some(Command::Edit {
                by_text: true,
                target: "old text".to_string(),
                text: vec!["new".to_string(), "text".to_string()],
            })
        );

        let cli = parse(&["tickler", "delete", "4"]);
        assert_eq!(
            cli.command,
            Some(Command::Delete {
                by_text: false,
                target: "4".to_string(),
            })
        );
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&["tickler", "list", "--rc", "color=off", "-vv", "--db", "/tmp/t.db"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.rc_overrides.len(), 1);
        assert_eq!(cli.rc_overrides[0].key, "color");
        assert_eq!(cli.rc_overrides[0].value, "off");
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/t.db")));
    }

    #[test]
    fn no_subcommand_is_allowed() {
        let cli = parse(&["tickler"]);
        assert_eq!(cli.command, None);
    }

    #[test]
    fn add_requires_text() {
        assert!(GlobalCli::try_parse_from(["tickler", "add"]).is_err());
        assert!(GlobalCli::try_parse_from(["tickler", "--rc", "novalue", "list"]).is_err());
    }
}
