use std::collections::BTreeMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

/// Environment variables read at
/// startup and the config keys they
/// feed.
pub const ENV_ALIASES: &[(
  &str,
  &str
)] = &[
  ("EMAIL_USER", "mail.user"),
  ("EMAIL_PASS", "mail.password"),
  ("IMAP_URL", "mail.host"),
  ("TICKLER_TIMEZONE", "date.timezone")
];

const DOTENV_FILE: &str = ".env";

/// Longest accepted timer interval.
const MAX_INTERVAL_SECS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct Config {
  map:              BTreeMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = BTreeMap::new();
    for (k, v) in [
      (
        "data.location",
        "~/.tickler/todo.db"
      ),
      ("color", "on"),
      ("mail.port", "993"),
      ("mail.mailbox", "INBOX"),
      ("mail.marker", "todo"),
      ("mail.poll_interval", "60"),
      ("mail.on_error", "skip"),
      ("notify.enabled", "on"),
      (
        "notify.sound",
        "notification.wav"
      ),
      (
        "notify.reminder_interval",
        "3600"
      )
    ] {
      map.insert(
        k.to_string(),
        v.to_string()
      );
    }

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  /// Defaults, then the rc file, then
  /// `.env` in the working directory,
  /// then the process environment.
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading config file");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no config file found; using \
         defaults"
      );
    }

    let dotenv = PathBuf::from(DOTENV_FILE);
    if dotenv.exists() {
      cfg.load_dotenv(&dotenv)?;
    }

    cfg.apply_env(std::env::vars());
    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, "applying override");
      self.map.insert(key, v);
    }
  }

  /// Copies recognised environment
  /// variables onto their config keys.
  pub fn apply_env<I>(
    &mut self,
    vars: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (name, value) in vars {
      if let Some(key) =
        env_alias(&name)
      {
        trace!(var = %name, key, "config from environment");
        self
          .map
          .insert(key.to_string(), value);
      }
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self
      .map
      .get(key)
      .map(|v| v.trim().to_string())
      .filter(|v| !v.is_empty())
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn get_secs(
    &self,
    key: &str
  ) -> anyhow::Result<Option<Duration>>
  {
    let Some(raw) = self.get(key) else {
      return Ok(None);
    };
    let secs: u64 =
      raw.parse().map_err(|_| {
        anyhow!(
          "{key} must be a whole number \
           of seconds, got '{raw}'"
        )
      })?;
    if secs == 0 {
      return Err(anyhow!(
        "{key} must be greater than zero"
      ));
    }
    if secs > MAX_INTERVAL_SECS {
      return Err(anyhow!(
        "{key} must be at most \
         {MAX_INTERVAL_SECS} seconds \
         (one day), got {secs}"
      ));
    }
    Ok(Some(Duration::from_secs(secs)))
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, line) in
      config_lines(&text)
    {
      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (key, value) =
        split_pair(line).ok_or_else(
          || {
            anyhow!(
              "invalid config line \
               {}:{}: {}",
              path.display(),
              line_num,
              line
            )
          }
        )?;
      trace!(key = %key, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }

  /// `.env` holds `NAME=value` lines;
  /// only recognised names are kept.
  #[tracing::instrument(skip(self))]
  fn load_dotenv(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let text =
      fs::read_to_string(path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    self
      .loaded_files
      .push(path.to_path_buf());

    let pairs = config_lines(&text)
      .filter_map(|(_, line)| {
        let line = line
          .strip_prefix("export ")
          .unwrap_or(line);
        split_pair(line)
      });
    self.apply_env(pairs);
    Ok(())
  }
}

/// Validated mail settings handed to
/// the poller.
#[derive(Clone)]
pub struct MailConfig {
  pub user:          String,
  pub password:      String,
  pub host:          String,
  pub port:          u16,
  pub mailbox:       String,
  pub marker:        String,
  pub poll_interval: Duration,
  pub on_error:      OnError
}

impl std::fmt::Debug for MailConfig {
  fn fmt(
    &self,
    f: &mut std::fmt::Formatter<'_>
  ) -> std::fmt::Result {
    f.debug_struct("MailConfig")
      .field("user", &self.user)
      .field("password", &"***")
      .field("host", &self.host)
      .field("port", &self.port)
      .field("mailbox", &self.mailbox)
      .field("marker", &self.marker)
      .field(
        "poll_interval",
        &self.poll_interval
      )
      .field("on_error", &self.on_error)
      .finish()
  }
}

/// What a poll cycle does when one
/// message cannot be turned into a
/// task.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum OnError {
  /// Log it, leave it unread, go on
  /// with the next message.
  Skip,
  /// Stop the cycle at that message.
  Abort
}

impl std::str::FromStr for OnError {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "skip" => Ok(Self::Skip),
      | "abort" => Ok(Self::Abort),
      | other => Err(anyhow!(
        "mail.on_error must be 'skip' \
         or 'abort', got '{other}'"
      ))
    }
  }
}

impl MailConfig {
  #[tracing::instrument(skip(cfg))]
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let user =
      required(cfg, "mail.user")?;
    let password =
      required(cfg, "mail.password")?;
    let host =
      required(cfg, "mail.host")?;

    let port_raw = cfg
      .get("mail.port")
      .unwrap_or_else(|| {
        "993".to_string()
      });
    let port: u16 =
      port_raw.parse().map_err(|_| {
        anyhow!(
          "mail.port must be a TCP port \
           number, got '{port_raw}'"
        )
      })?;

    let mailbox = cfg
      .get("mail.mailbox")
      .unwrap_or_else(|| {
        "INBOX".to_string()
      });
    let marker = cfg
      .get("mail.marker")
      .ok_or_else(|| {
        anyhow!(
          "mail.marker must not be \
           empty"
        )
      })?;
    if marker.contains('"') {
      return Err(anyhow!(
        "mail.marker must not contain \
         double quotes"
      ));
    }

    let poll_interval = cfg
      .get_secs("mail.poll_interval")?
      .unwrap_or(Duration::from_secs(60));
    let on_error = cfg
      .get("mail.on_error")
      .map(|raw| raw.parse::<OnError>())
      .transpose()?
      .unwrap_or(OnError::Skip);

    let mail = Self {
      user,
      password,
      host,
      port,
      mailbox,
      marker,
      poll_interval,
      on_error
    };
    debug!(?mail, "validated mail config");
    Ok(mail)
  }
}

fn required(
  cfg: &Config,
  key: &str
) -> anyhow::Result<String> {
  cfg.get(key).ok_or_else(|| {
    match ENV_ALIASES
      .iter()
      .find(|(_, k)| *k == key)
    {
      | Some((var, _)) => anyhow!(
        "{key} is not set; export {var} \
         or add '{key} = ...' to the \
         config file"
      ),
      | None => {
        anyhow!("{key} is not set")
      }
    }
  })
}

#[tracing::instrument(skip(
  cfg,
  override_path
))]
pub fn resolve_db_path(
  cfg: &Config,
  override_path: Option<&Path>
) -> anyhow::Result<PathBuf> {
  if let Some(path) = override_path {
    return Ok(path.to_path_buf());
  }

  match cfg.get("data.location") {
    | Some(value) => {
      Ok(expand_tilde(Path::new(&value)))
    }
    | None => default_db_path()
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var("TICKLERRC")
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    return Ok(None);
  };
  let candidate = home.join(".ticklerrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_db_path()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".tickler").join("todo.db"))
}

fn env_alias(
  name: &str
) -> Option<&'static str> {
  ENV_ALIASES
    .iter()
    .find(|(var, _)| *var == name)
    .map(|(_, key)| *key)
}

/// Non-blank lines with `#` comments
/// removed, numbered from 1.
fn config_lines(
  text: &str
) -> impl Iterator<Item = (usize, &str)>
{
  text.lines().enumerate().filter_map(
    |(idx, raw)| {
      let line =
        strip_comment(raw).trim();
      if line.is_empty() {
        None
      } else {
        Some((idx + 1, line))
      }
    }
  )
}

/// A `#` opens a comment at the start
/// of a line or after whitespace, never
/// inside a quoted value, so `a#b` and
/// `"a #b"` are kept whole.
fn strip_comment(line: &str) -> &str {
  let mut quote: Option<char> = None;
  let mut prev: Option<char> = None;
  for (idx, ch) in line.char_indices() {
    let boundary = prev.is_none_or(|p| {
      p.is_whitespace() || p == '='
    });
    match quote {
      | Some(open) if ch == open => {
        quote = None
      }
      | Some(_) => {}
      | None
        if boundary
          && (ch == '"' || ch == '\'') =>
      {
        quote = Some(ch)
      }
      | None
        if ch == '#'
          && prev.is_none_or(
            char::is_whitespace
          ) =>
      {
        return &line[..idx];
      }
      | None => {}
    }
    prev = Some(ch);
  }
  line
}

fn split_pair(
  line: &str
) -> Option<(String, String)> {
  let (k, v) = line.split_once('=')?;
  let key = k.trim();
  if key.is_empty() {
    return None;
  }
  Some((
    key.to_string(),
    unquote(v.trim()).to_string()
  ))
}

fn unquote(value: &str) -> &str {
  value
    .strip_prefix('"')
    .and_then(|v| v.strip_suffix('"'))
    .or_else(|| {
      value
        .strip_prefix('\'')
        .and_then(|v| {
          v.strip_suffix('\'')
        })
    })
    .unwrap_or(value)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
