use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::datetime::date_serde;

/// Store-assigned row identifier. Rendered rows carry it as the handle
/// used by edit and delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let value: i64 = raw
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid task id: {raw}"))?;
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    pub text: String,

    #[serde(with = "date_serde")]
    pub added: NaiveDate,

    #[serde(default, with = "date_serde::option")]
    pub due: Option<NaiveDate>,
}

/// Trims task text and rejects it when nothing is left.
pub fn normalize_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
