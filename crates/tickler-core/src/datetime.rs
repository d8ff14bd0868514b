use anyhow::anyhow;
use chrono::{
  Local,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use serde::Serialize;

pub const DATE_FORMAT: &str =
  "%d/%m/%Y";

/// Display category of a task derived
/// from its due date.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize
)]
#[serde(rename_all = "kebab-case")]
pub enum DueCategory {
  Overdue,
  DueToday,
  Upcoming,
  None
}

#[must_use]
pub fn classify(
  due: Option<NaiveDate>,
  today: NaiveDate
) -> DueCategory {
  match due {
    | None => DueCategory::None,
    | Some(date) if date == today => {
      DueCategory::DueToday
    }
    | Some(date) if date < today => {
      DueCategory::Overdue
    }
    | Some(_) => DueCategory::Upcoming
  }
}

#[tracing::instrument(level = "trace")]
pub fn parse_date(
  input: &str
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  if token.is_empty() {
    return Err(anyhow!(
      "empty date; expected DD/MM/YYYY"
    ));
  }

  NaiveDate::parse_from_str(
    token,
    DATE_FORMAT
  )
  .map_err(|err| {
    anyhow!(
      "invalid date '{token}': {err}; \
       expected DD/MM/YYYY"
    )
  })
}

#[must_use]
pub fn format_date(
  date: NaiveDate
) -> String {
  date.format(DATE_FORMAT).to_string()
}

/// Source of "today". Uses the
/// configured timezone when one is set,
/// the system local timezone otherwise.
#[derive(Debug, Clone, Default)]
pub struct Clock {
  timezone: Option<Tz>
}

impl Clock {
  pub fn new(
    timezone: Option<&str>
  ) -> anyhow::Result<Self> {
    let timezone = match timezone {
      | Some(raw)
        if !raw.trim().is_empty() =>
      {
        Some(parse_timezone(raw)?)
      }
      | _ => None
    };
    Ok(Self { timezone })
  }

  #[must_use]
  pub fn today(&self) -> NaiveDate {
    match self.timezone {
      | Some(tz) => {
        Utc::now()
          .with_timezone(&tz)
          .date_naive()
      }
      | None => {
        Local::now().date_naive()
      }
    }
  }
}

fn parse_timezone(
  raw: &str
) -> anyhow::Result<Tz> {
  let trimmed = raw.trim();
  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        timezone = %trimmed,
        "configured timezone"
      );
      Ok(tz)
    }
    | Err(err) => {
      tracing::error!(
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      Err(anyhow!(
        "invalid date.timezone \
         '{trimmed}': {err}"
      ))
    }
  }
}

pub mod date_serde {
  use chrono::NaiveDate;
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  use super::DATE_FORMAT;

  pub fn serialize<S>(
    date: &NaiveDate,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &date
        .format(DATE_FORMAT)
        .to_string()
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<NaiveDate, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    NaiveDate::parse_from_str(
      raw.trim(),
      DATE_FORMAT
    )
    .map_err(serde::de::Error::custom)
  }

  pub mod option {
    use chrono::NaiveDate;
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      date: &Option<NaiveDate>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match date {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<Option<NaiveDate>, D::Error>
    where
      D: Deserializer<'de>
    {
      let raw = Option::<String>::deserialize(
        deserializer
      )?;
      match raw {
        | Some(text)
          if !text.trim().is_empty() =>
        {
          NaiveDate::parse_from_str(
            text.trim(),
            super::super::DATE_FORMAT
          )
          .map(Some)
          .map_err(
            serde::de::Error::custom
          )
        }
        | _ => Ok(None)
      }
    }
  }
}
