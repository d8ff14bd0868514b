use anyhow::Context;
use chrono::NaiveDate;
use mailparse::{MailHeaderMap, ParsedMail};
use tracing::{debug, trace};

use crate::datetime::parse_date;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTask {
    pub subject: String,
    pub body: Option<String>,
    pub due: Option<NaiveDate>,
}

/// Turns a raw RFC 822 message into task fields. The due date comes from
/// the subject (`<marker text>, DD/MM/YYYY`), the task text from the first
/// text part of the body.
#[tracing::instrument(skip(raw), fields(bytes = raw.len()))]
pub fn parse_message(raw: &[u8]) -> anyhow::Result<InboundTask> {
    let mail = mailparse::parse_mail(raw).context("malformed message")?;

    let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
    let due = subject_due_date(&subject)
        .with_context(|| format!("bad due date in subject '{subject}'"))?;
    let body = first_text_block(&mail)?;

    debug!(subject = %subject, due = ?due, has_body = body.is_some(), "parsed message");
    Ok(InboundTask { subject, body, due })
}

/// Everything after the first comma is the due date; no comma means no
/// due date.
pub fn subject_due_date(subject: &str) -> anyhow::Result<Option<NaiveDate>> {
    match subject.split_once(',') {
        Some((_, raw)) => parse_date(raw).map(Some),
        None => Ok(None),
    }
}

fn first_text_block(mail: &ParsedMail<'_>) -> anyhow::Result<Option<String>> {
    let mimetype = mail.ctype.mimetype.to_ascii_lowercase();
    trace!(%mimetype, parts = mail.subparts.len(), "looking for text part");

    let part = if mimetype.starts_with("multipart/") {
        mail.subparts.iter().find(|part| is_text(part))
    } else if is_text(mail) {
        Some(mail)
    } else {
        None
    };

    let Some(part) = part else {
        return Ok(None);
    };

    let text = part.get_body().context("failed to decode message body")?;
    let text = text.trim_end();
    if text.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(text.to_string()))
    }
}

fn is_text(part: &ParsedMail<'_>) -> bool {
    part.ctype.mimetype.to_ascii_lowercase().starts_with("text/")
}
