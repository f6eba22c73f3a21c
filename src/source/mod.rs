//! Ticket source: where raw interaction rows come from.
//!
//! A source only answers windowed pulls. Turning rows into [`WorkItem`]s
//! (HTML cleanup, timestamp parsing, dropping malformed rows) happens here so
//! every backend behaves the same.

pub mod libsql_backend;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Offset, TimeZone, Utc};
use scraper::Html;
use tracing::warn;

use crate::error::{ConfigError, SourceError};
use crate::pipeline::types::WorkItem;

pub use libsql_backend::LibSqlTicketSource;

/// One interaction row as the source returns it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub interaction_id: Option<String>,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body_html: String,
    pub created_at: Option<String>,
}

#[async_trait]
pub trait TicketSource: Send + Sync {
    /// Rows created in `[start, end)`.
    async fn pull(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRow>, SourceError>;
}

/// Wall clock the source stores naive timestamps in.
///
/// Window bounds are rendered in this zone and naive row timestamps are read
/// back in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceTimezone {
    /// The host's local zone.
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl SourceTimezone {
    pub fn utc() -> Self {
        Self::Fixed(Utc.fix())
    }

    /// Wall-clock reading of `at` in this zone.
    pub fn to_naive(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Self::Local => at.with_timezone(&Local).naive_local(),
            Self::Fixed(offset) => at.with_timezone(offset).naive_local(),
        }
    }

    /// Instant for a wall-clock reading in this zone. For a reading repeated
    /// by a DST change the earlier instant wins; a skipped one is `None`.
    pub fn to_utc(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Self::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
            Self::Fixed(offset) => offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl fmt::Display for SourceTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

impl FromStr for SourceTimezone {
    type Err = ConfigError;

    /// `local`, `utc`, or an offset such as `+05:30`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("local") {
            return Ok(Self::Local);
        }
        if s.eq_ignore_ascii_case("utc") || s.eq_ignore_ascii_case("z") {
            return Ok(Self::utc());
        }
        s.parse::<FixedOffset>()
            .map(Self::Fixed)
            .map_err(|e| ConfigError::InvalidValue {
                key: "SOURCE_TIMEZONE".into(),
                message: format!("{s:?}: {e}"),
            })
    }
}

/// Convert raw rows into work items. Returns the items and how many rows
/// were dropped for a missing ID or an unusable timestamp.
pub fn normalize_rows(rows: Vec<RawRow>, tz: SourceTimezone) -> (Vec<WorkItem>, usize) {
    let mut items = Vec::with_capacity(rows.len());
    let mut dropped = 0;

    for row in rows {
        let Some(id) = row
            .interaction_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            warn!(subject = %row.subject, "Dropping row without interaction id");
            dropped += 1;
            continue;
        };

        let Some(received_at) = row
            .created_at
            .as_deref()
            .and_then(|raw| parse_timestamp(raw, tz)) else {
            warn!(
                interaction_id = %id,
                created_at = ?row.created_at,
                "Dropping row with missing or unparseable timestamp"
            );
            dropped += 1;
            continue;
        };

        items.push(WorkItem::new(
            id,
            row.from,
            row.to,
            row.subject,
            clean_html(&row.body_html),
            received_at,
        ));
    }

    (items, dropped)
}

/// Parse the timestamp formats sources emit. Values without an offset are
/// read as wall-clock time in `tz`.
pub fn parse_timestamp(s: &str, tz: SourceTimezone) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|ndt| tz.to_utc(ndt))
}

/// Reduce an HTML body to its text, text nodes joined by single spaces.
pub fn clean_html(raw: &str) -> String {
    let fragment = Html::parse_fragment(raw);
    fragment
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
