//! libSQL-backed ticket source (local file or remote Turso-style endpoint).

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Value, params};
use tracing::{debug, info};

use crate::error::SourceError;
use crate::source::{RawRow, SourceTimezone, TicketSource};

/// Windowed interaction query. `?1` is the window start, `?2` the end, both
/// formatted as `%Y-%m-%d %H:%M:%S` wall-clock time in the source zone. Columns must come back in this order:
/// id, from, to, subject, html body, created-at.
pub const DEFAULT_QUERY: &str = "SELECT aGlobalCaseId, tFrom, tTo, CaseSubject, mMsgContent, dCreatedAt \
     FROM interactions WHERE dCreatedAt >= ?1 AND dCreatedAt < ?2 ORDER BY dCreatedAt";

const WINDOW_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct LibSqlTicketSource {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    query: String,
    timezone: SourceTimezone,
}

impl LibSqlTicketSource {
    /// Open a local database file.
    pub async fn new_local(path: &Path, query: Option<String>) -> Result<Self, SourceError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SourceError::Connection(format!("Failed to open libSQL database: {e}")))?;
        info!(path = %path.display(), "Ticket source opened");
        Self::from_database(db, query)
    }

    /// Connect to a remote libSQL endpoint.
    pub async fn new_remote(
        url: &str,
        auth_token: &str,
        query: Option<String>,
    ) -> Result<Self, SourceError> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| SourceError::Connection(format!("Failed to connect to {url}: {e}")))?;
        info!(url, "Ticket source connected");
        Self::from_database(db, query)
    }

    fn from_database(db: Database, query: Option<String>) -> Result<Self, SourceError> {
        let conn = db
            .connect()
            .map_err(|e| SourceError::Connection(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db,
            conn,
            query: query.unwrap_or_else(|| DEFAULT_QUERY.to_string()),
            timezone: SourceTimezone::default(),
        })
    }

    /// Zone the source's naive timestamps are written in.
    pub fn with_timezone(mut self, timezone: SourceTimezone) -> Self {
        self.timezone = timezone;
        self
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(n) => Some(n.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => Some(s),
        Value::Blob(b) => Some(String::from_utf8_lossy(&b).into_owned()),
    }
}

fn column(row: &libsql::Row, idx: i32) -> Result<Option<String>, SourceError> {
    row.get_value(idx)
        .map(value_to_string)
        .map_err(|e| SourceError::Query(format!("column {idx}: {e}")))
}

#[async_trait]
impl TicketSource for LibSqlTicketSource {
    async fn pull(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRow>, SourceError> {
        let start = self.timezone.to_naive(start).format(WINDOW_FORMAT).to_string();
        let end = self.timezone.to_naive(end).format(WINDOW_FORMAT).to_string();

        let mut rows = self
            .conn
            .query(&self.query, params![start.as_str(), end.as_str()])
            .await
            .map_err(|e| SourceError::Query(format!("pull: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SourceError::Query(format!("pull row: {e}")))?
        {
            out.push(RawRow {
                interaction_id: column(&row, 0)?,
                from: column(&row, 1)?.unwrap_or_default(),
                to: column(&row, 2)?.unwrap_or_default(),
                subject: column(&row, 3)?.unwrap_or_default(),
                body_html: column(&row, 4)?.unwrap_or_default(),
                created_at: column(&row, 5)?,
            });
        }

        debug!(start = %start, end = %end, rows = out.len(), "Source pull complete");
        Ok(out)
    }
}
