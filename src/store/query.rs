//! Snapshot query filters and timestamp encoding.

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, TimeDelta, Utc};

use crate::error::StoreError;

/// Filters for [`SnapshotStore::query`](super::SnapshotStore::query).
///
/// Every filter is optional; an absent filter places no constraint on that
/// dimension. Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotQuery {
    /// Only snapshots for this pair.
    pub trading_pair: Option<String>,
    /// Earliest timestamp (inclusive).
    pub start: Option<DateTime<Utc>>,
    /// Latest timestamp (inclusive).
    pub end: Option<DateTime<Utc>>,
    /// Maximum rows returned.
    pub limit: Option<usize>,
    /// Rows skipped before the first returned.
    pub offset: usize,
}

impl SnapshotQuery {
    /// Query with no constraints.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one trading pair.
    pub fn pair(mut self, trading_pair: impl Into<String>) -> Self {
        self.trading_pair = Some(trading_pair.into());
        self
    }

    /// Restrict to an inclusive time range; either end may be open.
    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Return at most `limit` rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `offset` rows.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Build the WHERE clause alone and its positional parameters.
    ///
    /// Limit and offset are not filters and never appear here.
    pub(crate) fn filter_sql(&self) -> (String, Vec<String>) {
        let mut sql = String::from(" WHERE 1=1");
        let mut params = Vec::new();

        if let Some(pair) = &self.trading_pair {
            params.push(pair.clone());
            sql.push_str(&format!(" AND trading_pair = ?{}", params.len()));
        }
        if let Some(start) = &self.start {
            params.push(format_timestamp(start));
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len()));
        }
        if let Some(end) = &self.end {
            params.push(format_timestamp(end));
            sql.push_str(&format!(" AND timestamp <= ?{}", params.len()));
        }
        (sql, params)
    }

    /// Build the WHERE / ORDER / LIMIT tail and its positional parameters.
    pub(crate) fn to_sql(&self) -> (String, Vec<String>) {
        let (mut sql, params) = self.filter_sql();
        sql.push_str(" ORDER BY timestamp ASC, id ASC");

        match (self.limit, self.offset) {
            (Some(limit), offset) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (None, 0) => {}
            (None, offset) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        }

        (sql, params)
    }
}

/// Fixed-width RFC 3339 with nanoseconds, so text order equals time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp(raw.to_string()))
}

/// Which end of a range a user-supplied bound describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Lower bound: a bare date means midnight.
    Start,
    /// Upper bound: a bare date means the last instant of that day.
    End,
}

/// Parse a `YYYY-MM-DD` or RFC 3339 time bound.
pub fn parse_time_bound(raw: &str, bound: Bound) -> Result<DateTime<Utc>, StoreError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| StoreError::InvalidTimeBound(raw.to_string()))?;
    let midnight = date.and_time(NaiveTime::MIN).and_utc();

    Ok(match bound {
        Bound::Start => midnight,
        Bound::End => midnight + TimeDelta::days(1) - TimeDelta::nanoseconds(1),
    })
}
