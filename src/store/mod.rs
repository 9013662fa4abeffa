//! Append-only SQLite snapshot store.
//!
//! One store file per trading pair. The store is owned by a single
//! collector; it is never shared, so the connection is held directly
//! rather than behind a lock.
//!
//! Decimals (ladders, depths, spread, mid price) are stored as text so a
//! snapshot reads back exactly as it was written. Timestamps are fixed-width
//! RFC 3339 strings, which makes text ordering equal time ordering.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::info;

use crate::error::StoreError;
use crate::orderbook::{Ladder, PriceLevel, RecordingSession, Snapshot, StoredSnapshot};

pub mod export;
pub mod query;

pub use export::EXPORT_LEVELS;
pub use query::{format_timestamp, parse_time_bound, parse_timestamp, Bound, SnapshotQuery};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS orderbook_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    trading_pair TEXT NOT NULL,
    sequence_number INTEGER,
    bids TEXT NOT NULL,
    asks TEXT NOT NULL,
    bid_depth TEXT NOT NULL,
    ask_depth TEXT NOT NULL,
    spread TEXT,
    mid_price TEXT
);

CREATE INDEX IF NOT EXISTS idx_timestamp
    ON orderbook_snapshots(timestamp);

CREATE INDEX IF NOT EXISTS idx_trading_pair
    ON orderbook_snapshots(trading_pair);

CREATE TABLE IF NOT EXISTS recording_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_time TEXT NOT NULL,
    end_time TEXT,
    trading_pair TEXT NOT NULL,
    depth_levels INTEGER NOT NULL,
    total_snapshots INTEGER NOT NULL DEFAULT 0
);
"#;

const SNAPSHOT_COLUMNS: &str = "id, timestamp, trading_pair, sequence_number, bids, asks, \
     bid_depth, ask_depth, spread, mid_price";

/// Durable snapshot log plus recording-session ledger.
pub struct SnapshotStore {
    conn: Connection,
    /// Backing file; `None` for in-memory stores.
    path: Option<PathBuf>,
}

impl SnapshotStore {
    /// Open or create a store file, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "Snapshot store opened");

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path: None })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a snapshot and return its row identity.
    pub fn insert(&self, snapshot: &Snapshot) -> Result<i64, StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO orderbook_snapshots (
                timestamp, trading_pair, sequence_number, bids, asks,
                bid_depth, ask_depth, spread, mid_price
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                format_timestamp(&snapshot.timestamp),
                snapshot.trading_pair,
                snapshot.sequence_number,
                ladder_to_json(&snapshot.bids)?,
                ladder_to_json(&snapshot.asks)?,
                snapshot.bid_depth.to_string(),
                snapshot.ask_depth.to_string(),
                snapshot.spread.map(|d| d.to_string()),
                snapshot.mid_price.map(|d| d.to_string()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Open a recording session starting now.
    pub fn start_session(&self, trading_pair: &str, depth_levels: usize) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO recording_sessions (start_time, trading_pair, depth_levels) VALUES (?1, ?2, ?3)",
            params![format_timestamp(&Utc::now()), trading_pair, depth_levels as i64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Close a session: stamp its end time and final snapshot count.
    ///
    /// Callers invoke this once per session; the store does not enforce it.
    pub fn end_session(&self, session_id: i64, total_snapshots: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE recording_sessions SET end_time = ?1, total_snapshots = ?2 WHERE id = ?3",
            params![format_timestamp(&Utc::now()), total_snapshots as i64, session_id],
        )?;
        Ok(())
    }

    /// Look up one session.
    pub fn session(&self, session_id: i64) -> Result<Option<RecordingSession>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, start_time, end_time, trading_pair, depth_levels, total_snapshots \
                 FROM recording_sessions WHERE id = ?1",
                params![session_id],
                SessionRow::from_row,
            )
            .optional()?;
        raw.map(SessionRow::into_session).transpose()
    }

    /// All sessions, oldest first.
    pub fn sessions(&self) -> Result<Vec<RecordingSession>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, start_time, end_time, trading_pair, depth_levels, total_snapshots \
             FROM recording_sessions ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], SessionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Number of stored snapshots, optionally for one pair.
    pub fn count(&self, trading_pair: Option<&str>) -> Result<u64, StoreError> {
        let count: i64 = match trading_pair {
            Some(pair) => self.conn.query_row(
                "SELECT COUNT(*) FROM orderbook_snapshots WHERE trading_pair = ?1",
                params![pair],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM orderbook_snapshots", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    /// Bytes used on disk by the database and its WAL sidecar.
    pub fn size_on_disk(&self) -> Result<u64, StoreError> {
        let Some(path) = &self.path else {
            return Ok(0);
        };

        let mut wal = path.clone().into_os_string();
        wal.push("-wal");

        let mut total = 0;
        for file in [path.clone(), PathBuf::from(wal)] {
            match fs::metadata(&file) {
                Ok(meta) => total += meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    /// [`size_on_disk`](Self::size_on_disk) in mebibytes.
    pub fn size_on_disk_mb(&self) -> Result<f64, StoreError> {
        Ok(self.size_on_disk()? as f64 / (1024.0 * 1024.0))
    }

    /// First and last snapshot timestamps, optionally for one pair.
    pub fn time_coverage(
        &self,
        trading_pair: Option<&str>,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, StoreError> {
        let query = SnapshotQuery {
            trading_pair: trading_pair.map(str::to_string),
            ..SnapshotQuery::default()
        };
        let (filter, args) = query.filter_sql();
        let sql = format!("SELECT MIN(timestamp), MAX(timestamp) FROM orderbook_snapshots{filter}");

        let (first, last): (Option<String>, Option<String>) = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        match (first, last) {
            (Some(first), Some(last)) => Ok(Some((parse_timestamp(&first)?, parse_timestamp(&last)?))),
            _ => Ok(None),
        }
    }

    /// Snapshots matching `query`, ordered by timestamp ascending.
    pub fn query(&self, query: &SnapshotQuery) -> Result<Vec<StoredSnapshot>, StoreError> {
        let mut out = Vec::new();
        self.for_each(query, |snapshot| {
            out.push(snapshot);
            Ok(())
        })?;
        Ok(out)
    }

    /// Stream matching snapshots to `f` without collecting them.
    pub(crate) fn for_each<F>(&self, query: &SnapshotQuery, mut f: F) -> Result<usize, StoreError>
    where
        F: FnMut(StoredSnapshot) -> Result<(), StoreError>,
    {
        let (tail, args) = query.to_sql();
        let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM orderbook_snapshots{tail}");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), SnapshotRow::from_row)?;

        let mut visited = 0;
        for row in rows {
            f(row?.into_snapshot()?)?;
            visited += 1;
        }
        Ok(visited)
    }
}

/// Raw column values of one snapshot row.
struct SnapshotRow {
    id: i64,
    timestamp: String,
    trading_pair: String,
    sequence_number: Option<i64>,
    bids: String,
    asks: String,
    bid_depth: String,
    ask_depth: String,
    spread: Option<String>,
    mid_price: Option<String>,
}

impl SnapshotRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            trading_pair: row.get(2)?,
            sequence_number: row.get(3)?,
            bids: row.get(4)?,
            asks: row.get(5)?,
            bid_depth: row.get(6)?,
            ask_depth: row.get(7)?,
            spread: row.get(8)?,
            mid_price: row.get(9)?,
        })
    }

    fn into_snapshot(self) -> Result<StoredSnapshot, StoreError> {
        Ok(StoredSnapshot {
            id: self.id,
            snapshot: Snapshot {
                timestamp: parse_timestamp(&self.timestamp)?,
                trading_pair: self.trading_pair,
                sequence_number: self.sequence_number,
                bids: ladder_from_json(&self.bids)?,
                asks: ladder_from_json(&self.asks)?,
                bid_depth: parse_decimal_column("bid_depth", &self.bid_depth)?,
                ask_depth: parse_decimal_column("ask_depth", &self.ask_depth)?,
                spread: self
                    .spread
                    .map(|s| parse_decimal_column("spread", &s))
                    .transpose()?,
                mid_price: self
                    .mid_price
                    .map(|s| parse_decimal_column("mid_price", &s))
                    .transpose()?,
            },
        })
    }
}

/// Raw column values of one session row.
struct SessionRow {
    id: i64,
    start_time: String,
    end_time: Option<String>,
    trading_pair: String,
    depth_levels: i64,
    total_snapshots: i64,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            trading_pair: row.get(3)?,
            depth_levels: row.get(4)?,
            total_snapshots: row.get(5)?,
        })
    }

    fn into_session(self) -> Result<RecordingSession, StoreError> {
        Ok(RecordingSession {
            id: self.id,
            start_time: parse_timestamp(&self.start_time)?,
            end_time: self.end_time.as_deref().map(parse_timestamp).transpose()?,
            trading_pair: self.trading_pair,
            depth_levels: self.depth_levels.max(0) as usize,
            total_snapshots: self.total_snapshots.max(0) as u64,
        })
    }
}

/// Ladders are stored as `[["price","qty"], ...]`.
pub(crate) fn ladder_to_json(ladder: &[PriceLevel]) -> Result<String, StoreError> {
    let pairs: Vec<(Decimal, Decimal)> = ladder.iter().map(|l| (l.price, l.quantity)).collect();
    Ok(serde_json::to_string(&pairs)?)
}

pub(crate) fn ladder_from_json(raw: &str) -> Result<Ladder, StoreError> {
    let pairs: Vec<(Decimal, Decimal)> = serde_json::from_str(raw)?;
    Ok(pairs
        .into_iter()
        .map(|(price, quantity)| PriceLevel::new(price, quantity))
        .collect())
}

fn parse_decimal_column(column: &'static str, raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|_| StoreError::InvalidDecimal {
        column,
        value: raw.to_string(),
    })
}
