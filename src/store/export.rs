//! CSV export of stored snapshots.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use super::{ladder_to_json, SnapshotQuery, SnapshotStore};
use crate::error::StoreError;
use crate::orderbook::{PriceLevel, StoredSnapshot};

/// Levels per side in a flattened export, independent of recording depth.
pub const EXPORT_LEVELS: usize = 10;

impl SnapshotStore {
    /// Write every snapshot in `[start, end]` to a CSV file.
    ///
    /// With `flatten`, each ladder is spread over [`EXPORT_LEVELS`] pairs of
    /// price/quantity columns and missing levels are left blank. Otherwise
    /// each ladder is one JSON column. Returns the number of rows written.
    pub fn export_csv(
        &self,
        path: impl AsRef<Path>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        flatten: bool,
    ) -> Result<usize, StoreError> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);

        let header = if flatten { flat_header() } else { raw_header() };
        writeln!(writer, "{}", header.join(","))?;

        let query = SnapshotQuery::all().between(start, end);
        let rows = self.for_each(&query, |row| {
            let cells = if flatten { flat_row(&row) } else { raw_row(&row)? };
            writeln!(writer, "{}", cells.join(","))?;
            Ok(())
        })?;

        writer.flush()?;
        info!(path = %path.display(), rows, flatten, "Exported snapshots to CSV");
        Ok(rows)
    }
}

fn flat_header() -> Vec<String> {
    let mut header: Vec<String> = [
        "id",
        "timestamp",
        "trading_pair",
        "sequence_number",
        "spread",
        "mid_price",
        "bid_depth",
        "ask_depth",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for i in 1..=EXPORT_LEVELS {
        header.push(format!("bid{i}_price"));
        header.push(format!("bid{i}_qty"));
    }
    for i in 1..=EXPORT_LEVELS {
        header.push(format!("ask{i}_price"));
        header.push(format!("ask{i}_qty"));
    }
    header
}

fn raw_header() -> Vec<String> {
    [
        "id",
        "timestamp",
        "trading_pair",
        "sequence_number",
        "bids",
        "asks",
        "spread",
        "mid_price",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn common_cells(row: &StoredSnapshot) -> Vec<String> {
    let s = &row.snapshot;
    vec![
        row.id.to_string(),
        super::format_timestamp(&s.timestamp),
        csv_field(&s.trading_pair),
        s.sequence_number.map(|n| n.to_string()).unwrap_or_default(),
    ]
}

fn flat_row(row: &StoredSnapshot) -> Vec<String> {
    let s = &row.snapshot;
    let mut cells = common_cells(row);
    cells.push(optional(s.spread));
    cells.push(optional(s.mid_price));
    cells.push(s.bid_depth.to_string());
    cells.push(s.ask_depth.to_string());
    push_levels(&mut cells, &s.bids);
    push_levels(&mut cells, &s.asks);
    cells
}

fn raw_row(row: &StoredSnapshot) -> Result<Vec<String>, StoreError> {
    let s = &row.snapshot;
    let mut cells = common_cells(row);
    cells.push(csv_field(&ladder_to_json(&s.bids)?));
    cells.push(csv_field(&ladder_to_json(&s.asks)?));
    cells.push(optional(s.spread));
    cells.push(optional(s.mid_price));
    Ok(cells)
}

fn push_levels(cells: &mut Vec<String>, ladder: &[PriceLevel]) {
    for i in 0..EXPORT_LEVELS {
        match ladder.get(i) {
            Some(level) => {
                cells.push(level.price.to_string());
                cells.push(level.quantity.to_string());
            }
            None => {
                cells.push(String::new());
                cells.push(String::new());
            }
        }
    }
}

fn optional(value: Option<Decimal>) -> String {
    value.map(|d| d.to_string()).unwrap_or_default()
}

/// Quote a field if it contains a delimiter, quote or newline.
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::Snapshot;
    use chrono::{TimeDelta, TimeZone};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn store_with(levels: usize, count: i64) -> SnapshotStore {
        let store = SnapshotStore::open_in_memory().unwrap();
        let base = Utc.with_ymd_and_hms(2025, 1, 21, 0, 0, 0).unwrap();
        for n in 0..count {
            let bids = (0..levels)
                .map(|i| PriceLevel::new(dec!(100) - Decimal::from(i), dec!(1.5)))
                .collect();
            let asks = (0..levels)
                .map(|i| PriceLevel::new(dec!(101) + Decimal::from(i), dec!(2)))
                .collect();
            let snap = Snapshot::new("BTC-ZAR", base + TimeDelta::seconds(n), Some(n), bids, asks);
            store.insert(&snap).unwrap();
        }
        store
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn flattened_export_matches_query_and_leaves_missing_levels_blank() {
        let store = store_with(3, 4);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let written = store.export_csv(&path, None, None, true).unwrap();
        let queried = store.query(&SnapshotQuery::all()).unwrap();
        assert_eq!(written, queried.len());

        let lines = read_lines(&path);
        assert_eq!(lines.len(), written + 1);

        let header: Vec<&str> = lines[0].split(',').collect();
        assert_eq!(header.len(), 8 + 4 * EXPORT_LEVELS);
        assert_eq!(header[8], "bid1_price");
        assert_eq!(header[8 + 2 * EXPORT_LEVELS], "ask1_price");

        for (line, stored) in lines[1..].iter().zip(&queried) {
            let cells: Vec<&str> = line.split(',').collect();
            assert_eq!(cells.len(), header.len());
            assert_eq!(cells[0], stored.id.to_string());

            for i in 0..EXPORT_LEVELS {
                let bid = (cells[8 + 2 * i], cells[9 + 2 * i]);
                let ask = (cells[8 + 2 * EXPORT_LEVELS + 2 * i], cells[9 + 2 * EXPORT_LEVELS + 2 * i]);
                match stored.snapshot.bids.get(i) {
                    Some(level) => assert_eq!(bid, (level.price.to_string().as_str(), level.quantity.to_string().as_str())),
                    None => assert_eq!(bid, ("", "")),
                }
                match stored.snapshot.asks.get(i) {
                    Some(level) => assert_eq!(ask, (level.price.to_string().as_str(), level.quantity.to_string().as_str())),
                    None => assert_eq!(ask, ("", "")),
                }
            }
        }
    }

    #[test]
    fn flattened_export_caps_at_ten_levels() {
        let store = store_with(12, 1);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.csv");

        store.export_csv(&path, None, None, true).unwrap();
        let lines = read_lines(&path);
        let cells: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(cells.len(), 8 + 4 * EXPORT_LEVELS);
        assert_eq!(cells[8 + 2 * (EXPORT_LEVELS - 1)], "91");
    }

    #[test]
    fn raw_export_quotes_json_ladders() {
        let store = store_with(2, 1);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");

        assert_eq!(store.export_csv(&path, None, None, false).unwrap(), 1);
        let lines = read_lines(&path);
        assert_eq!(
            lines[0],
            "id,timestamp,trading_pair,sequence_number,bids,asks,spread,mid_price"
        );
        assert!(lines[1].contains(r#""[[""100"",""1.5""],[""99"",""1.5""]]""#));

        // Division may widen the scale (100.50), so compare values.
        let tail: Vec<Decimal> = lines[1]
            .rsplitn(3, ',')
            .take(2)
            .map(|cell| cell.parse().unwrap())
            .collect();
        assert_eq!(tail, vec![dec!(100.5), dec!(1)]);
    }

    #[test]
    fn export_respects_time_range() {
        let store = store_with(1, 5);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("range.csv");
        let base = Utc.with_ymd_and_hms(2025, 1, 21, 0, 0, 0).unwrap();

        let rows = store
            .export_csv(&path, Some(base + TimeDelta::seconds(1)), Some(base + TimeDelta::seconds(2)), true)
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[test]
    fn empty_store_writes_header_only() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");

        assert_eq!(store.export_csv(&path, None, None, true).unwrap(), 0);
        assert_eq!(read_lines(&path).len(), 1);
    }

    #[test]
    fn csv_field_escaping() {
        assert_eq!(csv_field("BTC-ZAR"), "BTC-ZAR");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
