//! Integration tests for the order book recorder.
//!
//! Most tests drive a full collector run against the scripted mock feed and
//! a real SQLite file. Tests marked `#[ignore]` talk to the live VALR socket.
//! Run them with: cargo test --test integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use orderbook_recorder::config::{CollectorConfig, Config};
use orderbook_recorder::feed::{FeedConnection, MockEvent, MockFeed, WsFeedConnection};
use orderbook_recorder::observer::{ObservedEvent, RecordingObserver};
use orderbook_recorder::store::{SnapshotQuery, SnapshotStore, EXPORT_LEVELS};
use orderbook_recorder::{Collector, StopReason};

const EXCHANGE_BOOK: &str = r#"{"Bids":[{"Price":"100.0","Orders":[{"quantity":"1.0"},{"quantity":"0.5"}]}],"Asks":[{"Price":"101.0","Orders":[{"quantity":"2.0"}]}],"LastChange":42}"#;

/// Wrap a bare book payload as a typed update message.
fn update(book: &str) -> String {
    let mut value: serde_json::Value = serde_json::from_str(book).unwrap();
    value["type"] = serde_json::Value::String("FULL_ORDERBOOK_UPDATE".to_string());
    value.to_string()
}

/// A book nested under `data`, as the exchange sends snapshots.
fn nested_snapshot(levels: usize, seq: i64) -> String {
    let side = |base: i64, step: i64| -> Vec<serde_json::Value> {
        (0..levels as i64)
            .map(|i| {
                serde_json::json!({
                    "Price": (base + step * i).to_string(),
                    "Orders": [{"quantity": "0.1"}, {"quantity": "0.2"}]
                })
            })
            .collect()
    };
    serde_json::json!({
        "type": "FULL_ORDERBOOK_SNAPSHOT",
        "currencyPairSymbol": "BTCZAR",
        "data": {"Bids": side(1000, -1), "Asks": side(1001, 1), "LastChange": seq}
    })
    .to_string()
}

fn collector_config(depth: usize, secs: u64) -> CollectorConfig {
    CollectorConfig::new("BTC-ZAR", depth, Duration::from_secs(secs))
}

#[tokio::test(start_paused = true)]
async fn records_exact_book_from_exchange_message() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("btc_zar_orderbook.db");

    let feed = MockFeed::new().with_messages([
        r#"{"type":"SUBSCRIBED","message":"FULL_ORDERBOOK_UPDATE"}"#.to_string(),
        update(EXCHANGE_BOOK),
    ]);
    let observer = Arc::new(RecordingObserver::new());
    let store = SnapshotStore::open(&path).unwrap();

    let summary = Collector::new(collector_config(10, 30), feed, store, observer.clone())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(summary.snapshots, 1);
    assert!(observer.events().contains(&ObservedEvent::SubscriptionAck));

    let store = SnapshotStore::open(&path).unwrap();
    let rows = store.query(&SnapshotQuery::all()).unwrap();
    assert_eq!(rows.len(), 1);

    let snap = &rows[0].snapshot;
    assert_eq!(snap.trading_pair, "BTC-ZAR");
    assert_eq!(snap.sequence_number, Some(42));
    assert_eq!(
        snap.bids.iter().map(|l| (l.price, l.quantity)).collect::<Vec<_>>(),
        vec![(dec!(100.0), dec!(1.5))]
    );
    assert_eq!(
        snap.asks.iter().map(|l| (l.price, l.quantity)).collect::<Vec<_>>(),
        vec![(dec!(101.0), dec!(2.0))]
    );
    assert_eq!(snap.spread, Some(dec!(1.0)));
    assert_eq!(snap.mid_price, Some(dec!(100.5)));
    assert_eq!(snap.bid_depth, dec!(150.0));
    assert_eq!(snap.ask_depth, dec!(202.0));

    // Readable again by exact timestamp.
    let ts = snap.timestamp;
    let exact = store
        .query(&SnapshotQuery::all().pair("BTC-ZAR").between(Some(ts), Some(ts)))
        .unwrap();
    assert_eq!(exact, rows);
}

#[tokio::test(start_paused = true)]
async fn one_sided_books_never_grow_the_store() {
    let empty_bids = update(r#"{"Bids":[],"Asks":[{"Price":"101.0","Orders":[{"quantity":"2.0"}]}]}"#);
    let feed = MockFeed::new().with_messages([empty_bids.clone(), empty_bids]);
    let observer = Arc::new(RecordingObserver::new());
    let store = SnapshotStore::open_in_memory().unwrap();

    let summary = Collector::new(collector_config(10, 10), feed, store, observer)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.snapshots, 0);
}

#[tokio::test(start_paused = true)]
async fn depth_bound_holds_and_export_matches_query() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("btc_zar_orderbook.db");

    let feed = MockFeed::new().with_messages((1..=3).map(|seq| nested_snapshot(25, seq)));
    let store = SnapshotStore::open(&path).unwrap();
    Collector::new(collector_config(5, 30), feed, store, Arc::new(RecordingObserver::new()))
        .unwrap()
        .run()
        .await
        .unwrap();

    let store = SnapshotStore::open(&path).unwrap();
    let rows = store.query(&SnapshotQuery::all()).unwrap();
    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert_eq!(row.snapshot.bids.len(), 5);
        assert_eq!(row.snapshot.asks.len(), 5);
        assert_eq!(row.snapshot.bids[0].quantity, dec!(0.3));
        assert_eq!(row.snapshot.spread, Some(dec!(1)));
    }

    let csv = dir.path().join("export.csv");
    let written = store.export_csv(&csv, None, None, true).unwrap();
    assert_eq!(written, rows.len());

    let text = std::fs::read_to_string(&csv).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), rows.len() + 1);
    for (line, row) in lines[1..].iter().zip(&rows) {
        let cells: Vec<&str> = line.split(',').collect();
        assert_eq!(cells[3], row.snapshot.sequence_number.unwrap().to_string());
        // Levels 6..=10 were never recorded at depth 5: blank, not invented.
        for i in 0..EXPORT_LEVELS {
            let price = cells[8 + 2 * i];
            if i < 5 {
                assert_eq!(price, row.snapshot.bids[i].price.to_string());
            } else {
                assert_eq!(price, "");
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn reconnect_cycles_are_five_seconds_apart() {
    let feed = MockFeed::new()
        .with_connect_failures(2)
        .with_messages([update(EXCHANGE_BOOK)]);
    let log = feed.log();
    let observer = Arc::new(RecordingObserver::new());
    let store = SnapshotStore::open_in_memory().unwrap();

    let summary = Collector::new(collector_config(10, 120), feed, store, observer.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    let attempts = log.lock().unwrap().connect_attempts.clone();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[1] - attempts[0], Duration::from_secs(5));
    assert_eq!(attempts[2] - attempts[1], Duration::from_secs(5));

    // Both errors precede the successful connect; nothing after it.
    let events = observer.events();
    let connected_at = events
        .iter()
        .position(|e| matches!(e, ObservedEvent::Connected { .. }))
        .unwrap();
    assert_eq!(observer.error_count(), 2);
    assert!(events[connected_at..]
        .iter()
        .all(|e| !matches!(e, ObservedEvent::Error { .. })));
    assert_eq!(summary.snapshots, 1);
    assert_eq!(summary.stop_reason, StopReason::Deadline);
}

#[tokio::test(start_paused = true)]
async fn stopping_finalizes_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("btc_zar_orderbook.db");

    let feed = MockFeed::new().with_session(vec![
        MockEvent::Message(update(EXCHANGE_BOOK)),
        MockEvent::Message(update(EXCHANGE_BOOK)),
    ]);
    let collector = Collector::new(
        collector_config(10, 90 * 86_400),
        feed,
        SnapshotStore::open(&path).unwrap(),
        Arc::new(RecordingObserver::new()),
    )
    .unwrap();
    let stop = collector.stop_handle();

    let task = tokio::spawn(collector.run());
    tokio::time::sleep(Duration::from_secs(3)).await;
    stop.stop();
    let summary = task.await.unwrap().unwrap();

    let store = SnapshotStore::open(&path).unwrap();
    let sessions = store.sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, summary.session_id);
    assert_eq!(sessions[0].total_snapshots, 2);
    assert!(sessions[0].is_closed());
    assert_eq!(store.count(Some("BTC-ZAR")).unwrap(), 2);
}

#[tokio::test]
async fn supervisor_stops_all_pairs_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        // Nothing listens here; every cycle fails fast and waits.
        valr_ws_url: "ws://127.0.0.1:9".to_string(),
        ..Config::default()
    };
    let pairs = vec!["BTC-ZAR".to_string(), "ETH-ZAR".to_string()];
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stopper.cancel();
    });

    let started = Utc::now();
    let outcomes = orderbook_recorder::supervisor::run_all(&config, &pairs, cancel).await;
    assert!(Utc::now() - started < TimeDelta::seconds(10));

    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        let summary = outcome.result.as_ref().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Stopped);
        assert!(config.db_path(&outcome.trading_pair).exists());
    }
}

/// Subscribe to the live feed and wait for one book message.
#[tokio::test]
#[ignore = "requires network access"]
async fn test_live_subscription() {
    let mut feed = WsFeedConnection::new(Config::default().valr_ws_url);
    feed.connect().await.expect("connect");
    feed.subscribe(&["BTC-ZAR".to_string()]).await.expect("subscribe");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let mut saw_book = false;
    while tokio::time::Instant::now() < deadline {
        let next = tokio::time::timeout_at(deadline, feed.next_message()).await;
        let Ok(Ok(Some(text))) = next else { break };
        if text.contains("FULL_ORDERBOOK") {
            saw_book = true;
            break;
        }
    }
    feed.close().await;

    assert!(saw_book, "no order book message within 30s");
}

/// Record the live feed for a few seconds.
#[tokio::test]
#[ignore = "requires network access"]
async fn test_live_recording() {
    let store = SnapshotStore::open_in_memory().unwrap();
    let feed = WsFeedConnection::new(Config::default().valr_ws_url);
    let summary = Collector::new(
        collector_config(10, 15),
        feed,
        store,
        Arc::new(RecordingObserver::new()),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    println!("Recorded {} snapshots in {:?}", summary.snapshots, summary.elapsed);
    assert!(summary.snapshots > 0);
}
