//! End-to-end behaviour of a monitor on the in-process bus

use std::sync::Arc;
use std::time::Duration;

use canscope::types::{Frame, FrameFormat};
use canscope::{
    CanScope, Command, LinkState, LogEvent, MonitorChannels, MonitorConfig, TableView, TxForm, UpdateRate,
};
use futures::StreamExt;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        log_interval_ms: 20,
        stats_interval_ms: 100,
        blink_interval_ms: 50,
        table_refresh_ms: 10,
        reconnect: canscope::config::ReconnectPolicy {
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            max_attempts: None,
        },
        ..MonitorConfig::default()
    }
}

fn std_frame(id: u32, payload: &[u8]) -> Frame {
    Frame::data(FrameFormat::Standard, id, payload).unwrap()
}

async fn wait_for_table(channels: &mut MonitorChannels, rows: usize) -> Arc<TableView> {
    timeout(WAIT, async {
        loop {
            let view = channels.table.borrow_and_update().clone();
            if view.len() == rows {
                return view;
            }
            channels.table.changed().await.expect("ingest task alive");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("table never reached {rows} rows"))
}

async fn collect_log(channels: &mut MonitorChannels, needle: &str) -> String {
    let mut text = String::new();
    timeout(WAIT, async {
        while !text.contains(needle) {
            match channels.log.recv().await {
                Some(LogEvent::Chunk(chunk)) => text.push_str(&chunk),
                Some(LogEvent::Cleared) => text.clear(),
                None => break,
            }
        }
    })
    .await
    .expect("log line should arrive");
    text
}

#[tokio::test]
async fn filter_table_and_counters() {
    let (monitor, mut channels, peer) = CanScope::loopback(&fast_config()).unwrap();
    monitor
        .execute(Command::SetFilter { start: "100".into(), end: "1FF".into(), enabled: true })
        .await
        .unwrap();
    // Let the ingest task see the new filter before traffic starts
    tokio::time::sleep(Duration::from_millis(50)).await;

    peer.inject(std_frame(0x050, &[1]));
    peer.inject(std_frame(0x150, b"AB"));
    peer.inject(Frame::error(0x20));
    peer.inject(std_frame(0x120, &[]));

    let view = wait_for_table(&mut channels, 2).await;
    let lines: Vec<&str> = view.lines().collect();
    assert!(lines[0].starts_with("120 "));
    assert!(lines[1].starts_with("150 "));
    assert!(lines[1].ends_with("|AB      |"));

    let log = collect_log(&mut channels, "120 ").await;
    assert!(log.contains("150      [2]  41 42"));
    assert!(!log.contains("050"));

    // Only frames that pass the filter count as received traffic
    assert_eq!(monitor.counters().rx_total(), 2);
}

#[tokio::test]
async fn clear_resets_table_log_and_statistics() {
    let (monitor, mut channels, peer) = CanScope::loopback(&fast_config()).unwrap();
    peer.inject(std_frame(0x7FF, &[0xFF]));
    wait_for_table(&mut channels, 1).await;

    monitor.execute(Command::Clear).await.unwrap();
    wait_for_table(&mut channels, 0).await;

    let cleared = timeout(WAIT, async {
        loop {
            if let Some(LogEvent::Cleared) = channels.log.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(cleared.is_ok());

    let mut stats = channels.stat_updates();
    let snapshot = timeout(WAIT, stats.next()).await.unwrap().unwrap();
    assert_eq!(snapshot.rx.total, 0);
}

#[tokio::test]
async fn periodic_transmit_until_stopped() {
    let (monitor, mut channels, peer) = CanScope::loopback(&fast_config()).unwrap();
    let mut form = TxForm { id: "1ABCDEF".into(), format: FrameFormat::Extended, length: "1".into(), ..TxForm::default() };
    form.data[0] = "5A".into();
    monitor.execute(Command::EditForm(form)).await.unwrap();
    monitor.execute(Command::StartPeriodic { period: Duration::from_millis(20) }).await.unwrap();

    let first = timeout(WAIT, peer.next_sent()).await.unwrap().unwrap();
    assert_eq!(first.id(), 0x1AB_CDEF);
    assert_eq!(first.payload(), &[0x5A]);

    timeout(WAIT, channels.tx_active.wait_for(|active| *active)).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    monitor.execute(Command::Stop).await.unwrap();
    timeout(WAIT, async {
        while monitor.active_jobs() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    peer.drain_sent().await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(peer.drain_sent().await.is_empty());
    assert!(monitor.counters().tx_total() >= 3);
}

#[tokio::test]
async fn receive_failure_reconnects() {
    let (_monitor, mut channels, peer) = CanScope::loopback(&fast_config()).unwrap();
    peer.refuse_reopens(1);
    peer.inject_failure("controller restarted");
    peer.inject(std_frame(0x321, &[3, 2, 1]));

    wait_for_table(&mut channels, 1).await;
    assert_eq!(*channels.link.borrow(), LinkState::Connected);
    assert_eq!(peer.reopen_count(), 2);
}

#[tokio::test]
async fn throttled_table_updates_still_deliver_latest() {
    let (_monitor, channels, peer) = CanScope::loopback(&fast_config()).unwrap();
    let mut updates = channels.table_updates(UpdateRate::Max(5));

    for id in 0..20 {
        peer.inject(std_frame(id, &[]));
    }

    let latest = timeout(WAIT, async {
        while let Some(view) = updates.next().await {
            if view.len() == 20 {
                return view;
            }
        }
        panic!("table stream ended");
    })
    .await
    .unwrap();
    assert_eq!(latest.lines().next().map(|line| &line[..3]), Some("000"));
}
