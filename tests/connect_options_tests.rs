//! ConnectOptions and Deadlines: builder behavior and their effect on a
//! live connection.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{MockBroker, WAIT, connect_headers, connected_as, connected_frame, h, message};
use osmium_stomp::{ConnError, ConnectOptions, Connection, Deadlines, Direction};
use tokio::time::timeout;

type Seen = Arc<Mutex<Vec<(String, Direction)>>>;

fn recording_deadlines(read: Option<Duration>, write: Option<Duration>) -> (Deadlines, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut deadlines = Deadlines::new().on_expiry(move |err, direction| {
        sink.lock().unwrap().push((err.to_string(), direction));
    });
    if let Some(d) = read {
        deadlines = deadlines.read(d);
    }
    if let Some(d) = write {
        deadlines = deadlines.write(d);
    }
    (deadlines, seen)
}

// ============================================================================
// Builders
// ============================================================================

#[test]
fn connect_options_default() {
    let opts = ConnectOptions::default();
    assert_eq!(opts.outbound_capacity, 32);
    assert_eq!(opts.connection_capacity, 32);
    assert_eq!(opts.subscription_capacity, 64);
    assert!(opts.deadlines.read.is_none());
    assert!(opts.deadlines.write.is_none());
    assert!(opts.disconnect_receipt_wait.is_none());
    assert_eq!(opts.drain_window, Duration::from_millis(250));
    assert_eq!(opts.drain_threshold, 0);
    assert!(opts.stomp_verb);
    assert!(!opts.trim_leading_nul);
}

#[test]
fn capacities_never_drop_to_zero() {
    let opts = ConnectOptions::new()
        .outbound_capacity(0)
        .connection_capacity(0)
        .subscription_capacity(0);
    assert_eq!(opts.outbound_capacity, 1);
    assert_eq!(opts.connection_capacity, 1);
    assert_eq!(opts.subscription_capacity, 1);
}

#[test]
fn builder_chain() {
    let opts = ConnectOptions::new()
        .deadlines(Deadlines::new().read(Duration::from_secs(1)))
        .disconnect_receipt_wait(Duration::from_secs(2))
        .drain_window(Duration::from_millis(10))
        .drain_threshold(3)
        .connect_verb()
        .trim_leading_nul(true);
    assert_eq!(opts.deadlines.read, Some(Duration::from_secs(1)));
    assert_eq!(opts.disconnect_receipt_wait, Some(Duration::from_secs(2)));
    assert_eq!(opts.drain_window, Duration::from_millis(10));
    assert_eq!(opts.drain_threshold, 3);
    assert!(!opts.stomp_verb);
    assert!(opts.trim_leading_nul);
}

#[test]
fn deadlines_debug_hides_callback() {
    let (deadlines, _) = recording_deadlines(Some(Duration::from_millis(5)), None);
    let debug = format!("{:?}", deadlines);
    assert!(debug.contains("on_expiry: true"));
}

#[tokio::test]
async fn zero_capacities_in_a_literal_still_work() {
    let options = ConnectOptions {
        outbound_capacity: 0,
        connection_capacity: 0,
        subscription_capacity: 0,
        ..ConnectOptions::default()
    };
    let (conn, mut broker) = connected_as("1.2", options).await;
    let mut sub = conn
        .subscribe(h(&["destination", "/queue/test", "id", "s1"]))
        .await
        .expect("subscribe");
    broker.recv().await;

    broker.send(message("s1", "m1", "hi")).await;
    let md = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(md.message.body, b"hi");
}

// ============================================================================
// Deadlines on a live connection
// ============================================================================

#[tokio::test]
async fn read_deadline_notifies_and_keeps_the_session() {
    let (deadlines, seen) = recording_deadlines(Some(Duration::from_millis(100)), None);
    let (conn, mut broker) =
        connected_as("1.2", ConnectOptions::default().deadlines(deadlines)).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    {
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty(), "callback fired");
        assert!(seen.iter().all(|(_, d)| *d == Direction::Read));
        assert!(seen[0].0.contains("read deadline"));
    }
    assert!(conn.is_connected());

    broker
        .send(osmium_stomp::Frame::new("RECEIPT").header("receipt-id", "r1"))
        .await;
    let md = timeout(WAIT, conn.next_message()).await.unwrap().unwrap();
    assert_eq!(md.message.command, "RECEIPT");
}

#[tokio::test]
async fn write_deadline_reports_to_caller_and_callback() {
    let (deadlines, seen) = recording_deadlines(None, Some(Duration::from_millis(50)));
    let (client, server) = tokio::io::duplex(256);
    let mut broker = MockBroker::new(server);
    let connecting = tokio::spawn(Connection::connect_with_options(
        client,
        connect_headers("0,0"),
        ConnectOptions::default().deadlines(deadlines),
    ));
    broker.recv().await;
    broker.send(connected_frame("1.2")).await;
    let conn = connecting.await.unwrap().expect("connect");

    // the broker stops reading, so a large body fills the pipe
    let body = vec![b'x'; 8 * 1024];
    let err = timeout(WAIT, conn.send_bytes(h(&["destination", "/queue/big"]), &body))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ConnError::WriteDeadline));
    assert!(!err.is_fatal());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, Direction::Write);
}
