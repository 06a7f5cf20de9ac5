mod common;

use common::{
    connack, contains, publish_packet, MemLog, OneShotAcceptor, TestClock, TestDelay, Wire,
    WireConnector,
};
use piconode::node::{Error, Node, NodeConfig};
use piconode::telemetry::Reading;

fn config() -> NodeConfig<'static> {
    NodeConfig {
        broker_addr: "192.168.1.10:1883",
        client_id: "pico_w_client",
        ..NodeConfig::default()
    }
}

/// Boot a node against a scripted broker that immediately accepts the
/// session and answers the timestamp request.
fn booted_node(
    wire: &Wire,
    clock: &TestClock,
) -> Node<'static, common::ScriptConnection, MemLog> {
    wire.feed(&connack(0));
    wire.feed(&publish_packet("pc/timestamp/reply", b"1700000000000"));
    let mut connector = WireConnector::new(wire);
    let mut delay = TestDelay::new(clock);
    Node::start(&mut connector, MemLog::new(), config(), clock, &mut delay).unwrap()
}

#[test]
fn boot_subscribes_and_requests_timestamp() {
    let wire = Wire::new();
    let clock = TestClock::new();
    let node = booted_node(&wire, &clock);

    assert!(node.is_time_synced());
    assert_eq!(node.now(&clock), 1_700_000_000_000);

    let written = wire.written();
    assert!(contains(&written, b"pc/timestamp/request"));
    assert!(contains(&written, b"request"));
    assert!(contains(&written, b"pico1/sensor/data"));
    assert!(contains(&written, b"pico1/safety_level"));
}

#[test]
fn boot_rejects_malformed_broker_address() {
    let wire = Wire::new();
    let clock = TestClock::new();
    let mut connector = WireConnector::new(&wire);
    let mut delay = TestDelay::new(&clock);

    let config = NodeConfig {
        broker_addr: "not-an-address",
        ..config()
    };
    let result = Node::start(&mut connector, MemLog::new(), config, &clock, &mut delay);
    assert!(matches!(
        result,
        Err(Error::Network(
            piconode::network::error::Error::InvalidAddress
        ))
    ));
}

#[test]
fn boot_retries_failed_connection_attempts() {
    let wire = Wire::new();
    let clock = TestClock::new();
    wire.feed(&connack(0));
    wire.feed(&publish_packet("pc/timestamp/reply", b"1700000000000"));
    let mut connector = WireConnector::new(&wire);
    connector.fail_attempts = 2;
    let mut delay = TestDelay::new(&clock);

    let node = Node::start(&mut connector, MemLog::new(), config(), &clock, &mut delay).unwrap();
    assert!(node.is_time_synced());
}

#[test]
fn boot_survives_a_missing_timestamp_reply() {
    let wire = Wire::new();
    let clock = TestClock::new();
    wire.feed(&connack(0));
    let mut connector = WireConnector::new(&wire);
    let mut delay = TestDelay::new(&clock);

    let config = NodeConfig {
        sync_timeout_ms: 500,
        ..config()
    };
    let node = Node::start(&mut connector, MemLog::new(), config, &clock, &mut delay).unwrap();
    assert!(!node.is_time_synced());
    assert_eq!(node.now(&clock), 0);
}

#[test]
fn routed_sensor_message_lands_in_the_log() {
    let wire = Wire::new();
    let clock = TestClock::new();
    let mut node = booted_node(&wire, &clock);
    let mut acceptor = OneShotAcceptor::default();
    let mut delay = TestDelay::new(&clock);

    clock.advance(500);
    wire.feed(&publish_packet("pico1/sensor/data", b"412"));
    node.poll_once(&mut acceptor, &clock, &mut delay).unwrap();

    let mut buf = [0u8; 512];
    let n = node.log_mut().tail(20, &mut buf).unwrap();
    assert!(contains(
        &buf[..n],
        b"1700000000500,pico1/sensor/data,412\n"
    ));
}

#[test]
fn safety_level_messages_are_recorded_too() {
    let wire = Wire::new();
    let clock = TestClock::new();
    let mut node = booted_node(&wire, &clock);
    let mut acceptor = OneShotAcceptor::default();
    let mut delay = TestDelay::new(&clock);

    wire.feed(&publish_packet("pico1/safety_level", b"warning"));
    node.poll_once(&mut acceptor, &clock, &mut delay).unwrap();

    let mut buf = [0u8; 512];
    let n = node.log_mut().tail(20, &mut buf).unwrap();
    assert!(contains(&buf[..n], b",pico1/safety_level,warning\n"));
}

#[test]
fn unknown_topics_are_dropped() {
    let wire = Wire::new();
    let clock = TestClock::new();
    let mut node = booted_node(&wire, &clock);
    let mut acceptor = OneShotAcceptor::default();
    let mut delay = TestDelay::new(&clock);

    wire.feed(&publish_packet("other/node", b"999"));
    node.poll_once(&mut acceptor, &clock, &mut delay).unwrap();

    let mut buf = [0u8; 512];
    let n = node.log_mut().tail(20, &mut buf).unwrap();
    assert!(!contains(&buf[..n], b"999"));
}

#[test]
fn poll_once_serves_a_pending_http_client() {
    let broker = Wire::new();
    let clock = TestClock::new();
    let mut node = booted_node(&broker, &clock);
    let mut delay = TestDelay::new(&clock);
    let mut acceptor = OneShotAcceptor::default();

    broker.feed(&publish_packet("pico1/sensor/data", b"412"));
    node.poll_once(&mut acceptor, &clock, &mut delay).unwrap();

    let client = Wire::new();
    client.feed(b"GET /data HTTP/1.1\r\n\r\n");
    acceptor.pending = Some(client.connection());
    node.poll_once(&mut acceptor, &clock, &mut delay).unwrap();

    let served = client.written();
    assert!(served.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(contains(&served, b",pico1/sensor/data,412\n"));
    assert!(client.is_closed());
}

#[test]
fn publish_reading_sends_json_on_the_sensor_topic() {
    let wire = Wire::new();
    let clock = TestClock::new();
    let mut node = booted_node(&wire, &clock);
    wire.clear_written();

    let reading = Reading {
        label: "mq135",
        ppm: 412,
        raw: 1023,
    };
    node.publish_reading(&reading).unwrap();

    let written = wire.written();
    assert!(contains(&written, b"pico1/sensor/data"));
    assert!(contains(&written, br#"{"label":"mq135","ppm":412,"raw":1023}"#));
}

#[test]
fn shutdown_disconnects_cleanly() {
    let wire = Wire::new();
    let clock = TestClock::new();
    let node = booted_node(&wire, &clock);

    node.shutdown().unwrap();
    assert!(wire.is_closed());
}
