mod common;

use common::{contains, MemLog, TestClock, TestDelay, Wire};
use piconode::network::error::Error;
use piconode::network::http::{Config, StatusServer, DASHBOARD_HTML};
use piconode::storage::SensorLog;

fn populated_log() -> SensorLog<MemLog> {
    let mut log = SensorLog::new(MemLog::new());
    log.init().unwrap();
    for i in 0..5u64 {
        log.append(1_700_000_000_000 + i, "pico1/sensor/data", "412")
            .unwrap();
    }
    log
}

#[test]
fn data_route_serves_log_tail_as_plain_text() {
    let wire = Wire::new();
    wire.feed(b"GET /data HTTP/1.1\r\nHost: node\r\n\r\n");
    let mut log = populated_log();
    let clock = TestClock::new();
    let mut delay = TestDelay::new(&clock);

    StatusServer::new(Config::default())
        .handle(wire.connection(), &mut log, &mut delay)
        .unwrap();

    let written = wire.written();
    assert!(written.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(contains(&written, b"Content-Type: text/plain\r\n"));
    assert!(contains(&written, b"Connection: close\r\n"));
    assert!(contains(&written, b"1700000000004,pico1/sensor/data,412\n"));
    assert!(wire.is_closed());
}

#[test]
fn data_route_respects_tail_line_limit() {
    let wire = Wire::new();
    wire.feed(b"GET /data HTTP/1.1\r\n\r\n");
    let mut log = populated_log();
    let clock = TestClock::new();
    let mut delay = TestDelay::new(&clock);

    let config = Config {
        tail_lines: 2,
        ..Config::default()
    };
    StatusServer::new(config)
        .handle(wire.connection(), &mut log, &mut delay)
        .unwrap();

    let written = wire.written();
    assert!(!contains(&written, b"1700000000002,"));
    assert!(contains(&written, b"1700000000003,"));
    assert!(contains(&written, b"1700000000004,"));
}

#[test]
fn default_route_serves_dashboard_html() {
    let wire = Wire::new();
    wire.feed(b"GET / HTTP/1.1\r\n\r\n");
    let mut log = populated_log();
    let clock = TestClock::new();
    let mut delay = TestDelay::new(&clock);

    StatusServer::new(Config::default())
        .handle(wire.connection(), &mut log, &mut delay)
        .unwrap();

    let written = wire.written();
    assert!(written.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(contains(&written, b"Content-Type: text/html\r\n"));
    assert!(contains(&written, DASHBOARD_HTML.as_bytes()));
}

#[test]
fn unknown_route_also_gets_the_dashboard() {
    let wire = Wire::new();
    wire.feed(b"GET /favicon.ico HTTP/1.1\r\n\r\n");
    let mut log = populated_log();
    let clock = TestClock::new();
    let mut delay = TestDelay::new(&clock);

    StatusServer::new(Config::default())
        .handle(wire.connection(), &mut log, &mut delay)
        .unwrap();

    assert!(contains(&wire.written(), b"Content-Type: text/html\r\n"));
}

#[test]
fn storage_failure_reports_error_body_with_200() {
    let wire = Wire::new();
    wire.feed(b"GET /data HTTP/1.1\r\n\r\n");
    let mut log = SensorLog::new(MemLog::new());
    log.store_mut().mounted = false;
    let clock = TestClock::new();
    let mut delay = TestDelay::new(&clock);

    StatusServer::new(Config::default())
        .handle(wire.connection(), &mut log, &mut delay)
        .unwrap();

    let written = wire.written();
    assert!(written.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(contains(&written, b"SD card not mounted\n"));
}

#[test]
fn silent_client_times_out_and_is_closed() {
    let wire = Wire::new();
    let mut log = populated_log();
    let clock = TestClock::new();
    let mut delay = TestDelay::new(&clock);

    let result =
        StatusServer::new(Config::default()).handle(wire.connection(), &mut log, &mut delay);
    assert_eq!(result, Err(Error::Timeout));
    assert!(wire.is_closed());
    assert!(wire.written().is_empty());
}
