//! Node wiring: configuration, the boot sequence and the cooperative poll
//! step.
//!
//! [`Node::start`] runs the one-time boot sequence (validate the broker
//! address, prepare the log, establish the MQTT session, kick off timestamp
//! synchronization, subscribe the data topics) and hands back a node that is
//! then driven by calling [`Node::poll_once`] from the platform's main loop.
//! Everything below this module is a building block; this is the layer that
//! decides which failures are fatal and which are logged and survived.

use crate::network::addr;
use crate::network::error::Error as NetError;
use crate::network::http::{Config as HttpConfig, StatusServer};
use crate::network::mqtt::session::POLL_INTERVAL_MS;
use crate::network::mqtt::{
    MessageHandler, Options, QoS, RouteTable, Router, Session,
};
use crate::network::{Accept, Connect, Connection};
use crate::storage::{LogStore, SensorLog};
use crate::telemetry::Reading;
use crate::time::{Clock, Delay};
use crate::timesync::TimeSync;
use log::{debug, error, info, warn};

/// The node's MQTT topic set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topics<'a> {
    /// Topic this node publishes readings to and records from.
    pub sensor_data: &'a str,
    /// Topic carrying safety-level classifications for this node.
    pub safety_level: &'a str,
    /// Topic the timestamp request token is published to.
    pub timestamp_request: &'a str,
    /// Topic the time-source peer replies on.
    pub timestamp_reply: &'a str,
}

impl Default for Topics<'_> {
    fn default() -> Self {
        Self {
            sensor_data: "pico1/sensor/data",
            safety_level: "pico1/safety_level",
            timestamp_request: "pc/timestamp/request",
            timestamp_reply: "pc/timestamp/reply",
        }
    }
}

/// Boot-time configuration for a [`Node`].
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig<'a> {
    /// Broker address as `"ip:port"`.
    pub broker_addr: &'a str,
    /// MQTT client identifier.
    pub client_id: &'a str,
    /// MQTT keep-alive interval in seconds.
    pub keep_alive_seconds: u16,
    /// The topic set this node publishes and subscribes.
    pub topics: Topics<'a>,
    /// How long to wait for the broker's CONNACK per attempt.
    pub connect_timeout_ms: u32,
    /// How many times to retry the broker connection before giving up.
    pub connect_retries: u32,
    /// Pause between connection attempts.
    pub retry_delay_ms: u32,
    /// How long to wait for the initial timestamp sync. Expiry is logged,
    /// not fatal; records carry the `0` sentinel until a reply arrives.
    pub sync_timeout_ms: u32,
    /// HTTP status server knobs.
    pub http: HttpConfig<'a>,
}

impl Default for NodeConfig<'_> {
    fn default() -> Self {
        Self {
            broker_addr: "192.168.1.10:1883",
            client_id: "pico_w_client",
            keep_alive_seconds: 60,
            topics: Topics::default(),
            connect_timeout_ms: 10_000,
            connect_retries: 3,
            retry_delay_ms: 1000,
            sync_timeout_ms: 10_000,
            http: HttpConfig::default(),
        }
    }
}

/// Node-level failure: either the network layer or the log store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// A network-layer operation failed.
    Network(NetError),
    /// The log store failed during boot.
    Storage(E),
}

impl<E> From<NetError> for Error<E> {
    fn from(err: NetError) -> Self {
        Error::Network(err)
    }
}

/// A running sensor node: one MQTT session, the message router, the
/// timestamp synchronizer, the sensor log and the HTTP status server,
/// all driven from [`poll_once`](Self::poll_once).
pub struct Node<'a, C: Connection, S: LogStore> {
    session: Session<C>,
    router: Router<'a>,
    timesync: TimeSync<'a>,
    log: SensorLog<S>,
    http: StatusServer<'a>,
    topics: Topics<'a>,
}

impl<'a, C: Connection, S: LogStore> Node<'a, C, S> {
    /// Run the boot sequence and return a ready node.
    ///
    /// Fatal failures: a malformed broker address, a log store that cannot
    /// be prepared, and exhausting every connection attempt. A timestamp
    /// sync that does not complete within `sync_timeout_ms` is logged and
    /// survived.
    pub fn start<N, K, D>(
        connector: &mut N,
        store: S,
        config: NodeConfig<'a>,
        clock: &K,
        delay: &mut D,
    ) -> Result<Self, Error<S::Error>>
    where
        N: Connect<Connection = C>,
        K: Clock,
        D: Delay,
    {
        addr::parse(config.broker_addr)?;

        let mut log = SensorLog::new(store);
        log.init().map_err(Error::Storage)?;

        let mut session = Self::connect_session(connector, &config, clock, delay)?;

        let mut timesync = TimeSync::new(
            config.topics.timestamp_request,
            config.topics.timestamp_reply,
        );
        timesync.init(&mut session)?;
        timesync.request_sync(&mut session)?;

        session.subscribe(config.topics.sensor_data, QoS::AtMostOnce)?;
        session.subscribe(config.topics.safety_level, QoS::AtMostOnce)?;

        let router = Router::new(RouteTable {
            sensor_data: config.topics.sensor_data,
            safety_level: config.topics.safety_level,
            timestamp_reply: config.topics.timestamp_reply,
        });

        let mut node = Self {
            session,
            router,
            timesync,
            log,
            http: StatusServer::new(config.http),
            topics: config.topics,
        };

        if !node.wait_sync(clock, delay, config.sync_timeout_ms)? {
            warn!(
                "node: no timestamp reply within {} ms, continuing unsynced",
                config.sync_timeout_ms
            );
        }

        info!("node: boot complete (broker {})", config.broker_addr);
        Ok(node)
    }

    /// One iteration of the cooperative loop.
    ///
    /// Maintains the keep-alive, drains and routes pending MQTT events, and
    /// serves at most one pending HTTP connection. Storage and HTTP failures
    /// are logged and survived; a broken MQTT session is returned as an
    /// error so the caller can reconnect.
    pub fn poll_once<A, K, D>(
        &mut self,
        acceptor: &mut A,
        clock: &K,
        delay: &mut D,
    ) -> Result<(), Error<S::Error>>
    where
        A: Accept,
        K: Clock,
        D: Delay,
    {
        self.session.maintain(clock)?;

        while let Some(event) = self.session.poll()? {
            let mut routes = NodeRoutes {
                session: &mut self.session,
                timesync: &mut self.timesync,
                log: &mut self.log,
                clock,
            };
            self.router.handle_event(event, &mut routes);
        }

        match acceptor.accept() {
            Ok(Some(conn)) => {
                if let Err(err) = self.http.handle(conn, &mut self.log, delay) {
                    warn!("node: http request failed: {:?}", err);
                }
            }
            Ok(None) => {}
            Err(err) => warn!("node: accept failed: {:?}", err),
        }

        Ok(())
    }

    /// Serialize a reading and publish it on the sensor-data topic.
    pub fn publish_reading(&mut self, reading: &Reading) -> Result<(), Error<S::Error>> {
        let json = reading.to_json().map_err(|_| NetError::ProtocolError)?;
        self.session
            .publish(self.topics.sensor_data, json.as_bytes(), QoS::AtMostOnce, false)?;
        Ok(())
    }

    /// Whether the wall-clock epoch has been latched.
    pub fn is_time_synced(&self) -> bool {
        self.timesync.is_synced()
    }

    /// Current wall-clock estimate in epoch milliseconds (`0` until synced).
    pub fn now<K: Clock>(&self, clock: &K) -> u64 {
        self.timesync.now(clock)
    }

    /// The sensor log, for direct reads by platform code.
    pub fn log_mut(&mut self) -> &mut SensorLog<S> {
        &mut self.log
    }

    /// Send DISCONNECT and close the broker connection, consuming the node.
    pub fn shutdown(self) -> Result<(), Error<S::Error>> {
        self.session.disconnect()?;
        Ok(())
    }

    fn connect_session<N, K, D>(
        connector: &mut N,
        config: &NodeConfig<'a>,
        clock: &K,
        delay: &mut D,
    ) -> Result<Session<C>, Error<S::Error>>
    where
        N: Connect<Connection = C>,
        K: Clock,
        D: Delay,
    {
        let options = Options {
            client_id: config.client_id,
            keep_alive_seconds: config.keep_alive_seconds,
            clean_session: true,
        };

        for attempt in 0..=config.connect_retries {
            if attempt > 0 {
                delay.delay_ms(config.retry_delay_ms);
                debug!("node: broker connection attempt {}", attempt + 1);
            }
            let connection = match connector.connect(config.broker_addr) {
                Ok(connection) => connection,
                Err(err) => {
                    warn!("node: tcp connect failed: {:?}", err);
                    continue;
                }
            };
            let mut session = match Session::connect(connection, options.clone()) {
                Ok(session) => session,
                Err(err) => {
                    warn!("node: mqtt connect failed: {:?}", err);
                    continue;
                }
            };
            if session.wait_connected(clock, delay, config.connect_timeout_ms) {
                return Ok(session);
            }
            // Dead or refused session; drop the connection before retrying.
            let _ = session.disconnect();
        }

        error!(
            "node: broker unreachable after {} attempts",
            config.connect_retries + 1
        );
        Err(Error::Network(NetError::Timeout))
    }

    /// Poll the session through the router until the epoch latches or the
    /// timeout expires. Returns whether the sync completed.
    fn wait_sync<K, D>(
        &mut self,
        clock: &K,
        delay: &mut D,
        timeout_ms: u32,
    ) -> Result<bool, Error<S::Error>>
    where
        K: Clock,
        D: Delay,
    {
        let deadline = clock.uptime_ms() + u64::from(timeout_ms);
        while !self.timesync.is_synced() {
            while let Some(event) = self.session.poll()? {
                let mut routes = NodeRoutes {
                    session: &mut self.session,
                    timesync: &mut self.timesync,
                    log: &mut self.log,
                    clock,
                };
                self.router.handle_event(event, &mut routes);
            }
            if self.timesync.is_synced() {
                break;
            }
            if clock.uptime_ms() >= deadline {
                return Ok(false);
            }
            delay.delay_ms(POLL_INTERVAL_MS);
        }
        Ok(true)
    }
}

/// Disjoint borrows of a node's fields, so routed messages can feed the
/// synchronizer (which writes back to the session) and the log in the same
/// dispatch.
struct NodeRoutes<'n, 'a, C: Connection, S: LogStore, K: Clock> {
    session: &'n mut Session<C>,
    timesync: &'n mut TimeSync<'a>,
    log: &'n mut SensorLog<S>,
    clock: &'n K,
}

impl<C: Connection, S: LogStore, K: Clock> NodeRoutes<'_, '_, C, S, K> {
    fn record(&mut self, topic: &str, payload: &[u8]) {
        if !self.timesync.is_synced() {
            warn!("node: recording {} before timestamp sync", topic);
        }
        let Ok(value) = core::str::from_utf8(payload) else {
            warn!("node: non-utf8 payload on {}, dropped", topic);
            return;
        };
        let timestamp = self.timesync.now(self.clock);
        if let Err(err) = self.log.append(timestamp, topic, value.trim_end()) {
            warn!("node: log append failed: {:?}", err);
        }
    }
}

impl<C: Connection, S: LogStore, K: Clock> MessageHandler for NodeRoutes<'_, '_, C, S, K> {
    fn on_timestamp_reply(&mut self, payload: &[u8]) {
        self.timesync.on_reply(payload, self.session, self.clock);
    }

    fn on_sensor_data(&mut self, topic: &str, payload: &[u8]) {
        self.record(topic, payload);
    }

    fn on_safety_level(&mut self, topic: &str, payload: &[u8]) {
        self.record(topic, payload);
    }
}
