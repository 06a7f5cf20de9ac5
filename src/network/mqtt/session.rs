//! The transport session: one MQTT 3.1.1 connection to the broker.
//!
//! The session owns the byte-stream connection, tracks connection status and
//! the set of active subscriptions, and encodes/decodes MQTT control packets
//! with fixed-size buffers. Nothing here blocks: `connect` only sends the
//! CONNECT packet, and the CONNACK (like every other inbound packet) is
//! consumed by [`Session::poll`] from the cooperative loop. Inbound decoding
//! is a resumable state machine, so a packet split across read windows picks
//! up where it left off on the next poll.

use super::{Event, FRAGMENT_LEN, MAX_SUBSCRIPTIONS, MAX_TOPIC_LEN, Options, QoS, Status};
use crate::network::error::Error;
use crate::network::{Close, Connection, Read, Write};
use crate::time::{Clock, Delay};
use heapless::{String, Vec};
use log::{debug, warn};

// MQTT control packet types (fixed header, type nibble in the high bits)
const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;
const PUBACK: u8 = 0x40;
const SUBSCRIBE: u8 = 0x82;
const SUBACK: u8 = 0x90;
const UNSUBSCRIBE: u8 = 0xA2;
const UNSUBACK: u8 = 0xB0;
const PINGREQ: u8 = 0xC0;
const PINGRESP: u8 = 0xD0;
const DISCONNECT: u8 = 0xE0;

// Protocol constants
const PROTOCOL_NAME: &[u8] = b"MQTT";
const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

/// Polling granularity of the bounded waits.
pub const POLL_INTERVAL_MS: u32 = 100;

/// Decode state for the inbound stream.
///
/// `read` returning `Ok(0)` means no data yet, never end-of-stream, so the
/// decoder must be able to stop between any two bytes and resume on a later
/// poll. Packet heads are consumed a byte at a time through this state
/// machine; only payload bytes (`Payload`) and dropped packets (`Skipping`)
/// are read in bulk.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Inbound {
    /// Waiting for a fixed-header type byte.
    Type,
    /// Collecting the variable-length remaining-length field.
    Length {
        header: u8,
        value: usize,
        multiplier: usize,
        count: u8,
    },
    /// Collecting the body of a small non-publish packet into `rx`.
    Body { header: u8, remaining: usize },
    /// Collecting the two topic-length bytes of a PUBLISH.
    TopicLen {
        qos: u8,
        remaining: usize,
        first: Option<u8>,
    },
    /// Collecting the announced topic into `rx`; `rest` is what follows it.
    Topic { qos: u8, rest: usize, to_take: usize },
    /// Collecting the two packet-identifier bytes of a QoS > 0 PUBLISH.
    PacketId { rest: usize, taken: u8 },
    /// Topic has been announced; `remaining` payload bytes still to deliver.
    Payload { remaining: usize },
    /// Dropping the rest of a malformed or unsupported packet.
    Skipping { remaining: usize },
}

/// An MQTT 3.1.1 session over a byte-stream connection.
pub struct Session<C: Connection> {
    connection: C,
    status: Status,
    subscriptions: Vec<String<MAX_TOPIC_LEN>, MAX_SUBSCRIPTIONS>,
    inbound: Inbound,
    rx: Vec<u8, MAX_TOPIC_LEN>,
    keep_alive_ms: u64,
    last_send_ms: u64,
    sent_since_maintain: bool,
    next_packet_id: u16,
}

impl<C: Connection> Session<C> {
    /// Send a CONNECT packet over an established connection.
    ///
    /// On success the session is in [`Status::Connecting`]; the broker's
    /// CONNACK is picked up by a later [`poll`](Self::poll), which moves the
    /// session to [`Status::Connected`] or [`Status::Error`]. Use
    /// [`wait_connected`](Self::wait_connected) to wait for that transition
    /// with a bounded timeout.
    pub fn connect(mut connection: C, options: Options) -> Result<Self, Error> {
        // --- Variable Header ---
        let mut vh: Vec<u8, 10> = Vec::new();
        vh.extend_from_slice(&(PROTOCOL_NAME.len() as u16).to_be_bytes())
            .unwrap();
        vh.extend_from_slice(PROTOCOL_NAME).unwrap();
        vh.push(PROTOCOL_LEVEL).unwrap();

        let mut connect_flags = 0;
        if options.clean_session {
            connect_flags |= 0x02;
        }
        vh.push(connect_flags).unwrap();
        vh.extend_from_slice(&options.keep_alive_seconds.to_be_bytes())
            .unwrap();

        // --- Payload ---
        let mut payload: Vec<u8, 256> = Vec::new();
        let client_id_bytes = options.client_id.as_bytes();
        payload
            .extend_from_slice(&(client_id_bytes.len() as u16).to_be_bytes())
            .map_err(|_| Error::ProtocolError)?;
        payload
            .extend_from_slice(client_id_bytes)
            .map_err(|_| Error::ProtocolError)?;

        let remaining_len = vh.len() + payload.len();

        // --- Fixed Header ---
        let mut fixed_header: Vec<u8, 5> = Vec::new();
        fixed_header.push(CONNECT).unwrap();
        encode_remaining_length(&mut fixed_header, remaining_len)
            .map_err(|_| Error::ProtocolError)?;

        connection
            .write(&fixed_header)
            .map_err(|_| Error::WriteError)?;
        connection.write(&vh).map_err(|_| Error::WriteError)?;
        connection.write(&payload).map_err(|_| Error::WriteError)?;
        connection.flush().map_err(|_| Error::WriteError)?;

        debug!("mqtt: CONNECT sent (client_id={})", options.client_id);

        Ok(Self {
            connection,
            status: Status::Connecting,
            subscriptions: Vec::new(),
            inbound: Inbound::Type,
            rx: Vec::new(),
            keep_alive_ms: u64::from(options.keep_alive_seconds) * 1000,
            last_send_ms: 0,
            sent_since_maintain: false,
            next_packet_id: 1,
        })
    }

    /// Current connection status. Pure read, no side effects.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether the broker has accepted the session.
    pub fn is_connected(&self) -> bool {
        self.status == Status::Connected
    }

    /// Poll the session and the network stack until the broker accepts the
    /// connection or `timeout_ms` elapses.
    ///
    /// Polls at [`POLL_INTERVAL_MS`] granularity, yielding through `delay`
    /// each iteration so the platform's background processing keeps running.
    /// Returns `false` on timeout or if the session entered
    /// [`Status::Error`].
    pub fn wait_connected<K: Clock, D: Delay>(
        &mut self,
        clock: &K,
        delay: &mut D,
        timeout_ms: u32,
    ) -> bool {
        let deadline = clock.uptime_ms() + u64::from(timeout_ms);
        loop {
            if self.poll().is_err() {
                return false;
            }
            match self.status {
                Status::Connected => return true,
                Status::Error => return false,
                _ => {}
            }
            if clock.uptime_ms() >= deadline {
                warn!("mqtt: connect timeout after {} ms", timeout_ms);
                return false;
            }
            delay.delay_ms(POLL_INTERVAL_MS);
        }
    }

    /// Publish a message.
    ///
    /// Fails with [`Error::NotConnected`] (and sends nothing) unless the
    /// session is connected. For QoS 0 the publish is fire-and-forget; for
    /// QoS 1 the broker's PUBACK is surfaced by `poll` and logged, never
    /// retried at this layer.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Error> {
        if self.status != Status::Connected {
            return Err(Error::NotConnected);
        }

        let mut packet: Vec<u8, 1024> = Vec::new();

        // --- Variable Header ---
        let topic_bytes = topic.as_bytes();
        packet
            .extend_from_slice(&(topic_bytes.len() as u16).to_be_bytes())
            .map_err(|_| Error::ProtocolError)?;
        packet
            .extend_from_slice(topic_bytes)
            .map_err(|_| Error::ProtocolError)?;
        if qos != QoS::AtMostOnce {
            let packet_id = self.take_packet_id();
            packet
                .extend_from_slice(&packet_id.to_be_bytes())
                .map_err(|_| Error::ProtocolError)?;
        }

        // --- Payload ---
        packet
            .extend_from_slice(payload)
            .map_err(|_| Error::ProtocolError)?;

        // --- Fixed Header ---
        let mut flags = PUBLISH;
        flags |= (qos as u8) << 1;
        if retain {
            flags |= 0x01;
        }
        let mut fixed_header: Vec<u8, 5> = Vec::new();
        fixed_header.push(flags).unwrap();
        encode_remaining_length(&mut fixed_header, packet.len())
            .map_err(|_| Error::ProtocolError)?;

        self.send(&fixed_header, &packet)?;
        debug!("mqtt: published {} bytes to {}", payload.len(), topic);
        Ok(())
    }

    /// Subscribe to a topic.
    ///
    /// Idempotent: a topic that is already subscribed is not sent to the
    /// broker again. The topic enters the registry only after the SUBSCRIBE
    /// was written, so a failed send can be retried. The SUBACK is surfaced
    /// by `poll` and logged.
    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Error> {
        if self.status != Status::Connected {
            return Err(Error::NotConnected);
        }
        if self.subscriptions.iter().any(|t| t.as_str() == topic) {
            debug!("mqtt: already subscribed to {}", topic);
            return Ok(());
        }
        let entry = String::try_from(topic).map_err(|_| Error::ProtocolError)?;
        if self.subscriptions.is_full() {
            return Err(Error::ProtocolError);
        }

        let packet_id = self.take_packet_id();
        let mut packet: Vec<u8, 256> = Vec::new();
        packet
            .extend_from_slice(&packet_id.to_be_bytes())
            .unwrap();
        let topic_bytes = topic.as_bytes();
        packet
            .extend_from_slice(&(topic_bytes.len() as u16).to_be_bytes())
            .map_err(|_| Error::ProtocolError)?;
        packet
            .extend_from_slice(topic_bytes)
            .map_err(|_| Error::ProtocolError)?;
        packet.push(qos as u8).map_err(|_| Error::ProtocolError)?;

        let mut fixed_header: Vec<u8, 5> = Vec::new();
        fixed_header.push(SUBSCRIBE).unwrap();
        encode_remaining_length(&mut fixed_header, packet.len())
            .map_err(|_| Error::ProtocolError)?;

        self.send(&fixed_header, &packet)?;
        // Registry slot was checked above, the push cannot fail.
        self.subscriptions.push(entry).ok();
        debug!("mqtt: subscribing to {}", topic);
        Ok(())
    }

    /// Unsubscribe from a topic.
    ///
    /// Unknown topics are a no-op `Ok`, mirroring the idempotence of
    /// [`subscribe`](Self::subscribe). The registry entry is removed only
    /// after the UNSUBSCRIBE was written, so a failed send can be retried.
    pub fn unsubscribe(&mut self, topic: &str) -> Result<(), Error> {
        if self.status != Status::Connected {
            return Err(Error::NotConnected);
        }
        let Some(pos) = self
            .subscriptions
            .iter()
            .position(|t| t.as_str() == topic)
        else {
            return Ok(());
        };

        let packet_id = self.take_packet_id();
        let mut packet: Vec<u8, 256> = Vec::new();
        packet
            .extend_from_slice(&packet_id.to_be_bytes())
            .unwrap();
        let topic_bytes = topic.as_bytes();
        packet
            .extend_from_slice(&(topic_bytes.len() as u16).to_be_bytes())
            .map_err(|_| Error::ProtocolError)?;
        packet
            .extend_from_slice(topic_bytes)
            .map_err(|_| Error::ProtocolError)?;

        let mut fixed_header: Vec<u8, 5> = Vec::new();
        fixed_header.push(UNSUBSCRIBE).unwrap();
        encode_remaining_length(&mut fixed_header, packet.len())
            .map_err(|_| Error::ProtocolError)?;

        self.send(&fixed_header, &packet)?;
        self.subscriptions.swap_remove(pos);
        debug!("mqtt: unsubscribing from {}", topic);
        Ok(())
    }

    /// Whether a topic is in the active subscription registry.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|t| t.as_str() == topic)
    }

    /// Send a PINGREQ if three quarters of the keep-alive interval have
    /// passed without outbound traffic. Call once per loop iteration;
    /// publishes and subscribes observed since the previous call reset the
    /// timer.
    pub fn maintain<K: Clock>(&mut self, clock: &K) -> Result<(), Error> {
        if self.status != Status::Connected || self.keep_alive_ms == 0 {
            return Ok(());
        }
        let now = clock.uptime_ms();
        if self.sent_since_maintain {
            self.sent_since_maintain = false;
            self.last_send_ms = now;
            return Ok(());
        }
        if now.saturating_sub(self.last_send_ms) >= self.keep_alive_ms * 3 / 4 {
            self.send(&[PINGREQ, 0], &[])?;
            self.sent_since_maintain = false;
            self.last_send_ms = now;
            debug!("mqtt: PINGREQ sent");
        }
        Ok(())
    }

    /// Send DISCONNECT and close the underlying connection.
    pub fn disconnect(mut self) -> Result<(), Error> {
        if self.status == Status::Connected {
            // Best effort; the connection is going away either way.
            let _ = self.connection.write(&[DISCONNECT, 0]);
            let _ = self.connection.flush();
        }
        self.connection.close().map_err(|_| Error::WriteError)
    }

    /// Poll for one inbound event.
    ///
    /// Non-blocking and restartable: returns `Ok(None)` when no complete
    /// event is available yet, including while a packet is only partially
    /// received; decoding resumes where it left off on the next call.
    /// Incoming publishes are delivered in two phases: one
    /// [`Event::TopicAnnounced`] followed by [`Event::Fragment`]s of at most
    /// [`FRAGMENT_LEN`] bytes, the last one flagged.
    pub fn poll(&mut self) -> Result<Option<Event>, Error> {
        loop {
            match self.inbound {
                Inbound::Payload { remaining } => return self.poll_fragment(remaining),
                Inbound::Skipping { remaining } => {
                    let mut scratch = [0u8; 32];
                    let want = remaining.min(scratch.len());
                    match self.connection.read(&mut scratch[..want]) {
                        Ok(0) => return Ok(None),
                        Ok(n) => {
                            self.inbound = skip_or_idle(remaining - n);
                        }
                        Err(_) => return Err(Error::ReadError),
                    }
                    continue;
                }
                _ => {}
            }

            let mut byte = [0u8; 1];
            match self.connection.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(_) => return Err(Error::ReadError),
            }
            if let Some(event) = self.advance(byte[0])? {
                return Ok(Some(event));
            }
        }
    }

    /// Feed one head byte into the decode state machine.
    fn advance(&mut self, byte: u8) -> Result<Option<Event>, Error> {
        match self.inbound {
            Inbound::Type => {
                self.rx.clear();
                self.inbound = Inbound::Length {
                    header: byte,
                    value: 0,
                    multiplier: 1,
                    count: 0,
                };
                Ok(None)
            }
            Inbound::Length {
                header,
                value,
                multiplier,
                count,
            } => {
                let value = value + (byte as usize & 0x7F) * multiplier;
                if byte & 0x80 != 0 {
                    if count == 3 {
                        self.inbound = Inbound::Type;
                        return Err(Error::ProtocolError);
                    }
                    self.inbound = Inbound::Length {
                        header,
                        value,
                        multiplier: multiplier * 128,
                        count: count + 1,
                    };
                    return Ok(None);
                }
                self.start_packet(header, value)
            }
            Inbound::Body { header, remaining } => {
                // Capacity was checked when the body state was entered.
                self.rx.push(byte).ok();
                if remaining > 1 {
                    self.inbound = Inbound::Body {
                        header,
                        remaining: remaining - 1,
                    };
                    return Ok(None);
                }
                self.inbound = Inbound::Type;
                self.finish_packet(header)
            }
            Inbound::TopicLen {
                qos,
                remaining,
                first,
            } => {
                let Some(hi) = first else {
                    self.inbound = Inbound::TopicLen {
                        qos,
                        remaining,
                        first: Some(byte),
                    };
                    return Ok(None);
                };
                let topic_len = usize::from(u16::from_be_bytes([hi, byte]));
                let left = remaining - 2;
                let malformed =
                    topic_len == 0 || topic_len > left || (qos > 0 && left - topic_len < 2);
                if malformed {
                    warn!("mqtt: malformed publish header, dropping {} bytes", left);
                    self.inbound = skip_or_idle(left);
                    return Ok(None);
                }
                if topic_len > MAX_TOPIC_LEN {
                    warn!("mqtt: topic truncated ({} > {} bytes)", topic_len, MAX_TOPIC_LEN);
                }
                self.inbound = Inbound::Topic {
                    qos,
                    rest: left - topic_len,
                    to_take: topic_len,
                };
                Ok(None)
            }
            Inbound::Topic { qos, rest, to_take } => {
                // Stores at most MAX_TOPIC_LEN bytes; the rest is dropped.
                self.rx.push(byte).ok();
                if to_take > 1 {
                    self.inbound = Inbound::Topic {
                        qos,
                        rest,
                        to_take: to_take - 1,
                    };
                    return Ok(None);
                }
                if core::str::from_utf8(&self.rx).is_err() {
                    warn!("mqtt: non-utf8 topic, message dropped");
                    self.inbound = skip_or_idle(rest);
                    return Ok(None);
                }
                if qos > 0 {
                    self.inbound = Inbound::PacketId {
                        rest: rest - 2,
                        taken: 0,
                    };
                    return Ok(None);
                }
                self.announce(rest)
            }
            Inbound::PacketId { rest, taken } => {
                if taken == 0 {
                    self.inbound = Inbound::PacketId { rest, taken: 1 };
                    return Ok(None);
                }
                self.announce(rest)
            }
            // Both are read in bulk by `poll`, never fed through here.
            Inbound::Payload { .. } | Inbound::Skipping { .. } => Ok(None),
        }
    }

    /// Dispatch a completed fixed header to the per-type body state.
    fn start_packet(&mut self, header: u8, remaining: usize) -> Result<Option<Event>, Error> {
        match header & 0xF0 {
            CONNACK => {
                if remaining != 2 {
                    self.status = Status::Error;
                    self.inbound = Inbound::Type;
                    return Err(Error::ProtocolError);
                }
                self.inbound = Inbound::Body { header, remaining };
                Ok(None)
            }
            PUBLISH => {
                if remaining < 2 {
                    warn!("mqtt: malformed publish header, dropped");
                    self.inbound = skip_or_idle(remaining);
                    return Ok(None);
                }
                self.inbound = Inbound::TopicLen {
                    qos: (header >> 1) & 0x03,
                    remaining,
                    first: None,
                };
                Ok(None)
            }
            PUBACK | UNSUBACK => {
                if remaining != 2 {
                    warn!("mqtt: malformed ack, dropping {} bytes", remaining);
                    self.inbound = skip_or_idle(remaining);
                    return Ok(None);
                }
                self.inbound = Inbound::Body { header, remaining };
                Ok(None)
            }
            SUBACK => {
                if remaining < 3 || remaining > self.rx.capacity() {
                    warn!("mqtt: malformed SUBACK, dropping {} bytes", remaining);
                    self.inbound = skip_or_idle(remaining);
                    return Ok(None);
                }
                self.inbound = Inbound::Body { header, remaining };
                Ok(None)
            }
            PINGRESP => {
                self.inbound = skip_or_idle(remaining);
                Ok(Some(Event::PingResp))
            }
            other => {
                warn!("mqtt: dropped unexpected packet type {:#04x}", other);
                self.inbound = skip_or_idle(remaining);
                Ok(None)
            }
        }
    }

    /// Parse a completed small-packet body out of `rx`.
    fn finish_packet(&mut self, header: u8) -> Result<Option<Event>, Error> {
        match header & 0xF0 {
            CONNACK => match self.rx[1] {
                0 => {
                    self.status = Status::Connected;
                    debug!("mqtt: connected");
                    Ok(Some(Event::Connected))
                }
                rc @ 1..=5 => {
                    warn!("mqtt: connection refused (rc={})", rc);
                    self.status = Status::Error;
                    Err(Error::ConnectionRefused)
                }
                _ => {
                    self.status = Status::Error;
                    Err(Error::ProtocolError)
                }
            },
            PUBACK => {
                let packet_id = u16::from_be_bytes([self.rx[0], self.rx[1]]);
                debug!("mqtt: publish acknowledged (id={})", packet_id);
                Ok(Some(Event::PubAck { packet_id }))
            }
            UNSUBACK => {
                let packet_id = u16::from_be_bytes([self.rx[0], self.rx[1]]);
                debug!("mqtt: unsubscribe acknowledged (id={})", packet_id);
                Ok(Some(Event::UnsubAck { packet_id }))
            }
            SUBACK => {
                let packet_id = u16::from_be_bytes([self.rx[0], self.rx[1]]);
                // Return codes, one per requested topic. 0x80 means refused.
                for &rc in &self.rx[2..] {
                    if rc == 0x80 {
                        warn!("mqtt: broker refused subscription (id={})", packet_id);
                    }
                }
                debug!("mqtt: subscribe acknowledged (id={})", packet_id);
                Ok(Some(Event::SubAck { packet_id }))
            }
            // Only the types staged by start_packet reach here.
            _ => Ok(None),
        }
    }

    /// Emit the topic announcement and switch to payload streaming.
    fn announce(&mut self, total_len: usize) -> Result<Option<Event>, Error> {
        let topic =
            String::from_utf8(core::mem::take(&mut self.rx)).map_err(|_| Error::ProtocolError)?;
        self.inbound = Inbound::Payload {
            remaining: total_len,
        };
        Ok(Some(Event::TopicAnnounced { topic, total_len }))
    }

    fn poll_fragment(&mut self, remaining: usize) -> Result<Option<Event>, Error> {
        if remaining == 0 {
            // Zero-length payload: complete the two-phase delivery with an
            // empty final fragment.
            self.inbound = Inbound::Type;
            return Ok(Some(Event::Fragment {
                data: Vec::new(),
                is_last: true,
            }));
        }

        let mut buf = [0u8; FRAGMENT_LEN];
        let want = remaining.min(FRAGMENT_LEN);
        let n = match self.connection.read(&mut buf[..want]) {
            Ok(0) => return Ok(None), // rest of the payload still in flight
            Ok(n) => n,
            Err(_) => return Err(Error::ReadError),
        };

        let left = remaining - n;
        let is_last = left == 0;
        self.inbound = if is_last {
            Inbound::Type
        } else {
            Inbound::Payload { remaining: left }
        };

        let data = Vec::from_slice(&buf[..n]).unwrap();
        Ok(Some(Event::Fragment { data, is_last }))
    }

    fn send(&mut self, fixed_header: &[u8], packet: &[u8]) -> Result<(), Error> {
        self.connection
            .write(fixed_header)
            .map_err(|_| Error::WriteError)?;
        if !packet.is_empty() {
            self.connection
                .write(packet)
                .map_err(|_| Error::WriteError)?;
        }
        self.connection.flush().map_err(|_| Error::WriteError)?;
        self.sent_since_maintain = true;
        Ok(())
    }

    fn take_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }
}

fn skip_or_idle(remaining: usize) -> Inbound {
    if remaining > 0 {
        Inbound::Skipping { remaining }
    } else {
        Inbound::Type
    }
}

/// Encode the MQTT variable-length remaining-length field (up to 4 bytes,
/// 7 bits per byte, continuation in the top bit).
fn encode_remaining_length(buf: &mut Vec<u8, 5>, mut len: usize) -> Result<(), ()> {
    loop {
        if buf.is_full() {
            return Err(());
        }
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte).unwrap(); // `is_full` check above ensures this won't panic
        if len == 0 {
            break;
        }
    }
    Ok(())
}
