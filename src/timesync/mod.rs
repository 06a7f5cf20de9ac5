//! One-shot timestamp synchronization over MQTT.
//!
//! Sensor nodes have no RTC; a peer on the broker answers a request on
//! `pc/timestamp/request` with the current wall-clock epoch on
//! `pc/timestamp/reply`. The first valid reply latches a local epoch
//! reference, after which the node can stamp events without further
//! traffic.
//!
//! The reply channel is a shared, best-effort pub/sub topic: replies can be
//! duplicated, delayed or malformed. The epoch therefore latches exactly
//! once per boot (redeliveries are ignored), and the reply subscription is
//! dropped as soon as the latch happens.
//!
//! All values are in **milliseconds**: the reply payload is a base-10
//! epoch-milliseconds integer and local uptime is taken from
//! [`Clock::uptime_ms`].

#![deny(unsafe_code)]

use crate::network::Connection;
use crate::network::error::Error;
use crate::network::mqtt::{QoS, Session};
use crate::time::Clock;
use log::{debug, info, warn};

/// Fixed request token published to the request topic.
pub const REQUEST_TOKEN: &[u8] = b"request";

/// The timestamp synchronization state machine.
///
/// Lifecycle: [`init`](Self::init) subscribes to the reply topic,
/// [`request_sync`](Self::request_sync) publishes the request token, and the
/// message router feeds replies into [`on_reply`](Self::on_reply) until the
/// epoch latches.
#[derive(Debug)]
pub struct TimeSync<'a> {
    request_topic: &'a str,
    reply_topic: &'a str,
    synced: bool,
    base_epoch_ms: u64,
    base_uptime_ms: u64,
}

impl<'a> TimeSync<'a> {
    /// Create an unsynchronized state machine for the given topic pair.
    pub fn new(request_topic: &'a str, reply_topic: &'a str) -> Self {
        Self {
            request_topic,
            reply_topic,
            synced: false,
            base_epoch_ms: 0,
            base_uptime_ms: 0,
        }
    }

    /// Subscribe to the reply topic. Must be called (and succeed) before
    /// [`request_sync`](Self::request_sync).
    pub fn init<C: Connection>(&mut self, session: &mut Session<C>) -> Result<(), Error> {
        session.subscribe(self.reply_topic, QoS::AtMostOnce)?;
        debug!("timesync: initialized (reply topic {})", self.reply_topic);
        Ok(())
    }

    /// Publish the request token to the request topic.
    pub fn request_sync<C: Connection>(&mut self, session: &mut Session<C>) -> Result<(), Error> {
        session.publish(self.request_topic, REQUEST_TOKEN, QoS::AtMostOnce, false)?;
        debug!("timesync: sync requested on {}", self.request_topic);
        Ok(())
    }

    /// Handle a reply payload.
    ///
    /// The payload is parsed as a base-10 unsigned integer prefix
    /// (`strtoull` style: trailing junk is ignored, zero digits is
    /// malformed). Malformed replies are logged and leave the state
    /// unchanged; a later valid reply still succeeds. The first valid reply
    /// latches the epoch and unsubscribes from the reply topic; anything
    /// after that is a no-op, even if the broker redelivers the reply.
    pub fn on_reply<C: Connection, K: Clock>(
        &mut self,
        payload: &[u8],
        session: &mut Session<C>,
        clock: &K,
    ) {
        if self.synced {
            return;
        }

        let Some(epoch_ms) = parse_u64_prefix(payload) else {
            warn!("timesync: malformed reply ({} bytes), ignored", payload.len());
            return;
        };

        self.base_epoch_ms = epoch_ms;
        self.base_uptime_ms = clock.uptime_ms();
        self.synced = true;

        // The epoch is single-shot; stop listening for replies. Failure to
        // unsubscribe costs bandwidth, not correctness.
        if session.unsubscribe(self.reply_topic).is_err() {
            warn!("timesync: failed to unsubscribe from {}", self.reply_topic);
        }

        info!("timesync: epoch latched at {} ms", epoch_ms);
    }

    /// Whether the epoch has been latched.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Current wall-clock estimate in epoch milliseconds.
    ///
    /// Returns `0` (a sentinel, not an error) while unsynchronized; check
    /// [`is_synced`](Self::is_synced) before trusting the value.
    pub fn now<K: Clock>(&self, clock: &K) -> u64 {
        if !self.synced {
            return 0;
        }
        self.base_epoch_ms + (clock.uptime_ms() - self.base_uptime_ms)
    }

    /// Drop the latched epoch so a fresh sync round can run.
    pub fn reset(&mut self) {
        self.synced = false;
        self.base_epoch_ms = 0;
        self.base_uptime_ms = 0;
        debug!("timesync: reset");
    }
}

/// Parse a leading base-10 unsigned integer, ignoring anything after the
/// digits. Returns `None` if no digit was consumed or the value overflows.
fn parse_u64_prefix(bytes: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    let mut digits = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            break;
        }
        value = value
            .checked_mul(10)?
            .checked_add(u64::from(b - b'0'))?;
        digits += 1;
    }
    if digits == 0 { None } else { Some(value) }
}
