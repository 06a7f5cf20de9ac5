//! MQTT 3.1.1 session layer for sensor nodes.
//!
//! The node keeps exactly one outbound session to a fixed broker. The wire
//! protocol is implemented directly over a byte-stream [`Connection`]
//! (fixed-size buffers, no allocation); incoming traffic is surfaced as
//! typed [`Event`]s from a non-blocking poll instead of registered
//! callbacks, which keeps all state mutation inside the single cooperative
//! loop.
//!
//! Incoming publishes are deliberately delivered in two phases: one
//! [`Event::TopicAnnounced`] followed by one or more [`Event::Fragment`]s,
//! the last one flagged. The [`router`] module reassembles these into
//! complete messages.
//!
//! [`Connection`]: crate::network::Connection

pub mod router;
pub mod session;

pub use router::{Assembler, MAX_PAYLOAD_LEN, Message, MessageHandler, RouteTable, Router};
pub use session::Session;

use heapless::{String, Vec};

/// Maximum supported topic length. Longer topics are truncated, not
/// rejected.
pub const MAX_TOPIC_LEN: usize = 128;

/// Maximum size of a single inbound payload fragment.
pub const FRAGMENT_LEN: usize = 256;

/// Maximum number of concurrent topic subscriptions.
pub const MAX_SUBSCRIPTIONS: usize = 8;

/// Quality of Service levels for MQTT messages.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce = 0,
    /// At least once delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

/// Options for configuring the MQTT session.
#[derive(Debug, Clone)]
pub struct Options<'a> {
    /// The client identifier, must be unique within the broker.
    pub client_id: &'a str,
    /// The keep-alive time in seconds. `0` disables keep-alive.
    pub keep_alive_seconds: u16,
    /// Whether to start a clean session.
    pub clean_session: bool,
}

/// Connection status of the session.
///
/// `Error` is terminal for the session object; recovery requires
/// constructing a new session over a fresh connection.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Status {
    /// No connection has been attempted or the session was shut down.
    Disconnected,
    /// CONNECT has been sent; waiting for the broker's CONNACK.
    Connecting,
    /// The broker accepted the session.
    Connected,
    /// The broker rejected the session or the transport failed.
    Error,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Status {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Status::Disconnected => defmt::write!(f, "Disconnected"),
            Status::Connecting => defmt::write!(f, "Connecting"),
            Status::Connected => defmt::write!(f, "Connected"),
            Status::Error => defmt::write!(f, "Error"),
        }
    }
}

/// An event surfaced by [`Session::poll`].
///
/// [`Session::poll`]: session::Session::poll
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Event {
    /// The broker accepted the CONNECT.
    Connected,
    /// An incoming publish has started; the payload follows as fragments.
    TopicAnnounced {
        /// The announced topic, truncated to [`MAX_TOPIC_LEN`].
        topic: String<MAX_TOPIC_LEN>,
        /// Total payload length in bytes.
        total_len: usize,
    },
    /// A chunk of the current publish's payload.
    Fragment {
        /// The fragment bytes.
        data: Vec<u8, FRAGMENT_LEN>,
        /// Whether this is the final fragment of the message.
        is_last: bool,
    },
    /// The broker acknowledged a subscribe request.
    SubAck {
        /// Packet identifier of the acknowledged SUBSCRIBE.
        packet_id: u16,
    },
    /// The broker acknowledged an unsubscribe request.
    UnsubAck {
        /// Packet identifier of the acknowledged UNSUBSCRIBE.
        packet_id: u16,
    },
    /// The broker acknowledged a QoS 1 publish.
    PubAck {
        /// Packet identifier of the acknowledged PUBLISH.
        packet_id: u16,
    },
    /// The broker answered a keep-alive ping.
    PingResp,
}
