//! Reassembly and dispatch of two-phase inbound publishes.
//!
//! The session announces a topic, then delivers the payload in one or more
//! fragments. [`Assembler`] pairs each fragment run with the announced topic
//! in a single reusable slot (the session never interleaves two publishes,
//! so one slot is enough); [`Router`] matches completed messages against the
//! node's fixed topic set and hands them to a [`MessageHandler`].

use super::{Event, MAX_TOPIC_LEN};
use heapless::{String, Vec};
use log::{debug, warn};

/// Maximum reassembled payload size. Longer payloads are truncated, not
/// rejected; bounded memory is preferred over completeness here.
pub const MAX_PAYLOAD_LEN: usize = 256;

/// A complete inbound message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Message {
    /// The topic announced for this message (possibly truncated).
    pub topic: String<MAX_TOPIC_LEN>,
    /// The reassembled payload (possibly truncated).
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

/// Accumulator for the announce/fragment delivery pattern.
///
/// State machine: idle (empty topic slot) -> accumulating (topic stored)
/// -> idle again once the last fragment arrives. A fragment that shows up
/// while the slot is empty has no topic to pair with and is dropped.
#[derive(Debug, Default)]
pub struct Assembler {
    topic: String<MAX_TOPIC_LEN>,
    payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl Assembler {
    /// Create an idle assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a topic is currently stored (a message is being assembled).
    pub fn is_accumulating(&self) -> bool {
        !self.topic.is_empty()
    }

    /// Store the announced topic, truncating at [`MAX_TOPIC_LEN`], and reset
    /// the payload accumulator.
    pub fn on_announce(&mut self, topic: &str) {
        self.topic.clear();
        self.payload.clear();
        for c in topic.chars() {
            if self.topic.push(c).is_err() {
                warn!("router: topic truncated at {} bytes", MAX_TOPIC_LEN);
                break;
            }
        }
    }

    /// Append a payload fragment; on the last fragment, yield the completed
    /// message and clear the slot.
    ///
    /// Bytes beyond [`MAX_PAYLOAD_LEN`] are dropped. A fragment with no
    /// preceding announce is discarded and yields nothing.
    pub fn on_fragment(&mut self, data: &[u8], is_last: bool) -> Option<Message> {
        if self.topic.is_empty() {
            debug!("router: dropped {} payload bytes with no topic", data.len());
            return None;
        }

        let room = MAX_PAYLOAD_LEN - self.payload.len();
        if data.len() > room {
            warn!("router: payload truncated at {} bytes", MAX_PAYLOAD_LEN);
        }
        let take = data.len().min(room);
        self.payload.extend_from_slice(&data[..take]).unwrap();

        if !is_last {
            return None;
        }

        // Clearing the slot here guarantees a stray fragment after this
        // message cannot be misattributed to its topic.
        Some(Message {
            topic: core::mem::take(&mut self.topic),
            payload: core::mem::take(&mut self.payload),
        })
    }

    /// Drop any partially assembled message.
    pub fn reset(&mut self) {
        self.topic.clear();
        self.payload.clear();
    }
}

/// Per-topic sinks for completed messages.
pub trait MessageHandler {
    /// A reply from the time-source peer arrived.
    fn on_timestamp_reply(&mut self, payload: &[u8]);
    /// A sensor reading arrived.
    fn on_sensor_data(&mut self, topic: &str, payload: &[u8]);
    /// A safety-level / prediction message arrived.
    fn on_safety_level(&mut self, topic: &str, payload: &[u8]);
}

/// The node's fixed set of subscribed topics.
#[derive(Debug, Clone, Copy)]
pub struct RouteTable<'a> {
    /// Topic carrying sensor readings.
    pub sensor_data: &'a str,
    /// Topic carrying safety-level classifications.
    pub safety_level: &'a str,
    /// Topic carrying timestamp sync replies.
    pub timestamp_reply: &'a str,
}

/// Demultiplexer from session events to per-topic handlers.
///
/// Dispatch is an exact string match against the route table; anything else
/// is logged and dropped (there is no NACK path on a pub/sub channel).
#[derive(Debug)]
pub struct Router<'a> {
    assembler: Assembler,
    routes: RouteTable<'a>,
}

impl<'a> Router<'a> {
    /// Create a router for the given route table.
    pub fn new(routes: RouteTable<'a>) -> Self {
        Self {
            assembler: Assembler::new(),
            routes,
        }
    }

    /// Feed one session event; dispatch to `handler` if it completed a
    /// message. Non-publish events (acks, pings) are logged by the session
    /// and ignored here.
    pub fn handle_event<H: MessageHandler>(&mut self, event: Event, handler: &mut H) {
        let message = match event {
            Event::TopicAnnounced { topic, total_len } => {
                debug!("router: incoming publish on {} ({} bytes)", topic, total_len);
                self.assembler.on_announce(&topic);
                return;
            }
            Event::Fragment { data, is_last } => {
                match self.assembler.on_fragment(&data, is_last) {
                    Some(message) => message,
                    None => return,
                }
            }
            _ => return,
        };

        let topic = message.topic.as_str();
        if topic == self.routes.timestamp_reply {
            handler.on_timestamp_reply(&message.payload);
        } else if topic == self.routes.sensor_data {
            handler.on_sensor_data(topic, &message.payload);
        } else if topic == self.routes.safety_level {
            handler.on_safety_level(topic, &message.payload);
        } else {
            warn!("router: dropped message on unknown topic {}", topic);
        }
    }
}
