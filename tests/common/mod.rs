//! Shared in-memory test doubles: a scripted byte-stream connection, a
//! manually advanced clock, and an in-memory log store.

#![allow(dead_code)]

use piconode::network::error::Error;
use piconode::network::{Accept, Close, Connect, Connection, Read, Write};
use piconode::storage::LogStore;
use piconode::time::{Clock, Delay};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Default)]
struct WireInner {
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    closed: bool,
    fail_writes: bool,
}

/// A bidirectional in-memory wire. The test keeps the `Wire` handle to
/// script inbound bytes and inspect outbound traffic while the code under
/// test owns a [`ScriptConnection`] on the same buffers.
#[derive(Clone, Default)]
pub struct Wire {
    inner: Rc<RefCell<WireInner>>,
}

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection endpoint sharing this wire's buffers.
    pub fn connection(&self) -> ScriptConnection {
        ScriptConnection {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Queue bytes for the connection to read.
    pub fn feed(&self, data: &[u8]) {
        self.inner.borrow_mut().inbound.extend_from_slice(data);
    }

    /// Everything the connection has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.borrow().outbound.clone()
    }

    pub fn clear_written(&self) {
        self.inner.borrow_mut().outbound.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Make subsequent writes on the connection fail.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.borrow_mut().fail_writes = fail;
    }
}

/// Connection endpoint backed by a [`Wire`].
pub struct ScriptConnection {
    inner: Rc<RefCell<WireInner>>,
}

impl Read for ScriptConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut inner = self.inner.borrow_mut();
        let len = buf.len().min(inner.inbound.len());
        buf[..len].copy_from_slice(&inner.inbound[..len]);
        inner.inbound.drain(..len);
        Ok(len)
    }
}

impl Write for ScriptConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_writes {
            return Err(Error::WriteError);
        }
        inner.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Close for ScriptConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        self.inner.borrow_mut().closed = true;
        Ok(())
    }
}

impl Connection for ScriptConnection {}

/// Connector handing out endpoints of a fixed wire, optionally failing the
/// first few attempts.
pub struct WireConnector {
    pub wire: Wire,
    pub fail_attempts: u32,
}

impl WireConnector {
    pub fn new(wire: &Wire) -> Self {
        Self {
            wire: wire.clone(),
            fail_attempts: 0,
        }
    }
}

impl Connect for WireConnector {
    type Connection = ScriptConnection;
    type Error = Error;

    fn connect(&mut self, _remote: &str) -> Result<Self::Connection, Self::Error> {
        if self.fail_attempts > 0 {
            self.fail_attempts -= 1;
            return Err(Error::ConnectionRefused);
        }
        Ok(self.wire.connection())
    }
}

/// Acceptor yielding at most one pending connection.
#[derive(Default)]
pub struct OneShotAcceptor {
    pub pending: Option<ScriptConnection>,
}

impl Accept for OneShotAcceptor {
    type Connection = ScriptConnection;
    type Error = Error;

    fn accept(&mut self) -> Result<Option<Self::Connection>, Self::Error> {
        Ok(self.pending.take())
    }
}

/// Manually advanced monotonic clock.
#[derive(Clone, Default)]
pub struct TestClock {
    now: Rc<Cell<u64>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for TestClock {
    fn uptime_ms(&self) -> u64 {
        self.now.get()
    }
}

/// Delay that advances its clock instead of sleeping, so bounded waits run
/// instantly in tests.
pub struct TestDelay {
    clock: TestClock,
}

impl TestDelay {
    pub fn new(clock: &TestClock) -> Self {
        Self {
            clock: clock.clone(),
        }
    }
}

impl Delay for TestDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.clock.advance(u64::from(ms));
    }
}

/// In-memory log store with a mount flag.
pub struct MemLog {
    pub data: Vec<u8>,
    pub mounted: bool,
}

impl MemLog {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            mounted: true,
        }
    }
}

impl LogStore for MemLog {
    type Error = piconode::storage::error::Error;

    fn size(&mut self) -> Result<u64, Self::Error> {
        if !self.mounted {
            return Err(piconode::storage::error::Error::NotMounted);
        }
        Ok(self.data.len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if !self.mounted {
            return Err(piconode::storage::error::Error::NotMounted);
        }
        let offset = offset as usize;
        if offset > self.data.len() {
            return Err(piconode::storage::error::Error::OutOfBounds);
        }
        let len = buf.len().min(self.data.len() - offset);
        buf[..len].copy_from_slice(&self.data[offset..offset + len]);
        Ok(len)
    }

    fn append(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        if !self.mounted {
            return Err(piconode::storage::error::Error::NotMounted);
        }
        self.data.extend_from_slice(data);
        Ok(())
    }
}

// MQTT packet builders for scripting broker traffic.

pub fn connack(return_code: u8) -> Vec<u8> {
    vec![0x20, 2, 0, return_code]
}

pub fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x30];
    encode_remaining_length(&mut packet, 2 + topic.len() + payload.len());
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

pub fn suback(packet_id: u16) -> Vec<u8> {
    let mut packet = vec![0x90, 3];
    packet.extend_from_slice(&packet_id.to_be_bytes());
    packet.push(0);
    packet
}

pub fn pingresp() -> Vec<u8> {
    vec![0xD0, 0]
}

fn encode_remaining_length(packet: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// `true` if `haystack` contains `needle` as a byte substring.
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}
