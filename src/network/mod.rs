//! A network abstraction layer for embedded sensor nodes
//!
//! This module defines the byte-stream traits the rest of the crate is built
//! on. A platform port implements them over its TCP stack (lwIP raw sockets,
//! smoltcp, `std::net`, ...); everything above the seam is portable and can
//! be tested against in-memory mocks.

#![allow(missing_docs)]
#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Broker address parsing
pub mod addr;

/// MQTT session, message router and related types
pub mod mqtt;

/// HTTP status server
pub mod http;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Accept, Close, Connect, Connection, Read, Write};
}

// Core synchronous traits
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read data from the connection. `Ok(0)` means no data is currently
    /// available; it is not an end-of-stream marker.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer. Returns once the written bytes have been
    /// handed off and acknowledged by the peer's stack, so a `close` after
    /// `flush` never truncates a response.
    fn flush(&mut self) -> Result<(), Self::Error>;
}

pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}

/// A synchronous connector (client side)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection to `remote` (`"ip:port"`)
    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error>;
}

/// A non-blocking acceptor (server side).
///
/// The listening socket is bound and put into the listen state by the
/// platform when the acceptor is constructed; bind failures surface there.
/// `accept` must never block: it returns `Ok(None)` when no client is
/// waiting, so it can be polled from the cooperative loop.
pub trait Accept {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Accept a pending connection, if any
    fn accept(&mut self) -> Result<Option<Self::Connection>, Self::Error>;
}
