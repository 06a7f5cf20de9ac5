//! Broker address parsing.
//!
//! The broker endpoint is configured as a dotted-quad `"a.b.c.d:port"`
//! string. Parsing happens once, before any connect attempt, so a bad
//! configuration fails the init sequence instead of a live socket.

use super::error::Error;

/// A parsed IPv4 endpoint.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SocketAddrV4 {
    /// The four address octets.
    pub octets: [u8; 4],
    /// The TCP port.
    pub port: u16,
}

/// Parse `"a.b.c.d:port"` into a [`SocketAddrV4`].
///
/// Rejects empty octets, values above 255, a missing or zero port and any
/// trailing garbage with [`Error::InvalidAddress`].
pub fn parse(addr: &str) -> Result<SocketAddrV4, Error> {
    let (host, port) = addr.split_once(':').ok_or(Error::InvalidAddress)?;
    let port: u16 = port.parse().map_err(|_| Error::InvalidAddress)?;
    if port == 0 {
        return Err(Error::InvalidAddress);
    }

    let mut octets = [0u8; 4];
    let mut parts = host.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next().ok_or(Error::InvalidAddress)?;
        if part.is_empty() || part.len() > 3 {
            return Err(Error::InvalidAddress);
        }
        *octet = part.parse().map_err(|_| Error::InvalidAddress)?;
    }
    if parts.next().is_some() {
        return Err(Error::InvalidAddress);
    }

    Ok(SocketAddrV4 { octets, port })
}
