//! Persistent sensor log storage.
//!
//! The log is one flat, append-only CSV file on external storage (an SD
//! card in the reference hardware). The platform implements [`LogStore`]
//! over its filesystem; implementations are expected to open and close the
//! file inside each call rather than holding a handle across the
//! cooperative loop, so the MQTT logging write path and the HTTP read path
//! can interleave freely.

#![allow(missing_docs)]
#![deny(unsafe_code)]

/// Common error types for storage operations
pub mod error;

/// CSV record formatting and the bounded tail-window reader
pub mod csv;

pub use csv::{CSV_HEADER, MAX_RECORD_LEN, SensorLog, read_tail};

/// Byte-level access to the append-only log file.
pub trait LogStore {
    /// Associated error type
    type Error: core::fmt::Debug;

    /// Current size of the log in bytes.
    fn size(&mut self) -> Result<u64, Self::Error>;

    /// Read up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes read, which is short only at end of file.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Append bytes at the end of the log.
    fn append(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}
