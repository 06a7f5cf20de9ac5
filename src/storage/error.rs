//! Common error types for storage operations

/// A common error type for storage operations.
///
/// This enum defines a set of common errors that can occur when working with
/// the persistent sensor log. It is designed to be simple and portable for
/// `no_std` environments.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The storage medium is not mounted.
    NotMounted,
    /// The log file could not be opened.
    OpenError,
    /// An error occurred during a read operation.
    ReadError,
    /// An error occurred during a write operation.
    WriteError,
    /// An operation was attempted on an offset that is out of bounds.
    OutOfBounds,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::NotMounted => defmt::write!(f, "NotMounted"),
            Error::OpenError => defmt::write!(f, "OpenError"),
            Error::ReadError => defmt::write!(f, "ReadError"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::OutOfBounds => defmt::write!(f, "OutOfBounds"),
        }
    }
}
