//! Clock and delay trait seams.
//!
//! The library never reads time or sleeps directly; the platform provides
//! both. On a microcontroller these map to the SDK's uptime counter and
//! busy-wait; the delay implementation must keep driving the network
//! stack's background processing while it waits, or callback-driven
//! progress (accept, receive, send-complete) stalls.

#![deny(unsafe_code)]

/// A monotonic millisecond uptime source.
pub trait Clock {
    /// Milliseconds since boot. Must never go backwards.
    fn uptime_ms(&self) -> u64;
}

/// A bounded, cooperative delay.
pub trait Delay {
    /// Wait for roughly `ms` milliseconds while letting the platform's
    /// network stack make progress.
    fn delay_ms(&mut self, ms: u32);
}
