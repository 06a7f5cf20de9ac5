//! CSV sensor log: append-only records and bounded tail reads.
//!
//! Record format: `<u64 timestamp ms>,<topic>,<value>` terminated by `\n`,
//! with a single `timestamp,topic,value` header line at the start of the
//! file. The format must stay newline-delimited and append-only; the tail
//! reader depends on both.

use super::LogStore;
use core::fmt::Write;
use heapless::String;
use log::warn;

/// Header line written once when the log file is created empty.
pub const CSV_HEADER: &str = "timestamp,topic,value\n";

/// Maximum length of one CSV record including the trailing newline.
/// Longer records are truncated, never split across lines.
pub const MAX_RECORD_LEN: usize = 256;

/// The append-only CSV sensor log.
#[derive(Debug)]
pub struct SensorLog<S: LogStore> {
    store: S,
}

impl<S: LogStore> SensorLog<S> {
    /// Wrap a platform log store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Write the CSV header if the log is still empty.
    pub fn init(&mut self) -> Result<(), S::Error> {
        if self.store.size()? == 0 {
            self.store.append(CSV_HEADER.as_bytes())?;
        }
        Ok(())
    }

    /// Append one timestamped record.
    ///
    /// The record is truncated at [`MAX_RECORD_LEN`] but always ends with a
    /// newline so the file stays line-aligned.
    pub fn append(&mut self, timestamp: u64, topic: &str, value: &str) -> Result<(), S::Error> {
        let mut record: String<MAX_RECORD_LEN> = String::new();
        if write!(record, "{},{},{}\n", timestamp, topic, value).is_err() {
            warn!("csv: record truncated at {} bytes", MAX_RECORD_LEN);
            while record.len() >= MAX_RECORD_LEN {
                record.pop();
            }
            // Room was just made, the push cannot fail.
            record.push('\n').ok();
        }
        self.store.append(record.as_bytes())
    }

    /// Read the last `max_lines` complete records into `out`; see
    /// [`read_tail`].
    pub fn tail(&mut self, max_lines: usize, out: &mut [u8]) -> Result<usize, S::Error> {
        read_tail(&mut self.store, max_lines, out)
    }

    /// Access the underlying store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

/// Read the newest `max_lines` complete newline-terminated records of the
/// log into the front of `out`, returning the number of bytes written.
///
/// Only the final `out.len()` bytes of the file are read, so both I/O and
/// response size stay bounded no matter how large the log has grown. When
/// the window starts mid-file, the (possibly partial) leading line is
/// discarded; a trailing line with no newline yet is discarded as well.
pub fn read_tail<S: LogStore>(
    store: &mut S,
    max_lines: usize,
    out: &mut [u8],
) -> Result<usize, S::Error> {
    if out.is_empty() || max_lines == 0 {
        return Ok(0);
    }

    let size = store.size()?;
    let start = size.saturating_sub(out.len() as u64);
    let n = store.read_at(start, out)?;

    // Discard the partial leading line when we landed mid-file.
    let mut begin = 0;
    if start > 0 {
        match out[..n].iter().position(|&b| b == b'\n') {
            Some(pos) => begin = pos + 1,
            None => return Ok(0),
        }
    }

    // Drop a trailing record that has not been newline-terminated yet.
    let end = match out[begin..n].iter().rposition(|&b| b == b'\n') {
        Some(pos) => begin + pos + 1,
        None => return Ok(0),
    };

    // Keep only the last `max_lines` lines of the window.
    let lines = out[begin..end].iter().filter(|&&b| b == b'\n').count();
    if lines > max_lines {
        let mut skip = lines - max_lines;
        let mut i = begin;
        while skip > 0 {
            if out[i] == b'\n' {
                skip -= 1;
            }
            i += 1;
        }
        begin = i;
    }

    out.copy_within(begin..end, 0);
    Ok(end - begin)
}
