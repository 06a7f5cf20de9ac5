//! The HTTP status server.
//!
//! Serves exactly two routes: `GET /data` returns the tail of the CSV
//! sensor log as `text/plain`; every other request gets the dashboard page
//! as `text/html`. Routing is a prefix match, not a general router, and
//! every response is `200 OK` with `Connection: close`. A missing SD card
//! shows up as a fixed error body, not a status code.

use crate::network::error::Error;
use crate::network::{Connection, Read, Write};
use crate::storage::{LogStore, SensorLog};
use crate::time::Delay;
use core::fmt::Write as FmtWrite;
use heapless::String;
use log::{debug, warn};

/// Request buffer size; longer requests are classified from their prefix.
pub const REQUEST_BUF_LEN: usize = 512;

/// Response bodies are written in slices of this size with a flush after
/// each, respecting the platform's send-buffer limits.
pub const WRITE_CHUNK_LEN: usize = 512;

/// Window buffer for the log tail export.
pub const TAIL_BUF_LEN: usize = 2048;

/// Body served on `/data` when the log store fails. Still `200 OK`.
pub const STORAGE_ERROR_BODY: &str = "SD card not mounted\n";

const REQUEST_POLL_LIMIT: u32 = 100;
const REQUEST_POLL_MS: u32 = 10;
const SEND_RETRY_LIMIT: u32 = 100;

/// Built-in dashboard page: fetches `/data` and renders the newest records.
pub const DASHBOARD_HTML: &str = "<!DOCTYPE html><html><head><title>Sensor Node</title>\
<meta name='viewport' content='width=device-width,initial-scale=1'>\
<style>body{font-family:sans-serif;margin:2em;background:#f5f5f5;color:#222}\
h2{color:#007acc}table{border-collapse:collapse;width:100%;background:#fff}\
th,td{border:1px solid #ccc;padding:4px;text-align:left}th{background:#eee}</style>\
</head><body><h2>Sensor Node Dashboard</h2>\
<button onclick='refresh()'>Refresh</button><div id='rows'>Loading...</div>\
<script>async function refresh(){const r=await fetch('/data');const t=await r.text();\
let rows='';for(const l of t.trim().split('\\n')){const [ts,topic,val]=l.split(',');\
if(!ts||!topic||!val)continue;\
rows+=`<tr><td>${new Date(Number(ts)).toLocaleTimeString()}</td><td>${topic}</td><td>${val}</td></tr>`;}\
document.getElementById('rows').innerHTML=\
`<table><tr><th>Time</th><th>Topic</th><th>Value</th></tr>${rows}</table>`;}\
window.onload=refresh;</script></body></html>";

/// Server tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct Config<'a> {
    /// Number of log records served by `/data`.
    pub tail_lines: usize,
    /// Grace period between the final flush and the close, for peers that
    /// need a moment after the ACK before the FIN.
    pub close_grace_ms: u32,
    /// Page served on the default route.
    pub index_html: &'a str,
}

impl Default for Config<'_> {
    fn default() -> Self {
        Self {
            tail_lines: 20,
            close_grace_ms: 5,
            index_html: DASHBOARD_HTML,
        }
    }
}

/// The single-connection-at-a-time HTTP responder.
#[derive(Debug, Default)]
pub struct StatusServer<'a> {
    config: Config<'a>,
}

impl<'a> StatusServer<'a> {
    /// Create a server with the given configuration.
    pub fn new(config: Config<'a>) -> Self {
        Self { config }
    }

    /// Serve one accepted connection to completion and close it.
    ///
    /// Reads the request (bounded buffer, bounded wait), classifies it,
    /// streams the response, waits for the final flush to confirm delivery
    /// and closes. The connection is consumed either way.
    pub fn handle<C, S, D>(
        &self,
        mut conn: C,
        log: &mut SensorLog<S>,
        delay: &mut D,
    ) -> Result<(), Error>
    where
        C: Connection,
        S: LogStore,
        D: Delay,
    {
        let mut request = [0u8; REQUEST_BUF_LEN];
        let len = match read_request(&mut conn, &mut request, delay) {
            Ok(len) => len,
            Err(e) => {
                let _ = conn.close();
                return Err(e);
            }
        };

        let mut tail_buf = [0u8; TAIL_BUF_LEN];
        let (content_type, body): (&str, &[u8]) = if request[..len].starts_with(b"GET /data") {
            match log.tail(self.config.tail_lines, &mut tail_buf) {
                Ok(n) => ("text/plain", &tail_buf[..n]),
                Err(e) => {
                    warn!("http: log tail read failed: {:?}", e);
                    ("text/plain", STORAGE_ERROR_BODY.as_bytes())
                }
            }
        } else {
            ("text/html", self.config.index_html.as_bytes())
        };
        debug!("http: serving {} ({} bytes)", content_type, body.len());

        let result = self.send_response(&mut conn, content_type, body, delay);
        if result.is_err() {
            let _ = conn.close();
            return result;
        }

        // The last flush confirmed delivery; give slow peers a moment
        // before the FIN.
        if self.config.close_grace_ms > 0 {
            delay.delay_ms(self.config.close_grace_ms);
        }
        conn.close().map_err(|_| Error::WriteError)
    }

    fn send_response<C: Connection, D: Delay>(
        &self,
        conn: &mut C,
        content_type: &str,
        body: &[u8],
        delay: &mut D,
    ) -> Result<(), Error> {
        let mut header: String<128> = String::new();
        write!(
            header,
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            content_type,
            body.len()
        )
        .map_err(|_| Error::ProtocolError)?;

        write_all(conn, header.as_bytes(), delay)?;
        conn.flush().map_err(|_| Error::WriteError)?;

        // Stream the body in bounded slices so it never outgrows the
        // platform's send buffer.
        for chunk in body.chunks(WRITE_CHUNK_LEN) {
            write_all(conn, chunk, delay)?;
            conn.flush().map_err(|_| Error::WriteError)?;
        }
        Ok(())
    }
}

/// Read until the end of the request headers, the buffer is full, or the
/// bounded wait expires. Returns the number of bytes captured.
fn read_request<C: Connection, D: Delay>(
    conn: &mut C,
    buf: &mut [u8],
    delay: &mut D,
) -> Result<usize, Error> {
    let mut total = 0;
    let mut idle_polls = 0;
    loop {
        match conn.read(&mut buf[total..]) {
            Ok(0) => {
                idle_polls += 1;
                if idle_polls > REQUEST_POLL_LIMIT {
                    return if total > 0 { Ok(total) } else { Err(Error::Timeout) };
                }
                delay.delay_ms(REQUEST_POLL_MS);
            }
            Ok(n) => {
                total += n;
                idle_polls = 0;
                if total == buf.len() || find_header_end(&buf[..total]) {
                    return Ok(total);
                }
            }
            Err(_) => return Err(Error::ReadError),
        }
    }
}

fn find_header_end(data: &[u8]) -> bool {
    data.windows(4).any(|w| w == b"\r\n\r\n")
}

fn write_all<C: Connection, D: Delay>(
    conn: &mut C,
    mut data: &[u8],
    delay: &mut D,
) -> Result<(), Error> {
    let mut stalls = 0;
    while !data.is_empty() {
        match conn.write(data) {
            Ok(0) => {
                // Send buffer full; give the stack time to drain it.
                stalls += 1;
                if stalls > SEND_RETRY_LIMIT {
                    return Err(Error::WriteError);
                }
                delay.delay_ms(1);
            }
            Ok(n) => {
                stalls = 0;
                data = &data[n..];
            }
            Err(_) => return Err(Error::WriteError),
        }
    }
    Ok(())
}
