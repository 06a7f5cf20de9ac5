//! Minimal HTTP/1.0-style status server.
//!
//! One connection at a time, one request/response pair per connection, no
//! keep-alive: the node's web surface is a status page and a log export,
//! nothing more. See [`server::StatusServer`].

pub mod server;

pub use server::{Config, DASHBOARD_HTML, StatusServer};
