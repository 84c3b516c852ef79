#![forbid(unsafe_code)]

//! Gateway that fronts the video platform's internal API for a TV-style
//! client and serves its static assets.
//!
//! The binary in `src/bin/backend.rs` wires these modules together; they are
//! exposed here so the router can be built and exercised without a socket.

pub mod assets;
pub mod config;
pub mod logging;
pub mod proxy;
pub mod security;
pub mod server;
pub mod upstream;
