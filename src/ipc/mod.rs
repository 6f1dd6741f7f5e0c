//! Control channel between controller and worker.
//!
//! Each process listens on a named pipe (Windows) or Unix domain socket
//! (Linux/macOS) via the `interprocess` crate and publishes that endpoint
//! in the naming directory. Calls are newline-delimited JSON envelopes.

pub mod client;
pub mod codec;
pub mod protocol;
pub mod server;
