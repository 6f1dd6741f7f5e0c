#![forbid(unsafe_code)]

//! Run work in an isolated worker process with a call-like API.
//!
//! A [`Coordinator`] owns the naming directory both processes rendezvous
//! through and opens [`Controller`] handles. Each controller spawns one
//! `fork-worker` process, waits for its readiness notification and then
//! forwards bounded-time jobs to it. The worker pings its controller and
//! exits on its own once the controller is gone.

pub mod config;
pub mod controller;
pub mod coordinator;
pub mod directory;
pub mod errors;
pub mod identity;
pub mod ipc;
pub mod launcher;
pub mod models;
pub mod worker;

pub use config::ForkConfig;
pub use controller::Controller;
pub use coordinator::Coordinator;
pub use errors::{ForkError, Result};
pub use identity::SessionId;
