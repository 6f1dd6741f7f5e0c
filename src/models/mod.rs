//! Domain model module declarations.

pub mod heartbeat;
pub mod job;
pub mod session;
