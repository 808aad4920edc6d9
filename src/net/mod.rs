//! Socket ownership and the caller-facing client handle.

pub mod client;
pub mod transport;
