//! Client-visible state reducers.

pub mod chat;
