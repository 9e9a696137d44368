//! Outbound side of the core.
//!
//! # INVARIANT
//! Records are produced only by `MonitorState::apply` and handed to the writer
//! while the dispatcher lock is still held, so writes never interleave.
//! Nothing in this module feeds back into monitor state.

pub mod dedup;
pub mod event;
pub mod recorder;
