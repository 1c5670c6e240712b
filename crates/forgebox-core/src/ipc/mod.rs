//! Inter-process communication with the shared host process.
//!
//! This module provides the protocol and the session handle used by
//! [`HostExecutor`](crate::HostExecutor).

pub mod protocol;
mod session;

pub use protocol::{HostCommand, HostResponse, MAX_FRAME_BYTES, read_message, write_message};
pub use session::{BRIDGE_PROGRAM, HostKillHandle, HostSession};
