//! spyglass-v8dp: V8 debugger protocol client.
//!
//! Frames, protocol types, request correlation, shared physical connections
//! and the per-session debuggee client. The `test-support` feature adds a
//! scripted mock debuggee.

pub mod client;
pub mod connection;
pub mod correlation;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use client::{DebuggeeClient, DebuggeeEvent, DebuggeeInfo};
pub use connection::{Connection, ConnectionState, Inbound};
pub use correlation::Correlation;
pub use error::V8Error;
pub use protocol::{Event, Reply, Request, Response};
pub use registry::{ConnectionLease, ConnectionRegistry};
pub use transport::{encode_frame, FrameDecoder};
