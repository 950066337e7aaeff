//! Session state for the Parlance serving stack.
//!
//! One [`session::Session`] exists per response id while a stream or
//! background generation is alive: an append-only [`log::EventLog`] written
//! by a single producer task and replayed by any number of readers, a
//! [`toolcall::ToolCallCoordinator`] gating the tool-output pause/resume
//! protocol, and a [`context::SessionContext`] translating engine steps
//! into wire events. The [`registry::SessionRegistry`] owns lifecycle
//! eviction.

pub mod context;
pub mod log;
pub mod registry;
pub mod session;
pub mod summary;
pub mod toolcall;

pub use context::{ContextKind, SessionContext};
pub use log::EventLog;
pub use registry::SessionRegistry;
pub use session::{Session, StreamState};
pub use toolcall::{PendingToolCall, ToolCallCoordinator};
