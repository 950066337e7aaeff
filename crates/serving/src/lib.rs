//! The Parlance serving stack.
//!
//! Implements the Responses protocol surface: request admission and
//! validation, per-user rate limiting, the producer task that turns engine
//! steps into a sealed event log, SSE rendering with coalescing and
//! keep-alive pings, the terminal-response store, and the tool-output
//! pause/resume loop.

pub mod coalesce;
pub mod engine;
pub mod orchestrator;
pub mod ratelimit;
pub mod sequencer;
pub mod service;
pub mod sse;
pub mod store;

pub use coalesce::ChunkCoalescer;
pub use engine::{Engine, EnginePrompt, StubEngine};
pub use ratelimit::{Admission, RateLimiter};
pub use sequencer::{EventSequencer, Sealed};
pub use service::{Ack, CreateOutcome, ResponsesService, RetrieveOutcome};
pub use store::ResponseStore;
