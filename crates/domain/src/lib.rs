//! Shared vocabulary for the Parlance serving stack.
//!
//! Everything the session and serving layers agree on lives here: the wire
//! event catalog for the Responses SSE protocol, request/response object
//! shapes, the engine step model, configuration, and the crate-wide error
//! type. This crate has no runtime state of its own.

pub mod config;
pub mod error;
pub mod events;
pub mod request;
pub mod response;
pub mod stream;

pub use config::ServingConfig;
pub use error::{Error, Result};
