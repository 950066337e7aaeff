//! Engine-side streaming vocabulary.
//!
//! The inference engine is consumed as a lazy sequence of [`EngineStep`]s:
//! already-parsed generation increments (text, reasoning, tool-call pieces)
//! ending in a [`EngineStep::TurnEnd`] marker. Translating these into wire
//! events is the session layer's job; this module only defines the shapes.

use std::pin::Pin;

use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::response::Usage;

/// Boxed `Send` stream, the return type used for engine generation and
/// SSE rendering.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine steps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One increment of engine output within a single turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineStep {
    /// A piece of final-channel message text.
    TextDelta { delta: String },
    /// A piece of reasoning (analysis-channel) text.
    ReasoningDelta { delta: String },
    /// The model started a tool call targeting `name`.
    ToolCallStart { name: String },
    /// A piece of argument text for the currently open tool call.
    ToolCallDelta { delta: String },
    /// The currently open tool call finished. `arguments` is the engine's
    /// authoritative full argument text; empty means "use the accumulated
    /// deltas".
    ToolCallEnd { arguments: String },
    /// The engine's turn is over. Always the last step of a turn.
    TurnEnd {
        finish_reason: FinishReason,
        usage: Usage,
    },
}

/// Why the engine stopped generating for this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of generation.
    Stop,
    /// The output-token limit cut generation short.
    Length,
    /// The engine aborted the request.
    Abort,
}
