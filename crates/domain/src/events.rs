//! The SSE wire event catalog for the Responses protocol.
//!
//! [`ResponseEvent`] covers every event this layer synthesizes. The
//! allow-list in [`is_known_event_type`] is wider: it also reserves the
//! built-in tool families (code interpreter, web/file search, image
//! generation) that richer deployments emit, so their names pass event
//! validation unchanged.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::response::{ContentPart, OutputItem, ResponseObject, ResponseStatus, SummaryPart};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload fragments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Minimal `response` object carried by events that do not embed a full
/// snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseHead {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
}

impl ResponseHead {
    pub fn of(id: impl Into<String>) -> Self {
        ResponseHead {
            id: Some(id.into()),
            status: None,
        }
    }

    /// The head used by error events: `status: failed`, id when known.
    pub fn failed(id: Option<String>) -> Self {
        ResponseHead {
            id,
            status: Some(ResponseStatus::Failed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningContent {
    pub content: String,
}

/// Remaining-budget numbers for one rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindowStats {
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every SSE event this layer emits, tagged with its dotted wire name.
///
/// Sequence numbers are not part of the payload here; the sequencer injects
/// the final `sequence_number` when it seals an event for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseEvent {
    // ── Lifecycle ────────────────────────────────────────────────────
    #[serde(rename = "response.queued")]
    Queued { response: ResponseObject },
    #[serde(rename = "response.created")]
    Created { response: ResponseObject },
    #[serde(rename = "response.in_progress")]
    InProgress { response: ResponseObject },
    #[serde(rename = "response.completed")]
    Completed { response: ResponseObject },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: ResponseObject },

    // ── Output items and text ────────────────────────────────────────
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { output_index: usize, item: OutputItem },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { output_index: usize, item: OutputItem },
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: ContentPart,
    },
    #[serde(rename = "response.content_part.done")]
    ContentPartDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: ContentPart,
    },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        item_id: String,
        output_index: usize,
        content_index: usize,
        delta: String,
    },
    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        text: String,
    },

    // ── Function calls ───────────────────────────────────────────────
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        item_id: String,
        output_index: usize,
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        item_id: String,
        output_index: usize,
        name: String,
        arguments: String,
    },
    /// Aggregate tool-call delta; `delta` is a serialized array of
    /// in-flight call snapshots.
    #[serde(rename = "response.tool_call.delta")]
    ToolCallDelta { delta: String },
    #[serde(rename = "response.tool_call.completed")]
    ToolCallCompleted {
        response: ResponseHead,
        call_id: String,
    },

    // ── Reasoning (modern band) ──────────────────────────────────────
    #[serde(rename = "response.reasoning.delta")]
    ReasoningDelta { response: ResponseHead, delta: String },
    #[serde(rename = "response.reasoning.done")]
    ReasoningDone {
        response: ResponseHead,
        reasoning: ReasoningContent,
    },
    #[serde(rename = "response.reasoning.summary.added")]
    ReasoningSummaryAdded { response: ResponseHead },
    #[serde(rename = "response.reasoning.summary.delta")]
    ReasoningSummaryDelta { response: ResponseHead, delta: String },

    // ── Reasoning (legacy band) ──────────────────────────────────────
    #[serde(rename = "response.reasoning_text.delta")]
    ReasoningTextDelta {
        item_id: String,
        output_index: usize,
        content_index: usize,
        delta: String,
    },
    #[serde(rename = "response.reasoning_text.done")]
    ReasoningTextDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        text: String,
    },
    #[serde(rename = "response.reasoning_part.added")]
    ReasoningPartAdded {
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: ContentPart,
    },
    #[serde(rename = "response.reasoning_part.done")]
    ReasoningPartDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: ContentPart,
    },

    // ── Reasoning summary item events ────────────────────────────────
    #[serde(rename = "response.reasoning_summary_part.added")]
    ReasoningSummaryPartAdded {
        item_id: String,
        output_index: usize,
        summary_index: usize,
        part: SummaryPart,
    },
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta {
        item_id: String,
        output_index: usize,
        summary_index: usize,
        delta: String,
    },
    #[serde(rename = "response.reasoning_summary_text.done")]
    ReasoningSummaryTextDone {
        item_id: String,
        output_index: usize,
        summary_index: usize,
        text: String,
    },
    #[serde(rename = "response.reasoning_summary_part.done")]
    ReasoningSummaryPartDone {
        item_id: String,
        output_index: usize,
        summary_index: usize,
        part: SummaryPart,
    },

    // ── Out-of-band ──────────────────────────────────────────────────
    #[serde(rename = "response.additional_context")]
    AdditionalContext {
        response: ResponseHead,
        context: serde_json::Value,
    },
    #[serde(rename = "response.rate_limits.updated")]
    RateLimitsUpdated {
        response: ResponseHead,
        limits: std::collections::BTreeMap<String, RateWindowStats>,
    },
    #[serde(rename = "response.error")]
    Error {
        response: ResponseHead,
        error: WireError,
    },
    /// Keepalive frame. `timestamp` is monotonic seconds since the stream
    /// was attached.
    #[serde(rename = "response.ping")]
    Ping { timestamp: f64 },
}

impl ResponseEvent {
    /// The dotted wire name this variant serializes under.
    pub fn event_type(&self) -> &'static str {
        match self {
            ResponseEvent::Queued { .. } => "response.queued",
            ResponseEvent::Created { .. } => "response.created",
            ResponseEvent::InProgress { .. } => "response.in_progress",
            ResponseEvent::Completed { .. } => "response.completed",
            ResponseEvent::Incomplete { .. } => "response.incomplete",
            ResponseEvent::OutputItemAdded { .. } => "response.output_item.added",
            ResponseEvent::OutputItemDone { .. } => "response.output_item.done",
            ResponseEvent::ContentPartAdded { .. } => "response.content_part.added",
            ResponseEvent::ContentPartDone { .. } => "response.content_part.done",
            ResponseEvent::OutputTextDelta { .. } => "response.output_text.delta",
            ResponseEvent::OutputTextDone { .. } => "response.output_text.done",
            ResponseEvent::FunctionCallArgumentsDelta { .. } => {
                "response.function_call_arguments.delta"
            }
            ResponseEvent::FunctionCallArgumentsDone { .. } => {
                "response.function_call_arguments.done"
            }
            ResponseEvent::ToolCallDelta { .. } => "response.tool_call.delta",
            ResponseEvent::ToolCallCompleted { .. } => "response.tool_call.completed",
            ResponseEvent::ReasoningDelta { .. } => "response.reasoning.delta",
            ResponseEvent::ReasoningDone { .. } => "response.reasoning.done",
            ResponseEvent::ReasoningSummaryAdded { .. } => "response.reasoning.summary.added",
            ResponseEvent::ReasoningSummaryDelta { .. } => "response.reasoning.summary.delta",
            ResponseEvent::ReasoningTextDelta { .. } => "response.reasoning_text.delta",
            ResponseEvent::ReasoningTextDone { .. } => "response.reasoning_text.done",
            ResponseEvent::ReasoningPartAdded { .. } => "response.reasoning_part.added",
            ResponseEvent::ReasoningPartDone { .. } => "response.reasoning_part.done",
            ResponseEvent::ReasoningSummaryPartAdded { .. } => {
                "response.reasoning_summary_part.added"
            }
            ResponseEvent::ReasoningSummaryTextDelta { .. } => {
                "response.reasoning_summary_text.delta"
            }
            ResponseEvent::ReasoningSummaryTextDone { .. } => {
                "response.reasoning_summary_text.done"
            }
            ResponseEvent::ReasoningSummaryPartDone { .. } => {
                "response.reasoning_summary_part.done"
            }
            ResponseEvent::AdditionalContext { .. } => "response.additional_context",
            ResponseEvent::RateLimitsUpdated { .. } => "response.rate_limits.updated",
            ResponseEvent::Error { .. } => "response.error",
            ResponseEvent::Ping { .. } => "response.ping",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sealed events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An event that has passed validation and received its sequence
/// number: the unit stored in a session's event log and written to
/// the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedEvent {
    pub sequence_number: u64,
    pub event_type: String,
    /// Compact JSON including `type` and the final `sequence_number`.
    pub json: String,
}

impl SealedEvent {
    pub fn byte_len(&self) -> usize {
        self.json.len()
    }

    /// Whether this event ends its stream.
    pub fn is_terminal(&self) -> bool {
        is_terminal_event_type(&self.event_type)
    }
}

/// The three event types after which a stream's log is frozen.
pub fn is_terminal_event_type(event_type: &str) -> bool {
    matches!(
        event_type,
        "response.completed" | "response.error" | "response.incomplete"
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Allow-list and shape validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every event type that may ever appear on the wire. The built-in tool
/// families at the end are reserved for richer deployments.
pub const ALLOWED_EVENT_TYPES: &[&str] = &[
    "response.queued",
    "response.created",
    "response.in_progress",
    "response.completed",
    "response.incomplete",
    "response.output_item.added",
    "response.output_item.done",
    "response.content_part.added",
    "response.content_part.done",
    "response.output_text.delta",
    "response.output_text.done",
    "response.function_call_arguments.delta",
    "response.function_call_arguments.done",
    "response.tool_call.delta",
    "response.tool_call.completed",
    "response.reasoning.delta",
    "response.reasoning.done",
    "response.reasoning.summary.added",
    "response.reasoning.summary.delta",
    "response.reasoning_text.delta",
    "response.reasoning_text.done",
    "response.reasoning_part.added",
    "response.reasoning_part.done",
    "response.reasoning_summary_part.added",
    "response.reasoning_summary_text.delta",
    "response.reasoning_summary_text.done",
    "response.reasoning_summary_part.done",
    "response.additional_context",
    "response.rate_limits.updated",
    "response.error",
    "response.ping",
    "response.code_interpreter_call.in_progress",
    "response.code_interpreter_call_code.delta",
    "response.code_interpreter_call_code.done",
    "response.code_interpreter_call.interpreting",
    "response.code_interpreter_call.completed",
    "response.web_search_call.in_progress",
    "response.web_search_call.searching",
    "response.web_search_call.completed",
    "response.file_search_call.in_progress",
    "response.file_search_call.searching",
    "response.file_search_call.completed",
    "response.image_generation_call.in_progress",
    "response.image_generation_call.generating",
    "response.image_generation_call.completed",
    "response.image_generation_call.partial_image",
];

pub fn is_known_event_type(event_type: &str) -> bool {
    static KNOWN: OnceLock<HashSet<&'static str>> = OnceLock::new();
    KNOWN
        .get_or_init(|| ALLOWED_EVENT_TYPES.iter().copied().collect())
        .contains(event_type)
}

/// Whether `event_type` matches the `response(.segment)+` wire shape with
/// lowercase alphanumeric/underscore segments.
pub fn event_type_shape_ok(event_type: &str) -> bool {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE
        .get_or_init(|| {
            Regex::new(r"^response(\.[a-z0-9_]+)+$").expect("static event-type pattern compiles")
        })
        .is_match(event_type)
}
