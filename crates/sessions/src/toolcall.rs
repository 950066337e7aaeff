//! Pending tool-call bookkeeping for a paused or streaming generation.

use std::collections::HashMap;

use parlance_domain::error::{Error, Result};

/// One tool call the model has emitted and the client may still owe an
/// output for.
///
/// Lifecycle: registered, zero or more argument deltas, finalized, then
/// either awaiting output or output received. `stream_started` /
/// `stream_closed` record whether the wire has seen the item's added /
/// done markers.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    /// Id of the `function_call` output item on the wire.
    pub item_id: String,
    /// Id the client uses to address this call when submitting output.
    pub call_id: String,
    pub name: String,
    /// Argument text accumulated from deltas, or the engine's final text.
    pub arguments: String,
    /// Wire position of the item, needed when done markers are emitted
    /// after the turn that opened the item has ended.
    pub output_index: usize,
    pub output: Option<String>,
    pub stream_started: bool,
    pub stream_closed: bool,
}

impl PendingToolCall {
    pub fn waiting_for_output(&self) -> bool {
        self.output.is_none()
    }
}

/// Tracks every tool call of one response and enforces the submission
/// rules.
///
/// Calls stay in the map after their output arrives so a duplicate
/// submission is distinguishable from an unknown call id.
#[derive(Debug)]
pub struct ToolCallCoordinator {
    response_id: String,
    by_call_id: HashMap<String, PendingToolCall>,
    item_index: HashMap<String, String>,
}

impl ToolCallCoordinator {
    pub fn new(response_id: impl Into<String>) -> Self {
        ToolCallCoordinator {
            response_id: response_id.into(),
            by_call_id: HashMap::new(),
            item_index: HashMap::new(),
        }
    }

    /// Track a freshly emitted call. Its added marker is already on the
    /// wire, so `stream_started` is set.
    pub fn register(&mut self, item_id: &str, call_id: &str, name: &str, output_index: usize) {
        self.item_index
            .insert(item_id.to_string(), call_id.to_string());
        self.by_call_id.insert(
            call_id.to_string(),
            PendingToolCall {
                item_id: item_id.to_string(),
                call_id: call_id.to_string(),
                name: name.to_string(),
                arguments: String::new(),
                output_index,
                output: None,
                stream_started: true,
                stream_closed: false,
            },
        );
    }

    /// Append argument text to a call by item id. Unknown items and empty
    /// deltas are ignored.
    pub fn append_delta(&mut self, item_id: &str, delta: &str) {
        if delta.is_empty() {
            return;
        }
        if let Some(call) = self.call_by_item_mut(item_id) {
            call.arguments.push_str(delta);
        }
    }

    /// Replace accumulated arguments with the engine's authoritative final
    /// text. Empty final text keeps the accumulated deltas.
    pub fn finalize(&mut self, item_id: &str, arguments: &str) {
        if arguments.is_empty() {
            return;
        }
        if let Some(call) = self.call_by_item_mut(item_id) {
            call.arguments = arguments.to_string();
        }
    }

    /// Mark the call's done marker as emitted.
    pub fn mark_stream_closed(&mut self, call_id: &str) {
        if let Some(call) = self.by_call_id.get_mut(call_id) {
            call.stream_closed = true;
        }
    }

    /// Accept a client-supplied output for `call_id`.
    ///
    /// Returns the call record so the caller can fold the output into its
    /// conversation context. Rejected when the call id is unknown or the
    /// call already has an output.
    pub fn set_output(&mut self, call_id: &str, output: &str) -> Result<PendingToolCall> {
        let call = self.by_call_id.get_mut(call_id).ok_or_else(|| {
            Error::NotFound(format!(
                "Unknown tool_call_id '{call_id}' for response '{}'.",
                self.response_id
            ))
        })?;
        if call.output.is_some() {
            return Err(Error::Validation(format!(
                "tool_call_id '{call_id}' already completed."
            )));
        }
        call.output = Some(output.to_string());
        Ok(call.clone())
    }

    pub fn get(&self, call_id: &str) -> Option<&PendingToolCall> {
        self.by_call_id.get(call_id)
    }

    /// All known call ids, sorted for determinism.
    pub fn call_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_call_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether any registered call still awaits an output.
    pub fn has_pending(&self) -> bool {
        self.by_call_id.values().any(|c| c.waiting_for_output())
    }

    /// True when no call has ever been registered.
    pub fn is_empty(&self) -> bool {
        self.by_call_id.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.by_call_id
            .values()
            .filter(|c| c.waiting_for_output())
            .count()
    }

    /// Pending calls whose done markers have not been emitted yet, in
    /// registration-independent order sorted by item id for determinism.
    pub fn unclosed_pending(&self) -> Vec<PendingToolCall> {
        let mut calls: Vec<PendingToolCall> = self
            .by_call_id
            .values()
            .filter(|c| c.waiting_for_output() && !c.stream_closed)
            .cloned()
            .collect();
        calls.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        calls
    }

    fn call_by_item_mut(&mut self, item_id: &str) -> Option<&mut PendingToolCall> {
        let call_id = self.item_index.get(item_id)?;
        self.by_call_id.get_mut(call_id)
    }
}
