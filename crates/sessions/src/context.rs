//! Translates engine steps into wire events for one session.

use parlance_domain::events::{ReasoningContent, ResponseEvent, ResponseHead};
use parlance_domain::request::{InputItem, ResponsesRequest};
use parlance_domain::response::{
    function_call_item_id, message_id, reasoning_id, tool_call_id, ContentPart, ItemStatus,
    OutputItem, SummaryPart, Usage,
};
use parlance_domain::stream::{EngineStep, FinishReason};

use crate::summary::SummaryExtractor;
use crate::toolcall::ToolCallCoordinator;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a session's engine output is structured, chosen once at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Plain generation: an optional reasoning phase followed by message
    /// text, no tool calls.
    Simple,
    /// Channel-structured generation: reasoning, tool calls addressed to
    /// `functions.<name>`, and final text may interleave.
    Harmony,
}

impl ContextKind {
    pub fn for_request(request: &ResponsesRequest) -> Self {
        if request.tools.is_empty() {
            ContextKind::Simple
        } else {
            ContextKind::Harmony
        }
    }
}

// ── the currently open output item ───────────────────────────────────

#[derive(Debug)]
enum OpenItem {
    Message {
        id: String,
        index: usize,
        text: String,
    },
    Reasoning {
        id: String,
        index: usize,
        text: String,
    },
    ToolCall {
        item_id: String,
        index: usize,
        call_id: String,
        name: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session translation state: the conversation so far, the item that
/// is currently streaming, accumulated usage, and the wire-profile flags
/// deciding which event bands to emit.
pub struct SessionContext {
    kind: ContextKind,
    response_id: String,
    compat: bool,
    legacy_reasoning: bool,
    modern_reasoning: bool,
    history: Vec<InputItem>,
    completed_items: Vec<OutputItem>,
    next_index: usize,
    open: Option<OpenItem>,
    usage: Usage,
    finish_reason: Option<FinishReason>,
    summary: SummaryExtractor,
}

impl SessionContext {
    pub fn new(
        kind: ContextKind,
        response_id: impl Into<String>,
        history: Vec<InputItem>,
        compat: bool,
        legacy_reasoning: bool,
        modern_reasoning: bool,
    ) -> Self {
        SessionContext {
            kind,
            response_id: response_id.into(),
            compat,
            legacy_reasoning,
            modern_reasoning,
            history,
            completed_items: Vec::new(),
            next_index: 0,
            open: None,
            usage: Usage::default(),
            finish_reason: None,
            summary: SummaryExtractor::default(),
        }
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    /// The conversation items an engine prompt is rendered from.
    pub fn history(&self) -> &[InputItem] {
        &self.history
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Every item completed so far, in output order.
    pub fn output_items(&self) -> Vec<OutputItem> {
        self.completed_items.clone()
    }

    /// Claim the next output index (also used for echoed items that are
    /// not produced through engine steps).
    pub fn next_output_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn head(&self) -> ResponseHead {
        ResponseHead::of(self.response_id.clone())
    }

    // ── step translation ─────────────────────────────────────────────

    /// Translate one engine step into the wire events it implies,
    /// updating conversation state and the tool-call coordinator.
    pub fn on_step(
        &mut self,
        step: EngineStep,
        tools: &mut ToolCallCoordinator,
    ) -> Vec<ResponseEvent> {
        let mut events = Vec::new();
        match step {
            EngineStep::TextDelta { delta } => {
                self.ensure_message_open(&mut events, tools);
                if let Some(OpenItem::Message { id, index, text }) = &mut self.open {
                    text.push_str(&delta);
                    events.push(ResponseEvent::OutputTextDelta {
                        item_id: id.clone(),
                        output_index: *index,
                        content_index: 0,
                        delta,
                    });
                }
            }
            EngineStep::ReasoningDelta { delta } => {
                self.ensure_reasoning_open(&mut events, tools);
                if let Some(OpenItem::Reasoning { id, index, text }) = &mut self.open {
                    text.push_str(&delta);
                    if self.legacy_reasoning || self.compat {
                        events.push(ResponseEvent::ReasoningTextDelta {
                            item_id: id.clone(),
                            output_index: *index,
                            content_index: 0,
                            delta: delta.clone(),
                        });
                    }
                    if self.modern_reasoning {
                        events.push(ResponseEvent::ReasoningDelta {
                            response: ResponseHead::of(self.response_id.clone()),
                            delta,
                        });
                    }
                }
            }
            EngineStep::ToolCallStart { name } => {
                self.close_open_item(&mut events, tools);
                let item_id = function_call_item_id();
                let call_id = tool_call_id();
                let index = self.next_output_index();
                tools.register(&item_id, &call_id, &name, index);
                events.push(ResponseEvent::OutputItemAdded {
                    output_index: index,
                    item: OutputItem::FunctionCall {
                        id: item_id.clone(),
                        status: ItemStatus::InProgress,
                        call_id: call_id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                    },
                });
                self.open = Some(OpenItem::ToolCall {
                    item_id,
                    index,
                    call_id,
                    name,
                });
            }
            EngineStep::ToolCallDelta { delta } => {
                if let Some(OpenItem::ToolCall {
                    item_id,
                    index,
                    call_id,
                    name,
                }) = &self.open
                {
                    tools.append_delta(item_id, &delta);
                    if self.kind == ContextKind::Harmony && !self.compat {
                        let accumulated = tools
                            .get(call_id)
                            .map(|c| c.arguments.clone())
                            .unwrap_or_default();
                        let snapshot = serde_json::json!([{
                            "type": "tool_call",
                            "id": item_id,
                            "call_id": call_id,
                            "name": name,
                            "arguments": accumulated,
                            "status": "in_progress",
                        }]);
                        if let Ok(serialized) = serde_json::to_string(&snapshot) {
                            events.push(ResponseEvent::ToolCallDelta { delta: serialized });
                        }
                    }
                    events.push(ResponseEvent::FunctionCallArgumentsDelta {
                        item_id: item_id.clone(),
                        output_index: *index,
                        delta,
                    });
                }
            }
            EngineStep::ToolCallEnd { arguments } => {
                if let Some(OpenItem::ToolCall { item_id, .. }) = &self.open {
                    tools.finalize(item_id, &arguments);
                    self.close_tool_call(&mut events, tools, true);
                }
            }
            EngineStep::TurnEnd {
                finish_reason,
                usage,
            } => {
                // an unfinished tool call stays pending for the pause
                // sweep; anything else closes normally
                if matches!(self.open, Some(OpenItem::ToolCall { .. })) {
                    self.open = None;
                } else {
                    self.close_open_item(&mut events, tools);
                }
                self.usage.add(&usage);
                self.finish_reason = Some(finish_reason);
            }
        }
        events
    }

    /// Emit done markers for every pending call whose stream is still
    /// open, ahead of a tool-output pause.
    pub fn close_unfinished_tool_calls(
        &mut self,
        tools: &mut ToolCallCoordinator,
    ) -> Vec<ResponseEvent> {
        let mut events = Vec::new();
        for call in tools.unclosed_pending() {
            events.push(ResponseEvent::ToolCallCompleted {
                response: self.head(),
                call_id: call.call_id.clone(),
            });
            let item = OutputItem::FunctionCall {
                id: call.item_id.clone(),
                status: ItemStatus::Completed,
                call_id: call.call_id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            };
            events.push(ResponseEvent::OutputItemDone {
                output_index: call.output_index,
                item: item.clone(),
            });
            tools.mark_stream_closed(&call.call_id);
            self.completed_items.push(item);
        }
        events
    }

    /// Fold an accepted tool output into the conversation for the next
    /// engine turn.
    pub fn absorb_tool_output(&mut self, call: &crate::toolcall::PendingToolCall, output: &str) {
        self.history.push(InputItem::FunctionCall {
            id: Some(call.item_id.clone()),
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            status: Some(ItemStatus::Completed),
        });
        self.history.push(InputItem::FunctionCallOutput {
            id: None,
            call_id: call.call_id.clone(),
            output: output.to_string(),
        });
    }

    // ── item open/close helpers ──────────────────────────────────────

    fn ensure_message_open(
        &mut self,
        events: &mut Vec<ResponseEvent>,
        tools: &mut ToolCallCoordinator,
    ) {
        if matches!(self.open, Some(OpenItem::Message { .. })) {
            return;
        }
        self.close_open_item(events, tools);
        let id = message_id();
        let index = self.next_output_index();
        events.push(ResponseEvent::OutputItemAdded {
            output_index: index,
            item: OutputItem::Message {
                id: id.clone(),
                status: ItemStatus::InProgress,
                role: "assistant".to_string(),
                content: Vec::new(),
            },
        });
        events.push(ResponseEvent::ContentPartAdded {
            item_id: id.clone(),
            output_index: index,
            content_index: 0,
            part: ContentPart::output_text(""),
        });
        self.open = Some(OpenItem::Message {
            id,
            index,
            text: String::new(),
        });
    }

    fn ensure_reasoning_open(
        &mut self,
        events: &mut Vec<ResponseEvent>,
        tools: &mut ToolCallCoordinator,
    ) {
        if matches!(self.open, Some(OpenItem::Reasoning { .. })) {
            return;
        }
        self.close_open_item(events, tools);
        let id = reasoning_id();
        let index = self.next_output_index();
        events.push(ResponseEvent::OutputItemAdded {
            output_index: index,
            item: OutputItem::Reasoning {
                id: id.clone(),
                status: ItemStatus::InProgress,
                content: Vec::new(),
                summary: Vec::new(),
            },
        });
        events.push(ResponseEvent::ReasoningPartAdded {
            item_id: id.clone(),
            output_index: index,
            content_index: 0,
            part: ContentPart::ReasoningText {
                text: String::new(),
            },
        });
        self.open = Some(OpenItem::Reasoning {
            id,
            index,
            text: String::new(),
        });
    }

    fn close_open_item(&mut self, events: &mut Vec<ResponseEvent>, tools: &mut ToolCallCoordinator) {
        match self.open.take() {
            None => {}
            Some(OpenItem::Message { id, index, text }) => {
                self.close_message(events, id, index, text);
            }
            Some(OpenItem::Reasoning { id, index, text }) => {
                self.close_reasoning(events, id, index, text);
            }
            Some(tool_call) => {
                // engine moved on without a ToolCallEnd; close with the
                // accumulated arguments
                self.open = Some(tool_call);
                self.close_tool_call(events, tools, false);
            }
        }
    }

    fn close_message(
        &mut self,
        events: &mut Vec<ResponseEvent>,
        id: String,
        index: usize,
        text: String,
    ) {
        events.push(ResponseEvent::OutputTextDone {
            item_id: id.clone(),
            output_index: index,
            content_index: 0,
            text: text.clone(),
        });
        events.push(ResponseEvent::ContentPartDone {
            item_id: id.clone(),
            output_index: index,
            content_index: 0,
            part: ContentPart::output_text(text.clone()),
        });
        let item = OutputItem::Message {
            id: id.clone(),
            status: ItemStatus::Completed,
            role: "assistant".to_string(),
            content: vec![ContentPart::output_text(text.clone())],
        };
        events.push(ResponseEvent::OutputItemDone {
            output_index: index,
            item: item.clone(),
        });
        self.completed_items.push(item);
        self.history.push(InputItem::Message {
            id: Some(id),
            role: "assistant".to_string(),
            content: vec![ContentPart::output_text(text)],
        });
    }

    fn close_reasoning(
        &mut self,
        events: &mut Vec<ResponseEvent>,
        id: String,
        index: usize,
        text: String,
    ) {
        if self.legacy_reasoning || self.compat {
            events.push(ResponseEvent::ReasoningTextDone {
                item_id: id.clone(),
                output_index: index,
                content_index: 0,
                text: text.clone(),
            });
        }
        if self.modern_reasoning {
            events.push(ResponseEvent::ReasoningDone {
                response: self.head(),
                reasoning: ReasoningContent {
                    content: text.clone(),
                },
            });
        }
        events.push(ResponseEvent::ReasoningPartDone {
            item_id: id.clone(),
            output_index: index,
            content_index: 0,
            part: ContentPart::ReasoningText { text: text.clone() },
        });

        let summary = self.summary.extract(&text);
        if let Some(summary_text) = &summary {
            events.push(ResponseEvent::ReasoningSummaryAdded {
                response: self.head(),
            });
            for (summary_index, chunk) in self.summary.chunked(summary_text).into_iter().enumerate()
            {
                events.push(ResponseEvent::ReasoningSummaryDelta {
                    response: self.head(),
                    delta: chunk.clone(),
                });
                events.push(ResponseEvent::ReasoningSummaryPartAdded {
                    item_id: id.clone(),
                    output_index: index,
                    summary_index,
                    part: SummaryPart::text(""),
                });
                events.push(ResponseEvent::ReasoningSummaryTextDelta {
                    item_id: id.clone(),
                    output_index: index,
                    summary_index,
                    delta: chunk.clone(),
                });
                events.push(ResponseEvent::ReasoningSummaryTextDone {
                    item_id: id.clone(),
                    output_index: index,
                    summary_index,
                    text: chunk.clone(),
                });
                events.push(ResponseEvent::ReasoningSummaryPartDone {
                    item_id: id.clone(),
                    output_index: index,
                    summary_index,
                    part: SummaryPart::text(chunk),
                });
            }
        }

        let item = OutputItem::Reasoning {
            id,
            status: ItemStatus::Completed,
            content: vec![ContentPart::ReasoningText { text }],
            summary: summary.map(|s| vec![SummaryPart::text(s)]).unwrap_or_default(),
        };
        events.push(ResponseEvent::OutputItemDone {
            output_index: index,
            item: item.clone(),
        });
        self.completed_items.push(item);
    }

    fn close_tool_call(
        &mut self,
        events: &mut Vec<ResponseEvent>,
        tools: &mut ToolCallCoordinator,
        with_arguments_done: bool,
    ) {
        let Some(OpenItem::ToolCall {
            item_id,
            index,
            call_id,
            name,
        }) = self.open.take()
        else {
            return;
        };
        let arguments = tools
            .get(&call_id)
            .map(|c| c.arguments.clone())
            .unwrap_or_default();
        if with_arguments_done {
            events.push(ResponseEvent::FunctionCallArgumentsDone {
                item_id: item_id.clone(),
                output_index: index,
                name: name.clone(),
                arguments: arguments.clone(),
            });
        }
        events.push(ResponseEvent::ToolCallCompleted {
            response: self.head(),
            call_id: call_id.clone(),
        });
        let item = OutputItem::FunctionCall {
            id: item_id,
            status: ItemStatus::Completed,
            call_id: call_id.clone(),
            name,
            arguments,
        };
        events.push(ResponseEvent::OutputItemDone {
            output_index: index,
            item: item.clone(),
        });
        tools.mark_stream_closed(&call_id);
        self.completed_items.push(item);
    }
}
