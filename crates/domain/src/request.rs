//! Request shapes for the Responses API.

use serde::{Deserialize, Serialize};

use crate::response::{function_call_item_id, message_id, ContentPart, ItemStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input items
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An item in a request's `input` array.
///
/// `function_call` items replay calls from a previous response;
/// `function_call_output` items deliver tool results for a continuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        role: String,
        content: Vec<ContentPart>,
    },
    FunctionCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        name: String,
        arguments: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ItemStatus>,
    },
    FunctionCallOutput {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        output: String,
    },
}

impl InputItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        InputItem::Message {
            id: None,
            role: "user".to_string(),
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            InputItem::Message { id, .. }
            | InputItem::FunctionCall { id, .. }
            | InputItem::FunctionCallOutput { id, .. } => id.as_deref(),
        }
    }

    fn assign_id(&mut self, position: usize) {
        let generated = match self {
            InputItem::Message { id, .. } => {
                if id.is_some() {
                    return;
                }
                (id, message_id())
            }
            InputItem::FunctionCall { id, .. } => {
                if id.is_some() {
                    return;
                }
                (id, function_call_item_id())
            }
            InputItem::FunctionCallOutput { id, .. } => {
                if id.is_some() {
                    return;
                }
                (id, format!("item_{}_{}", position, uuid::Uuid::new_v4()))
            }
        };
        *generated.0 = Some(generated.1);
    }
}

/// The `input` field: either a bare user string or a structured item list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestInput {
    Text(String),
    Items(Vec<InputItem>),
}

impl Default for RequestInput {
    fn default() -> Self {
        RequestInput::Text(String::new())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A function tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolSpec {
    pub fn function(name: impl Into<String>) -> Self {
        ToolSpec {
            kind: "function".to_string(),
            name: name.into(),
            description: None,
            parameters: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A `POST /v1/responses` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsesRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub input: RequestInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub background: bool,
    /// Persist the terminal response for later retrieval and chaining.
    #[serde(default = "d_true")]
    pub store: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_salt: Option<String>,
}

fn d_true() -> bool {
    true
}

impl Default for ResponsesRequest {
    fn default() -> Self {
        ResponsesRequest {
            model: None,
            input: RequestInput::default(),
            instructions: None,
            stream: false,
            background: false,
            store: d_true(),
            previous_response_id: None,
            service_tier: None,
            user: None,
            max_output_tokens: None,
            temperature: None,
            top_p: None,
            tools: Vec::new(),
            request_id: None,
            priority: None,
            cache_salt: None,
        }
    }
}

impl ResponsesRequest {
    /// Normalize `input` into an item list with every item carrying an id.
    ///
    /// A bare string becomes a single user message with an `input_text`
    /// part; list items keep their ids and get generated ones when missing.
    pub fn normalized_input(&self) -> Vec<InputItem> {
        let mut items = match &self.input {
            RequestInput::Text(text) => {
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![InputItem::user_text(text.clone())]
                }
            }
            RequestInput::Items(items) => items.clone(),
        };
        for (position, item) in items.iter_mut().enumerate() {
            item.assign_id(position);
        }
        items
    }

    /// Tool-output items carried in `input`, for continuation requests.
    pub fn function_call_outputs(&self) -> Vec<(String, String)> {
        match &self.input {
            RequestInput::Text(_) => Vec::new(),
            RequestInput::Items(items) => items
                .iter()
                .filter_map(|item| match item {
                    InputItem::FunctionCallOutput { call_id, output, .. } => {
                        Some((call_id.clone(), output.clone()))
                    }
                    _ => None,
                })
                .collect(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-output submission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Body of a tool-output submission for a paused stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutputsPayload {
    #[serde(default)]
    pub output: Vec<ToolOutputEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutputEntry {
    pub tool_call_id: String,
    pub output: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input-item listing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One page of a response's recorded input items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputItemList {
    pub object: String,
    pub data: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,
    pub has_more: bool,
}
