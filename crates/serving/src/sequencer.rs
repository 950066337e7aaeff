//! Seals outgoing events: shape validation plus sequence numbering.
//!
//! Sealing happens exactly once, at the single writer. Anything replayed
//! from the log afterwards is already valid, so readers never re-check.

use serde_json::{json, Value};

use parlance_domain::events::{
    event_type_shape_ok, is_known_event_type, ResponseEvent, SealedEvent,
};

/// A sealing result. `Fault` carries the substitute `response.error`
/// event the stream must end with.
#[derive(Debug)]
pub enum Sealed {
    Event(SealedEvent),
    Fault(SealedEvent),
}

/// Assigns contiguous sequence numbers and rejects malformed events
/// before they reach the log.
///
/// An event arriving with its own `sequence_number` at or ahead of the
/// counter keeps it and the counter jumps past it; a stale one is
/// overwritten.
pub struct EventSequencer {
    next_seq: u64,
    response_id: Option<String>,
}

impl EventSequencer {
    pub fn new(response_id: Option<String>) -> Self {
        EventSequencer {
            next_seq: 0,
            response_id,
        }
    }

    /// The number the next sealed event will carry.
    pub fn peek(&self) -> u64 {
        self.next_seq
    }

    pub fn next(&mut self, event: &ResponseEvent) -> Sealed {
        match serde_json::to_value(event) {
            Ok(value) => self.next_value(value),
            Err(err) => self.fault(None, &format!("Failed to serialize event: {err}")),
        }
    }

    /// Validate and seal an already-serialized event value.
    pub fn next_value(&mut self, mut value: Value) -> Sealed {
        let carried = value.get("sequence_number").and_then(Value::as_u64);

        let event_type = match Self::validate(&value) {
            Ok(event_type) => event_type,
            Err(message) => return self.fault(carried, &message),
        };

        let assigned = match carried {
            Some(seq) if seq >= self.next_seq => seq,
            _ => self.next_seq,
        };
        if let Some(obj) = value.as_object_mut() {
            obj.insert("sequence_number".to_string(), json!(assigned));
        }
        self.next_seq = assigned + 1;

        match serde_json::to_string(&value) {
            Ok(json) => Sealed::Event(SealedEvent {
                sequence_number: assigned,
                event_type,
                json,
            }),
            Err(err) => self.fault(Some(assigned), &format!("Failed to serialize event: {err}")),
        }
    }

    fn validate(value: &Value) -> Result<String, String> {
        let Some(obj) = value.as_object() else {
            return Err("Streaming event is not a JSON object.".to_string());
        };
        let event_type = match obj.get("type") {
            Some(Value::String(t)) if !t.is_empty() => t,
            Some(Value::String(_)) => return Err("Event type is empty.".to_string()),
            Some(_) => return Err("Event type is not a string.".to_string()),
            None => return Err("Event is missing a type field.".to_string()),
        };
        if event_type.contains('\n') || event_type.contains('\r') {
            return Err("Event type contains line breaks.".to_string());
        }
        if !event_type_shape_ok(event_type) {
            return Err(format!("Malformed event type '{event_type}'."));
        }
        if !is_known_event_type(event_type) {
            return Err(format!("Unknown event type '{event_type}'."));
        }
        if let Some(seq) = obj.get("sequence_number") {
            if seq.as_u64().is_none() {
                return Err("Event sequence_number must be a non-negative integer.".to_string());
            }
        }
        Ok(event_type.clone())
    }

    /// Build the substitute error event for an invalid one. The counter
    /// does not advance; the stream ends after this event.
    fn fault(&self, original_seq: Option<u64>, message: &str) -> Sealed {
        let seq = original_seq.unwrap_or(0);
        let mut response = json!({ "status": "failed" });
        if let Some(id) = &self.response_id {
            response["id"] = json!(id);
        }
        let payload = json!({
            "type": "response.error",
            "sequence_number": seq,
            "response": response,
            "error": {
                "message": message,
                "type": "stream_validation_error",
                "code": 500,
            },
        });
        let json = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
        Sealed::Fault(SealedEvent {
            sequence_number: seq,
            event_type: "response.error".to_string(),
            json,
        })
    }
}
