//! Integration tests: drive the full service stack end to end with a
//! scripted engine and assert at the wire (SSE frame) level.
//!
//! Covered flows:
//! - streaming lifecycle from `queued` to `completed` with contiguous
//!   sequence numbers and the `[DONE]` trailer
//! - synchronous generation cut short by the output-token limit
//! - the tool-call loop: pause, output submission, duplicate and unknown
//!   ids, resume, and the same loop via chained requests
//! - compatibility mode's stream-per-exchange continuation
//! - per-user rate limiting across requests
//! - background responses: snapshot, completion, cancel
//! - replay cursors and client-disconnect teardown

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use parlance_domain::config::{RateLimitConfig, ServingConfig, SessionsConfig, StreamConfig};
use parlance_domain::error::Error;
use parlance_domain::request::{
    InputItem, RequestInput, ResponsesRequest, ToolOutputEntry, ToolOutputsPayload, ToolSpec,
};
use parlance_domain::response::{OutputItem, ResponseStatus, Usage};
use parlance_domain::stream::{BoxStream, EngineStep, FinishReason};
use parlance_serving::{CreateOutcome, ResponsesService, RetrieveOutcome, StubEngine};

// ── harness ─────────────────────────────────────────────────────────────

fn service_with(cfg: ServingConfig) -> (ResponsesService, Arc<StubEngine>) {
    let engine = Arc::new(StubEngine::new());
    let service = ResponsesService::new(cfg, engine.clone());
    (service, engine)
}

/// Stream config with fast pings so coalesced frames surface quickly.
fn chatty_stream() -> StreamConfig {
    StreamConfig {
        ping_interval_seconds: 0.02,
        ..Default::default()
    }
}

fn text_request(text: &str) -> ResponsesRequest {
    ResponsesRequest {
        input: RequestInput::Text(text.to_string()),
        ..Default::default()
    }
}

fn text_turn(chunks: &[&str]) -> Vec<EngineStep> {
    let mut steps: Vec<EngineStep> = chunks
        .iter()
        .map(|c| EngineStep::TextDelta {
            delta: (*c).to_string(),
        })
        .collect();
    steps.push(EngineStep::TurnEnd {
        finish_reason: FinishReason::Stop,
        usage: Usage::turn(7, 3),
    });
    steps
}

fn tool_turn(calls: &[(&str, &str)]) -> Vec<EngineStep> {
    let mut steps = Vec::new();
    for (name, args) in calls {
        steps.push(EngineStep::ToolCallStart {
            name: (*name).to_string(),
        });
        steps.push(EngineStep::ToolCallDelta {
            delta: (*args).to_string(),
        });
        steps.push(EngineStep::ToolCallEnd {
            arguments: String::new(),
        });
    }
    steps.push(EngineStep::TurnEnd {
        finish_reason: FinishReason::Stop,
        usage: Usage::turn(5, 4),
    });
    steps
}

// ── SSE frame plumbing ──────────────────────────────────────────────────

/// Split raw SSE text into `(event_type, json)` pairs, dropping `[DONE]`.
fn parse_frames(batches: &[String]) -> Vec<(String, String)> {
    let mut frames = Vec::new();
    let text = batches.concat();
    for block in text.split("\n\n").filter(|b| !b.trim().is_empty()) {
        if block.trim() == "data: [DONE]" {
            continue;
        }
        let mut event_type = String::new();
        let mut data = String::new();
        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("event: ") {
                event_type = rest.to_string();
            } else if let Some(rest) = line.strip_prefix("data: ") {
                data = rest.to_string();
            }
        }
        frames.push((event_type, data));
    }
    frames
}

fn parse_batch(batch: &str) -> Vec<(String, String)> {
    parse_frames(std::slice::from_ref(&batch.to_string()))
}

/// Drain the stream to its end and return every raw batch.
async fn collect_stream(outcome: CreateOutcome) -> Vec<String> {
    let CreateOutcome::Stream(mut stream) = outcome else {
        panic!("expected a stream outcome");
    };
    let mut batches = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("stream stalled")
        {
            Some(batch) => batches.push(batch),
            None => return batches,
        }
    }
}

/// Read batches until a frame of `stop_type` has been seen.
async fn read_until(
    stream: &mut BoxStream<'static, String>,
    frames: &mut Vec<(String, String)>,
    stop_type: &str,
) {
    loop {
        if frames.iter().any(|(t, _)| t == stop_type) {
            return;
        }
        let batch = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("stream stalled")
            .expect("stream ended before the expected frame");
        frames.extend(parse_batch(&batch));
    }
}

/// Read batches until the stream ends.
async fn read_to_end(stream: &mut BoxStream<'static, String>, frames: &mut Vec<(String, String)>) {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("stream stalled")
        {
            Some(batch) => frames.extend(parse_batch(&batch)),
            None => return,
        }
    }
}

fn seq_of(json: &str) -> u64 {
    let value: serde_json::Value = serde_json::from_str(json).unwrap();
    value["sequence_number"].as_u64().unwrap()
}

fn response_id_from(frames: &[(String, String)]) -> String {
    frames
        .iter()
        .find_map(|(_, json)| {
            let value: serde_json::Value = serde_json::from_str(json).ok()?;
            Some(value.get("response")?.get("id")?.as_str()?.to_string())
        })
        .expect("no frame carried a response id")
}

/// `call_id`s of function-call items announced on the stream, in order.
fn call_ids_from(frames: &[(String, String)]) -> Vec<String> {
    frames
        .iter()
        .filter(|(t, _)| t == "response.output_item.added")
        .filter_map(|(_, json)| {
            let value: serde_json::Value = serde_json::from_str(json).ok()?;
            let item = value.get("item")?;
            if item.get("type")?.as_str()? == "function_call" {
                Some(item.get("call_id")?.as_str()?.to_string())
            } else {
                None
            }
        })
        .collect()
}

fn outputs(entries: &[(&str, &str)]) -> ToolOutputsPayload {
    ToolOutputsPayload {
        output: entries
            .iter()
            .map(|(call_id, output)| ToolOutputEntry {
                tool_call_id: (*call_id).to_string(),
                output: (*output).to_string(),
            })
            .collect(),
    }
}

// ── streaming lifecycle ─────────────────────────────────────────────────

#[tokio::test]
async fn streaming_lifecycle_orders_events_and_trails_done() {
    let (service, engine) = service_with(ServingConfig::default());
    engine.push_turn(text_turn(&["Hello", ", world"]));

    let request = ResponsesRequest {
        stream: true,
        max_output_tokens: Some(64),
        ..text_request("Say hello")
    };
    let batches = collect_stream(service.create(request, None).await.unwrap()).await;
    let frames = parse_frames(&batches);

    let types: Vec<&str> = frames.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "response.queued",
            "response.created",
            "response.in_progress",
            "response.output_item.added",
            "response.content_part.added",
            "response.output_text.delta",
            "response.output_text.delta",
            "response.output_text.done",
            "response.content_part.done",
            "response.output_item.done",
            "response.completed",
        ]
    );
    for (i, (_, json)) in frames.iter().enumerate() {
        assert_eq!(seq_of(json), i as u64);
    }
    assert!(batches.concat().ends_with("data: [DONE]\n\n"));

    // the terminal body is also retrievable
    let id = response_id_from(&frames);
    match service.retrieve(&id, None, false).await.unwrap() {
        RetrieveOutcome::Json(response) => {
            assert_eq!(response.status, ResponseStatus::Completed);
            assert_eq!(response.usage.unwrap().total_tokens, 10);
        }
        _ => panic!("expected a body"),
    }
}

// ── synchronous length stop ─────────────────────────────────────────────

#[tokio::test]
async fn sync_length_stop_reports_incomplete() {
    let (service, engine) = service_with(ServingConfig::default());
    engine.push_turn(vec![
        EngineStep::TextDelta {
            delta: "truncat".to_string(),
        },
        EngineStep::TurnEnd {
            finish_reason: FinishReason::Length,
            usage: Usage::turn(9, 64),
        },
    ]);

    let request = ResponsesRequest {
        max_output_tokens: Some(64),
        ..text_request("write a novel")
    };
    let response = match service.create(request, None).await.unwrap() {
        CreateOutcome::Json(response) => response,
        _ => panic!("expected a synchronous body"),
    };
    assert_eq!(response.status, ResponseStatus::Incomplete);
    assert_eq!(
        response.incomplete_details.as_ref().unwrap().reason,
        "max_output_tokens"
    );
    assert_eq!(response.usage.as_ref().unwrap().total_tokens, 73);
    assert_eq!(response.output.len(), 1);

    match service.retrieve(&response.id, None, false).await.unwrap() {
        RetrieveOutcome::Json(stored) => assert_eq!(stored.status, ResponseStatus::Incomplete),
        _ => panic!("expected a body"),
    }
}

// ── the tool-call loop, interactive mode ────────────────────────────────

#[tokio::test]
async fn tool_outputs_resume_a_paused_stream() {
    let cfg = ServingConfig {
        stream: chatty_stream(),
        sessions: SessionsConfig {
            tool_output_timeout_seconds: 5.0,
            ..Default::default()
        },
        ..Default::default()
    };
    let (service, engine) = service_with(cfg);
    engine.push_turn(tool_turn(&[
        ("lookup_weather", r#"{"city":"Paris"}"#),
        ("lookup_time", r#"{"zone":"CET"}"#),
    ]));
    engine.push_turn(text_turn(&["It is mild."]));

    let request = ResponsesRequest {
        stream: true,
        tools: vec![
            ToolSpec::function("lookup_weather"),
            ToolSpec::function("lookup_time"),
        ],
        ..text_request("weather and time please")
    };
    let mut stream = match service.create(request, None).await.unwrap() {
        CreateOutcome::Stream(stream) => stream,
        _ => panic!("expected a stream"),
    };

    let mut frames = Vec::new();
    read_until(&mut stream, &mut frames, "response.function_call_arguments.done").await;
    let id = response_id_from(&frames);
    let calls = {
        // both items are announced before the pause
        let mut seen = Vec::new();
        while seen.len() < 2 {
            seen = call_ids_from(&frames);
            if seen.len() < 2 {
                read_until(&mut stream, &mut frames, "response.ping").await;
                frames.retain(|(t, _)| t != "response.ping");
            }
        }
        seen
    };

    // the full argument text rides the done marker
    let args_done = frames
        .iter()
        .find(|(t, _)| t == "response.function_call_arguments.done")
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&args_done.1).unwrap();
    assert_eq!(value["arguments"].as_str().unwrap(), r#"{"city":"Paris"}"#);

    // unknown id is a 404, not a validation error
    let err = service
        .submit_tool_outputs(&id, outputs(&[("call_nope", "x")]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::NotFound(_)));

    // first output accepted, duplicate rejected
    let ack = service
        .submit_tool_outputs(&id, outputs(&[(calls[0].as_str(), r#""18C""#)]))
        .await
        .unwrap();
    assert_eq!(ack.id, id);
    assert_eq!(ack.status, ResponseStatus::InProgress);

    let err = service
        .submit_tool_outputs(&id, outputs(&[(calls[0].as_str(), r#""18C""#)]))
        .await
        .err()
        .unwrap();
    match err {
        Error::Validation(msg) => assert!(msg.contains("already completed")),
        other => panic!("unexpected error: {other:?}"),
    }

    // second output wakes the producer and the stream runs to completion
    service
        .submit_tool_outputs(&id, outputs(&[(calls[1].as_str(), r#""09:00""#)]))
        .await
        .unwrap();
    read_to_end(&mut stream, &mut frames).await;
    frames.retain(|(t, _)| t != "response.ping");

    let last = frames.last().unwrap();
    assert_eq!(last.0, "response.completed");
    assert!(frames.iter().any(|(t, _)| t == "response.output_text.delta"));

    // the resumed prompt carried the tool outputs back to the engine
    let prompts = engine.prompts();
    assert_eq!(prompts.len(), 2);
    let fed_outputs = prompts[1]
        .items
        .iter()
        .filter(|item| matches!(item, InputItem::FunctionCallOutput { .. }))
        .count();
    assert_eq!(fed_outputs, 2);
}

// ── the tool-call loop, synchronous chaining ────────────────────────────

#[tokio::test]
async fn sync_tool_calls_complete_and_chain() {
    let (service, engine) = service_with(ServingConfig::default());
    engine.push_turn(tool_turn(&[("lookup", r#"{"k":1}"#)]));
    engine.push_turn(text_turn(&["the answer"]));

    let request = ResponsesRequest {
        tools: vec![ToolSpec::function("lookup")],
        ..text_request("question")
    };
    let first = match service.create(request, None).await.unwrap() {
        CreateOutcome::Json(response) => response,
        _ => panic!("expected a synchronous body"),
    };
    assert_eq!(first.status, ResponseStatus::Completed);
    let call_id = match &first.output[0] {
        OutputItem::FunctionCall { call_id, .. } => call_id.clone(),
        other => panic!("unexpected item: {other:?}"),
    };

    let continuation = ResponsesRequest {
        previous_response_id: Some(first.id.clone()),
        input: RequestInput::Items(vec![InputItem::FunctionCallOutput {
            id: None,
            call_id,
            output: r#""42""#.to_string(),
        }]),
        ..Default::default()
    };
    let second = match service.create(continuation, None).await.unwrap() {
        CreateOutcome::Json(response) => response,
        _ => panic!("expected a synchronous body"),
    };
    assert_eq!(second.status, ResponseStatus::Completed);
    assert_eq!(second.previous_response_id.as_deref(), Some(first.id.as_str()));
    let text = second
        .output
        .iter()
        .find_map(|item| match item {
            OutputItem::Message { content, .. } => Some(content[0].text().to_string()),
            _ => None,
        })
        .unwrap();
    assert_eq!(text, "the answer");

    // the chained prompt replayed the call and its output
    let prompts = engine.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1]
        .items
        .iter()
        .any(|item| matches!(item, InputItem::FunctionCall { .. })));
    assert!(prompts[1]
        .items
        .iter()
        .any(|item| matches!(item, InputItem::FunctionCallOutput { .. })));
}

// ── interactive continuation via create ─────────────────────────────────

#[tokio::test]
async fn create_with_previous_id_feeds_a_live_pause() {
    let cfg = ServingConfig {
        stream: chatty_stream(),
        ..Default::default()
    };
    let (service, engine) = service_with(cfg);
    engine.push_turn(tool_turn(&[("lookup", r#"{"k":1}"#)]));
    engine.push_turn(text_turn(&["done"]));

    let request = ResponsesRequest {
        stream: true,
        tools: vec![ToolSpec::function("lookup")],
        ..text_request("call it")
    };
    let mut stream = match service.create(request, None).await.unwrap() {
        CreateOutcome::Stream(stream) => stream,
        _ => panic!("expected a stream"),
    };
    let mut frames = Vec::new();
    read_until(&mut stream, &mut frames, "response.output_item.done").await;
    let id = response_id_from(&frames);
    let call_id = call_ids_from(&frames).remove(0);

    let continuation = ResponsesRequest {
        previous_response_id: Some(id.clone()),
        input: RequestInput::Items(vec![InputItem::FunctionCallOutput {
            id: None,
            call_id,
            output: r#""ok""#.to_string(),
        }]),
        ..Default::default()
    };
    match service.create(continuation, None).await.unwrap() {
        CreateOutcome::Ack(ack) => {
            assert_eq!(ack.id, id);
            assert_eq!(ack.status, ResponseStatus::InProgress);
        }
        _ => panic!("expected an ack"),
    }

    // the original stream resumes and finishes
    read_to_end(&mut stream, &mut frames).await;
    frames.retain(|(t, _)| t != "response.ping");
    assert_eq!(frames.last().unwrap().0, "response.completed");
}

// ── compatibility mode ──────────────────────────────────────────────────

#[tokio::test]
async fn compat_mode_continues_under_the_same_response_id() {
    let cfg = ServingConfig {
        stream: StreamConfig {
            compatibility_mode: true,
            ..chatty_stream()
        },
        ..Default::default()
    };
    let (service, engine) = service_with(cfg);
    engine.push_turn(tool_turn(&[("lookup", r#"{"k":1}"#)]));
    engine.push_turn(text_turn(&["42 degrees"]));

    let request = ResponsesRequest {
        stream: true,
        tools: vec![ToolSpec::function("lookup")],
        ..text_request("weather?")
    };
    let batches = collect_stream(service.create(request, None).await.unwrap()).await;
    assert!(!batches.concat().contains("[DONE]"));
    let mut frames = parse_frames(&batches);
    frames.retain(|(t, _)| t != "response.ping");

    // the paused exchange ends with a terminal event carrying the call
    assert_eq!(frames.last().unwrap().0, "response.completed");
    let id = response_id_from(&frames);
    let call_id = call_ids_from(&frames).remove(0);

    let continuation = ResponsesRequest {
        stream: true,
        previous_response_id: Some(id.clone()),
        input: RequestInput::Items(vec![InputItem::FunctionCallOutput {
            id: None,
            call_id,
            output: r#""42""#.to_string(),
        }]),
        ..Default::default()
    };
    let batches = collect_stream(service.create(continuation, None).await.unwrap()).await;
    assert!(!batches.concat().contains("[DONE]"));
    let mut frames = parse_frames(&batches);
    frames.retain(|(t, _)| t != "response.ping");

    // a fresh exchange: numbering restarts, same response id
    assert_eq!(frames[0].0, "response.queued");
    assert_eq!(seq_of(&frames[0].1), 0);
    assert_eq!(response_id_from(&frames), id);
    let (last_type, last_json) = frames.last().unwrap();
    assert_eq!(last_type, "response.completed");

    // the terminal body accumulates output across both exchanges
    let value: serde_json::Value = serde_json::from_str(last_json).unwrap();
    let kinds: Vec<&str> = value["response"]["output"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["type"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"function_call"));
    assert!(kinds.contains(&"message"));
}

// ── rate limiting ───────────────────────────────────────────────────────

#[tokio::test]
async fn rate_limit_denies_the_sixty_first_request() {
    let cfg = ServingConfig {
        rate_limit: RateLimitConfig {
            enabled: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let (service, engine) = service_with(cfg);
    for _ in 0..60 {
        engine.push_turn(text_turn(&["ok"]));
    }
    for _ in 0..60 {
        let outcome = service.create(text_request("hi"), None).await.unwrap();
        assert!(matches!(outcome, CreateOutcome::Json(_)));
    }

    let err = service.create(text_request("hi"), None).await.err().unwrap();
    match err {
        Error::RateLimited { retry_after } => assert!(retry_after >= 1),
        other => panic!("unexpected error: {other:?}"),
    }

    let headers = service.response_headers("anonymous", None);
    let remaining = headers
        .iter()
        .find(|(k, _)| k == "x-ratelimit-remaining-requests")
        .map(|(_, v)| v.as_str())
        .unwrap();
    assert_eq!(remaining, "0");
}

// ── background mode ─────────────────────────────────────────────────────

#[tokio::test]
async fn background_responses_store_queued_then_complete() {
    let (service, engine) = service_with(ServingConfig::default());
    engine.push_turn(text_turn(&["done"]));

    let request = ResponsesRequest {
        background: true,
        ..text_request("work")
    };
    let snapshot = match service.create(request, None).await.unwrap() {
        CreateOutcome::Json(snapshot) => snapshot,
        _ => panic!("expected the queued snapshot"),
    };
    assert_eq!(snapshot.status, ResponseStatus::Queued);
    assert!(snapshot.background);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let RetrieveOutcome::Json(stored) =
            service.retrieve(&snapshot.id, None, false).await.unwrap()
        else {
            panic!("expected a body");
        };
        if stored.status == ResponseStatus::Completed {
            assert_eq!(stored.output.len(), 1);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "background task never completed"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn cancelling_a_background_response_pins_cancelled() {
    let (service, engine) = service_with(ServingConfig::default());
    // the turn parks waiting for outputs that never come
    engine.push_turn(tool_turn(&[("lookup", "{}")]));

    let request = ResponsesRequest {
        background: true,
        tools: vec![ToolSpec::function("lookup")],
        ..text_request("work")
    };
    let snapshot = match service.create(request, None).await.unwrap() {
        CreateOutcome::Json(snapshot) => snapshot,
        _ => panic!("expected the queued snapshot"),
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cancelled = service.cancel(&snapshot.id).await.unwrap();
    assert_eq!(cancelled.status, ResponseStatus::Cancelled);
    assert!(service.registry().is_empty());

    match service.retrieve(&snapshot.id, None, false).await.unwrap() {
        RetrieveOutcome::Json(stored) => assert_eq!(stored.status, ResponseStatus::Cancelled),
        _ => panic!("expected a body"),
    }

    // a second cancel is rejected: the response is already terminal
    assert!(matches!(
        service.cancel(&snapshot.id).await,
        Err(Error::Validation(_))
    ));
}

// ── replay cursors ──────────────────────────────────────────────────────

#[tokio::test]
async fn streaming_retrieve_replays_after_a_cursor() {
    let cfg = ServingConfig {
        stream: chatty_stream(),
        ..Default::default()
    };
    let (service, engine) = service_with(cfg);
    // parked turn keeps the session alive for the second subscriber
    engine.push_turn(tool_turn(&[("lookup", "{}")]));

    let request = ResponsesRequest {
        stream: true,
        tools: vec![ToolSpec::function("lookup")],
        ..text_request("call it")
    };
    let mut stream = match service.create(request, None).await.unwrap() {
        CreateOutcome::Stream(stream) => stream,
        _ => panic!("expected a stream"),
    };
    let mut frames = Vec::new();
    read_until(&mut stream, &mut frames, "response.output_item.done").await;
    let id = response_id_from(&frames);

    let mut replayed = match service.retrieve(&id, Some(2), true).await.unwrap() {
        RetrieveOutcome::Stream(stream) => stream,
        _ => panic!("expected a stream"),
    };
    let mut late = Vec::new();
    read_until(&mut replayed, &mut late, "response.output_item.done").await;
    let seqs: Vec<u64> = late
        .iter()
        .filter(|(t, _)| t != "response.ping")
        .map(|(_, json)| seq_of(json))
        .collect();
    assert_eq!(seqs.first().copied(), Some(3));
    for pair in seqs.windows(2) {
        assert_eq!(pair[1], pair[0] + 1);
    }

    // non-live responses cannot be re-streamed
    assert!(matches!(
        service.retrieve("resp_gone", None, true).await,
        Err(Error::NotFound(_))
    ));
}

// ── disconnect teardown ─────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_tears_down_the_session() {
    let cfg = ServingConfig {
        stream: chatty_stream(),
        ..Default::default()
    };
    let (service, engine) = service_with(cfg);
    engine.push_turn(tool_turn(&[("lookup", "{}")]));

    let request = ResponsesRequest {
        stream: true,
        tools: vec![ToolSpec::function("lookup")],
        ..text_request("call it")
    };
    let mut stream = match service.create(request, None).await.unwrap() {
        CreateOutcome::Stream(stream) => stream,
        _ => panic!("expected a stream"),
    };
    let mut frames = Vec::new();
    read_until(&mut stream, &mut frames, "response.output_item.done").await;
    let id = response_id_from(&frames);
    assert_eq!(service.registry().len(), 1);

    drop(stream);
    service.handle_stream_disconnect(&id).await;
    assert!(service.registry().is_empty());

    let err = service
        .submit_tool_outputs(&id, outputs(&[("call_1", "42")]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::NotFound(_)));
}
