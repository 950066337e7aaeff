//! SSE rendering: framing, write coalescing, keep-alive pings, and the
//! `[DONE]` sentinel.

use futures_util::StreamExt;

use parlance_domain::config::StreamConfig;
use parlance_domain::error::Error;
use parlance_domain::events::{ResponseEvent, ResponseHead, SealedEvent};
use parlance_domain::stream::BoxStream;

use crate::coalesce::ChunkCoalescer;
use crate::sequencer::{EventSequencer, Sealed};

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

pub fn format_frame(event_type: &str, json: &str) -> String {
    format!("event: {event_type}\ndata: {json}\n\n")
}

/// Render sealed events as SSE frames.
///
/// Frames are coalesced into batched writes; pings are synthesized on a
/// timer with the next free sequence number without consuming it (the
/// producer owns numbering, and a replay must not see gaps). Compat mode
/// suppresses the trailing `[DONE]`.
pub fn render(
    events: BoxStream<'static, SealedEvent>,
    cfg: StreamConfig,
) -> BoxStream<'static, String> {
    Box::pin(async_stream::stream! {
        let mut events = events;
        let mut coalescer = ChunkCoalescer::new(cfg.coalesce_threshold());
        let ping_every = cfg.ping_interval();
        let started = tokio::time::Instant::now();
        let mut deadline = ping_every.map(|every| started + every);
        let mut last_seq: Option<u64> = None;

        loop {
            tokio::select! {
                biased;
                event = events.next() => {
                    match event {
                        Some(event) => {
                            last_seq = Some(event.sequence_number);
                            let frame = format_frame(&event.event_type, &event.json);
                            if let Some(batch) = coalescer.append(&frame) {
                                yield batch;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_sleep(deadline), if deadline.is_some() => {
                    if let Some(batch) = coalescer.flush() {
                        yield batch;
                    }
                    if let Some(frame) = ping_frame(&started, last_seq) {
                        yield frame;
                    }
                    if let (Some(every), Some(at)) = (ping_every, deadline.as_mut()) {
                        *at = tokio::time::Instant::now() + every;
                    }
                }
            }
        }

        if let Some(batch) = coalescer.flush() {
            yield batch;
        }
        if !cfg.compatibility_mode {
            yield DONE_FRAME.to_string();
        }
    })
}

async fn ping_sleep(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// A keep-alive frame carrying the sequence number the next real event
/// will use.
fn ping_frame(started: &tokio::time::Instant, last_seq: Option<u64>) -> Option<String> {
    let ping = ResponseEvent::Ping {
        timestamp: started.elapsed().as_secs_f64(),
    };
    let mut value = serde_json::to_value(&ping).ok()?;
    let next_seq = last_seq.map_or(0, |seq| seq + 1);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("sequence_number".to_string(), serde_json::json!(next_seq));
    }
    let json = serde_json::to_string(&value).ok()?;
    Some(format_frame("response.ping", &json))
}

/// A one-event stream for requests rejected after the SSE response has
/// already started.
pub fn error_stream(
    err: &Error,
    response_id: Option<&str>,
    compat: bool,
) -> BoxStream<'static, String> {
    let mut seq = EventSequencer::new(response_id.map(str::to_string));
    let event = ResponseEvent::Error {
        response: ResponseHead::failed(response_id.map(str::to_string)),
        error: err.to_wire(),
    };
    let frame = match seq.next(&event) {
        Sealed::Event(sealed) | Sealed::Fault(sealed) => {
            format_frame(&sealed.event_type, &sealed.json)
        }
    };
    let mut frames = vec![frame];
    if !compat {
        frames.push(DONE_FRAME.to_string());
    }
    Box::pin(futures_util::stream::iter(frames))
}
