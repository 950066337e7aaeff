//! Drives one generation: engine steps in, sealed events out.
//!
//! A single producer task per exchange owns the sequencer and is the only
//! writer to the session's event log. Readers replay the log concurrently
//! through [`replay`] and never race the writer.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::Notify;

use parlance_domain::config::ServingConfig;
use parlance_domain::error::{Error, Result};
use parlance_domain::events::{ResponseEvent, ResponseHead, SealedEvent};
use parlance_domain::request::InputItem;
use parlance_domain::response::{
    IncompleteDetails, ItemStatus, OutputItem, ResponseObject, ResponseStatus,
};
use parlance_domain::stream::{BoxStream, FinishReason};
use parlance_sessions::{EventLog, Session, SessionRegistry, StreamState};

use crate::engine::{Engine, EnginePrompt};
use crate::ratelimit::RateLimiter;
use crate::sequencer::{EventSequencer, Sealed};
use crate::store::ResponseStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveEnd {
    Finished,
    /// Compat mode ended the stream with pending tool calls; the stream
    /// state stays attached for a same-id continuation.
    CompatPause,
    Cancelled,
    Failed,
}

/// What a finished turn does next.
enum Pause {
    No,
    /// Compat mode: close the stream, keep the state.
    EndOfStream,
    /// Interactive mode: park on the notifier until outputs arrive.
    Park(Arc<Notify>),
}

/// Runs producer tasks against the shared serving state.
#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<dyn Engine>,
    store: Arc<ResponseStore>,
    registry: Arc<SessionRegistry>,
    limiter: Option<Arc<RateLimiter>>,
    cfg: Arc<ServingConfig>,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn Engine>,
        store: Arc<ResponseStore>,
        registry: Arc<SessionRegistry>,
        limiter: Option<Arc<RateLimiter>>,
        cfg: Arc<ServingConfig>,
    ) -> Self {
        Orchestrator {
            engine,
            store,
            registry,
            limiter,
            cfg,
        }
    }

    /// Spawn the producer task for one exchange and attach its handle to
    /// the session.
    pub fn spawn(
        &self,
        session: Arc<Session>,
        log: Arc<EventLog>,
        previous: Option<ResponseObject>,
    ) {
        let this = self.clone();
        let task_session = session.clone();
        let handle = tokio::spawn(this.run(task_session, log, previous));
        session.attach_task(handle);
    }

    async fn run(self, session: Arc<Session>, log: Arc<EventLog>, previous: Option<ResponseObject>) {
        let mut seq = EventSequencer::new(Some(session.id().to_string()));
        let cancel = session.cancel_token();
        let outcome = {
            let drive = self.drive(&session, &log, &mut seq, previous);
            tokio::pin!(drive);
            tokio::select! {
                _ = cancel.cancelled() => None,
                result = &mut drive => Some(result),
            }
        };
        let end = match outcome {
            None => {
                session.set_status(ResponseStatus::Cancelled);
                self.store_abort(&session, ResponseStatus::Cancelled, None);
                tracing::info!(response_id = session.id(), "stream cancelled");
                DriveEnd::Cancelled
            }
            Some(Ok(end)) => end,
            Some(Err(err)) => {
                self.fail(&session, &log, &mut seq, &err);
                DriveEnd::Failed
            }
        };

        if end != DriveEnd::CompatPause {
            *session.stream().lock().await = None;
        }
        log.close();
        session.mark_completed();
        self.registry.cleanup_expired();
    }

    /// Store a terminal snapshot for an aborted exchange so stored ids
    /// stay retrievable and keep their recorded input items. Cancelled
    /// pinning in the store still applies.
    fn store_abort(&self, session: &Session, status: ResponseStatus, err: Option<&Error>) {
        let request = session.request();
        if !(self.cfg.store.enabled && request.store) {
            return;
        }
        let mut snapshot = ResponseObject::snapshot(
            session.id(),
            status,
            request.model.clone(),
            request.previous_response_id.clone(),
        );
        snapshot.created_at = session.created_at();
        snapshot.background = request.background;
        snapshot.error = err.map(|e| e.to_wire());
        if let Err(store_err) = self.store.put(&snapshot) {
            tracing::warn!(
                response_id = session.id(),
                error = %store_err,
                "could not store aborted response"
            );
        }
    }

    /// Append a terminal `response.error`, unless the log already ends
    /// with one. Byte caps do not apply to the error event itself.
    fn fail(&self, session: &Session, log: &EventLog, seq: &mut EventSequencer, err: &Error) {
        tracing::error!(response_id = session.id(), error = %err, "stream failed");
        session.set_status(ResponseStatus::Failed);
        self.store_abort(session, ResponseStatus::Failed, Some(err));
        if log.last_event_type().as_deref() == Some("response.error") {
            return;
        }
        let event = ResponseEvent::Error {
            response: ResponseHead::failed(Some(session.id().to_string())),
            error: err.to_wire(),
        };
        match seq.next(&event) {
            Sealed::Event(sealed) | Sealed::Fault(sealed) => log.append(sealed),
        }
    }

    async fn drive(
        &self,
        session: &Arc<Session>,
        log: &Arc<EventLog>,
        seq: &mut EventSequencer,
        previous: Option<ResponseObject>,
    ) -> Result<DriveEnd> {
        let id = session.id().to_string();
        let request = session.request().clone();
        let compat = self.cfg.stream.compatibility_mode;
        let storing = self.cfg.store.enabled && request.store;

        let mut queued = ResponseObject::snapshot(
            id.clone(),
            ResponseStatus::Queued,
            request.model.clone(),
            request.previous_response_id.clone(),
        );
        queued.background = request.background;
        let mut started = queued.clone();
        started.status = ResponseStatus::InProgress;

        self.emit(log, seq, ResponseEvent::Queued { response: queued })?;
        self.emit(
            log,
            seq,
            ResponseEvent::Created {
                response: started.clone(),
            },
        )?;
        self.emit(
            log,
            seq,
            ResponseEvent::InProgress { response: started },
        )?;
        session.set_status(ResponseStatus::InProgress);
        if storing {
            self.store.update_status(&id, ResponseStatus::InProgress);
        }

        for event in self
            .chain_preamble(session, &id, &request.normalized_input(), previous, compat)
            .await
        {
            self.emit(log, seq, event)?;
        }

        let mut compat_paused = false;
        loop {
            let prompt = {
                let guard = session.stream().lock().await;
                let state = Self::state_of(&id, guard.as_ref())?;
                EnginePrompt {
                    items: state.context.history().to_vec(),
                    tools: request.tools.clone(),
                    model: request.model.clone(),
                    instructions: request.instructions.clone(),
                    max_output_tokens: request.max_output_tokens,
                    temperature: request.temperature,
                    top_p: request.top_p,
                }
            };

            let mut steps = self.engine.generate(prompt).await?;
            while let Some(step) = steps.next().await {
                let step = step?;
                let events = {
                    let mut guard = session.stream().lock().await;
                    let state = Self::state_of_mut(&id, guard.as_mut())?;
                    let StreamState {
                        context,
                        tool_calls,
                        ..
                    } = state;
                    context.on_step(step, tool_calls)
                };
                for event in events {
                    self.emit(log, seq, event)?;
                }
            }

            // turn over: pause for tool outputs or finish
            let (sweep, pause) = {
                let mut guard = session.stream().lock().await;
                let state = Self::state_of_mut(&id, guard.as_mut())?;
                let StreamState {
                    context,
                    tool_calls,
                    waiting_for_tool_outputs,
                    resume,
                } = state;
                let sweep = context.close_unfinished_tool_calls(tool_calls);
                let pause = if tool_calls.has_pending() {
                    if compat {
                        Pause::EndOfStream
                    } else {
                        *waiting_for_tool_outputs = true;
                        Pause::Park(resume.clone())
                    }
                } else {
                    Pause::No
                };
                (sweep, pause)
            };
            for event in sweep {
                self.emit(log, seq, event)?;
            }

            match pause {
                Pause::No => break,
                Pause::EndOfStream => {
                    compat_paused = true;
                    break;
                }
                Pause::Park(resume) => {
                    let wait = self.cfg.sessions.tool_output_timeout();
                    let woken = tokio::time::timeout(wait, resume.notified()).await;
                    {
                        let mut guard = session.stream().lock().await;
                        let state = Self::state_of_mut(&id, guard.as_mut())?;
                        state.waiting_for_tool_outputs = false;
                    }
                    if woken.is_err() {
                        return Err(Error::Timeout(
                            "Timed out waiting for tool outputs.".to_string(),
                        ));
                    }
                }
            }
        }

        // finalize
        let (output, usage, finish_reason) = {
            let guard = session.stream().lock().await;
            let state = Self::state_of(&id, guard.as_ref())?;
            (
                state.context.output_items(),
                state.context.usage().clone(),
                state.context.finish_reason(),
            )
        };

        let mut status = ResponseStatus::Completed;
        let mut incomplete_details = None;
        match finish_reason {
            Some(FinishReason::Length) => {
                status = ResponseStatus::Incomplete;
                incomplete_details = Some(IncompleteDetails {
                    reason: "max_output_tokens".to_string(),
                });
            }
            Some(FinishReason::Abort) => status = ResponseStatus::Cancelled,
            _ => {}
        }
        if status == ResponseStatus::Completed && output.is_empty() {
            status = ResponseStatus::Incomplete;
            incomplete_details = Some(IncompleteDetails {
                reason: "no_output".to_string(),
            });
        }

        let mut final_response = ResponseObject::snapshot(
            id.clone(),
            status,
            request.model.clone(),
            request.previous_response_id.clone(),
        );
        final_response.created_at = session.created_at();
        final_response.background = request.background;
        final_response.output = output;
        final_response.usage = Some(usage);
        final_response.incomplete_details = incomplete_details;

        // rate-limit bookkeeping precedes the terminal event: nothing may
        // follow it on the wire
        if let Some(limiter) = &self.limiter {
            if let Some(usage) = &final_response.usage {
                limiter.record_tokens(session.user_id(), usage.total_tokens);
            }
            self.emit(
                log,
                seq,
                ResponseEvent::RateLimitsUpdated {
                    response: ResponseHead::of(id.clone()),
                    limits: limiter.stats(session.user_id()),
                },
            )?;
        }

        if storing {
            self.store.put(&final_response)?;
        }
        session.set_status(status);

        let terminal = if status == ResponseStatus::Completed {
            ResponseEvent::Completed {
                response: final_response,
            }
        } else {
            ResponseEvent::Incomplete {
                response: final_response,
            }
        };
        self.emit(log, seq, terminal)?;

        Ok(if compat_paused {
            DriveEnd::CompatPause
        } else {
            DriveEnd::Finished
        })
    }

    /// Events a chained request leads with: completion markers for calls
    /// the previous response left in progress, and an echo of the
    /// completed call items carried in this request's input.
    async fn chain_preamble(
        &self,
        session: &Arc<Session>,
        id: &str,
        input: &[InputItem],
        previous: Option<ResponseObject>,
        compat: bool,
    ) -> Vec<ResponseEvent> {
        let mut events = Vec::new();
        let mut guard = session.stream().lock().await;
        let Some(state) = guard.as_mut() else {
            return events;
        };

        if let Some(previous) = &previous {
            for item in &previous.output {
                if let OutputItem::FunctionCall {
                    id: item_id,
                    status: ItemStatus::InProgress,
                    call_id,
                    name,
                    arguments,
                } = item
                {
                    events.push(ResponseEvent::ToolCallCompleted {
                        response: ResponseHead::of(id.to_string()),
                        call_id: call_id.clone(),
                    });
                    events.push(ResponseEvent::OutputItemDone {
                        output_index: state.context.next_output_index(),
                        item: OutputItem::FunctionCall {
                            id: item_id.clone(),
                            status: ItemStatus::Completed,
                            call_id: call_id.clone(),
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    });
                }
            }
        }

        if !compat {
            for item in input {
                if let InputItem::FunctionCall {
                    id: Some(item_id),
                    call_id,
                    name,
                    arguments,
                    status: Some(ItemStatus::Completed),
                } = item
                {
                    let index = state.context.next_output_index();
                    events.push(ResponseEvent::OutputItemAdded {
                        output_index: index,
                        item: OutputItem::FunctionCall {
                            id: item_id.clone(),
                            status: ItemStatus::InProgress,
                            call_id: call_id.clone(),
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    });
                    events.push(ResponseEvent::OutputItemDone {
                        output_index: index,
                        item: OutputItem::FunctionCall {
                            id: item_id.clone(),
                            status: ItemStatus::Completed,
                            call_id: call_id.clone(),
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    });
                }
            }
        }
        events
    }

    /// Seal and append one event, honoring the byte caps.
    fn emit(&self, log: &EventLog, seq: &mut EventSequencer, event: ResponseEvent) -> Result<()> {
        match seq.next(&event) {
            Sealed::Event(sealed) => {
                if let Some(cap) = self.cfg.stream.event_byte_cap() {
                    if sealed.byte_len() > cap {
                        return Err(Error::PayloadTooLarge(format!(
                            "Streaming event exceeds max_event_bytes ({} > {cap}).",
                            sealed.byte_len()
                        )));
                    }
                }
                if let Some(cap) = self.cfg.stream.buffer_byte_cap() {
                    let projected = log.total_bytes() + sealed.byte_len();
                    if projected > cap {
                        return Err(Error::Overflow(format!(
                            "Streaming buffer exceeds max_buffer_bytes ({projected} > {cap})."
                        )));
                    }
                }
                log.append(sealed);
                Ok(())
            }
            Sealed::Fault(sealed) => {
                log.append(sealed);
                Err(Error::Internal(
                    "Streaming event failed validation.".to_string(),
                ))
            }
        }
    }

    /// Drive a non-streaming generation to its final response object.
    ///
    /// Sync requests never park for tool outputs; a turn ending with
    /// pending calls completes with the call items in `output`, and the
    /// client chains a follow-up request to submit outputs.
    pub async fn run_sync(&self, session: &Arc<Session>) -> Result<ResponseObject> {
        match self.run_sync_inner(session).await {
            Ok(response) => Ok(response),
            Err(err) => {
                session.set_status(ResponseStatus::Failed);
                self.store_abort(session, ResponseStatus::Failed, Some(&err));
                Err(err)
            }
        }
    }

    async fn run_sync_inner(&self, session: &Arc<Session>) -> Result<ResponseObject> {
        let id = session.id().to_string();
        let request = session.request().clone();
        let storing = self.cfg.store.enabled && request.store;
        session.set_status(ResponseStatus::InProgress);

        let prompt = {
            let guard = session.stream().lock().await;
            let state = Self::state_of(&id, guard.as_ref())?;
            EnginePrompt {
                items: state.context.history().to_vec(),
                tools: request.tools.clone(),
                model: request.model.clone(),
                instructions: request.instructions.clone(),
                max_output_tokens: request.max_output_tokens,
                temperature: request.temperature,
                top_p: request.top_p,
            }
        };

        let mut steps = self.engine.generate(prompt).await?;
        while let Some(step) = steps.next().await {
            let step = step?;
            let mut guard = session.stream().lock().await;
            let state = Self::state_of_mut(&id, guard.as_mut())?;
            let StreamState {
                context,
                tool_calls,
                ..
            } = state;
            let _ = context.on_step(step, tool_calls);
        }

        let (output, usage, finish_reason) = {
            let mut guard = session.stream().lock().await;
            let state = Self::state_of_mut(&id, guard.as_mut())?;
            let StreamState {
                context,
                tool_calls,
                ..
            } = state;
            let _ = context.close_unfinished_tool_calls(tool_calls);
            (
                context.output_items(),
                context.usage().clone(),
                context.finish_reason(),
            )
        };

        let mut status = ResponseStatus::Completed;
        let mut incomplete_details = None;
        match finish_reason {
            Some(FinishReason::Length) => {
                status = ResponseStatus::Incomplete;
                incomplete_details = Some(IncompleteDetails {
                    reason: "max_output_tokens".to_string(),
                });
            }
            Some(FinishReason::Abort) => status = ResponseStatus::Cancelled,
            _ => {}
        }
        if status == ResponseStatus::Completed && output.is_empty() {
            status = ResponseStatus::Incomplete;
            incomplete_details = Some(IncompleteDetails {
                reason: "no_output".to_string(),
            });
        }

        let mut response = ResponseObject::snapshot(
            id,
            status,
            request.model.clone(),
            request.previous_response_id.clone(),
        );
        response.created_at = session.created_at();
        response.background = request.background;
        response.output = output;
        response.usage = Some(usage);
        response.incomplete_details = incomplete_details;

        if let Some(limiter) = &self.limiter {
            if let Some(usage) = &response.usage {
                limiter.record_tokens(session.user_id(), usage.total_tokens);
            }
        }
        if storing {
            self.store.put(&response)?;
        }
        session.set_status(status);
        *session.stream().lock().await = None;
        session.mark_completed();
        Ok(response)
    }

    fn state_of<'a>(id: &str, state: Option<&'a StreamState>) -> Result<&'a StreamState> {
        state.ok_or_else(|| Error::Internal(format!("no stream state for response '{id}'")))
    }

    fn state_of_mut<'a>(
        id: &str,
        state: Option<&'a mut StreamState>,
    ) -> Result<&'a mut StreamState> {
        state.ok_or_else(|| Error::Internal(format!("no stream state for response '{id}'")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Replay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stream a log's sealed events from the start (or after a given
/// sequence number), waiting for the producer when caught up. Ends after
/// a terminal event or once the log closes.
pub fn replay(log: Arc<EventLog>, starting_after: Option<u64>) -> BoxStream<'static, SealedEvent> {
    Box::pin(async_stream::stream! {
        let mut cursor: usize = 0;
        loop {
            let (batch, closed) = log.read_from(cursor);
            let batch_len = batch.len();
            for event in batch {
                let terminal = event.is_terminal();
                if starting_after.map_or(true, |after| event.sequence_number > after) {
                    yield event;
                }
                if terminal {
                    return;
                }
            }
            cursor += batch_len;
            if closed {
                return;
            }
            log.wait_for_more(cursor).await;
        }
    })
}
