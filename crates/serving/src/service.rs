//! The Responses service facade.
//!
//! One struct ties the protocol together: admission validation, per-user
//! rate limiting, session and store bookkeeping, and dispatch into the
//! producer task. Transports stay thin; every handler maps to one method
//! here returning a JSON body, an ack, or a stream of SSE frames.

use std::sync::Arc;

use serde::Serialize;

use parlance_domain::config::ServingConfig;
use parlance_domain::error::{Error, Result};
use parlance_domain::request::{InputItem, InputItemList, ResponsesRequest, ToolOutputsPayload};
use parlance_domain::response::{
    response_id, ItemStatus, OutputItem, ResponseObject, ResponseStatus,
};
use parlance_domain::stream::BoxStream;
use parlance_sessions::{
    ContextKind, Session, SessionContext, SessionRegistry, StreamState, ToolCallCoordinator,
};

use crate::engine::Engine;
use crate::orchestrator::{replay, Orchestrator};
use crate::ratelimit::{retry_after_secs, Admission, RateLimiter};
use crate::sse;
use crate::store::ResponseStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a create call hands the transport.
pub enum CreateOutcome {
    /// A complete response body: synchronous result or background snapshot.
    Json(ResponseObject),
    /// Tool outputs were fed to an already-running stream; nothing new to
    /// send beyond the acknowledgement.
    Ack(Ack),
    /// Rendered SSE frames, ready to write to the socket.
    Stream(BoxStream<'static, String>),
}

pub enum RetrieveOutcome {
    Json(ResponseObject),
    Stream(BoxStream<'static, String>),
}

/// Acknowledgement body for tool-output deliveries.
#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub id: String,
    pub status: ResponseStatus,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The protocol surface behind `/v1/responses`.
pub struct ResponsesService {
    cfg: Arc<ServingConfig>,
    registry: Arc<SessionRegistry>,
    store: Arc<ResponseStore>,
    limiter: Option<Arc<RateLimiter>>,
    orchestrator: Orchestrator,
}

impl ResponsesService {
    pub fn new(cfg: ServingConfig, engine: Arc<dyn Engine>) -> Self {
        let cfg = Arc::new(cfg);
        let registry = Arc::new(SessionRegistry::new(&cfg.sessions));
        let store = Arc::new(ResponseStore::new(&cfg.store));
        let limiter = cfg
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::new(cfg.rate_limit.clone())));
        let orchestrator = Orchestrator::new(
            engine,
            store.clone(),
            registry.clone(),
            limiter.clone(),
            cfg.clone(),
        );
        ResponsesService {
            cfg,
            registry,
            store,
            limiter,
            orchestrator,
        }
    }

    pub fn config(&self) -> &ServingConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ResponseStore {
        &self.store
    }

    // ── create ──────────────────────────────────────────────────────

    /// Admit and dispatch a `POST /v1/responses` body.
    pub async fn create(
        &self,
        request: ResponsesRequest,
        header_request_id: Option<&str>,
    ) -> Result<CreateOutcome> {
        self.validate(&request, header_request_id)?;
        let user = request
            .user
            .clone()
            .unwrap_or_else(|| "anonymous".to_string());

        if let Some(prev_id) = request.previous_response_id.clone() {
            if let Some(outcome) = self.continue_live(&prev_id, &request).await? {
                return Ok(outcome);
            }
            // Not a live pause: chain off the stored previous response.
            let Some(stored) = self.store.get(&prev_id) else {
                return Err(Error::NotFound(format!(
                    "Previous response '{prev_id}' not found."
                )));
            };
            let mut history = self.store.input_items(&prev_id).unwrap_or_default();
            history.extend(chained_items(&stored.output));
            history.extend(request.normalized_input());
            return self.launch(request, user, history, Some(stored)).await;
        }

        let history = request.normalized_input();
        self.launch(request, user, history, None).await
    }

    /// Admission checks, in order: service tier, compatibility-mode
    /// reserved fields, body size, store availability, background
    /// prerequisites, request-id consistency.
    fn validate(&self, request: &ResponsesRequest, header_request_id: Option<&str>) -> Result<()> {
        self.cfg
            .service_tier
            .resolve(request.service_tier.as_deref())?;
        if self.cfg.stream.compatibility_mode {
            let reserved = [
                ("request_id", request.request_id.is_some()),
                ("priority", request.priority.is_some()),
                ("cache_salt", request.cache_salt.is_some()),
            ];
            for (field, present) in reserved {
                if present {
                    return Err(Error::Validation(format!(
                        "`{field}` is not supported in compatibility mode."
                    )));
                }
            }
        }
        if let Some(cap) = self.cfg.limits.max_request_body_bytes {
            let size = serde_json::to_string(request)?.len();
            if size > cap {
                return Err(Error::PayloadTooLarge(format!(
                    "Request body exceeds max_request_body_bytes ({size} > {cap})."
                )));
            }
        }
        if request.store && !self.cfg.store.enabled {
            return Err(Error::Validation(
                "`store=true` is not available; the response store is disabled.".to_string(),
            ));
        }
        if request.background && !request.store {
            return Err(Error::Validation(
                "Background requests require `store=true`.".to_string(),
            ));
        }
        if let (Some(header), Some(body)) = (header_request_id, request.request_id.as_deref()) {
            if header != body {
                return Err(Error::Validation(format!(
                    "Request ID mismatch: header X-Request-Id '{header}' != body request_id '{body}'."
                )));
            }
        }
        Ok(())
    }

    /// Fold tool outputs carried on a continuation request into a live
    /// paused stream. `None` means the request does not target a live
    /// pause and the caller should chain off the store instead.
    async fn continue_live(
        &self,
        prev_id: &str,
        request: &ResponsesRequest,
    ) -> Result<Option<CreateOutcome>> {
        let compat = self.cfg.stream.compatibility_mode;
        if compat && !request.stream {
            return Ok(None);
        }
        let outputs = request.function_call_outputs();
        if outputs.is_empty() {
            return Ok(None);
        }
        let Some(session) = self.registry.get(prev_id) else {
            return Ok(None);
        };

        let mut guard = session.stream().lock().await;
        let Some(state) = guard.as_mut() else {
            return Ok(None);
        };
        if state.tool_calls.is_empty() {
            return Ok(None);
        }
        let mut absorbed = 0;
        for (call_id, output) in &outputs {
            match state.tool_calls.set_output(call_id, output) {
                Ok(call) => {
                    state.context.absorb_tool_output(&call, output);
                    absorbed += 1;
                }
                Err(err) => {
                    tracing::debug!(
                        response_id = prev_id,
                        call_id = %call_id,
                        %err,
                        "continuation output did not match a pending call"
                    );
                }
            }
        }
        if absorbed == 0 {
            return Ok(None);
        }

        if !compat {
            // Interactive: the original stream is still attached; wake the
            // parked producer once every call has its output.
            if !state.tool_calls.has_pending() {
                state.resume.notify_one();
            }
            drop(guard);
            session.touch();
            return Ok(Some(CreateOutcome::Ack(Ack {
                id: prev_id.to_string(),
                status: ResponseStatus::InProgress,
            })));
        }

        // Compatibility: the paused exchange already ended; run the next
        // one under the same response id over a fresh log.
        drop(guard);
        session.set_status(ResponseStatus::InProgress);
        let log = session.begin_exchange();
        self.orchestrator.spawn(session.clone(), log.clone(), None);
        Ok(Some(CreateOutcome::Stream(sse::render(
            replay(log, None),
            self.cfg.stream.clone(),
        ))))
    }

    /// Start a new response: admit against the rate limiter, build the
    /// session, and dispatch per mode (background, streaming, synchronous).
    async fn launch(
        &self,
        request: ResponsesRequest,
        user: String,
        history: Vec<InputItem>,
        previous: Option<ResponseObject>,
    ) -> Result<CreateOutcome> {
        if let Some(limiter) = &self.limiter {
            if self.cfg.rate_limit.enforce {
                let projected = request.max_output_tokens.map(u64::from);
                if let Admission::Denied { retry_after } =
                    limiter.check_and_reserve(&user, projected)
                {
                    return Err(Error::RateLimited {
                        retry_after: retry_after_secs(retry_after),
                    });
                }
            } else {
                limiter.record_request(&user);
            }
        }

        let id = response_id();
        let storing = self.cfg.store.enabled && request.store;
        if storing {
            self.store.record_input_items(&id, history.clone());
        }
        let context = SessionContext::new(
            ContextKind::for_request(&request),
            id.clone(),
            history,
            self.cfg.stream.compatibility_mode,
            self.cfg.stream.emit_legacy_reasoning(),
            self.cfg.stream.emit_modern_reasoning(),
        );
        let state = StreamState::new(context, ToolCallCoordinator::new(id.clone()));
        let session = Arc::new(Session::new(id.clone(), request.clone(), user));
        *session.stream().lock().await = Some(state);

        if request.background {
            let mut snapshot = ResponseObject::snapshot(
                id.clone(),
                ResponseStatus::Queued,
                request.model.clone(),
                request.previous_response_id.clone(),
            );
            snapshot.background = true;
            self.store.put(&snapshot)?;
            self.registry.add(session.clone());
            let log = session.log();
            self.orchestrator.spawn(session, log.clone(), previous);
            if request.stream {
                return Ok(CreateOutcome::Stream(sse::render(
                    replay(log, None),
                    self.cfg.stream.clone(),
                )));
            }
            return Ok(CreateOutcome::Json(snapshot));
        }

        if request.stream {
            self.registry.add(session.clone());
            let log = session.log();
            self.orchestrator.spawn(session, log.clone(), previous);
            return Ok(CreateOutcome::Stream(sse::render(
                replay(log, None),
                self.cfg.stream.clone(),
            )));
        }

        let response = self.orchestrator.run_sync(&session).await?;
        Ok(CreateOutcome::Json(response))
    }

    // ── retrieve / cancel ───────────────────────────────────────────

    /// `GET /v1/responses/{id}`, optionally re-attaching to a live stream
    /// from a given sequence number.
    pub async fn retrieve(
        &self,
        id: &str,
        starting_after: Option<u64>,
        stream: bool,
    ) -> Result<RetrieveOutcome> {
        if stream {
            let Some(session) = self.registry.get(id) else {
                return Err(Error::NotFound(format!(
                    "Response '{id}' has no live stream; retrieve it without streaming."
                )));
            };
            let reader = replay(session.log(), starting_after);
            return Ok(RetrieveOutcome::Stream(sse::render(
                reader,
                self.cfg.stream.clone(),
            )));
        }
        self.store
            .get(id)
            .map(RetrieveOutcome::Json)
            .ok_or_else(|| Error::NotFound(format!("Response '{id}' not found.")))
    }

    /// Cancel a background response. Legal only while it is still
    /// `queued` or `in_progress`.
    pub async fn cancel(&self, id: &str) -> Result<ResponseObject> {
        let Some(mut stored) = self.store.get(id) else {
            return Err(Error::NotFound(format!("Response '{id}' not found.")));
        };
        if !stored.status.is_active() {
            return Err(Error::Validation(
                "Cannot cancel a synchronous response.".to_string(),
            ));
        }
        // Pin the stored status first so the producer's own terminal
        // write cannot override it.
        self.store.update_status(id, ResponseStatus::Cancelled);
        if let Some(session) = self.registry.remove(id) {
            session.shutdown().await;
        }
        stored.status = ResponseStatus::Cancelled;
        Ok(stored)
    }

    // ── tool outputs ────────────────────────────────────────────────

    /// Deliver tool outputs for a paused stream via the dedicated
    /// endpoint. Accepted outputs wake the producer once none are left
    /// pending.
    pub async fn submit_tool_outputs(&self, id: &str, payload: ToolOutputsPayload) -> Result<Ack> {
        if let Some(cap) = self.cfg.limits.max_tool_output_bytes {
            let size = serde_json::to_string(&payload)?.len();
            if size > cap {
                return Err(Error::PayloadTooLarge(format!(
                    "Tool output payload exceeds max_tool_output_bytes ({size} > {cap})."
                )));
            }
        }
        if payload.output.is_empty() {
            return Err(Error::Validation(
                "`output` must contain at least one item.".to_string(),
            ));
        }
        let Some(session) = self.registry.get(id) else {
            return Err(Error::NotFound(format!("Response '{id}' not found.")));
        };

        let mut guard = session.stream().lock().await;
        let Some(state) = guard.as_mut() else {
            return Err(Error::NotFound(format!(
                "Response '{id}' has no active stream."
            )));
        };
        if state.tool_calls.is_empty() {
            return Err(Error::Validation(
                "No pending tool outputs expected for this response.".to_string(),
            ));
        }
        for entry in &payload.output {
            let call = state.tool_calls.set_output(&entry.tool_call_id, &entry.output)?;
            state.context.absorb_tool_output(&call, &entry.output);
        }
        if !state.tool_calls.has_pending() {
            state.resume.notify_one();
        }
        drop(guard);
        session.touch();
        Ok(Ack {
            id: id.to_string(),
            status: ResponseStatus::InProgress,
        })
    }

    // ── input items ─────────────────────────────────────────────────

    /// `GET /v1/responses/{id}/input_items` with cursor pagination.
    pub fn list_input_items(
        &self,
        id: &str,
        limit: Option<usize>,
        order: Option<&str>,
        after: Option<&str>,
    ) -> Result<InputItemList> {
        if !self.cfg.store.enabled {
            return Err(Error::Validation(
                "The response store is disabled; input items are not recorded.".to_string(),
            ));
        }
        let Some(items) = self.store.input_items(id) else {
            return Err(Error::NotFound(format!("Response '{id}' not found.")));
        };
        let limit = limit.unwrap_or(20);
        if limit == 0 || limit > 100 {
            return Err(Error::Validation(
                "`limit` must be between 1 and 100.".to_string(),
            ));
        }
        let mut ordered = items;
        match order.unwrap_or("asc") {
            "asc" => {}
            "desc" => ordered.reverse(),
            other => {
                return Err(Error::Validation(format!(
                    "`order` must be 'asc' or 'desc', got '{other}'."
                )));
            }
        }
        let start = match after {
            None => 0,
            Some(cursor) => {
                let Some(pos) = ordered.iter().position(|item| item.id() == Some(cursor)) else {
                    return Err(Error::Validation(format!(
                        "`after` cursor '{cursor}' does not match any input item."
                    )));
                };
                pos + 1
            }
        };
        let data: Vec<InputItem> = ordered.iter().skip(start).take(limit).cloned().collect();
        let has_more = start + data.len() < ordered.len();
        Ok(InputItemList {
            object: "list".to_string(),
            first_id: data.first().and_then(|i| i.id()).map(str::to_string),
            last_id: data.last().and_then(|i| i.id()).map(str::to_string),
            has_more,
            data,
        })
    }

    // ── transport helpers ───────────────────────────────────────────

    /// Rate-limit budget headers plus the request-id echo.
    pub fn response_headers(&self, user: &str, request_id: Option<&str>) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(limiter) = &self.limiter {
            let stats = limiter.stats(user);
            if let Some(requests) = stats.get("requests_1min") {
                headers.push((
                    "x-ratelimit-limit-requests".to_string(),
                    requests.limit.to_string(),
                ));
                headers.push((
                    "x-ratelimit-remaining-requests".to_string(),
                    requests.remaining.to_string(),
                ));
            }
            if let Some(tokens) = stats.get("tokens_1min") {
                headers.push((
                    "x-ratelimit-limit-tokens".to_string(),
                    tokens.limit.to_string(),
                ));
                headers.push((
                    "x-ratelimit-remaining-tokens".to_string(),
                    tokens.remaining.to_string(),
                ));
            }
        }
        if let Some(request_id) = request_id {
            headers.push(("x-request-id".to_string(), request_id.to_string()));
        }
        headers
    }

    /// The client hung up before its stream finished. Foreground streams
    /// are torn down; background and paused sessions keep going.
    pub async fn handle_stream_disconnect(&self, id: &str) {
        let Some(session) = self.registry.get(id) else {
            return;
        };
        if session.request().background || session.is_completed() {
            return;
        }
        tracing::info!(response_id = id, "client disconnected, tearing down the stream");
        if let Some(session) = self.registry.remove(id) {
            session.shutdown().await;
        }
    }
}

/// Previous-response output folded back into chained input. Reasoning
/// items stay server-side.
fn chained_items(output: &[OutputItem]) -> Vec<InputItem> {
    output
        .iter()
        .filter_map(|item| match item {
            OutputItem::Message {
                id, role, content, ..
            } => Some(InputItem::Message {
                id: Some(id.clone()),
                role: role.clone(),
                content: content.clone(),
            }),
            OutputItem::FunctionCall {
                id,
                call_id,
                name,
                arguments,
                ..
            } => Some(InputItem::FunctionCall {
                id: Some(id.clone()),
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
                status: Some(ItemStatus::Completed),
            }),
            OutputItem::Reasoning { .. } => None,
        })
        .collect()
}
