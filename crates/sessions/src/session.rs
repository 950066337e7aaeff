//! One live response: its request, event log, stream state, and producer
//! task handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use parlance_domain::request::ResponsesRequest;
use parlance_domain::response::ResponseStatus;

use crate::context::SessionContext;
use crate::log::EventLog;
use crate::toolcall::ToolCallCoordinator;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable state shared between the producer task and tool-output
/// submissions, guarded by the session's async mutex.
pub struct StreamState {
    pub context: SessionContext,
    pub tool_calls: ToolCallCoordinator,
    /// Set while the producer is parked on `resume` between turns.
    pub waiting_for_tool_outputs: bool,
    /// Woken once every pending call has an output.
    pub resume: Arc<Notify>,
}

impl StreamState {
    pub fn new(context: SessionContext, tool_calls: ToolCallCoordinator) -> Self {
        StreamState {
            context,
            tool_calls,
            waiting_for_tool_outputs: false,
            resume: Arc::new(Notify::new()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A response being produced or recently finished. Readers replay the
/// event log; the producer appends to it until the exchange closes.
pub struct Session {
    id: String,
    request: ResponsesRequest,
    user_id: String,
    created_at: i64,
    log: RwLock<Arc<EventLog>>,
    stream: tokio::sync::Mutex<Option<StreamState>>,
    status: Mutex<ResponseStatus>,
    last_activity: Mutex<Instant>,
    completed: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(id: impl Into<String>, request: ResponsesRequest, user_id: impl Into<String>) -> Self {
        Session {
            id: id.into(),
            request,
            user_id: user_id.into(),
            created_at: chrono::Utc::now().timestamp(),
            log: RwLock::new(Arc::new(EventLog::new())),
            stream: tokio::sync::Mutex::new(None),
            status: Mutex::new(ResponseStatus::Queued),
            last_activity: Mutex::new(Instant::now()),
            completed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &ResponsesRequest {
        &self.request
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// The log readers currently replay.
    pub fn log(&self) -> Arc<EventLog> {
        self.log.read().clone()
    }

    /// Start a fresh exchange under the same response id: a new empty
    /// log replaces the frozen previous one.
    pub fn begin_exchange(&self) -> Arc<EventLog> {
        let fresh = Arc::new(EventLog::new());
        *self.log.write() = fresh.clone();
        self.completed.store(false, Ordering::SeqCst);
        self.touch();
        fresh
    }

    pub fn stream(&self) -> &tokio::sync::Mutex<Option<StreamState>> {
        &self.stream
    }

    pub fn status(&self) -> ResponseStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: ResponseStatus) {
        *self.status.lock() = status;
        self.touch();
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity_at(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::SeqCst);
        self.touch();
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn attach_task(&self, handle: JoinHandle<()>) {
        *self.task.lock() = Some(handle);
    }

    /// Cancel the producer and wait for it to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("resp_1", ResponsesRequest::default(), "user-1")
    }

    #[test]
    fn begin_exchange_swaps_the_log_and_reopens() {
        let s = session();
        let first = s.log();
        first.append(parlance_domain::events::SealedEvent {
            sequence_number: 0,
            event_type: "response.created".to_string(),
            json: "{}".to_string(),
        });
        s.mark_completed();

        let second = s.begin_exchange();
        assert!(!s.is_completed());
        assert!(second.is_empty());
        assert_eq!(first.len(), 1, "previous log stays frozen");
        assert!(Arc::ptr_eq(&s.log(), &second));
    }

    #[test]
    fn status_updates_touch_activity() {
        let s = session();
        let before = s.last_activity_at();
        std::thread::sleep(std::time::Duration::from_millis(5));
        s.set_status(ResponseStatus::InProgress);
        assert!(s.last_activity_at() > before);
        assert_eq!(s.status(), ResponseStatus::InProgress);
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_attached_task() {
        let s = Arc::new(session());
        let token = s.cancel_token();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        s.attach_task(tokio::spawn(async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        }));

        s.shutdown().await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
