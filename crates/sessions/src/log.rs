//! Append-only event log, the hand-off point between one producer task and
//! any number of replaying readers.

use parking_lot::RwLock;
use tokio::sync::Notify;

use parlance_domain::events::SealedEvent;

/// Ordered sealed events for one stream exchange.
///
/// The producer appends and finally closes; readers snapshot slices and
/// wait on the notify signal for more. Once closed the log never changes,
/// so a reader that drained a closed log has seen everything.
pub struct EventLog {
    inner: RwLock<LogInner>,
    notify: Notify,
}

#[derive(Default)]
struct LogInner {
    events: Vec<SealedEvent>,
    total_bytes: usize,
    closed: bool,
}

impl EventLog {
    pub fn new() -> Self {
        EventLog {
            inner: RwLock::new(LogInner::default()),
            notify: Notify::new(),
        }
    }

    /// Append one sealed event and wake all waiting readers.
    ///
    /// Appending to a closed log is a bug in the caller; the event is
    /// dropped rather than reopening a frozen stream.
    pub fn append(&self, event: SealedEvent) {
        {
            let mut inner = self.inner.write();
            if inner.closed {
                tracing::error!(
                    event_type = %event.event_type,
                    "event appended after log was closed; dropping"
                );
                return;
            }
            inner.total_bytes += event.byte_len();
            inner.events.push(event);
        }
        self.notify.notify_waiters();
    }

    /// Freeze the log and release all waiting readers.
    pub fn close(&self) {
        self.inner.write().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cumulative serialized bytes of everything appended so far.
    pub fn total_bytes(&self) -> usize {
        self.inner.read().total_bytes
    }

    pub fn last_event_type(&self) -> Option<String> {
        self.inner
            .read()
            .events
            .last()
            .map(|event| event.event_type.clone())
    }

    /// Snapshot every event at positions `>= from`, plus the closed flag.
    ///
    /// Sequence numbers equal log positions, so `from` doubles as the next
    /// expected sequence number.
    pub fn read_from(&self, from: usize) -> (Vec<SealedEvent>, bool) {
        let inner = self.inner.read();
        let batch = if from < inner.events.len() {
            inner.events[from..].to_vec()
        } else {
            Vec::new()
        };
        (batch, inner.closed)
    }

    /// Wait until the log holds more than `seen` events or is closed.
    pub async fn wait_for_more(&self, seen: usize) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            {
                let inner = self.inner.read();
                if inner.events.len() > seen || inner.closed {
                    return;
                }
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
