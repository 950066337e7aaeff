//! Terminal-response persistence for retrieval and chaining.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use parlance_domain::config::StoreConfig;
use parlance_domain::error::Result;
use parlance_domain::request::InputItem;
use parlance_domain::response::{ResponseObject, ResponseStatus};

struct StoredResponse {
    response: ResponseObject,
    size_bytes: usize,
    stored_at: Instant,
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<String, StoredResponse>,
    input_items: HashMap<String, Vec<InputItem>>,
    total_bytes: usize,
}

/// In-memory store of finished responses, bounded by TTL, entry count,
/// and total serialized bytes, evicted in that order (oldest first
/// within each cap).
///
/// A stored `cancelled` status is pinned: later writes under the same id
/// are dropped so a racing producer cannot resurrect a cancelled
/// response.
pub struct ResponseStore {
    inner: Mutex<StoreInner>,
    ttl: Option<Duration>,
    entry_cap: usize,
    max_bytes: Option<usize>,
}

impl ResponseStore {
    pub fn new(cfg: &StoreConfig) -> Self {
        ResponseStore {
            inner: Mutex::new(StoreInner::default()),
            ttl: cfg.ttl(),
            entry_cap: cfg.entry_cap(),
            max_bytes: cfg.max_bytes,
        }
    }

    pub fn put(&self, response: &ResponseObject) -> Result<()> {
        let json = serde_json::to_string(response)?;
        let mut inner = self.inner.lock();
        self.expire_locked(&mut inner);

        if let Some(existing) = inner.entries.get(&response.id) {
            if existing.response.status == ResponseStatus::Cancelled {
                return Ok(());
            }
        }

        // replacing an entry keeps its recorded input items; only
        // eviction forgets an id entirely
        if let Some(previous) = inner.entries.remove(&response.id) {
            inner.total_bytes = inner.total_bytes.saturating_sub(previous.size_bytes);
        }
        let size_bytes = json.len();
        inner.total_bytes += size_bytes;
        inner.entries.insert(
            response.id.clone(),
            StoredResponse {
                response: response.clone(),
                size_bytes,
                stored_at: Instant::now(),
            },
        );
        self.enforce_caps_locked(&mut inner);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<ResponseObject> {
        let mut inner = self.inner.lock();
        self.expire_locked(&mut inner);
        inner.entries.get(id).map(|e| e.response.clone())
    }

    /// Update a stored response's status in place. Once an entry reads
    /// `completed` or `cancelled` its status never changes again.
    pub fn update_status(&self, id: &str, status: ResponseStatus) {
        let mut inner = self.inner.lock();
        self.expire_locked(&mut inner);
        if let Some(entry) = inner.entries.get_mut(id) {
            if matches!(
                entry.response.status,
                ResponseStatus::Completed | ResponseStatus::Cancelled
            ) {
                return;
            }
            entry.response.status = status;
            entry.stored_at = Instant::now();
        }
    }

    /// Remember the normalized input items of a stored response for the
    /// input-item listing endpoint and conversation chaining.
    pub fn record_input_items(&self, id: &str, items: Vec<InputItem>) {
        let mut inner = self.inner.lock();
        inner.input_items.insert(id.to_string(), items);
    }

    pub fn input_items(&self, id: &str) -> Option<Vec<InputItem>> {
        let mut inner = self.inner.lock();
        self.expire_locked(&mut inner);
        inner.input_items.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    fn expire_locked(&self, inner: &mut StoreInner) {
        let Some(ttl) = self.ttl else { return };
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.stored_at.elapsed() >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            Self::remove_locked(inner, &id);
        }
    }

    fn enforce_caps_locked(&self, inner: &mut StoreInner) {
        while inner.entries.len() > self.entry_cap {
            if !Self::evict_oldest_locked(inner) {
                break;
            }
        }
        if let Some(max_bytes) = self.max_bytes {
            while inner.total_bytes > max_bytes {
                if !Self::evict_oldest_locked(inner) {
                    break;
                }
            }
        }
    }

    fn evict_oldest_locked(inner: &mut StoreInner) -> bool {
        let oldest = inner
            .entries
            .iter()
            .min_by_key(|(_, e)| e.stored_at)
            .map(|(id, _)| id.clone());
        match oldest {
            Some(id) => {
                tracing::debug!(response_id = %id, "evicting stored response over capacity");
                Self::remove_locked(inner, &id);
                true
            }
            None => false,
        }
    }

    fn remove_locked(inner: &mut StoreInner, id: &str) {
        if let Some(entry) = inner.entries.remove(id) {
            inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
        }
        inner.input_items.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(cfg: StoreConfig) -> ResponseStore {
        ResponseStore::new(&cfg)
    }

    fn response(id: &str, status: ResponseStatus) -> ResponseObject {
        ResponseObject::snapshot(id, status, Some("test-model".to_string()), None)
    }

    #[test]
    fn put_then_get_round_trips() {
        let s = store(StoreConfig::default());
        s.put(&response("resp_a", ResponseStatus::Completed)).unwrap();
        let got = s.get("resp_a").unwrap();
        assert_eq!(got.status, ResponseStatus::Completed);
        assert!(s.total_bytes() > 0);
        assert!(s.get("resp_missing").is_none());
    }

    #[test]
    fn entries_expire_after_the_ttl() {
        let s = store(StoreConfig {
            ttl_seconds: 0.01,
            ..StoreConfig::default()
        });
        s.put(&response("resp_a", ResponseStatus::Completed)).unwrap();
        std::thread::sleep(Duration::from_millis(25));
        assert!(s.get("resp_a").is_none());
        assert_eq!(s.total_bytes(), 0);
    }

    #[test]
    fn entry_cap_evicts_the_oldest() {
        let s = store(StoreConfig {
            max_entries: 2,
            ..StoreConfig::default()
        });
        s.put(&response("resp_a", ResponseStatus::Completed)).unwrap();
        std::thread::sleep(Duration::from_millis(3));
        s.put(&response("resp_b", ResponseStatus::Completed)).unwrap();
        std::thread::sleep(Duration::from_millis(3));
        s.put(&response("resp_c", ResponseStatus::Completed)).unwrap();

        assert_eq!(s.len(), 2);
        assert!(s.get("resp_a").is_none());
        assert!(s.get("resp_b").is_some());
        assert!(s.get("resp_c").is_some());
    }

    #[test]
    fn byte_cap_evicts_until_it_fits() {
        let probe = store(StoreConfig::default());
        probe
            .put(&response("resp_x", ResponseStatus::Completed))
            .unwrap();
        let one_entry = probe.total_bytes();

        let s = store(StoreConfig {
            max_bytes: Some(one_entry + one_entry / 2),
            ..StoreConfig::default()
        });
        s.put(&response("resp_a", ResponseStatus::Completed)).unwrap();
        std::thread::sleep(Duration::from_millis(3));
        s.put(&response("resp_b", ResponseStatus::Completed)).unwrap();

        assert_eq!(s.len(), 1);
        assert!(s.get("resp_b").is_some());
    }

    #[test]
    fn cancelled_status_is_pinned() {
        let s = store(StoreConfig::default());
        s.put(&response("resp_a", ResponseStatus::InProgress)).unwrap();
        s.update_status("resp_a", ResponseStatus::Cancelled);

        // a racing producer finishing late cannot overwrite the cancel
        s.put(&response("resp_a", ResponseStatus::Completed)).unwrap();
        assert_eq!(s.get("resp_a").unwrap().status, ResponseStatus::Cancelled);
        s.update_status("resp_a", ResponseStatus::Failed);
        assert_eq!(s.get("resp_a").unwrap().status, ResponseStatus::Cancelled);
    }

    #[test]
    fn update_status_applies_to_live_entries_only() {
        let s = store(StoreConfig::default());
        s.update_status("resp_missing", ResponseStatus::Cancelled);
        assert!(s.is_empty());

        s.put(&response("resp_a", ResponseStatus::Queued)).unwrap();
        s.update_status("resp_a", ResponseStatus::InProgress);
        assert_eq!(s.get("resp_a").unwrap().status, ResponseStatus::InProgress);

        s.update_status("resp_a", ResponseStatus::Completed);
        s.update_status("resp_a", ResponseStatus::Failed);
        assert_eq!(s.get("resp_a").unwrap().status, ResponseStatus::Completed);
    }

    #[test]
    fn input_items_are_dropped_with_their_entry() {
        let s = store(StoreConfig {
            max_entries: 1,
            ..StoreConfig::default()
        });
        s.put(&response("resp_a", ResponseStatus::Completed)).unwrap();
        s.record_input_items(
            "resp_a",
            vec![InputItem::user_text("hello".to_string())],
        );
        assert_eq!(s.input_items("resp_a").unwrap().len(), 1);

        std::thread::sleep(Duration::from_millis(3));
        s.put(&response("resp_b", ResponseStatus::Completed)).unwrap();
        assert!(s.input_items("resp_a").is_none());
    }

    #[test]
    fn replacing_an_entry_keeps_its_input_items() {
        let s = store(StoreConfig::default());
        s.record_input_items("resp_a", vec![InputItem::user_text("hello".to_string())]);
        s.put(&response("resp_a", ResponseStatus::Queued)).unwrap();
        s.put(&response("resp_a", ResponseStatus::Completed)).unwrap();
        assert_eq!(s.input_items("resp_a").unwrap().len(), 1);
    }

    #[test]
    fn replacing_an_entry_keeps_byte_accounting_consistent() {
        let s = store(StoreConfig::default());
        s.put(&response("resp_a", ResponseStatus::InProgress)).unwrap();
        let first = s.total_bytes();
        s.put(&response("resp_a", ResponseStatus::Completed)).unwrap();
        assert_eq!(s.len(), 1);
        // in_progress and completed serialize to within a few bytes
        assert!(s.total_bytes().abs_diff(first) < 8);
    }
}
