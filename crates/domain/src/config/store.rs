//! Response store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds for the in-memory terminal-response store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// When `false`, `store=true` requests are rejected and nothing is
    /// persisted.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Age in seconds after which stored responses are evicted. Zero or
    /// negative disables age eviction.
    #[serde(default = "d_3600")]
    pub ttl_seconds: f64,
    /// Maximum stored responses; clamped to at least 1.
    #[serde(default = "d_1000")]
    pub max_entries: usize,
    /// Optional cap on total serialized bytes across all entries.
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: d_true(),
            ttl_seconds: d_3600(),
            max_entries: d_1000(),
            max_bytes: None,
        }
    }
}

impl StoreConfig {
    pub fn ttl(&self) -> Option<Duration> {
        if self.ttl_seconds > 0.0 {
            Some(Duration::from_secs_f64(self.ttl_seconds))
        } else {
            None
        }
    }

    pub fn entry_cap(&self) -> usize {
        self.max_entries.max(1)
    }
}

// ── serde default helpers ────────────────────────────────────────────

fn d_true() -> bool {
    true
}

fn d_3600() -> f64 {
    3600.0
}

fn d_1000() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_config_empty_toml_uses_all_defaults() {
        let cfg: StoreConfig = toml::from_str("").unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.ttl_seconds, 3600.0);
        assert_eq!(cfg.max_entries, 1000);
        assert!(cfg.max_bytes.is_none());
    }

    #[test]
    fn entry_cap_never_below_one() {
        let cfg = StoreConfig {
            max_entries: 0,
            ..Default::default()
        };
        assert_eq!(cfg.entry_cap(), 1);
    }
}
