//! SSE stream configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Byte caps, batching, and wire-profile toggles for event streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Cap on a single serialized event. `None` or zero disables the cap.
    #[serde(default)]
    pub max_event_bytes: Option<usize>,
    /// Cap on the cumulative bytes buffered for one stream exchange.
    /// `None` or zero disables the cap.
    #[serde(default)]
    pub max_buffer_bytes: Option<usize>,
    /// Coalescing threshold for SSE writes; clamped to at least 1 KiB.
    #[serde(default = "d_16384")]
    pub coalesce_bytes: usize,
    /// Keepalive ping cadence in seconds. Zero or negative disables pings.
    #[serde(default = "d_15")]
    pub ping_interval_seconds: f64,
    /// Wire profile for clients that continue tool calls via a new
    /// request: no `[DONE]` trailer, no aggregate tool-call deltas, legacy
    /// reasoning events.
    #[serde(default)]
    pub compatibility_mode: bool,
    /// Emit the item-scoped reasoning event band alongside (instead of)
    /// the modern one.
    #[serde(default)]
    pub legacy_reasoning_events: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_event_bytes: None,
            max_buffer_bytes: None,
            coalesce_bytes: d_16384(),
            ping_interval_seconds: d_15(),
            compatibility_mode: false,
            legacy_reasoning_events: false,
        }
    }
}

impl StreamConfig {
    pub fn event_byte_cap(&self) -> Option<usize> {
        match self.max_event_bytes {
            None | Some(0) => None,
            Some(cap) => Some(cap),
        }
    }

    pub fn buffer_byte_cap(&self) -> Option<usize> {
        match self.max_buffer_bytes {
            None | Some(0) => None,
            Some(cap) => Some(cap),
        }
    }

    pub fn coalesce_threshold(&self) -> usize {
        self.coalesce_bytes.max(1024)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        if self.ping_interval_seconds > 0.0 {
            Some(Duration::from_secs_f64(self.ping_interval_seconds))
        } else {
            None
        }
    }

    /// Compatibility mode forces the legacy reasoning band on.
    pub fn emit_legacy_reasoning(&self) -> bool {
        self.legacy_reasoning_events || self.compatibility_mode
    }

    pub fn emit_modern_reasoning(&self) -> bool {
        !self.legacy_reasoning_events
    }
}

// ── serde default helpers ────────────────────────────────────────────

fn d_16384() -> usize {
    16_384
}

fn d_15() -> f64 {
    15.0
}
