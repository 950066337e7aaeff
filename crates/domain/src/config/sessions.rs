//! Session registry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifetime and capacity limits for streaming sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Idle seconds after which a *completed* session is swept. Zero or
    /// negative disables TTL eviction.
    #[serde(default = "d_600")]
    pub ttl_seconds: f64,
    /// Hard cap on concurrently tracked sessions; the oldest by last
    /// activity are evicted past this.
    #[serde(default = "d_1000")]
    pub max_active_sessions: usize,
    /// How long a paused stream waits for tool outputs before failing.
    #[serde(default = "d_300")]
    pub tool_output_timeout_seconds: f64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: d_600(),
            max_active_sessions: d_1000(),
            tool_output_timeout_seconds: d_300(),
        }
    }
}

impl SessionsConfig {
    /// TTL as a duration; `None` disables age-based sweeping.
    pub fn ttl(&self) -> Option<Duration> {
        if self.ttl_seconds > 0.0 {
            Some(Duration::from_secs_f64(self.ttl_seconds))
        } else {
            None
        }
    }

    pub fn tool_output_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.tool_output_timeout_seconds.max(0.0))
    }
}

// ── serde default helpers ────────────────────────────────────────────

fn d_600() -> f64 {
    600.0
}

fn d_1000() -> usize {
    1000
}

fn d_300() -> f64 {
    300.0
}
