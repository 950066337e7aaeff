//! Rate-limit, payload-size, and service-tier configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-user sliding-window admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Master switch; when off, no windows are tracked at all.
    #[serde(default)]
    pub enabled: bool,
    /// When `false`, usage is recorded but admission is never denied.
    #[serde(default = "d_true")]
    pub enforce: bool,
    #[serde(default = "d_60")]
    pub requests_per_minute: u64,
    #[serde(default = "d_1000")]
    pub requests_per_hour: u64,
    #[serde(default = "d_100_000")]
    pub tokens_per_minute: u64,
    /// Track and enforce the request-count windows.
    #[serde(default = "d_true")]
    pub request_limits_enabled: bool,
    /// Track and enforce the token window.
    #[serde(default = "d_true")]
    pub token_limits_enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            enforce: d_true(),
            requests_per_minute: d_60(),
            requests_per_hour: d_1000(),
            tokens_per_minute: d_100_000(),
            request_limits_enabled: d_true(),
            token_limits_enabled: d_true(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload caps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Optional request/payload byte caps. `None` disables a cap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub max_request_body_bytes: Option<usize>,
    #[serde(default)]
    pub max_tool_output_bytes: Option<usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service tiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which `service_tier` values requests may carry. `"auto"` is always
/// accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTierConfig {
    #[serde(default = "d_auto")]
    pub default_tier: String,
    #[serde(default = "d_tiers")]
    pub allowed: Vec<String>,
}

impl Default for ServiceTierConfig {
    fn default() -> Self {
        Self {
            default_tier: d_auto(),
            allowed: d_tiers(),
        }
    }
}

impl ServiceTierConfig {
    fn is_allowed(&self, tier: &str) -> bool {
        tier == "auto" || self.allowed.iter().any(|t| t == tier)
    }

    /// Resolve the tier a request runs under. An explicit unknown tier is
    /// rejected; an unknown *configured default* falls back to `"auto"`.
    pub fn resolve(&self, requested: Option<&str>) -> Result<String> {
        match requested {
            Some(tier) => {
                if self.is_allowed(tier) {
                    Ok(tier.to_string())
                } else {
                    Err(Error::Validation(format!(
                        "Invalid service_tier '{tier}'; allowed tiers: {}.",
                        self.allowed.join(", ")
                    )))
                }
            }
            None => {
                if self.is_allowed(&self.default_tier) {
                    Ok(self.default_tier.clone())
                } else {
                    tracing::warn!(
                        default_tier = %self.default_tier,
                        "configured default service tier is not in the allowed set; using 'auto'"
                    );
                    Ok("auto".to_string())
                }
            }
        }
    }
}

// ── serde default helpers ────────────────────────────────────────────

fn d_true() -> bool {
    true
}

fn d_60() -> u64 {
    60
}

fn d_1000() -> u64 {
    1000
}

fn d_100_000() -> u64 {
    100_000
}

fn d_auto() -> String {
    "auto".to_string()
}

fn d_tiers() -> Vec<String> {
    ["auto", "default", "flex", "scale", "priority"]
        .into_iter()
        .map(String::from)
        .collect()
}
