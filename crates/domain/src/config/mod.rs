//! Configuration for the serving stack.
//!
//! Every group deserializes independently with per-field defaults, so an
//! empty file (or a file naming only the fields being changed) is always
//! valid. Field values carry the raw configured numbers; the accessor
//! methods apply clamping and unit conversion.

mod limits;
mod sessions;
mod store;
mod stream;

pub use limits::{LimitsConfig, RateLimitConfig, ServiceTierConfig};
pub use sessions::SessionsConfig;
pub use store::StoreConfig;
pub use stream::StreamConfig;

use serde::{Deserialize, Serialize};

/// Top-level configuration, aggregating all groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServingConfig {
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub service_tier: ServiceTierConfig,
}
