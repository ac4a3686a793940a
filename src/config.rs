//! Top-level configuration.
//!
//! Every section has defaults, so a partial JSON document is enough:
//!
//! ```ignore
//! let config = SiftConfig::from_json_str(r#"{
//!     "notifier": {
//!         "breaker": { "failureRateThreshold": 25.0, "waitDurationInOpenState": 5000 }
//!     },
//!     "mail": { "publicBaseUrl": "https://api.example.com/api/v1" }
//! }"#)?;
//! ```

use crate::notify::{MailConfig, NotifierConfig, QueueConfig};
use serde::{Deserialize, Serialize};

/// Configuration for the notification pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SiftConfig {
    pub notifier: NotifierConfig,
    pub mail: MailConfig,
    pub queue: QueueConfig,
}

impl SiftConfig {
    /// Parse a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
