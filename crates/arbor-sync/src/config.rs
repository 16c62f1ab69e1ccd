//! Configuration for per-connection sync behavior.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for sync behavior.
///
/// Durations are expressed in milliseconds when (de)serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Deadline for caller-issued requests (subscribe, list, preview, fetch).
    /// `None` waits until a response arrives or the connection closes.
    #[serde(with = "duration_ms::option")]
    pub response_timeout: Option<Duration>,

    /// Deadline for each object request issued by the filler.
    #[serde(with = "duration_ms")]
    pub object_timeout: Duration,

    /// How many times the filler requests one key before giving up.
    pub fill_attempts: u32,

    /// Maximum object requests outstanding per filling operation.
    pub max_in_flight: usize,

    /// Ask peers to send directly referenced objects along with a response.
    pub prefetch: bool,

    /// Maximum additional objects sent (or accepted) with one response.
    pub max_prefetch: usize,

    /// Capacity of the outbound frame queue.
    pub send_queue: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            response_timeout: Some(Duration::from_secs(30)),
            object_timeout: Duration::from_secs(10),
            fill_attempts: 4,
            max_in_flight: 16,
            prefetch: true,
            max_prefetch: 32,
            send_queue: 128,
        }
    }
}

/// Serde helpers for durations stored as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    /// Optional variant: `null` (or a missing field) means no deadline.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}
