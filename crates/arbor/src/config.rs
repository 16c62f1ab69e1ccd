//! Node configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use arbor_sync::SyncConfig;

use crate::error::Result;

/// Configuration for a [`Node`](crate::Node).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use arbor::NodeConfig;
///
/// let config = NodeConfig::from_json(r#"{ "public": true, "sync": { "fill_attempts": 2 } }"#).unwrap();
/// assert!(config.public);
/// assert_eq!(config.sync.fill_attempts, 2);
/// assert_eq!(config.max_feeds, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Answer feed-list and preview requests.
    pub public: bool,
    /// Upper bound on the number of feeds this node holds.
    pub max_feeds: Option<usize>,
    /// Per-connection sync behavior.
    pub sync: SyncConfig,
}

impl NodeConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeError;
    use std::time::Duration;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(NodeConfig::from_json("{}").unwrap(), NodeConfig::default());
    }

    #[test]
    fn test_durations_in_millis() {
        let config = NodeConfig::from_json(
            r#"{ "sync": { "response_timeout": null, "object_timeout": 250 } }"#,
        )
        .unwrap();
        assert_eq!(config.sync.response_timeout, None);
        assert_eq!(config.sync.object_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, r#"{ "max_feeds": 3 }"#).unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.max_feeds, Some(3));

        let missing = NodeConfig::load(dir.path().join("absent.json"));
        assert!(matches!(missing, Err(NodeError::Io(_))));
    }

    #[test]
    fn test_bad_json_rejected() {
        assert!(matches!(
            NodeConfig::from_json("{ \"public\": 7 }"),
            Err(NodeError::Config(_))
        ));
    }
}
