use crate::error::{Result, VastError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings threaded into a resolution session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Maximum wrapper chain depth; `None` follows chains of any length
    #[serde(default)]
    pub wrapper_abort_limit: Option<usize>,

    /// Used when a `<Wrapper>` does not declare `allowMultipleAds`
    #[serde(default)]
    pub allow_multiple_ads: bool,

    /// Timeout applied by the HTTP fetcher to each request
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_fetch_timeout_secs() -> u64 {
    3
}

impl Default for ResolveConfig {
    fn default() -> Self {
        ResolveConfig {
            wrapper_abort_limit: None,
            allow_multiple_ads: false,
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl ResolveConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content).map_err(|e| {
            VastError::Other(format!(
                "Invalid config '{}': {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Whether a wrapper at `depth` may fetch its target
    pub(crate) fn allows_depth(&self, depth: usize) -> bool {
        self.wrapper_abort_limit.is_none_or(|limit| depth < limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_unlimited() {
        let config = ResolveConfig::default();
        assert_eq!(config.wrapper_abort_limit, None);
        assert!(!config.allow_multiple_ads);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(3));
        assert!(config.allows_depth(1_000));
    }

    #[test]
    fn abort_limit_counts_wrappers() {
        let config = ResolveConfig {
            wrapper_abort_limit: Some(2),
            ..Default::default()
        };
        assert!(config.allows_depth(0));
        assert!(config.allows_depth(1));
        assert!(!config.allows_depth(2));
    }

    #[test]
    fn loads_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"wrapper_abort_limit": 4}}"#).unwrap();

        let config = ResolveConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.wrapper_abort_limit, Some(4));
        assert_eq!(config.fetch_timeout_secs, 3);
    }

    #[test]
    fn rejects_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            ResolveConfig::from_json_file(file.path()),
            Err(VastError::Other(_))
        ));
    }
}
