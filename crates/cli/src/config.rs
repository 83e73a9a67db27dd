//! CLI configuration, loaded from an optional `weft.toml`
//!
//! Everything has a sensible default; the file only overrides what it names.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WeftConfig {
    /// Default coroutine stack size in bytes for wires built by the reader
    pub stack_size: Option<usize>,
    /// Milliseconds slept between mesh ticks in `(run)`
    pub tick_ms: Option<u64>,
    /// Root path for relative resource resolution
    pub root_path: Option<String>,
}

impl WeftConfig {
    /// Load from `path`; a missing file yields the defaults, a malformed one
    /// is an error.
    pub fn load(path: &Path) -> Result<WeftConfig, String> {
        if !path.exists() {
            return Ok(WeftConfig::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        toml::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms.unwrap_or(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_is_defaults() {
        let cfg = WeftConfig::load(Path::new("/nonexistent/weft.toml")).unwrap();
        assert_eq!(cfg, WeftConfig::default());
        assert_eq!(cfg.tick_interval(), std::time::Duration::from_millis(10));
    }

    #[test]
    fn test_partial_config() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "tick_ms = 5").unwrap();
        let cfg = WeftConfig::load(f.path()).unwrap();
        assert_eq!(cfg.tick_ms, Some(5));
        assert_eq!(cfg.stack_size, None);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "no_such_key = 1").unwrap();
        assert!(WeftConfig::load(f.path()).is_err());
    }
}
