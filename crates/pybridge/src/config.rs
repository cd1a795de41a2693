//! Bridge configuration.
//!
//! The only knob the bridge owns is the module search path. Python's own `PYTHONPATH` keeps
//! working; `PYBRIDGE_PATH` adds entries in front of it once the interpreter is up, so scripts
//! next to the host binary can be imported without touching the Python environment.

use std::{
    env,
    ffi::OsStr,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Environment variable holding extra module search directories, in the platform path-list
/// syntax (`:` separated on Unix, `;` on Windows).
pub const SEARCH_PATH_ENV: &str = "PYBRIDGE_PATH";

/// Configuration applied once, when the interpreter is initialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directories prepended to `sys.path`, in order.
    pub search_path: Vec<PathBuf>,
}

impl BridgeConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        match env::var_os(SEARCH_PATH_ENV) {
            Some(list) => Self::from_path_list(&list),
            None => Self::default(),
        }
    }

    /// Parses a path list in the platform syntax, skipping empty entries.
    #[must_use]
    pub fn from_path_list(list: &OsStr) -> Self {
        Self {
            search_path: env::split_paths(list)
                .filter(|path| !path.as_os_str().is_empty())
                .collect(),
        }
    }

    /// Appends a directory to the search path.
    #[must_use]
    pub fn with_search_path(mut self, path: impl AsRef<Path>) -> Self {
        self.search_path.push(path.as_ref().to_path_buf());
        self
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn empty_list_yields_empty_search_path() {
        assert_eq!(BridgeConfig::from_path_list(OsStr::new("")), BridgeConfig::default());
    }

    #[cfg(unix)]
    #[test]
    fn path_list_keeps_order_and_drops_blanks() {
        let config = BridgeConfig::from_path_list(OsStr::new("/opt/a::/opt/b"));
        assert_eq!(
            config.search_path,
            vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]
        );
    }

    #[test]
    fn builder_appends() {
        let config = BridgeConfig::new().with_search_path("scripts").with_search_path("vendor");
        assert_eq!(
            config.search_path,
            vec![PathBuf::from("scripts"), PathBuf::from("vendor")]
        );
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert!(config.search_path.is_empty());
        let config: BridgeConfig = serde_json::from_str(r#"{"search_path": ["lib"]}"#).unwrap();
        assert_eq!(config.search_path, vec![PathBuf::from("lib")]);
    }
}
