//! Compiler configuration
//!
//! Optional TOML file (`deva.toml` next to the sources) carrying defaults
//! the CLI flags can override:
//!
//! ```toml
//! debug-info = false
//! search-paths = ["lib", "../shared"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codegen::CompileOptions;

pub const CONFIG_FILE: &str = "deva.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CompilerConfig {
    /// Emit line-number markers (on unless turned off).
    pub debug_info: bool,
    /// Extra directories searched by `import`.
    pub search_paths: Vec<PathBuf>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig { debug_info: true, search_paths: Vec::new() }
    }
}

impl CompilerConfig {
    pub fn load(path: &Path) -> Result<CompilerConfig, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        toml::from_str(&text).map_err(|e| format!("invalid {}: {}", path.display(), e))
    }

    /// `deva.toml` in the current directory, or the defaults.
    pub fn load_default() -> CompilerConfig {
        let path = Path::new(CONFIG_FILE);
        if path.is_file() {
            CompilerConfig::load(path).unwrap_or_default()
        } else {
            CompilerConfig::default()
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions { debug_info: self.debug_info }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert!(config.debug_info);
        assert!(config.search_paths.is_empty());
    }

    #[test]
    fn test_parse_from_toml() {
        let config: CompilerConfig =
            toml::from_str("debug-info = false\nsearch-paths = [\"lib\"]").unwrap();
        assert!(!config.debug_info);
        assert_eq!(config.search_paths, vec![PathBuf::from("lib")]);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CompilerConfig = toml::from_str("debug-info = false").unwrap();
        assert!(!config.debug_info);
        assert!(config.search_paths.is_empty());
    }
}
