//! Bridge configuration.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable holding extra module search paths
pub const MODULE_PATH_ENV: &str = "PYHOST_MODULE_PATH";

/// Environment variable enabling strict conversion
pub const STRICT_ENV: &str = "PYHOST_STRICT";

/// How faithfully native values must convert back to host values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fidelity {
    /// Native types with no host counterpart become `Nil`
    #[default]
    Lossy,
    /// Native types with no host counterpart are a conversion error
    Strict,
}

/// Configuration for the embedded interpreter bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directories prepended to the interpreter's module search path on start
    pub module_paths: Vec<PathBuf>,

    /// Start the interpreter on first use if `start()` was never called
    pub lazy_start: bool,

    /// Conversion fidelity for values read back from the interpreter
    pub fidelity: Fidelity,

    /// Maximum container nesting the marshaller will walk
    pub max_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            module_paths: Vec::new(),
            lazy_start: true,
            fidelity: Fidelity::Lossy,
            max_depth: 256,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `PYHOST_MODULE_PATH` and `PYHOST_STRICT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(paths) = env::var_os(MODULE_PATH_ENV) {
            config.module_paths.extend(env::split_paths(&paths));
        }

        if let Ok(strict) = env::var(STRICT_ENV) {
            if matches!(strict.trim(), "1" | "true" | "yes") {
                config.fidelity = Fidelity::Strict;
            }
        }

        config
    }

    pub fn with_module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_paths.push(path.into());
        self
    }

    pub fn with_fidelity(mut self, fidelity: Fidelity) -> Self {
        self.fidelity = fidelity;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn without_lazy_start(mut self) -> Self {
        self.lazy_start = false;
        self
    }
}
