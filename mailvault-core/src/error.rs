//! Error types for mailvault-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from settings loading and path resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure while reading a settings file.
    #[error("cannot read settings at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot expand `~` or locate defaults.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
