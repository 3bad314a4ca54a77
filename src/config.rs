//! Environment-driven settings (§6.4, §10.2).
//!
//! Mirrors a `pydantic_settings.BaseSettings`-style configuration object,
//! translated to a plain struct read once at process startup via
//! `std::env::var` rather than a settings-management crate (this dependency
//! stack carries nothing for that concern beyond `serde`).

use std::env;
use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Process-wide configuration, read once at startup and threaded explicitly
/// through [`crate::context::AppContext`] rather than accessed as an ambient
/// global.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `repo.snapshot.json` and `repo.wal.jsonl`.
    pub data_dir: PathBuf,
    /// Default embedding dimension used only by [`crate::embedder::StubEmbedder`].
    pub embedding_dim: usize,
}

impl Config {
    /// Read configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
        let embedding_dim = env::var("VECTORDB_EMBEDDING_DIM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_EMBEDDING_DIM);
        Self { data_dir, embedding_dim }
    }

    /// Construct a config directly, bypassing the environment. Used by
    /// tests that need an isolated `DATA_DIR` (e.g. a `tempfile::TempDir`).
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), embedding_dim: DEFAULT_EMBEDDING_DIM }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { data_dir: PathBuf::from(DEFAULT_DATA_DIR), embedding_dim: DEFAULT_EMBEDDING_DIM }
    }
}
