use std::env;
use std::path::PathBuf;

use anyhow::Result;

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy. Every
/// per-corpus knob lives in the corpus database itself; the environment
/// only decides where the project directories go.
pub struct Config {
    /// Root directory holding one subdirectory per project
    /// (CARDSIM_DATA_DIR env var, default ./projects).
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let data_dir = env::var("CARDSIM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./projects"));
        Ok(Self { data_dir })
    }
}
