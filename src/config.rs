use std::path::PathBuf;

use serde::Deserialize;
use std::fs;

/// Where persisted position records live.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self { state_dir: PathBuf::from("/var/lib/logtailer") }
    }
}

impl Config {
    // A constructor-like function.
    // Result<T> is how Rust handles errors. No more (val, err).
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?; // The '?' operator is "if err != nil { return err }"
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}
