//! Server configuration
//!
//! Layers, lowest priority first: built-in defaults, an optional TOML file,
//! `TERMBRIDGE_*` environment variables. CLI flags are applied on top by the
//! binary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::error::Result;
use termbridge_types::DEFAULT_MIN_COLS;

pub const DEFAULT_PORT: u16 = 16790;
pub const ENV_PREFIX: &str = "TERMBRIDGE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub shell: String,
    pub shell_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Extra environment for spawned shells
    #[serde(alias = "env")]
    pub extra_env: HashMap<String, String>,
    pub min_cols: u16,
    /// Replay buffer size per session, in bytes
    pub buffer_capacity: usize,
    /// Live output events a lagging client may fall behind by
    pub broadcast_capacity: usize,
    /// Pending input chunks per session
    pub input_queue: usize,
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            shell: default_shell(),
            shell_args: Vec::new(),
            working_dir: dirs::home_dir(),
            extra_env: HashMap::new(),
            min_cols: DEFAULT_MIN_COLS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            broadcast_capacity: 1024,
            input_queue: 256,
            log_file: None,
        }
    }
}

fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

impl ServerConfig {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("shell_args"),
        );

        let config: ServerConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }
}
