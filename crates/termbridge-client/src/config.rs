//! Client configuration
//!
//! Defaults, then an optional TOML file, then `TERMBRIDGE_CLIENT_*`
//! environment variables.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::script::ScriptConfig;
use termbridge_types::{DEFAULT_MIN_COLS, PERSISTENT_SESSION_ID};

pub const ENV_PREFIX: &str = "TERMBRIDGE_CLIENT";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub gateway_url: String,
    pub session_id: String,
    pub min_cols: u16,
    /// Launch the assistant when a fresh session is created
    pub auto_start: bool,
    pub assistant_command: String,
    pub launch_delay_ms: u64,
    pub prompt_delay_ms: u64,
    pub submit_delay_ms: u64,
    /// Output regex that means the assistant is ready for a prompt
    pub ready_pattern: Option<String>,
    pub reconnect_max_backoff_secs: u64,
    pub reconnect_failures_before_indicator: u32,
    pub state_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: "ws://127.0.0.1:16790".to_string(),
            session_id: PERSISTENT_SESSION_ID.to_string(),
            min_cols: DEFAULT_MIN_COLS,
            auto_start: false,
            assistant_command: "claude".to_string(),
            launch_delay_ms: 500,
            prompt_delay_ms: 3000,
            submit_delay_ms: 100,
            ready_pattern: None,
            reconnect_max_backoff_secs: 30,
            reconnect_failures_before_indicator: 3,
            state_dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".termbridge"))
        .unwrap_or_else(|| PathBuf::from(".termbridge"))
}

impl ClientConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder =
            builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: ClientConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn panel_path(&self) -> PathBuf {
        self.state_dir.join("panel.json")
    }

    /// Timing and readiness settings for scripted injection
    pub fn script_config(&self) -> Result<ScriptConfig> {
        let ready_pattern = self
            .ready_pattern
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(Regex::new)
            .transpose()?;

        Ok(ScriptConfig {
            auto_start: self.auto_start,
            assistant_command: self.assistant_command.clone(),
            launch_delay: Duration::from_millis(self.launch_delay_ms),
            prompt_delay: Duration::from_millis(self.prompt_delay_ms),
            submit_delay: Duration::from_millis(self.submit_delay_ms),
            ready_pattern,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_gateway() {
        let config = ClientConfig::default();
        assert_eq!(config.gateway_url, "ws://127.0.0.1:16790");
        assert_eq!(config.session_id, "main");
        assert!(!config.auto_start);
        assert_eq!(config.panel_path().file_name().unwrap(), "panel.json");
    }

    #[test]
    fn file_overrides_and_script_config() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "auto_start = true\nlaunch_delay_ms = 10\nready_pattern = \"^> $\"\nsession_id = \"scratch\""
        )
        .unwrap();

        let config = ClientConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.session_id, "scratch");

        let script = config.script_config().unwrap();
        assert!(script.auto_start);
        assert_eq!(script.launch_delay, Duration::from_millis(10));
        assert_eq!(script.prompt_delay, Duration::from_millis(3000));
        assert!(script.ready_pattern.is_some());
    }

    #[test]
    fn bad_ready_pattern_is_rejected() {
        let config = ClientConfig {
            ready_pattern: Some("(unclosed".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.script_config(),
            Err(crate::error::ClientError::ReadyPattern(_))
        ));
    }
}
