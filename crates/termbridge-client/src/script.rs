//! Scripted prompt injection
//!
//! The assistant running inside the session gives no signal when it has
//! finished booting, so injection is a timed script: optionally type the
//! launch command, wait, type the prompt, wait briefly, press Enter. With a
//! ready pattern configured the prompt wait ends as soon as matching output
//! shows up, and the prompt delay becomes a timeout.
//!
//! All waits are tokio timers; a running script never blocks anything else.

use bytes::Bytes;
use regex::Regex;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Output kept for readiness matching
const READY_WINDOW: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ScriptConfig {
    pub auto_start: bool,
    pub assistant_command: String,
    pub launch_delay: Duration,
    pub prompt_delay: Duration,
    pub submit_delay: Duration,
    pub ready_pattern: Option<Regex>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            auto_start: false,
            assistant_command: "claude".to_string(),
            launch_delay: Duration::from_millis(500),
            prompt_delay: Duration::from_millis(3000),
            submit_delay: Duration::from_millis(100),
            ready_pattern: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Wait(Duration),
    /// Wait until output matches, or the timeout passes
    WaitForReady { pattern: Regex, timeout: Duration },
    Send(Bytes),
}

impl PartialEq for ScriptStep {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScriptStep::Wait(a), ScriptStep::Wait(b)) => a == b,
            (
                ScriptStep::WaitForReady { pattern: p, timeout: t },
                ScriptStep::WaitForReady { pattern: q, timeout: u },
            ) => p.as_str() == q.as_str() && t == u,
            (ScriptStep::Send(a), ScriptStep::Send(b)) => a == b,
            _ => false,
        }
    }
}

fn push_prompt(steps: &mut Vec<ScriptStep>, config: &ScriptConfig, prompt: &str) {
    steps.push(ScriptStep::Send(Bytes::copy_from_slice(prompt.as_bytes())));
    steps.push(ScriptStep::Wait(config.submit_delay));
    steps.push(ScriptStep::Send(Bytes::from_static(b"\r")));
}

/// Steps for a freshly spawned session: launch the assistant, then the
/// queued prompt if there is one
pub fn launch_plan(config: &ScriptConfig, prompt: Option<&str>) -> Vec<ScriptStep> {
    let mut steps = vec![
        ScriptStep::Wait(config.launch_delay),
        ScriptStep::Send(Bytes::from(format!("{}\r", config.assistant_command))),
    ];

    if let Some(prompt) = prompt {
        steps.push(match &config.ready_pattern {
            Some(pattern) => ScriptStep::WaitForReady {
                pattern: pattern.clone(),
                timeout: config.prompt_delay,
            },
            None => ScriptStep::Wait(config.prompt_delay),
        });
        push_prompt(&mut steps, config, prompt);
    }

    steps
}

/// Steps for a session whose assistant is already running
pub fn prompt_plan(config: &ScriptConfig, prompt: &str) -> Vec<ScriptStep> {
    let mut steps = Vec::with_capacity(3);
    push_prompt(&mut steps, config, prompt);
    steps
}

/// Wait for `pattern` in `output`. False on timeout or when output ends.
async fn wait_for_ready(
    pattern: &Regex,
    timeout: Duration,
    output: &mut broadcast::Receiver<Bytes>,
) -> bool {
    let mut window: Vec<u8> = Vec::new();
    let watch = async {
        loop {
            match output.recv().await {
                Ok(chunk) => {
                    window.extend_from_slice(&chunk);
                    if window.len() > READY_WINDOW {
                        window.drain(..window.len() - READY_WINDOW);
                    }
                    if pattern.is_match(&String::from_utf8_lossy(&window)) {
                        return true;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    };

    tokio::time::timeout(timeout, watch).await.unwrap_or(false)
}

/// Execute a plan, sending input through `input`. Stops early if the
/// receiving side is gone.
pub async fn run_script(
    steps: Vec<ScriptStep>,
    input: mpsc::Sender<Bytes>,
    mut output: broadcast::Receiver<Bytes>,
) {
    info!("Running injection script ({} steps)", steps.len());
    for step in steps {
        match step {
            ScriptStep::Wait(delay) => tokio::time::sleep(delay).await,
            ScriptStep::WaitForReady { pattern, timeout } => {
                if wait_for_ready(&pattern, timeout, &mut output).await {
                    debug!("Ready pattern {} matched", pattern);
                } else {
                    warn!(
                        "Ready pattern {} not seen within {:?}, sending anyway",
                        pattern, timeout
                    );
                }
            }
            ScriptStep::Send(data) => {
                if input.send(data).await.is_err() {
                    debug!("Injection target closed, script abandoned");
                    return;
                }
            }
        }
    }
}
