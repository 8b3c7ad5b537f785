//! Client session controller
//!
//! Keeps one logical session alive for a terminal widget while the transport
//! underneath comes and goes. The controller does no I/O: every input is a
//! [`ControllerEvent`], and `handle` returns the [`Command`]s the runtime
//! should carry out. That keeps the whole state machine testable without a
//! socket or a timer.
//!
//! ```text
//! Idle -> Connecting -> Creating -> Attached
//!             ^                         |
//!             +---- transport lost -----+
//! ```

use bytes::Bytes;
use std::borrow::Cow;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::fit::ResizeFitter;
use crate::keys::translate_input;
use crate::script::{launch_plan, prompt_plan, ScriptConfig, ScriptStep};
use crate::store::PromptStore;
use termbridge_types::{ClientMessage, CreateResult, DetachReason, ServerMessage, TermSize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Creating,
    Attached,
    Exited(i32),
    Failed(String),
}

/// What the widget should show outside the terminal grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnect keeps failing; the session is still alive server-side
    Disconnected,
    Exited(i32),
    Error(String),
    /// Informational, the session is unaffected
    Notice(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A fresh widget was mounted
    Mount,
    /// The widget was torn down
    Unmount,
    Connected,
    ConnectFailed(String),
    Disconnected,
    Server(ServerMessage),
    /// Binary output frame from the session
    Output(Bytes),
    /// Keystrokes typed into the widget
    UserInput(Bytes),
    /// The widget's container proposes a new size
    Resize(TermSize),
    /// Replace the session with a fresh process
    ForceNew,
    /// The prompt store has something queued
    PromptQueued,
    /// Bytes typed by the running injection script
    ScriptInput(Bytes),
    /// The injection script ran to completion
    ScriptFinished,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open the transport to the gateway
    Connect,
    /// Open the transport after a delay
    ScheduleReconnect(Duration),
    /// Close the transport; the session stays alive
    Close,
    Send(ClientMessage),
    /// Raw input bytes for the session
    SendInput(Bytes),
    WriteWidget(Bytes),
    /// Drop the widget's scrollback
    ResetWidget,
    SetStatus(WidgetStatus),
    RunScript(Vec<ScriptStep>),
    CancelScript,
}

/// Exponential reconnect delay: 1s, 2s, 4s ... up to a cap
#[derive(Debug, Clone)]
pub struct Backoff {
    next_secs: u64,
    max_secs: u64,
}

impl Backoff {
    pub fn new(max_secs: u64) -> Self {
        Self {
            next_secs: 1,
            max_secs: max_secs.max(1),
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next_secs.min(self.max_secs);
        self.next_secs = (self.next_secs * 2).min(self.max_secs);
        Duration::from_secs(delay)
    }

    pub fn reset(&mut self) {
        self.next_secs = 1;
    }
}

pub struct SessionController {
    session_id: String,
    phase: Phase,
    mount_key: u64,
    /// Ask for replay on the next `create`
    request_buffer: bool,
    /// Waiting for the `killed` ack of a force-new
    pending_force_new: bool,
    /// Another tab owns the session now; do not fight it
    superseded: bool,
    connected: bool,
    /// A connect is in flight or scheduled
    reconnecting: bool,
    /// Prompt handed to the running script but not typed yet
    injecting: Option<String>,
    fitter: ResizeFitter,
    script: ScriptConfig,
    prompts: PromptStore,
    backoff: Backoff,
    failures: u32,
    failures_before_indicator: u32,
}

impl SessionController {
    pub fn new(
        session_id: impl Into<String>,
        min_cols: u16,
        script: ScriptConfig,
        max_backoff_secs: u64,
        failures_before_indicator: u32,
        prompts: PromptStore,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            phase: Phase::Idle,
            mount_key: 0,
            request_buffer: false,
            pending_force_new: false,
            superseded: false,
            connected: false,
            reconnecting: false,
            injecting: None,
            fitter: ResizeFitter::new(min_cols),
            script,
            prompts,
            backoff: Backoff::new(max_backoff_secs),
            failures: 0,
            failures_before_indicator: failures_before_indicator.max(1),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Changes whenever the widget must be rebuilt from scratch
    pub fn mount_key(&self) -> u64 {
        self.mount_key
    }

    pub fn is_attached(&self) -> bool {
        self.phase == Phase::Attached
    }

    /// The effective size last sent, if any
    pub fn size(&self) -> Option<TermSize> {
        self.fitter.effective()
    }

    pub fn handle(&mut self, event: ControllerEvent) -> Vec<Command> {
        match event {
            ControllerEvent::Mount => self.on_mount(),
            ControllerEvent::Unmount => self.on_unmount(),
            ControllerEvent::Connected => self.on_connected(),
            ControllerEvent::ConnectFailed(reason) => {
                debug!("Connect failed: {}", reason);
                self.on_transport_lost()
            }
            ControllerEvent::Disconnected => self.on_transport_lost(),
            ControllerEvent::Server(msg) => self.on_server(msg),
            ControllerEvent::Output(data) => match self.phase {
                Phase::Idle => vec![],
                _ => vec![Command::WriteWidget(data)],
            },
            ControllerEvent::UserInput(data) => self.on_user_input(data),
            ControllerEvent::Resize(size) => self.on_resize(size),
            ControllerEvent::ForceNew => self.on_force_new(),
            ControllerEvent::PromptQueued => self.on_prompt_queued(),
            ControllerEvent::ScriptInput(data) => self.on_script_input(data),
            ControllerEvent::ScriptFinished => {
                self.injecting = None;
                vec![]
            }
        }
    }

    /// Stop the running script, handing back a prompt it never typed
    fn cancel_script(&mut self) -> Command {
        if let Some(prompt) = self.injecting.take() {
            if self.prompts.peek().is_none() {
                debug!("Requeueing prompt that was not typed yet");
                self.prompts.submit(prompt);
            }
        }
        Command::CancelScript
    }

    fn create_message(&self) -> ClientMessage {
        ClientMessage::Create {
            session_id: Some(self.session_id.clone()),
            request_buffer: self.request_buffer,
            size: self.fitter.effective(),
        }
    }

    fn on_mount(&mut self) -> Vec<Command> {
        // A new widget has no history of its own yet
        self.request_buffer = true;
        self.superseded = false;
        self.failures = 0;
        self.backoff.reset();
        self.phase = Phase::Connecting;
        self.reconnecting = true;
        vec![
            Command::SetStatus(WidgetStatus::Connecting),
            Command::Connect,
        ]
    }

    fn on_unmount(&mut self) -> Vec<Command> {
        self.phase = Phase::Idle;
        self.connected = false;
        self.reconnecting = false;
        vec![self.cancel_script(), Command::Close]
    }

    fn on_connected(&mut self) -> Vec<Command> {
        self.reconnecting = false;
        if self.phase == Phase::Idle {
            return vec![Command::Close];
        }
        self.connected = true;
        self.failures = 0;
        self.backoff.reset();

        if self.pending_force_new {
            // Named, because a new socket is not bound to anything yet
            self.phase = Phase::Creating;
            return vec![Command::Send(ClientMessage::kill(self.session_id.clone()))];
        }

        match &self.phase {
            // An ended session stays ended until the user starts a new one
            Phase::Exited(code) => vec![Command::SetStatus(WidgetStatus::Exited(*code))],
            Phase::Failed(message) => {
                vec![Command::SetStatus(WidgetStatus::Error(message.clone()))]
            }
            _ => {
                self.phase = Phase::Creating;
                vec![Command::Send(self.create_message())]
            }
        }
    }

    fn on_transport_lost(&mut self) -> Vec<Command> {
        self.connected = false;
        self.reconnecting = false;
        if self.phase == Phase::Idle || self.superseded {
            return vec![];
        }

        self.failures += 1;
        self.reconnecting = true;
        let delay = self.backoff.next_delay();
        // Exited and failed sessions stay that way until the user acts
        if matches!(self.phase, Phase::Attached | Phase::Creating | Phase::Connecting) {
            self.phase = Phase::Connecting;
        }

        let status = if self.failures >= self.failures_before_indicator {
            warn!(
                "Gateway unreachable after {} attempts, retrying in {:?}",
                self.failures, delay
            );
            WidgetStatus::Disconnected
        } else {
            WidgetStatus::Reconnecting {
                attempt: self.failures,
            }
        };

        vec![
            self.cancel_script(),
            Command::SetStatus(status),
            Command::ScheduleReconnect(delay),
        ]
    }

    fn on_server(&mut self, msg: ServerMessage) -> Vec<Command> {
        match msg {
            ServerMessage::Created(result) => self.on_created(result),
            ServerMessage::Killed { .. } => self.on_killed(),
            ServerMessage::Exit { exit_code } => {
                info!("Session {} exited with code {}", self.session_id, exit_code);
                self.phase = Phase::Exited(exit_code);
                vec![
                    self.cancel_script(),
                    Command::SetStatus(WidgetStatus::Exited(exit_code)),
                ]
            }
            ServerMessage::Detached { session_id, reason } => {
                let message = match reason {
                    DetachReason::Superseded => {
                        self.superseded = true;
                        format!("Session {} was opened elsewhere", session_id)
                    }
                    DetachReason::Killed => format!("Session {} was killed", session_id),
                };
                self.phase = Phase::Failed(message.clone());
                vec![
                    self.cancel_script(),
                    Command::SetStatus(WidgetStatus::Error(message)),
                ]
            }
            ServerMessage::Error { message } => {
                warn!("Gateway reported: {}", message);
                vec![Command::SetStatus(WidgetStatus::Notice(message))]
            }
            ServerMessage::Sessions { .. } | ServerMessage::Pong => vec![],
        }
    }

    fn on_created(&mut self, result: CreateResult) -> Vec<Command> {
        if !result.success {
            let message = result
                .error
                .unwrap_or_else(|| "session could not be created".to_string());
            warn!("Create {} failed: {}", self.session_id, message);
            self.phase = Phase::Failed(message.clone());
            return vec![Command::SetStatus(WidgetStatus::Error(message))];
        }

        let reconnected = result.is_reconnect();
        info!(
            "Attached to {} (reconnected: {})",
            result.session_id, reconnected
        );
        self.session_id = result.session_id;
        self.phase = Phase::Attached;
        // Later transport reconnects reuse what the widget already shows
        self.request_buffer = false;

        let mut commands = Vec::new();
        if let Some(buffer) = result.buffer.filter(|b| !b.is_empty()) {
            commands.push(Command::WriteWidget(Bytes::from(buffer)));
        }
        commands.push(Command::SetStatus(WidgetStatus::Connected));

        let prompt = self.prompts.take();
        if !reconnected && self.script.auto_start {
            commands.push(Command::RunScript(launch_plan(
                &self.script,
                prompt.as_deref(),
            )));
        } else if let Some(prompt) = &prompt {
            commands.push(Command::RunScript(prompt_plan(&self.script, prompt)));
        }
        self.injecting = prompt;

        commands
    }

    fn on_killed(&mut self) -> Vec<Command> {
        if !self.pending_force_new {
            return vec![];
        }
        self.pending_force_new = false;
        self.mount_key += 1;
        self.request_buffer = false;
        self.phase = Phase::Creating;
        info!(
            "Session {} killed, starting fresh (mount {})",
            self.session_id, self.mount_key
        );
        vec![Command::ResetWidget, Command::Send(self.create_message())]
    }

    fn on_force_new(&mut self) -> Vec<Command> {
        if self.phase == Phase::Idle {
            return vec![];
        }
        self.pending_force_new = true;
        self.superseded = false;
        let mut commands = vec![self.cancel_script()];

        if self.connected {
            // Nothing more reaches the old process
            self.phase = Phase::Creating;
            commands.push(Command::Send(ClientMessage::kill(self.session_id.clone())));
        } else if !self.reconnecting {
            // The kill goes out as soon as the transport is back
            self.reconnecting = true;
            commands.push(Command::Connect);
        }
        commands
    }

    fn on_user_input(&mut self, data: Bytes) -> Vec<Command> {
        if !self.is_attached() {
            debug!("Dropping {} input bytes while {:?}", data.len(), self.phase);
            return vec![];
        }
        let translated = match translate_input(&data) {
            Cow::Owned(bytes) => Some(Bytes::from(bytes)),
            Cow::Borrowed(_) => None,
        };
        vec![Command::SendInput(translated.unwrap_or(data))]
    }

    fn on_resize(&mut self, size: TermSize) -> Vec<Command> {
        match self.fitter.propose(size) {
            Some(effective) if self.is_attached() => {
                vec![Command::Send(ClientMessage::Resize {
                    cols: effective.cols,
                    rows: effective.rows,
                })]
            }
            // Remembered; the next create carries it
            _ => vec![],
        }
    }

    fn on_prompt_queued(&mut self) -> Vec<Command> {
        if !self.is_attached() {
            return vec![];
        }
        match self.prompts.take() {
            Some(prompt) => {
                let steps = prompt_plan(&self.script, &prompt);
                self.injecting = Some(prompt);
                vec![Command::RunScript(steps)]
            }
            None => vec![],
        }
    }

    /// Scripted keystrokes go out untranslated
    fn on_script_input(&mut self, data: Bytes) -> Vec<Command> {
        if !self.is_attached() {
            debug!("Dropping scripted input while {:?}", self.phase);
            return vec![];
        }
        if self.injecting.as_deref().map(str::as_bytes) == Some(&data[..]) {
            // Typed; from here on a retry would duplicate it
            self.injecting = None;
        }
        vec![Command::SendInput(data)]
    }
}
