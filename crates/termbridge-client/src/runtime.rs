//! WebSocket runtime for the session controller
//!
//! Owns the socket, the reconnect timer and the injection script task, and
//! carries out whatever the [`SessionController`] decides. Rendering is left
//! to a [`TerminalWidget`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::controller::{Command, ControllerEvent, SessionController, WidgetStatus};
use crate::error::Result;
use crate::script::run_script;
use crate::store::PromptStore;
use termbridge_types::{ServerMessage, TermSize};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Whatever renders the terminal
#[async_trait]
pub trait TerminalWidget: Send {
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Throw away scrollback; the next bytes belong to a new process
    async fn reset(&mut self) -> Result<()>;

    async fn status(&mut self, status: &WidgetStatus) -> Result<()>;
}

/// Input from the widget's side
#[derive(Debug, Clone)]
pub enum UiEvent {
    Input(Bytes),
    Resize(TermSize),
    ForceNew,
    /// Leave the session running and stop
    Detach,
}

pub struct BridgeRuntime<W: TerminalWidget> {
    url: String,
    controller: SessionController,
    widget: W,
    prompts: PromptStore,
    ws: Option<WsStream>,
    reconnect_at: Option<Instant>,
    script: Option<(JoinHandle<()>, mpsc::Receiver<Bytes>)>,
    output_tx: broadcast::Sender<Bytes>,
}

async fn next_frame(ws: &mut Option<WsStream>) -> Option<tungstenite::Result<Message>> {
    match ws {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn script_input(script: &mut Option<(JoinHandle<()>, mpsc::Receiver<Bytes>)>) -> Option<Bytes> {
    match script {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<W: TerminalWidget> BridgeRuntime<W> {
    pub fn new(
        url: impl Into<String>,
        controller: SessionController,
        widget: W,
        prompts: PromptStore,
    ) -> Self {
        let (output_tx, _) = broadcast::channel(256);
        Self {
            url: url.into(),
            controller,
            widget,
            prompts,
            ws: None,
            reconnect_at: None,
            script: None,
            output_tx,
        }
    }

    /// Mount, then serve until the UI detaches or its channel closes
    pub async fn run(mut self, mut ui: mpsc::Receiver<UiEvent>) -> Result<()> {
        let mut prompt_rx = self.prompts.subscribe();
        self.dispatch(ControllerEvent::Mount).await?;

        loop {
            tokio::select! {
                event = ui.recv() => {
                    let event = match event {
                        Some(UiEvent::Input(data)) => ControllerEvent::UserInput(data),
                        Some(UiEvent::Resize(size)) => ControllerEvent::Resize(size),
                        Some(UiEvent::ForceNew) => ControllerEvent::ForceNew,
                        Some(UiEvent::Detach) | None => {
                            info!("Detaching from {}", self.controller.session_id());
                            self.dispatch(ControllerEvent::Unmount).await?;
                            break;
                        }
                    };
                    self.dispatch(event).await?;
                }
                frame = next_frame(&mut self.ws) => {
                    let event = match frame {
                        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(msg) => ControllerEvent::Server(msg),
                            Err(e) => {
                                warn!("Unreadable message from gateway: {}", e);
                                continue;
                            }
                        },
                        Some(Ok(Message::Binary(data))) => {
                            let data = Bytes::from(data);
                            // Only a running readiness wait listens here
                            let _ = self.output_tx.send(data.clone());
                            ControllerEvent::Output(data)
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Gateway closed the connection");
                            self.ws = None;
                            ControllerEvent::Disconnected
                        }
                        Some(Err(e)) => {
                            warn!("Connection to gateway lost: {}", e);
                            self.ws = None;
                            ControllerEvent::Disconnected
                        }
                        Some(Ok(_)) => continue,
                    };
                    self.dispatch(event).await?;
                }
                _ = reconnect_due(self.reconnect_at) => {
                    self.reconnect_at = None;
                    let event = self.connect().await;
                    self.dispatch(event).await?;
                }
                data = script_input(&mut self.script) => {
                    let event = match data {
                        Some(data) => ControllerEvent::ScriptInput(data),
                        None => {
                            self.script = None;
                            ControllerEvent::ScriptFinished
                        }
                    };
                    self.dispatch(event).await?;
                }
                changed = prompt_rx.changed() => {
                    if changed.is_ok() && prompt_rx.borrow_and_update().is_some() {
                        self.dispatch(ControllerEvent::PromptQueued).await?;
                    }
                }
            }
        }

        self.cancel_script();
        Ok(())
    }

    /// Feed an event through the controller, including events its commands cause
    async fn dispatch(&mut self, event: ControllerEvent) -> Result<()> {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for command in self.controller.handle(event) {
                if let Some(follow_up) = self.execute(command).await? {
                    queue.push_back(follow_up);
                }
            }
        }
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> Result<Option<ControllerEvent>> {
        match command {
            Command::Connect => return Ok(Some(self.connect().await)),
            Command::ScheduleReconnect(delay) => {
                debug!("Reconnecting in {:?}", delay);
                self.reconnect_at = Some(Instant::now() + delay);
            }
            Command::Close => {
                self.reconnect_at = None;
                if let Some(mut ws) = self.ws.take() {
                    let _ = ws.close(None).await;
                }
            }
            Command::Send(msg) => {
                let text = serde_json::to_string(&msg)?;
                return Ok(self.send_frame(Message::Text(text)).await);
            }
            Command::SendInput(data) => {
                return Ok(self.send_frame(Message::Binary(data.to_vec())).await);
            }
            Command::WriteWidget(data) => self.widget.write(&data).await?,
            Command::ResetWidget => self.widget.reset().await?,
            Command::SetStatus(status) => self.widget.status(&status).await?,
            Command::RunScript(steps) => {
                self.cancel_script();
                let (input_tx, input_rx) = mpsc::channel(16);
                let handle = tokio::spawn(run_script(steps, input_tx, self.output_tx.subscribe()));
                self.script = Some((handle, input_rx));
            }
            Command::CancelScript => self.cancel_script(),
        }
        Ok(None)
    }

    async fn connect(&mut self) -> ControllerEvent {
        debug!("Connecting to {}", self.url);
        match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str())).await {
            Ok(Ok((ws, _))) => {
                info!("Connected to {}", self.url);
                self.ws = Some(ws);
                ControllerEvent::Connected
            }
            Ok(Err(e)) => ControllerEvent::ConnectFailed(e.to_string()),
            Err(_) => ControllerEvent::ConnectFailed("timed out".to_string()),
        }
    }

    /// Send one frame. A failed send means the transport is gone.
    async fn send_frame(&mut self, frame: Message) -> Option<ControllerEvent> {
        let ws = match self.ws.as_mut() {
            Some(ws) => ws,
            None => {
                debug!("Not connected, frame dropped");
                return None;
            }
        };
        match ws.send(frame).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Send to gateway failed: {}", e);
                self.ws = None;
                Some(ControllerEvent::Disconnected)
            }
        }
    }

    fn cancel_script(&mut self) {
        if let Some((handle, _)) = self.script.take() {
            handle.abort();
        }
    }
}
