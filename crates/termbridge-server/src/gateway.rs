//! Connection gateway
//!
//! WebSocket front door for the session registry. Each connection starts
//! unbound, binds to one session with `create`, then relays input, resize and
//! kill to that session while forwarding its output as binary frames. Closing
//! the socket only drops the binding; the session keeps running.

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream, StreamExt};
use futures::SinkExt;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::registry::{Attachment, AttachmentEvent, AttachmentId, CreateRequest, SessionRegistry};
use termbridge_types::{ClientMessage, CreateResult, DetachReason, ServerMessage};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// WebSocket server in front of a [`SessionRegistry`]
pub struct Gateway {
    registry: SessionRegistry,
    bind_addr: SocketAddr,
}

impl Gateway {
    pub fn new(registry: SessionRegistry, bind_addr: SocketAddr) -> Self {
        Self {
            registry,
            bind_addr,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Bind the configured address and serve until cancelled
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener, cancel).await
    }

    /// Accept connections on an already bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        info!("Gateway listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Gateway shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    let registry = self.registry.clone();
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, registry, cancel).await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
            }
        }

        Ok(())
    }
}

async fn send(ws_tx: &mut WsSink, msg: &ServerMessage) -> Result<()> {
    ws_tx.send(Message::Text(serde_json::to_string(msg)?)).await?;
    Ok(())
}

/// Next event of the bound session, or never while unbound
async fn next_event(attachment: &mut Option<Attachment>) -> AttachmentEvent {
    match attachment {
        Some(attachment) => attachment.next().await,
        None => std::future::pending().await,
    }
}

/// Per-connection state
struct Connection {
    addr: SocketAddr,
    registry: SessionRegistry,
    attachment_id: AttachmentId,
    attachment: Option<Attachment>,
}

impl Connection {
    fn session_id(&self) -> Option<&str> {
        self.attachment.as_ref().map(|a| a.session_id.as_str())
    }

    /// Drop the binding without touching the session
    async fn unbind(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            self.registry
                .detach(&attachment.session_id, self.attachment_id)
                .await;
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage, ws_tx: &mut WsSink) -> Result<()> {
        match msg {
            ClientMessage::Create {
                session_id,
                request_buffer,
                size,
            } => {
                if self.session_id().is_some() && self.session_id() != session_id.as_deref() {
                    self.unbind().await;
                }

                let requested = session_id.clone().unwrap_or_default();
                let request = CreateRequest {
                    session_id,
                    request_buffer,
                    size,
                };

                let reply = match self.registry.create(request, self.attachment_id).await {
                    Ok((outcome, attachment)) => {
                        info!(
                            "{} attached to session {} (reconnected: {})",
                            self.addr, outcome.session_id, outcome.reconnected
                        );
                        self.attachment = Some(attachment);
                        CreateResult::attached(
                            outcome.session_id,
                            outcome.reconnected,
                            outcome.buffer.map(|b| b.to_vec()),
                        )
                    }
                    Err(e) => {
                        warn!("Create failed for {}: {}", self.addr, e);
                        self.attachment = None;
                        CreateResult::failed(requested, e.to_string())
                    }
                };
                send(ws_tx, &ServerMessage::Created(reply)).await?;
            }

            ClientMessage::Kill { session_id } => {
                // An explicit target works without a binding, e.g. right after a reconnect
                let target = session_id.or_else(|| self.session_id().map(str::to_string));
                if let Some(id) = &target {
                    if self.session_id() == Some(id.as_str()) {
                        self.attachment = None;
                    }
                    let killed = self.registry.kill(id).await?;
                    info!("{} killed session {} (was running: {})", self.addr, id, killed);
                }
                send(ws_tx, &ServerMessage::Killed { session_id: target }).await?;
            }

            ClientMessage::Resize { cols, rows } => {
                let Some(session_id) = self.session_id() else {
                    debug!("Ignoring resize from unbound {}", self.addr);
                    return Ok(());
                };
                if let Err(e) = self.registry.resize(session_id, cols, rows).await {
                    debug!("Resize of {} ignored: {}", session_id, e);
                }
            }

            ClientMessage::Input { data } => {
                self.forward_input(Bytes::from(data), ws_tx).await?;
            }

            ClientMessage::ListSessions => {
                let sessions = self.registry.list().await;
                send(ws_tx, &ServerMessage::Sessions { sessions }).await?;
            }

            ClientMessage::Ping => {
                send(ws_tx, &ServerMessage::Pong).await?;
            }
        }

        Ok(())
    }

    async fn forward_input(&mut self, data: Bytes, ws_tx: &mut WsSink) -> Result<()> {
        let Some(session_id) = self.session_id() else {
            return send(ws_tx, &ServerMessage::error("Not attached to any session")).await;
        };

        match self
            .registry
            .write_as(session_id, self.attachment_id, data)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_soft() => {
                warn!("Input from {} dropped: {}", self.addr, e);
                send(
                    ws_tx,
                    &ServerMessage::error(format!("Failed to send input: {}", e)),
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_event(&mut self, event: AttachmentEvent, ws_tx: &mut WsSink) -> Result<()> {
        match event {
            AttachmentEvent::Output(data) => {
                ws_tx.send(Message::Binary(data.to_vec())).await?;
            }
            AttachmentEvent::Exit(exit_code) => {
                send(ws_tx, &ServerMessage::Exit { exit_code }).await?;
            }
            AttachmentEvent::Lagged(dropped) => {
                warn!("{} fell behind, {} output events dropped", self.addr, dropped);
                send(
                    ws_tx,
                    &ServerMessage::error(format!(
                        "Output lagged: {} events dropped",
                        dropped
                    )),
                )
                .await?;
            }
            AttachmentEvent::Superseded | AttachmentEvent::Closed => {
                let reason = if matches!(event, AttachmentEvent::Superseded) {
                    DetachReason::Superseded
                } else {
                    DetachReason::Killed
                };
                if let Some(attachment) = self.attachment.take() {
                    info!(
                        "{} lost session {} ({:?})",
                        self.addr, attachment.session_id, reason
                    );
                    send(
                        ws_tx,
                        &ServerMessage::Detached {
                            session_id: attachment.session_id,
                            reason,
                        },
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: SessionRegistry,
    cancel: CancellationToken,
) -> Result<()> {
    debug!("New connection from {}", addr);

    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let mut conn = Connection {
        addr,
        attachment_id: registry.next_attachment_id(),
        registry,
        attachment: None,
    };

    let result = relay(&mut conn, &mut ws_tx, &mut ws_rx, &cancel).await;

    // The session outlives the connection
    conn.unbind().await;
    result
}

async fn relay(
    conn: &mut Connection,
    ws_tx: &mut WsSink,
    ws_rx: &mut SplitStream<WebSocketStream<TcpStream>>,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(msg) => msg?,
                    None => break,
                };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(client_msg) => conn.handle_message(client_msg, ws_tx).await?,
                        Err(e) => {
                            warn!("Invalid message from {}: {}", conn.addr, e);
                            send(ws_tx, &ServerMessage::error(format!("Invalid message: {}", e)))
                                .await?;
                        }
                    },
                    Message::Binary(data) => {
                        conn.forward_input(Bytes::from(data), ws_tx).await?;
                    }
                    Message::Close(_) => {
                        debug!("Connection closed from {}", conn.addr);
                        break;
                    }
                    _ => {}
                }
            }
            event = next_event(&mut conn.attachment) => {
                conn.handle_event(event, ws_tx).await?;
            }
        }
    }
    Ok(())
}
