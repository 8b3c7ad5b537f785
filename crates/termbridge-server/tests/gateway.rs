//! End-to-end tests: a real gateway on an ephemeral port, driven by a
//! WebSocket client against `/bin/sh` sessions.

#![cfg(unix)]

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use termbridge_server::{Gateway, RegistryConfig, SessionRegistry};
use termbridge_types::{ClientMessage, CreateResult, DetachReason, ServerMessage};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(10);

fn sh_config() -> RegistryConfig {
    RegistryConfig {
        shell: "/bin/sh".into(),
        shell_args: vec![],
        working_dir: None,
        extra_env: HashMap::from([("PS1".to_string(), "$ ".to_string())]),
        min_cols: 80,
        buffer_capacity: 64 * 1024,
        broadcast_capacity: 256,
        input_queue: 64,
    }
}

struct TestServer {
    addr: SocketAddr,
    registry: SessionRegistry,
    cancel: CancellationToken,
}

impl TestServer {
    async fn start(config: RegistryConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = SessionRegistry::new(config);
        let cancel = CancellationToken::new();

        let gateway = Gateway::new(registry.clone(), addr);
        let token = cancel.clone();
        tokio::spawn(async move { gateway.serve(listener, token).await });

        Self {
            addr,
            registry,
            cancel,
        }
    }

    async fn connect(&self) -> Ws {
        let (ws, _) = connect_async(format!("ws://{}", self.addr)).await.unwrap();
        ws
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.registry.shutdown().await;
    }
}

enum Frame {
    Control(ServerMessage),
    Output(Vec<u8>),
}

async fn send(ws: &mut Ws, msg: &ClientMessage) {
    ws.send(Message::Text(serde_json::to_string(msg).unwrap()))
        .await
        .unwrap();
}

async fn next_frame(ws: &mut Ws) -> Frame {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .unwrap();
        match msg {
            Message::Text(text) => return Frame::Control(serde_json::from_str(&text).unwrap()),
            Message::Binary(data) => return Frame::Output(data),
            _ => continue,
        }
    }
}

/// Next control message, skipping output frames
async fn next_control(ws: &mut Ws) -> ServerMessage {
    loop {
        if let Frame::Control(msg) = next_frame(ws).await {
            return msg;
        }
    }
}

async fn create(ws: &mut Ws, id: &str, request_buffer: bool) -> CreateResult {
    send(ws, &ClientMessage::create(id, request_buffer)).await;
    match next_control(ws).await {
        ServerMessage::Created(result) => result,
        other => panic!("expected created, got {:?}", other),
    }
}

/// Collect output until `needle` appears
async fn wait_for_output(ws: &mut Ws, needle: &str) -> String {
    let mut seen = Vec::new();
    loop {
        match next_frame(ws).await {
            Frame::Output(data) => {
                seen.extend_from_slice(&data);
                let text = String::from_utf8_lossy(&seen).to_string();
                if text.contains(needle) {
                    return text;
                }
            }
            Frame::Control(msg) => panic!("unexpected control message {:?}", msg),
        }
    }
}

async fn input(ws: &mut Ws, data: &str) {
    send(
        ws,
        &ClientMessage::Input {
            data: data.to_string(),
        },
    )
    .await;
}

#[tokio::test]
async fn fresh_mount_then_transport_reconnect() {
    let server = TestServer::start(sh_config()).await;

    let mut ws = server.connect().await;
    let created = create(&mut ws, "main", true).await;
    assert!(created.success);
    assert_eq!(created.session_id, "main");
    assert_eq!(created.reconnected, Some(false));

    input(&mut ws, "echo hi$((40+2))\n").await;
    wait_for_output(&mut ws, "hi42").await;

    // Socket drop: the session must survive it
    drop(ws);

    let mut ws = server.connect().await;
    let created = create(&mut ws, "main", false).await;
    assert!(created.success);
    assert!(created.is_reconnect());
    assert!(created.buffer.is_none());

    input(&mut ws, "echo again$((1+1))\n").await;
    let text = wait_for_output(&mut ws, "again2").await;
    // Only new bytes arrive, no replay of the earlier output
    assert!(!text.contains("hi42"));

    server.stop().await;
}

#[tokio::test]
async fn replay_snapshot_is_returned_once() {
    let server = TestServer::start(sh_config()).await;

    let mut ws = server.connect().await;
    create(&mut ws, "replay", false).await;
    input(&mut ws, "echo abc$((5+5))\n").await;
    wait_for_output(&mut ws, "abc10").await;

    let mut other = server.connect().await;
    let created = create(&mut other, "replay", true).await;
    assert!(created.is_reconnect());
    let buffer = created.buffer.expect("snapshot requested");
    assert!(String::from_utf8_lossy(&buffer).contains("abc10"));

    let again = create(&mut other, "replay", false).await;
    assert!(again.is_reconnect());
    assert!(again.buffer.is_none());

    server.stop().await;
}

#[tokio::test]
async fn resize_below_floor_is_clamped() {
    let server = TestServer::start(sh_config()).await;

    let mut ws = server.connect().await;
    create(&mut ws, "narrow", false).await;
    send(&mut ws, &ClientMessage::Resize { cols: 40, rows: 24 }).await;

    send(&mut ws, &ClientMessage::ListSessions).await;
    let sessions = match next_control(&mut ws).await {
        ServerMessage::Sessions { sessions } => sessions,
        other => panic!("expected sessions, got {:?}", other),
    };
    let narrow = sessions.iter().find(|s| s.id == "narrow").unwrap();
    assert_eq!(narrow.cols, 80);
    assert_eq!(narrow.rows, 24);

    server.stop().await;
}

#[tokio::test]
async fn kill_then_create_starts_a_new_process() {
    let server = TestServer::start(sh_config()).await;

    let mut ws = server.connect().await;
    create(&mut ws, "main", false).await;
    input(&mut ws, "echo before$((3*3))\n").await;
    wait_for_output(&mut ws, "before9").await;
    let first = server.registry.summary("main").await.unwrap();

    send(&mut ws, &ClientMessage::Kill { session_id: None }).await;
    match next_control(&mut ws).await {
        ServerMessage::Killed { session_id } => assert_eq!(session_id.as_deref(), Some("main")),
        other => panic!("expected killed, got {:?}", other),
    }

    let created = create(&mut ws, "main", true).await;
    assert!(created.success);
    assert_eq!(created.reconnected, Some(false));
    let buffer = created.buffer.unwrap_or_default();
    assert!(!String::from_utf8_lossy(&buffer).contains("before9"));

    let second = server.registry.summary("main").await.unwrap();
    assert!(second.generation > first.generation);
    assert_ne!(second.pid, first.pid);

    server.stop().await;
}

#[tokio::test]
async fn named_kill_on_a_fresh_connection_replaces_the_process() {
    let server = TestServer::start(sh_config()).await;

    let mut first = server.connect().await;
    create(&mut first, "main", false).await;
    let before = server.registry.summary("main").await.unwrap();
    drop(first);

    // A reconnecting client is unbound until it creates again
    let mut ws = server.connect().await;
    send(&mut ws, &ClientMessage::kill("main")).await;
    match next_control(&mut ws).await {
        ServerMessage::Killed { session_id } => assert_eq!(session_id.as_deref(), Some("main")),
        other => panic!("expected killed, got {:?}", other),
    }

    let created = create(&mut ws, "main", false).await;
    assert_eq!(created.reconnected, Some(false));
    let after = server.registry.summary("main").await.unwrap();
    assert!(after.generation > before.generation);
    assert_ne!(after.pid, before.pid);

    server.stop().await;
}

#[tokio::test]
async fn named_kill_of_an_exited_session_does_not_respawn_it() {
    let mut config = sh_config();
    config.shell_args = vec!["-c".into(), "exit 4".into()];
    let server = TestServer::start(config).await;

    let mut ws = server.connect().await;
    create(&mut ws, "done", false).await;
    loop {
        if let ServerMessage::Exit { exit_code } = next_control(&mut ws).await {
            assert_eq!(exit_code, 4);
            break;
        }
    }

    let mut other = server.connect().await;
    send(&mut other, &ClientMessage::kill("done")).await;
    assert!(matches!(
        next_control(&mut other).await,
        ServerMessage::Killed { .. }
    ));
    assert!(server.registry.summary("done").await.is_none());
    assert!(server.registry.list().await.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn input_without_a_session_is_a_soft_error() {
    let server = TestServer::start(sh_config()).await;

    let mut bystander = server.connect().await;
    create(&mut bystander, "bystander", false).await;

    let mut ws = server.connect().await;
    create(&mut ws, "doomed", false).await;
    send(&mut ws, &ClientMessage::Kill { session_id: None }).await;
    assert!(matches!(
        next_control(&mut ws).await,
        ServerMessage::Killed { .. }
    ));

    input(&mut ws, "echo nope\n").await;
    match next_control(&mut ws).await {
        ServerMessage::Error { message } => assert!(message.contains("Not attached")),
        other => panic!("expected error, got {:?}", other),
    }

    // Same connection still serves requests
    send(&mut ws, &ClientMessage::Ping).await;
    assert_eq!(next_control(&mut ws).await, ServerMessage::Pong);

    // And the other session is unaffected
    input(&mut bystander, "echo alive$((2+5))\n").await;
    wait_for_output(&mut bystander, "alive7").await;

    server.stop().await;
}

#[tokio::test]
async fn malformed_frames_are_reported() {
    let server = TestServer::start(sh_config()).await;

    let mut ws = server.connect().await;
    ws.send(Message::Text("{not json".into())).await.unwrap();
    match next_control(&mut ws).await {
        ServerMessage::Error { message } => assert!(message.starts_with("Invalid message")),
        other => panic!("expected error, got {:?}", other),
    }

    send(&mut ws, &ClientMessage::Ping).await;
    assert_eq!(next_control(&mut ws).await, ServerMessage::Pong);

    server.stop().await;
}

#[tokio::test]
async fn binary_frames_are_input() {
    let server = TestServer::start(sh_config()).await;

    let mut ws = server.connect().await;
    create(&mut ws, "raw", false).await;
    ws.send(Message::Binary(b"echo raw$((6+1))\n".to_vec()))
        .await
        .unwrap();
    wait_for_output(&mut ws, "raw7").await;

    server.stop().await;
}

#[tokio::test]
async fn second_tab_supersedes_the_first() {
    let server = TestServer::start(sh_config()).await;

    let mut first = server.connect().await;
    create(&mut first, "main", false).await;

    let mut second = server.connect().await;
    let created = create(&mut second, "main", false).await;
    assert!(created.is_reconnect());

    match next_control(&mut first).await {
        ServerMessage::Detached { session_id, reason } => {
            assert_eq!(session_id, "main");
            assert_eq!(reason, DetachReason::Superseded);
        }
        other => panic!("expected detached, got {:?}", other),
    }

    input(&mut first, "echo stale\n").await;
    assert!(matches!(
        next_control(&mut first).await,
        ServerMessage::Error { .. }
    ));

    input(&mut second, "echo owner$((4+4))\n").await;
    wait_for_output(&mut second, "owner8").await;

    server.stop().await;
}

#[tokio::test]
async fn process_exit_is_pushed() {
    let mut config = sh_config();
    config.shell_args = vec!["-c".into(), "printf done; exit 5".into()];
    let server = TestServer::start(config).await;

    let mut ws = server.connect().await;
    create(&mut ws, "short", false).await;
    assert_eq!(
        next_control(&mut ws).await,
        ServerMessage::Exit { exit_code: 5 }
    );

    server.stop().await;
}

#[tokio::test]
async fn spawn_failure_is_reported_in_create() {
    let mut config = sh_config();
    config.shell = "/no/such/shell".into();
    let server = TestServer::start(config).await;

    let mut ws = server.connect().await;
    let created = create(&mut ws, "main", false).await;
    assert!(!created.success);
    assert!(created.error.is_some());
    assert!(created.reconnected.is_none());

    send(&mut ws, &ClientMessage::ListSessions).await;
    assert_eq!(
        next_control(&mut ws).await,
        ServerMessage::Sessions { sessions: vec![] }
    );

    server.stop().await;
}

#[tokio::test]
async fn empty_session_id_gets_generated() {
    let server = TestServer::start(sh_config()).await;

    let mut ws = server.connect().await;
    send(
        &mut ws,
        &ClientMessage::Create {
            session_id: None,
            request_buffer: false,
            size: None,
        },
    )
    .await;
    match next_control(&mut ws).await {
        ServerMessage::Created(result) => {
            assert!(result.success);
            assert!(result.session_id.starts_with("session-"));
        }
        other => panic!("expected created, got {:?}", other),
    }

    server.stop().await;
}
