//! termbridge
//!
//! Attach a local terminal to a bridged session, inspect sessions, and manage
//! the persisted panel layout.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::{SinkExt, StreamExt};
use std::path::PathBuf;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use termbridge_client::panel::{PanelLayout, PanelState};
use termbridge_client::{BridgeContext, ClientConfig, WidgetStatus};
use termbridge_types::{ClientMessage, ServerMessage};

#[derive(Parser)]
#[command(name = "termbridge")]
#[command(author, version, about = "Attach to durable terminal sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "TERMBRIDGE_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway URL, e.g. ws://127.0.0.1:16790
    #[arg(long, global = true)]
    url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach this terminal to a session (double Ctrl+C detaches)
    Attach {
        /// Session id, defaults to the persistent session
        #[arg(short, long)]
        session: Option<String>,

        /// Kill the session first and start a fresh process
        #[arg(long)]
        new: bool,

        /// Launch the assistant when the session is freshly created
        #[arg(long)]
        auto_start: bool,

        /// Prompt to type into the assistant once attached
        #[arg(short, long)]
        prompt: Option<String>,
    },

    /// List sessions known to the gateway
    List,

    /// Kill a session
    Kill {
        /// Session id
        session: String,
    },

    /// Show or change the persisted panel layout
    Panel {
        #[arg(long, conflicts_with = "close")]
        open: bool,

        #[arg(long)]
        close: bool,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long, value_enum)]
        layout: Option<PanelLayout>,
    },
}

fn describe(status: &WidgetStatus) -> String {
    match status {
        WidgetStatus::Connecting => "connecting...".yellow().to_string(),
        WidgetStatus::Connected => "attached".green().to_string(),
        WidgetStatus::Reconnecting { attempt } => {
            format!("connection lost, reconnecting (attempt {})", attempt)
                .yellow()
                .to_string()
        }
        WidgetStatus::Disconnected => "disconnected - session is still running, retrying"
            .red()
            .to_string(),
        WidgetStatus::Exited(code) => format!("process exited with code {}", code)
            .red()
            .to_string(),
        WidgetStatus::Error(message) => format!("error: {}", message).red().to_string(),
        WidgetStatus::Notice(message) => message.dimmed().to_string(),
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a socket for a one-off request
async fn open(url: &str) -> Result<WsStream> {
    let (ws, _) = connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to gateway at {}", url))?;
    Ok(ws)
}

/// Send one control message and wait for the next control reply
async fn request(ws: &mut WsStream, msg: &ClientMessage) -> Result<ServerMessage> {
    ws.send(Message::Text(serde_json::to_string(msg)?)).await?;
    next_reply(ws).await
}

/// Next control message, skipping output frames
async fn next_reply(ws: &mut WsStream) -> Result<ServerMessage> {
    while let Some(frame) = ws.next().await {
        if let Message::Text(text) = frame? {
            return Ok(serde_json::from_str(&text)?);
        }
    }
    bail!("Gateway closed the connection")
}

async fn list_sessions(url: &str) -> Result<()> {
    let mut ws = open(url).await?;
    let sessions = match request(&mut ws, &ClientMessage::ListSessions).await? {
        ServerMessage::Sessions { sessions } => sessions,
        other => bail!("Unexpected reply: {:?}", other),
    };

    if sessions.is_empty() {
        println!("{}", "No sessions".dimmed());
        return Ok(());
    }

    println!(
        "{:<40} {:<12} {:>9} {:>8} {:>4} {}",
        "ID".bold(),
        "STATE".bold(),
        "SIZE".bold(),
        "PID".bold(),
        "GEN".bold(),
        "ATTACHED".bold()
    );
    for s in sessions {
        let state = if s.state.is_live() {
            s.state.to_string().green()
        } else {
            s.state.to_string().red()
        };
        println!(
            "{:<40} {:<12} {:>9} {:>8} {:>4} {}",
            s.id,
            state,
            format!("{}x{}", s.cols, s.rows),
            s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            s.generation,
            if s.attached { "yes" } else { "no" }
        );
    }
    Ok(())
}

async fn kill_session(url: &str, session_id: &str) -> Result<()> {
    let mut ws = open(url).await?;

    let state = match request(&mut ws, &ClientMessage::ListSessions).await? {
        ServerMessage::Sessions { sessions } => sessions
            .into_iter()
            .find(|s| s.id == session_id)
            .map(|s| s.state),
        other => bail!("Unexpected reply: {:?}", other),
    };
    let Some(state) = state else {
        bail!("Session {} not found", session_id);
    };

    // Named kill: no binding needed, so an exited session is not respawned first
    match request(&mut ws, &ClientMessage::kill(session_id)).await? {
        ServerMessage::Killed { .. } => {}
        other => bail!("Unexpected reply: {:?}", other),
    }
    println!("{} {} (was {})", "Killed".green(), session_id, state);
    Ok(())
}

fn panel(
    config: &ClientConfig,
    open: bool,
    close: bool,
    width: Option<u32>,
    layout: Option<PanelLayout>,
) -> Result<()> {
    let path = config.panel_path();
    let mut state = PanelState::load(&path)
        .with_context(|| format!("Failed to read panel state from {:?}", path))?;

    let changed = open || close || width.is_some() || layout.is_some();
    if open {
        state.open = true;
    }
    if close {
        state.open = false;
    }
    if let Some(width) = width {
        state.width = width;
    }
    if let Some(layout) = layout {
        state.layout = layout;
    }
    if changed {
        state
            .save(&path)
            .with_context(|| format!("Failed to write panel state to {:?}", path))?;
    }

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

/// File-only logging; the attached terminal owns stdout
fn init_file_logging(
    config: &ClientConfig,
    verbose: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("Failed to create {:?}", config.state_dir))?;
    let file_appender = tracing_appender::rolling::never(&config.state_dir, "client.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(if verbose {
            "termbridge_client=debug"
        } else {
            "termbridge_client=info"
        })
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        ClientConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = cli.url {
        config.gateway_url = url;
    }

    match cli.command {
        Commands::Attach {
            session,
            new,
            auto_start,
            prompt,
        } => {
            if let Some(session) = session {
                config.session_id = session;
            }
            config.auto_start |= auto_start;
            let _log_guard = init_file_logging(&config, cli.verbose)?;
            let context = BridgeContext::new(config);
            if let Some(prompt) = prompt {
                context.send_prompt(prompt);
            }

            let result = attach::run(context, new).await;
            // The stdin reader is parked in a blocking read that would hold up runtime shutdown
            match result {
                Ok(()) => std::process::exit(0),
                Err(e) => {
                    eprintln!("{} {:#}", "Error:".red(), e);
                    std::process::exit(1);
                }
            }
        }
        Commands::List => {
            init_stderr_logging(cli.verbose);
            list_sessions(&config.gateway_url).await
        }
        Commands::Kill { session } => {
            init_stderr_logging(cli.verbose);
            kill_session(&config.gateway_url, &session).await
        }
        Commands::Panel {
            open,
            close,
            width,
            layout,
        } => panel(&config, open, close, width, layout),
    }
}

fn init_stderr_logging(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(if verbose {
            "termbridge_client=debug"
        } else {
            "termbridge_client=warn"
        })
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(unix)]
mod attach {
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use bytes::Bytes;
    use nix::sys::termios::{self, SetArg};
    use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;
    use tracing::{error, info};

    use super::describe;
    use termbridge_client::{BridgeContext, BridgeRuntime, TerminalWidget, UiEvent, WidgetStatus};
    use termbridge_types::TermSize;

    const DOUBLE_CTRL_C: Duration = Duration::from_secs(1);

    /// Restores the original terminal mode on drop
    struct TermiosGuard {
        fd: i32,
        original: termios::Termios,
    }

    impl Drop for TermiosGuard {
        fn drop(&mut self) {
            unsafe {
                let fd = BorrowedFd::borrow_raw(self.fd);
                let _ = termios::tcsetattr(fd, SetArg::TCSANOW, &self.original);
            }
        }
    }

    fn raw_mode() -> Result<TermiosGuard> {
        let stdin = std::io::stdin();
        let original = termios::tcgetattr(stdin.as_fd()).context("stdin is not a terminal")?;
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)?;
        Ok(TermiosGuard {
            fd: stdin.as_raw_fd(),
            original,
        })
    }

    fn terminal_size() -> Option<TermSize> {
        let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
        (rc == 0 && ws.ws_col > 0).then(|| TermSize::new(ws.ws_col, ws.ws_row))
    }

    /// Renders straight to the local terminal
    struct StdoutWidget {
        stdout: tokio::io::Stdout,
    }

    #[async_trait]
    impl TerminalWidget for StdoutWidget {
        async fn write(&mut self, data: &[u8]) -> termbridge_client::Result<()> {
            self.stdout.write_all(data).await?;
            self.stdout.flush().await?;
            Ok(())
        }

        async fn reset(&mut self) -> termbridge_client::Result<()> {
            // RIS: full terminal reset, clears scrollback
            self.write(b"\x1bc").await
        }

        async fn status(&mut self, status: &WidgetStatus) -> termbridge_client::Result<()> {
            if matches!(status, WidgetStatus::Connected) {
                return Ok(());
            }
            let line = format!("\r\n[termbridge] {}\r\n", describe(status));
            self.write(line.as_bytes()).await
        }
    }

    async fn forward_stdin(ui: mpsc::Sender<UiEvent>) {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 4096];
        let mut last_ctrl_c: Option<Instant> = None;

        loop {
            let n = match stdin.read(&mut buf).await {
                Ok(0) => {
                    info!("stdin EOF");
                    let _ = ui.send(UiEvent::Detach).await;
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    error!("stdin read error: {}", e);
                    let _ = ui.send(UiEvent::Detach).await;
                    return;
                }
            };
            let data = &buf[..n];

            if data == [0x03] {
                let now = Instant::now();
                if last_ctrl_c.is_some_and(|last| now.duration_since(last) < DOUBLE_CTRL_C) {
                    info!("Double Ctrl+C, detaching");
                    let _ = ui.send(UiEvent::Detach).await;
                    return;
                }
                last_ctrl_c = Some(now);
                // The first one still reaches the session
            } else {
                last_ctrl_c = None;
            }

            if ui.send(UiEvent::Input(Bytes::copy_from_slice(data))).await.is_err() {
                return;
            }
        }
    }

    async fn forward_resizes(ui: mpsc::Sender<UiEvent>) {
        use tokio::signal::unix::{signal, SignalKind};

        if let Some(size) = terminal_size() {
            let _ = ui.send(UiEvent::Resize(size)).await;
        }
        let mut winch = match signal(SignalKind::window_change()) {
            Ok(winch) => winch,
            Err(e) => {
                error!("Cannot watch terminal resizes: {}", e);
                return;
            }
        };
        while winch.recv().await.is_some() {
            if let Some(size) = terminal_size() {
                if ui.send(UiEvent::Resize(size)).await.is_err() {
                    return;
                }
            }
        }
    }

    pub async fn run(context: BridgeContext, force_new: bool) -> Result<()> {
        let config = context.config().clone();
        let controller = context
            .controller(config.session_id.clone())
            .context("Invalid client configuration")?;

        let widget = StdoutWidget {
            stdout: tokio::io::stdout(),
        };
        let runtime = BridgeRuntime::new(
            config.gateway_url.clone(),
            controller,
            widget,
            context.prompts().clone(),
        );

        let (ui_tx, ui_rx) = mpsc::channel(64);
        if force_new {
            ui_tx.send(UiEvent::ForceNew).await?;
        }

        let _guard = raw_mode()?;
        tokio::spawn(forward_resizes(ui_tx.clone()));
        tokio::spawn(forward_stdin(ui_tx));

        let result = runtime.run(ui_rx).await;
        drop(_guard);
        println!("\r\nDetached from {} (still running)", config.session_id);
        result.context("Session bridge failed")
    }
}

#[cfg(not(unix))]
mod attach {
    use anyhow::{bail, Result};
    use termbridge_client::BridgeContext;

    pub async fn run(_context: BridgeContext, _force_new: bool) -> Result<()> {
        bail!("attach needs a Unix terminal")
    }
}
