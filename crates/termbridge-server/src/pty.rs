//! PTY process wrapper
//!
//! Owns one interactive shell per session. Blocking PTY I/O runs on the
//! blocking pool; the async side only sees channels:
//! - input: bounded queue drained by a writer task
//! - output: chunks read from the master, in emission order
//! - exit: the child's exit code, sent once the process is reaped

use bytes::Bytes;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{BridgeError, Result};
use termbridge_types::TermSize;

/// Read chunk size for the PTY master
const READ_CHUNK: usize = 4096;

/// What to run inside a new PTY
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub session_id: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env_vars: Vec<(String, String)>,
    pub input_queue: usize,
}

/// Async ends of a running process's output
#[derive(Debug)]
pub struct PtyStreams {
    pub output_rx: mpsc::Receiver<Bytes>,
    pub exit_rx: oneshot::Receiver<i32>,
}

/// A spawned shell attached to a PTY master
pub struct PtyProcess {
    session_id: String,
    master: Box<dyn MasterPty + Send>,
    input_tx: mpsc::Sender<Bytes>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("session_id", &self.session_id)
            .field("pid", &self.pid)
            .finish()
    }
}

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        cols: size.cols,
        rows: size.rows,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl PtyProcess {
    /// Spawn `spec.program` in a fresh PTY. Blocking; call from the blocking pool.
    pub fn spawn(spec: &SpawnSpec, size: TermSize) -> Result<(Self, PtyStreams)> {
        let spawn_err = |e: anyhow::Error| BridgeError::Spawn {
            id: spec.session_id.clone(),
            message: e.to_string(),
        };

        let pty_system = native_pty_system();
        let pair = pty_system.openpty(pty_size(size)).map_err(spawn_err)?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.working_dir {
            cmd.cwd(dir);
        }
        for (key, value) in &spec.env_vars {
            cmd.env(key, value);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(spawn_err)?;
        // Keep only the master open so EOF arrives when the child goes away
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let master = pair.master;

        let mut reader = master.try_clone_reader().map_err(spawn_err)?;
        let mut writer = master.take_writer().map_err(spawn_err)?;

        debug!("Spawned {} for session {} (pid {:?})", spec.program, spec.session_id, pid);

        // Writer task
        let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(spec.input_queue.max(1));
        let writer_id = spec.session_id.clone();
        tokio::task::spawn_blocking(move || {
            while let Some(data) = input_rx.blocking_recv() {
                if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                    warn!("PTY write failed for session {}: {}", writer_id, e);
                    break;
                }
            }
        });

        // Reader task
        let (output_tx, output_rx) = mpsc::channel::<Bytes>(256);
        let reader_id = spec.session_id.clone();
        tokio::task::spawn_blocking(move || {
            let mut local_buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut local_buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&local_buf[..n]);
                        if output_tx.blocking_send(chunk).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // EIO is how Linux reports a closed slave
                        debug!("PTY read ended for session {}: {}", reader_id, e);
                        break;
                    }
                }
            }
        });

        // Exit waiter
        let (exit_tx, exit_rx) = oneshot::channel();
        let waiter_id = spec.session_id.clone();
        tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(e) => {
                    error!("Failed to wait on child for session {}: {}", waiter_id, e);
                    -1
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok((
            Self {
                session_id: spec.session_id.clone(),
                master,
                input_tx,
                killer,
                pid,
            },
            PtyStreams { output_rx, exit_rx },
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue bytes for the child's stdin without waiting on a slow writer
    pub fn write(&self, data: Bytes) -> Result<()> {
        self.input_tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                BridgeError::InputBackpressure(self.session_id.clone())
            }
            mpsc::error::TrySendError::Closed(_) => {
                BridgeError::Pty(format!("input channel closed for {}", self.session_id))
            }
        })
    }

    pub fn resize(&self, size: TermSize) -> Result<()> {
        self.master
            .resize(pty_size(size))
            .map_err(|e| BridgeError::Pty(e.to_string()))
    }

    pub fn kill(&mut self) {
        if let Err(e) = self.killer.kill() {
            // Already reaped is the common case here
            debug!("Kill for session {} returned: {}", self.session_id, e);
        }
    }
}
