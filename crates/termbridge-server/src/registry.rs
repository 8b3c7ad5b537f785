//! Session registry - the process table behind the gateway
//!
//! Maps session ids to slots. Each slot serializes every mutation of its
//! session (spawn, kill, buffer append, resize, attachment swap) behind its
//! own lock; unrelated sessions never contend. Output from a process is
//! appended to the replay buffer and broadcast in the same critical section,
//! so a client that snapshots and subscribes under that lock sees every byte
//! exactly once.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buffer::OutputBuffer;
use crate::config::ServerConfig;
use crate::error::{BridgeError, Result};
use crate::pty::{PtyProcess, PtyStreams, SpawnSpec};
use termbridge_types::{SessionState, SessionSummary, TermSize, ADHOC_SESSION_PREFIX};

/// Identifies one connection's binding to a session
pub type AttachmentId = u64;

/// Events fanned out to the attached client
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Output(Bytes),
    Exit(i32),
}

/// The subset of server configuration the registry needs
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub shell: String,
    pub shell_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub extra_env: HashMap<String, String>,
    pub min_cols: u16,
    pub buffer_capacity: usize,
    pub broadcast_capacity: usize,
    pub input_queue: usize,
}

impl From<&ServerConfig> for RegistryConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            shell_args: config.shell_args.clone(),
            working_dir: config.working_dir.clone(),
            extra_env: config.extra_env.clone(),
            min_cols: config.min_cols,
            buffer_capacity: config.buffer_capacity,
            broadcast_capacity: config.broadcast_capacity,
            input_queue: config.input_queue,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Request to create or reattach
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    /// `None` or empty asks for a server-generated ad-hoc id
    pub session_id: Option<String>,
    pub request_buffer: bool,
    pub size: Option<TermSize>,
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub session_id: String,
    pub reconnected: bool,
    pub buffer: Option<Bytes>,
    pub generation: u64,
    pub pid: Option<u32>,
}

/// What an attachment observes next
#[derive(Debug)]
pub enum AttachmentEvent {
    Output(Bytes),
    Exit(i32),
    /// The client fell behind and this many events were dropped
    Lagged(u64),
    /// Another connection took over the session
    Superseded,
    /// The session was killed or replaced
    Closed,
}

/// Live binding of one connection to one session
#[derive(Debug)]
pub struct Attachment {
    pub id: AttachmentId,
    pub session_id: String,
    events: broadcast::Receiver<SessionEvent>,
    superseded: oneshot::Receiver<()>,
    superseded_closed: bool,
}

impl Attachment {
    pub async fn next(&mut self) -> AttachmentEvent {
        loop {
            tokio::select! {
                biased;
                res = &mut self.superseded, if !self.superseded_closed => {
                    match res {
                        Ok(()) => return AttachmentEvent::Superseded,
                        // Dropped without a signal: the slot let go of us another way
                        Err(_) => self.superseded_closed = true,
                    }
                }
                res = self.events.recv() => {
                    return match res {
                        Ok(SessionEvent::Output(data)) => AttachmentEvent::Output(data),
                        Ok(SessionEvent::Exit(code)) => AttachmentEvent::Exit(code),
                        Err(broadcast::error::RecvError::Lagged(n)) => AttachmentEvent::Lagged(n),
                        Err(broadcast::error::RecvError::Closed) => AttachmentEvent::Closed,
                    };
                }
            }
        }
    }
}

struct SessionSlot {
    id: String,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    /// `None` while vacant (never spawned, killed, or failed to spawn)
    state: Option<SessionState>,
    process: Option<PtyProcess>,
    buffer: OutputBuffer,
    size: TermSize,
    generation: u64,
    pid: Option<u32>,
    events: broadcast::Sender<SessionEvent>,
    attached: Option<(AttachmentId, oneshot::Sender<()>)>,
    created_at: DateTime<Utc>,
    last_attached_at: Option<DateTime<Utc>>,
}

impl SessionInner {
    fn new(config: &RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            state: None,
            process: None,
            buffer: OutputBuffer::new(config.buffer_capacity),
            size: TermSize::default().clamped(config.min_cols),
            generation: 0,
            pid: None,
            events,
            attached: None,
            created_at: Utc::now(),
            last_attached_at: None,
        }
    }

    fn is_live(&self) -> bool {
        self.state.map(|s| s.is_live()).unwrap_or(false)
    }

    fn is_vacant(&self) -> bool {
        self.state.is_none()
    }

    /// Drop the process, history and any attachment. Receivers see `Closed`.
    fn vacate(&mut self, config: &RegistryConfig) {
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        self.state = None;
        self.pid = None;
        self.buffer.clear();
        self.attached = None;
        let (events, _) = broadcast::channel(config.broadcast_capacity.max(1));
        self.events = events;
    }

    fn attach(&mut self, session_id: &str, attachment_id: AttachmentId) -> Attachment {
        let (notify, superseded) = oneshot::channel();
        if let Some((previous, previous_notify)) = self.attached.replace((attachment_id, notify)) {
            if previous != attachment_id {
                info!(
                    "Attachment {} superseded by {} on session {}",
                    previous, attachment_id, session_id
                );
                let _ = previous_notify.send(());
            }
        }
        self.last_attached_at = Some(Utc::now());

        Attachment {
            id: attachment_id,
            session_id: session_id.to_string(),
            events: self.events.subscribe(),
            superseded,
            superseded_closed: false,
        }
    }

    fn live_process(&self, id: &str) -> Result<&PtyProcess> {
        match (self.state, &self.process) {
            (Some(SessionState::Exited { code }), _) => Err(BridgeError::SessionExited {
                id: id.to_string(),
                code,
            }),
            (Some(_), Some(process)) => Ok(process),
            _ => Err(BridgeError::SessionNotFound(id.to_string())),
        }
    }

    fn summary(&self, id: &str) -> Option<SessionSummary> {
        let state = self.state?;
        Some(SessionSummary {
            id: id.to_string(),
            state,
            cols: self.size.cols,
            rows: self.size.rows,
            pid: self.pid,
            generation: self.generation,
            created_at: self.created_at,
            last_attached_at: self.last_attached_at,
            attached: self.attached.is_some(),
            buffered_bytes: self.buffer.len(),
        })
    }
}

impl SessionSlot {
    /// Append and broadcast one chunk. Returns false once the process this
    /// pump serves is gone.
    async fn on_output(&self, generation: u64, chunk: Bytes) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation || !inner.is_live() {
            return false;
        }
        inner.buffer.push(&chunk);
        // No receivers is fine; the buffer still has it
        let _ = inner.events.send(SessionEvent::Output(chunk));
        true
    }

    async fn on_exit(&self, generation: u64, code: i32) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation || !inner.is_live() {
            return;
        }
        info!("Session {} exited with code {}", self.id, code);
        inner.state = Some(SessionState::Exited { code });
        inner.process = None;
        let _ = inner.events.send(SessionEvent::Exit(code));
    }
}

/// Forward one process's output into its slot, then record its exit
async fn pump(slot: Arc<SessionSlot>, generation: u64, mut streams: PtyStreams) {
    while let Some(chunk) = streams.output_rx.recv().await {
        debug!("Session {} produced {} bytes", slot.id, chunk.len());
        if !slot.on_output(generation, chunk).await {
            debug!("Session {} generation {} retired", slot.id, generation);
            return;
        }
    }

    let code = streams.exit_rx.await.unwrap_or(-1);
    slot.on_exit(generation, code).await;
}

/// Process table mapping session ids to running shells
#[derive(Clone)]
pub struct SessionRegistry {
    slots: Arc<DashMap<String, Arc<SessionSlot>>>,
    config: Arc<RegistryConfig>,
    spawn_counter: Arc<AtomicU64>,
    attachment_counter: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            config: Arc::new(config),
            spawn_counter: Arc::new(AtomicU64::new(0)),
            attachment_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Fresh identity for a new connection
    pub fn next_attachment_id(&self) -> AttachmentId {
        self.attachment_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn slot(&self, id: &str) -> Arc<SessionSlot> {
        let entry = self.slots.entry(id.to_string()).or_insert_with(|| {
            Arc::new(SessionSlot {
                id: id.to_string(),
                inner: Mutex::new(SessionInner::new(&self.config)),
            })
        });
        Arc::clone(&*entry)
    }

    fn existing(&self, id: &str) -> Result<Arc<SessionSlot>> {
        self.slots
            .get(id)
            .map(|entry| Arc::clone(&*entry))
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))
    }

    /// Forget a slot nobody else holds once it is vacant
    fn prune(&self, id: &str) {
        self.slots.remove_if(id, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot
                    .inner
                    .try_lock()
                    .map(|inner| inner.is_vacant())
                    .unwrap_or(false)
        });
    }

    fn spawn_spec(&self, id: &str) -> SpawnSpec {
        let mut env_vars = vec![
            ("TERM".to_string(), "xterm-256color".to_string()),
            ("TERMBRIDGE_SESSION_ID".to_string(), id.to_string()),
        ];
        env_vars.extend(
            self.config
                .extra_env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        SpawnSpec {
            session_id: id.to_string(),
            program: self.config.shell.clone(),
            args: self.config.shell_args.clone(),
            working_dir: self.config.working_dir.clone(),
            env_vars,
            input_queue: self.config.input_queue,
        }
    }

    /// Attach `attachment_id` to a session, spawning its shell unless it is
    /// already live. A live session is a reconnect: nothing is spawned and the
    /// replay snapshot is returned only if asked for.
    pub async fn create(
        &self,
        request: CreateRequest,
        attachment_id: AttachmentId,
    ) -> Result<(CreateOutcome, Attachment)> {
        let session_id = request
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("{}{}", ADHOC_SESSION_PREFIX, Uuid::new_v4()));

        let slot = self.slot(&session_id);
        let mut inner = slot.inner.lock().await;
        let reconnected = inner.is_live();

        if reconnected {
            if let Some(size) = request.size {
                let size = size.clamped(self.config.min_cols);
                if size != inner.size {
                    if let Some(process) = &inner.process {
                        if let Err(e) = process.resize(size) {
                            warn!("Resize on reattach failed for {}: {}", session_id, e);
                        }
                    }
                    inner.size = size;
                }
            }
            debug!("Reattaching to live session {}", session_id);
        } else {
            // Exited or vacant: start over with a fresh process and empty history
            inner.vacate(&self.config);
            let size = request
                .size
                .unwrap_or(inner.size)
                .clamped(self.config.min_cols);
            let generation = self.spawn_counter.fetch_add(1, Ordering::Relaxed) + 1;
            inner.state = Some(SessionState::Starting);
            inner.generation = generation;
            inner.size = size;
            inner.created_at = Utc::now();
            inner.last_attached_at = None;

            let spec = self.spawn_spec(&session_id);
            let spawned = tokio::task::spawn_blocking(move || PtyProcess::spawn(&spec, size))
                .await
                .map_err(|e| BridgeError::Pty(format!("spawn task failed: {}", e)))
                .and_then(|res| res);

            match spawned {
                Ok((process, streams)) => {
                    info!(
                        "Spawned session {} (generation {}, pid {:?}, {})",
                        session_id,
                        generation,
                        process.pid(),
                        size
                    );
                    inner.pid = process.pid();
                    inner.process = Some(process);
                    inner.state = Some(SessionState::Running);
                    tokio::spawn(pump(slot.clone(), generation, streams));
                }
                Err(e) => {
                    warn!("Failed to spawn session {}: {}", session_id, e);
                    inner.vacate(&self.config);
                    drop(inner);
                    drop(slot);
                    self.prune(&session_id);
                    return Err(e);
                }
            }
        }

        let buffer = request.request_buffer.then(|| inner.buffer.snapshot());
        let attachment = inner.attach(&session_id, attachment_id);

        Ok((
            CreateOutcome {
                session_id,
                reconnected,
                buffer,
                generation: inner.generation,
                pid: inner.pid,
            },
            attachment,
        ))
    }

    /// Terminate the session's process and clear its history
    pub async fn kill(&self, id: &str) -> Result<bool> {
        let slot = match self.existing(id) {
            Ok(slot) => slot,
            Err(_) => return Ok(false),
        };

        let killed = {
            let mut inner = slot.inner.lock().await;
            if inner.is_vacant() {
                false
            } else {
                info!("Killing session {} (pid {:?})", id, inner.pid);
                inner.vacate(&self.config);
                true
            }
        };

        drop(slot);
        self.prune(id);
        Ok(killed)
    }

    /// Forward raw bytes to the session's stdin
    pub async fn write(&self, id: &str, data: Bytes) -> Result<()> {
        let slot = self.existing(id)?;
        let inner = slot.inner.lock().await;
        inner.live_process(id)?.write(data)
    }

    /// Like `write`, but only for the session's current attachment
    pub async fn write_as(&self, id: &str, attachment_id: AttachmentId, data: Bytes) -> Result<()> {
        let slot = self.existing(id)?;
        let inner = slot.inner.lock().await;
        match &inner.attached {
            Some((current, _)) if *current == attachment_id => {}
            _ => return Err(BridgeError::NotAttached(id.to_string())),
        }
        inner.live_process(id)?.write(data)
    }

    /// Apply a new geometry, never narrower than the configured floor.
    /// Returns the effective size.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<TermSize> {
        let size = TermSize::new(cols, rows).clamped(self.config.min_cols);
        let slot = self.existing(id)?;
        let mut inner = slot.inner.lock().await;
        let process = inner.live_process(id)?;
        if size != inner.size {
            process.resize(size)?;
            debug!("Resized session {} to {}", id, size);
            inner.size = size;
        }
        Ok(inner.size)
    }

    /// Unbind an attachment. The session and its process stay alive.
    pub async fn detach(&self, id: &str, attachment_id: AttachmentId) {
        let Ok(slot) = self.existing(id) else {
            return;
        };
        let mut inner = slot.inner.lock().await;
        if matches!(inner.attached, Some((current, _)) if current == attachment_id) {
            inner.attached = None;
            debug!("Attachment {} detached from session {}", attachment_id, id);
        }
    }

    /// Current replay buffer contents
    pub async fn snapshot(&self, id: &str) -> Option<Bytes> {
        let slot = self.existing(id).ok()?;
        let inner = slot.inner.lock().await;
        (!inner.is_vacant()).then(|| inner.buffer.snapshot())
    }

    pub async fn summary(&self, id: &str) -> Option<SessionSummary> {
        let slot = self.existing(id).ok()?;
        let inner = slot.inner.lock().await;
        inner.summary(id)
    }

    /// All non-vacant sessions, most recently attached first
    pub async fn list(&self) -> Vec<SessionSummary> {
        let slots: Vec<Arc<SessionSlot>> = self
            .slots
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut summaries = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(summary) = slot.inner.lock().await.summary(&slot.id) {
                summaries.push(summary);
            }
        }
        summaries.sort_by(|a, b| b.last_attached_at.cmp(&a.last_attached_at));
        summaries
    }

    /// Kill every session, used on server shutdown
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.kill(&id).await {
                warn!("Failed to kill session {} on shutdown: {}", id, e);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> RegistryConfig {
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

    fn create(id: &str, request_buffer: bool) -> CreateRequest {
        CreateRequest {
            session_id: Some(id.to_string()),
            request_buffer,
            size: None,
        }
    }

    /// Read attachment output until `needle` shows up
    async fn wait_for(attachment: &mut Attachment, needle: &str) -> String {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let event = tokio::time::timeout_at(deadline, attachment.next())
                .await
                .unwrap_or_else(|_| {
                    panic!(
                        "timed out waiting for {:?}, saw {:?}",
                        needle,
                        String::from_utf8_lossy(&seen)
                    )
                });
            match event {
                AttachmentEvent::Output(data) => {
                    seen.extend_from_slice(&data);
                    let text = String::from_utf8_lossy(&seen).to_string();
                    if text.contains(needle) {
                        return text;
                    }
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn second_create_reattaches_without_spawning() {
        let registry = SessionRegistry::new(test_config());

        let (first, _a) = registry.create(create("main", true), 1).await.unwrap();
        assert!(!first.reconnected);
        assert!(first.pid.is_some());

        let (second, _b) = registry.create(create("main", false), 2).await.unwrap();
        assert!(second.reconnected);
        assert_eq!(second.pid, first.pid);
        assert_eq!(second.generation, first.generation);
        assert!(second.buffer.is_none());

        assert_eq!(registry.list().await.len(), 1);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn replay_contains_earlier_output() {
        let registry = SessionRegistry::new(test_config());
        let (_, mut attachment) = registry.create(create("replay", false), 1).await.unwrap();

        registry
            .write("replay", Bytes::from_static(b"echo abc$((1+1))\n"))
            .await
            .unwrap();
        wait_for(&mut attachment, "abc2").await;

        let (outcome, _) = registry.create(create("replay", true), 2).await.unwrap();
        assert!(outcome.reconnected);
        let buffer = outcome.buffer.expect("buffer was requested");
        assert!(String::from_utf8_lossy(&buffer).contains("abc2"));

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn resize_is_clamped_to_floor() {
        let registry = SessionRegistry::new(test_config());
        registry.create(create("narrow", false), 1).await.unwrap();

        let size = registry.resize("narrow", 40, 24).await.unwrap();
        assert_eq!(size, TermSize::new(80, 24));

        let size = registry.resize("narrow", 120, 40).await.unwrap();
        assert_eq!(size, TermSize::new(120, 40));

        let summary = registry.summary("narrow").await.unwrap();
        assert_eq!((summary.cols, summary.rows), (120, 40));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn kill_then_create_spawns_fresh_process() {
        let registry = SessionRegistry::new(test_config());
        let (first, mut attachment) = registry.create(create("fresh", false), 1).await.unwrap();
        registry
            .write("fresh", Bytes::from_static(b"echo old$((2+2))\n"))
            .await
            .unwrap();
        wait_for(&mut attachment, "old4").await;

        assert!(registry.kill("fresh").await.unwrap());
        assert!(matches!(attachment.next().await, AttachmentEvent::Closed));
        assert!(registry.summary("fresh").await.is_none());

        let (second, _) = registry.create(create("fresh", true), 1).await.unwrap();
        assert!(!second.reconnected);
        assert!(second.generation > first.generation);
        assert_ne!(second.pid, first.pid);
        let buffer = second.buffer.unwrap_or_default();
        assert!(!String::from_utf8_lossy(&buffer).contains("old4"));

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn writes_to_missing_sessions_are_soft_errors() {
        let registry = SessionRegistry::new(test_config());
        let (_, mut live) = registry.create(create("alive", false), 1).await.unwrap();

        let err = registry
            .write("ghost", Bytes::from_static(b"ls\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::SessionNotFound(_)));
        assert!(err.is_soft());
        assert!(!registry.kill("ghost").await.unwrap());

        // The other session is untouched
        registry
            .write("alive", Bytes::from_static(b"echo ok$((3+3))\n"))
            .await
            .unwrap();
        wait_for(&mut live, "ok6").await;
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn process_exit_is_reported_and_session_stays_addressable() {
        let mut config = test_config();
        config.shell_args = vec!["-c".into(), "printf bye; exit 7".into()];
        let registry = SessionRegistry::new(config);

        let (_, mut attachment) = registry.create(create("short", false), 1).await.unwrap();
        let mut exit_code = None;
        while exit_code.is_none() {
            match tokio::time::timeout(Duration::from_secs(10), attachment.next())
                .await
                .expect("exit in time")
            {
                AttachmentEvent::Output(_) => {}
                AttachmentEvent::Exit(code) => exit_code = Some(code),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(exit_code, Some(7));

        let summary = registry.summary("short").await.unwrap();
        assert_eq!(summary.state, SessionState::Exited { code: 7 });
        let snapshot = registry.snapshot("short").await.unwrap();
        assert!(String::from_utf8_lossy(&snapshot).contains("bye"));

        let err = registry
            .write("short", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::SessionExited { code: 7, .. }));

        // A new create on an exited session starts over
        let (outcome, _) = registry.create(create("short", false), 1).await.unwrap();
        assert!(!outcome.reconnected);
    }

    #[tokio::test]
    async fn last_attacher_wins() {
        let registry = SessionRegistry::new(test_config());
        let (_, mut first) = registry.create(create("shared", false), 1).await.unwrap();
        let (_, _second) = registry.create(create("shared", false), 2).await.unwrap();

        assert!(matches!(first.next().await, AttachmentEvent::Superseded));

        let err = registry
            .write_as("shared", 1, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotAttached(_)));
        registry
            .write_as("shared", 2, Bytes::from_static(b"\n"))
            .await
            .unwrap();

        // A stale detach does not unbind the new owner
        registry.detach("shared", 1).await;
        assert!(registry.summary("shared").await.unwrap().attached);
        registry.detach("shared", 2).await;
        assert!(!registry.summary("shared").await.unwrap().attached);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn spawn_failure_leaves_nothing_registered() {
        let mut config = test_config();
        config.shell = "/no/such/shell".into();
        let registry = SessionRegistry::new(config);

        let err = registry.create(create("broken", false), 1).await.unwrap_err();
        assert!(matches!(err, BridgeError::Spawn { .. }));
        assert!(registry.list().await.is_empty());
        assert!(registry.summary("broken").await.is_none());
    }

    #[tokio::test]
    async fn empty_id_gets_generated() {
        let registry = SessionRegistry::new(test_config());
        let request = CreateRequest {
            session_id: Some("  ".into()),
            ..Default::default()
        };
        let (outcome, _) = registry.create(request, 1).await.unwrap();
        assert!(outcome.session_id.starts_with(ADHOC_SESSION_PREFIX));
        registry.shutdown().await;
    }
}
