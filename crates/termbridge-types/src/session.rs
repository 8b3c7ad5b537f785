//! Session-level types

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_COLS, DEFAULT_ROWS};

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Apply the column floor. Rows never drop below one.
    pub fn clamped(self, min_cols: u16) -> Self {
        Self {
            cols: self.cols.max(min_cols),
            rows: self.rows.max(1),
        }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

impl std::fmt::Display for TermSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Lifecycle of the process behind a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Running,
    Exited { code: i32 },
}

impl SessionState {
    pub fn is_live(&self) -> bool {
        !matches!(self, SessionState::Exited { .. })
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Starting => write!(f, "starting"),
            SessionState::Running => write!(f, "running"),
            SessionState::Exited { code } => write!(f, "exited({})", code),
        }
    }
}

/// Session summary for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    #[serde(flatten)]
    pub state: SessionState,
    pub cols: u16,
    pub rows: u16,
    pub pid: Option<u32>,
    /// Increments every time a fresh process is spawned for this id
    pub generation: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_attached_at: Option<chrono::DateTime<chrono::Utc>>,
    pub attached: bool,
    pub buffered_bytes: usize,
}
