//! Termbridge Types - wire protocol shared by the gateway and its clients
//!
//! Pure data types only: no async runtime, so the same definitions can be
//! used by the server, the native attach client, and a browser build.

pub mod protocol;
pub mod session;

pub use protocol::*;
pub use session::*;

/// Well-known id of the single tab-restorable session.
pub const PERSISTENT_SESSION_ID: &str = "main";

/// Narrowest geometry a session will ever be given.
pub const DEFAULT_MIN_COLS: u16 = 80;

/// Geometry used when a client does not propose one.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// Prefix for server-generated ad-hoc session ids.
pub const ADHOC_SESSION_PREFIX: &str = "session-";
