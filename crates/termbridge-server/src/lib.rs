//! Terminal session bridge server
//!
//! Keeps shell-backed PTY sessions alive independently of the clients
//! looking at them, and exposes them over a WebSocket gateway.

pub mod buffer;
pub mod config;
pub mod error;
pub mod gateway;
pub mod pty;
pub mod registry;

pub use config::ServerConfig;
pub use error::{BridgeError, Result};
pub use gateway::Gateway;
pub use registry::{RegistryConfig, SessionRegistry};
