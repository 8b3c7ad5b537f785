//! Terminal session bridge client
//!
//! A sans-IO [`SessionController`] that keeps one logical session alive across
//! transport churn, plus the pieces around it: resize fitting, key
//! translation, scripted prompt injection, the injected prompt store, and a
//! tokio runtime that drives the controller over a WebSocket.

pub mod config;
pub mod controller;
pub mod error;
pub mod fit;
pub mod keys;
pub mod panel;
pub mod runtime;
pub mod script;
pub mod store;

pub use config::ClientConfig;
pub use controller::{Command, ControllerEvent, Phase, SessionController, WidgetStatus};
pub use error::{ClientError, Result};
pub use runtime::{BridgeRuntime, TerminalWidget, UiEvent};
pub use store::{BridgeContext, PromptStore};
