//! Prompt store and bridge context
//!
//! Other parts of an application hand prompts to the terminal through a
//! [`PromptStore`] rather than calling into it directly. The store is owned by
//! a [`BridgeContext`], created once at the top of the application and passed
//! to whatever needs it.

use std::sync::Arc;
use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::controller::SessionController;
use crate::error::Result;

/// Observable slot for the next prompt plus a focus request counter
#[derive(Debug, Clone)]
pub struct PromptStore {
    pending: Arc<watch::Sender<Option<String>>>,
    focus: Arc<watch::Sender<u64>>,
}

impl PromptStore {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(None);
        let (focus, _) = watch::channel(0);
        Self {
            pending: Arc::new(pending),
            focus: Arc::new(focus),
        }
    }

    /// Queue a prompt, replacing any that was not yet taken
    pub fn submit(&self, prompt: impl Into<String>) {
        self.pending.send_replace(Some(prompt.into()));
    }

    /// Take the queued prompt, if any
    pub fn take(&self) -> Option<String> {
        let mut taken = None;
        self.pending.send_if_modified(|pending| {
            taken = pending.take();
            taken.is_some()
        });
        taken
    }

    pub fn peek(&self) -> Option<String> {
        self.pending.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.pending.subscribe()
    }

    /// Ask whoever renders the terminal to take keyboard focus
    pub fn request_focus(&self) {
        self.focus.send_modify(|count| *count += 1);
    }

    pub fn focus_requests(&self) -> watch::Receiver<u64> {
        self.focus.subscribe()
    }
}

impl Default for PromptStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level provider for everything the bridge shares
#[derive(Debug, Clone)]
pub struct BridgeContext {
    config: Arc<ClientConfig>,
    prompts: PromptStore,
}

impl BridgeContext {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
            prompts: PromptStore::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn prompts(&self) -> &PromptStore {
        &self.prompts
    }

    /// Queue a prompt for the terminal and bring it to the front
    pub fn send_prompt(&self, prompt: impl Into<String>) {
        self.prompts.submit(prompt);
        self.prompts.request_focus();
    }

    /// Controller for `session_id`, wired to this context's store
    pub fn controller(&self, session_id: impl Into<String>) -> Result<SessionController> {
        Ok(SessionController::new(
            session_id,
            self.config.min_cols,
            self.config.script_config()?,
            self.config.reconnect_max_backoff_secs,
            self.config.reconnect_failures_before_indicator,
            self.prompts.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_empties_the_slot() {
        let store = PromptStore::new();
        assert_eq!(store.take(), None);

        store.submit("first");
        store.submit("second");
        assert_eq!(store.peek().as_deref(), Some("second"));
        assert_eq!(store.take().as_deref(), Some("second"));
        assert_eq!(store.take(), None);
    }

    #[tokio::test]
    async fn subscribers_see_submissions() {
        let store = PromptStore::new();
        let mut rx = store.subscribe();

        store.submit("explain this");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_deref(), Some("explain this"));
    }

    #[tokio::test]
    async fn send_prompt_requests_focus() {
        let context = BridgeContext::new(ClientConfig::default());
        let mut focus = context.prompts().focus_requests();

        context.send_prompt("hello");
        focus.changed().await.unwrap();
        assert_eq!(*focus.borrow(), 1);
        assert_eq!(context.prompts().peek().as_deref(), Some("hello"));
    }

    #[test]
    fn take_wakes_subscribers_only_when_something_was_queued() {
        let store = PromptStore::new();
        let mut rx = store.subscribe();

        let mut changed = tokio_test::task::spawn(rx.changed());
        assert!(store.take().is_none());
        tokio_test::assert_pending!(changed.poll());

        store.submit("queued");
        assert!(changed.is_woken());
        tokio_test::assert_ready_ok!(changed.poll());
    }

    #[test]
    fn clones_share_state() {
        let context = BridgeContext::new(ClientConfig::default());
        let other = context.clone();
        other.prompts().submit("shared");
        assert_eq!(context.prompts().take().as_deref(), Some("shared"));
    }
}
