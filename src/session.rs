//! Session token rotation
//!
//! The token is owned by whoever authenticates the socket; coordinators only
//! read the current value and react when it changes.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Current session token plus rotation notifications
#[derive(Debug, Clone)]
pub struct SessionTokens {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl SessionTokens {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(Some(token.into()));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Receiver with the current token already seen, so only later changes wake it
    pub fn rotations(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }

    /// Install a token; returns `true` when it replaced a different one
    pub fn rotate(&self, token: impl Into<String>) -> bool {
        let token = token.into();
        let mut rotated = false;
        self.tx.send_if_modified(|current| {
            if current.as_deref() == Some(token.as_str()) {
                return false;
            }
            rotated = current.is_some();
            *current = Some(token);
            true
        });
        if rotated {
            info!("Session token rotated");
        }
        rotated
    }
}

impl Default for SessionTokens {
    fn default() -> Self {
        Self::new()
    }
}
