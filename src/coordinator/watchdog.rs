//! First-payload watchdog

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Single-shot timer task; dropping or disarming it cancels the callback
#[derive(Debug)]
pub(crate) struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    pub(crate) fn arm<F>(timeout: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            sleep(timeout).await;
            on_expire();
        });
        Self { handle }
    }

    pub(crate) fn disarm(self) {
        self.handle.abort();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
