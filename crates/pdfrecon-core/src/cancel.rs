use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("scan cancelled")]
pub struct Cancelled;

/// Cooperative cancellation flag, polled between pipeline stages. The driver
/// trips it (typically from a timeout); the scan discards its in-progress
/// report and cleans up any partially written revision file.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CancelToken;

    #[test]
    fn checkpoint_fails_after_cancel() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());
        let clone = token.clone();
        clone.cancel();
        assert!(token.checkpoint().is_err());
    }
}
