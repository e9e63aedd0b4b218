//! Cooperative cancellation
//!
//! Long passes check the token between whole-package units. The first
//! Ctrl-C requests a stop: the current package's transaction finishes and
//! the run exits non-zero after flushing its counts. A second Ctrl-C
//! during the same run terminates the process immediately, forgoing
//! cleanup beyond the last committed transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    requested: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Request a stop at the next package boundary.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Listen for Ctrl-C in the background. First signal requests a stop,
    /// second one aborts the process.
    pub fn listen_for_ctrl_c(&self) {
        let requested = self.requested.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if requested.swap(true, Ordering::SeqCst) {
                    eprintln!("interrupt: terminating immediately");
                    std::process::exit(130);
                }
                warn!("interrupt: finishing current package, another ^C to force");
                eprintln!("interrupt requested... another ^C to force");
            }
        });
    }
}
