use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop request for a running batch.
///
/// Polling only: the batch checks it between files and between chunks of a
/// copy or download. An ffmpeg call already in flight runs to completion (or
/// to its timeout) before the flag is seen. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
