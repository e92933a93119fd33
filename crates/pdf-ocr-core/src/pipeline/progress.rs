//! Progress reporting seam.
//!
//! The core never draws progress bars itself; frontends implement
//! [`ProgressReporter`] (the CLI backs it with indicatif) and the pipeline
//! feeds it. Each page accounts for two ticks: one when OCR completes, one
//! when the page is grafted.

/// Receives pipeline progress events. All methods default to no-ops.
pub trait ProgressReporter: Send + Sync {
    fn set_total(&self, total: u64) {
        let _ = total;
    }

    fn update(&self, delta: u64) {
        let _ = delta;
    }

    fn set_message(&self, message: &str) {
        let _ = message;
    }

    fn finish(&self) {}
}

/// Reporter that swallows everything; the default for library use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressBar;

impl ProgressReporter for NullProgressBar {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Counts ticks so tests can assert on progress behavior.
    #[derive(Debug, Default)]
    pub(crate) struct CountingProgress {
        pub total: AtomicU64,
        pub ticks: AtomicU64,
    }

    impl ProgressReporter for CountingProgress {
        fn set_total(&self, total: u64) {
            self.total.store(total, Ordering::Relaxed);
        }

        fn update(&self, delta: u64) {
            self.ticks.fetch_add(delta, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_null_progress_is_a_no_op() {
        let progress = NullProgressBar;
        progress.set_total(10);
        progress.update(1);
        progress.set_message("page 1");
        progress.finish();
    }
}
