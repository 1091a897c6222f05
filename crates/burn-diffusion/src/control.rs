//! Cooperative cancellation and step counters shared with the caller

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::DiffusionError;

/// Control handle for cancelling and monitoring a generation
///
/// Clones share state, so one clone can be handed to another thread while
/// the sampling loop polls the original.
#[derive(Debug, Clone, Default)]
pub struct GenerationControl {
    cancelled: Arc<AtomicBool>,
    current_step: Arc<AtomicUsize>,
    total_steps: Arc<AtomicUsize>,
}

impl GenerationControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the loop stops at its next check
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation has been requested
    pub fn check(&self) -> Result<(), DiffusionError> {
        if self.is_cancelled() {
            Err(DiffusionError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn current_step(&self) -> usize {
        self.current_step.load(Ordering::SeqCst)
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps.load(Ordering::SeqCst)
    }

    /// Progress as a fraction in `[0, 1]`
    pub fn progress(&self) -> f32 {
        let total = self.total_steps();
        if total == 0 {
            return 0.0;
        }
        self.current_step() as f32 / total as f32
    }

    /// Start counting a new generation of `total_steps` windows
    pub(crate) fn begin(&self, total_steps: usize) {
        self.current_step.store(0, Ordering::SeqCst);
        self.total_steps.store(total_steps, Ordering::SeqCst);
    }

    /// Count one finished window and return the new count
    pub(crate) fn advance(&self) -> usize {
        self.current_step.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Clear the cancellation flag and counters for reuse
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.current_step.store(0, Ordering::SeqCst);
        self.total_steps.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let control = GenerationControl::new();
        let handle = control.clone();
        assert!(control.check().is_ok());

        handle.cancel();
        assert!(control.is_cancelled());
        assert!(control.check().unwrap_err().is_cancelled());

        control.reset();
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_step_counters() {
        let control = GenerationControl::new();
        assert_eq!(control.progress(), 0.0);

        control.begin(4);
        assert_eq!(control.advance(), 1);
        assert_eq!(control.advance(), 2);
        assert_eq!(control.current_step(), 2);
        assert_eq!(control.total_steps(), 4);
        assert_eq!(control.progress(), 0.5);
    }
}
