//! Progress reporting

use serde::Serialize;

/// One progress event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffusionProgress {
    /// `"Step: 03/20"`
    pub message: String,
    /// Windows finished so far
    pub step: usize,
    /// Windows in the whole generation
    pub total_steps: usize,
    /// Time spent on the window just finished, 0 for the initial event
    pub elapsed_ms: f64,
}

impl DiffusionProgress {
    pub fn new(step: usize, total_steps: usize, elapsed_ms: f64) -> Self {
        Self {
            message: format!("Step: {step:02}/{total_steps:02}"),
            step,
            total_steps,
            elapsed_ms,
        }
    }
}

/// Receiver for progress events
///
/// Implemented for closures, and for `()` to discard events.
pub trait ProgressSink {
    fn report(&mut self, progress: DiffusionProgress);
}

impl ProgressSink for () {
    fn report(&mut self, _progress: DiffusionProgress) {}
}

impl<F: FnMut(DiffusionProgress)> ProgressSink for F {
    fn report(&mut self, progress: DiffusionProgress) {
        self(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_format() {
        assert_eq!(DiffusionProgress::new(3, 20, 1.5).message, "Step: 03/20");
        assert_eq!(DiffusionProgress::new(120, 240, 0.0).message, "Step: 120/240");
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |p: DiffusionProgress| seen.push(p.step);
            sink.report(DiffusionProgress::new(0, 2, 0.0));
            sink.report(DiffusionProgress::new(1, 2, 3.0));
        }
        assert_eq!(seen, vec![0, 1]);

        ().report(DiffusionProgress::new(1, 1, 0.0));
    }
}
