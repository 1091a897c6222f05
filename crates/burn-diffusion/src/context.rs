//! Context windows over long frame sequences
//!
//! A network with a native temporal context of `C` frames can denoise `N > C`
//! frames by running on overlapping `C`-frame windows and merging the
//! results (see [`crate::accumulate`]).
//!
//! Window placement per outer step:
//!
//! - `N ≤ C`: one window `0..N`
//! - no stride and no overlap: consecutive chunks of `C` frames
//! - otherwise, for each dilation `1, 2, 4, … ≤ 2^stride`, windows of `C`
//!   frames spaced `dilation` apart, starting at an offset that
//!   [`ordered_halving`] of the step number shifts from one step to the
//!   next. Indices wrap modulo `N`.

use serde::{Deserialize, Serialize};

/// Window layout options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextWindowConfig {
    /// Frames per window, the network's native temporal context
    pub context_size: usize,
    /// Largest dilation exponent; dilations run `1, 2, …, 2^stride`
    pub stride: usize,
    /// Frames shared by neighbouring windows
    pub overlap: usize,
    /// Let the last windows wrap around to the first frames
    pub closed_loop: bool,
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        Self {
            context_size: 16,
            stride: 3,
            overlap: 4,
            closed_loop: false,
        }
    }
}

impl ContextWindowConfig {
    /// Non-overlapping tiling with the given window size
    pub fn tiled(context_size: usize) -> Self {
        Self {
            context_size,
            stride: 0,
            overlap: 0,
            closed_loop: false,
        }
    }

    /// Returns a description of the first problem, if any
    pub fn check(&self) -> Option<String> {
        if self.context_size == 0 {
            return Some("context_size must be at least 1".into());
        }
        if self.overlap >= self.context_size {
            return Some(format!(
                "overlap ({}) must be smaller than context_size ({})",
                self.overlap, self.context_size
            ));
        }
        None
    }
}

/// Low-discrepancy offset in `[0, 1)` from the bit-reversed step number
///
/// `0 → 0`, `1 → 0.5`, `2 → 0.25`, `3 → 0.75`, …
pub fn ordered_halving(value: u32) -> f32 {
    let reversed = value.reverse_bits();
    (reversed as f64 / (1u64 << 32) as f64) as f32
}

/// Frame count rounded up to a whole number of windows
pub fn padded_frame_count(frames: usize, context_size: usize) -> usize {
    if context_size == 0 {
        return frames;
    }
    frames.div_ceil(context_size) * context_size
}

/// Windows of frame indices for outer step `step`
pub fn context_windows(step: usize, num_frames: usize, config: &ContextWindowConfig) -> Vec<Vec<usize>> {
    let context = config.context_size.max(1);
    if num_frames <= context {
        return vec![(0..num_frames).collect()];
    }
    if config.stride == 0 && config.overlap == 0 {
        return (0..num_frames)
            .collect::<Vec<_>>()
            .chunks(context)
            .map(<[usize]>::to_vec)
            .collect();
    }

    let max_stride = ((num_frames / context) as f32).log2().ceil() as usize + 1;
    let stride = config.stride.min(max_stride);
    let offset = ordered_halving(step as u32);

    let mut windows = Vec::new();
    let mut dilation = 1usize;
    while dilation <= 1 << stride {
        let pad = (num_frames as f32 * offset) as usize;
        let start = (offset * dilation as f32) as usize + pad;
        let end = if config.closed_loop {
            num_frames + pad
        } else {
            (num_frames + pad).saturating_sub(config.overlap)
        };
        let span = context * dilation;
        let increment = span.saturating_sub(config.overlap).max(1);

        let mut j = start;
        while j < end {
            windows.push((j..j + span).step_by(dilation).map(|e| e % num_frames).collect());
            j += increment;
        }
        dilation <<= 1;
    }
    windows
}

/// Total windows over `steps` outer steps
pub fn total_windows(steps: usize, num_frames: usize, config: &ContextWindowConfig) -> usize {
    (0..steps)
        .map(|step| context_windows(step, num_frames, config).len())
        .sum()
}
