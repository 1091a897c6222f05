//! Gathering windows out of a frame sequence and merging predictions back
//!
//! Merge rule per frame: the first write stores the prediction, every later
//! write stores `(existing + new) / 2`. Windows must be merged one at a time
//! in the order they were generated.

use std::ops::Range;

use burn::prelude::*;
use burn_diffusion_core::TensorError;

/// Copy the frames at `indices` along `axis` into a new tensor
pub fn gather_window<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    axis: usize,
    indices: &[usize],
) -> Result<Tensor<B, D>, TensorError> {
    let dims = tensor.dims();
    let frames = dims.get(axis).copied().unwrap_or(0);
    if indices.is_empty() {
        return Err(TensorError::EmptyInput("window has no frames"));
    }
    if let Some(&bad) = indices.iter().find(|&&i| i >= frames) {
        let mut expected = dims;
        expected[axis] = bad + 1;
        return Err(TensorError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: dims.to_vec(),
        });
    }

    let device = tensor.device();
    let ids: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    let ids = Tensor::<B, 1, Int>::from_data(TensorData::new(ids, [indices.len()]), &device);
    Ok(tensor.select(axis, ids))
}

/// Full-sequence buffer that window predictions are merged into
#[derive(Debug, Clone)]
pub struct WindowAccumulator<B: Backend, const D: usize> {
    values: Tensor<B, D>,
    written: Vec<bool>,
    axis: usize,
}

impl<B: Backend, const D: usize> WindowAccumulator<B, D> {
    pub fn new(shape: [usize; D], axis: usize, device: &B::Device) -> Self {
        let frames = shape.get(axis).copied().unwrap_or(0);
        Self {
            values: Tensor::zeros(shape, device),
            written: vec![false; frames],
            axis,
        }
    }

    /// Merge one window's prediction; frame `k` of `prediction` lands at `indices[k]`
    pub fn merge(&mut self, prediction: Tensor<B, D>, indices: &[usize]) -> Result<(), TensorError> {
        let dims = self.values.dims();
        let mut expected = dims;
        expected[self.axis] = indices.len();
        let actual = prediction.dims();
        if actual != expected {
            return Err(TensorError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }

        for (k, &frame) in indices.iter().enumerate() {
            if frame >= self.written.len() {
                return Err(TensorError::ShapeMismatch {
                    expected: dims.to_vec(),
                    actual: actual.to_vec(),
                });
            }
            let incoming = prediction.clone().narrow(self.axis, k, 1);
            let merged = if self.written[frame] {
                (self.values.clone().narrow(self.axis, frame, 1) + incoming) / 2.0
            } else {
                incoming
            };
            let ranges = self.frame_ranges(frame, dims);
            self.values = self.values.clone().slice_assign(ranges, merged);
            self.written[frame] = true;
        }
        Ok(())
    }

    fn frame_ranges(&self, frame: usize, dims: [usize; D]) -> [Range<usize>; D] {
        std::array::from_fn(|i| if i == self.axis { frame..frame + 1 } else { 0..dims[i] })
    }

    pub fn is_written(&self, frame: usize) -> bool {
        self.written.get(frame).copied().unwrap_or(false)
    }

    /// Frames not covered by any window so far
    pub fn missing_frames(&self) -> Vec<usize> {
        self.written
            .iter()
            .enumerate()
            .filter(|(_, written)| !**written)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn into_tensor(self) -> Tensor<B, D> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_diffusion_core::data;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    /// `[1, 1, frames, 1, 1]` with one value per frame
    fn frames(values: &[f32]) -> Tensor<TestBackend, 5> {
        let device = Default::default();
        data::from_vec(values.to_vec(), [1, 1, values.len(), 1, 1], &device).unwrap()
    }

    #[test]
    fn test_second_write_averages() {
        let device = Default::default();
        let mut acc = WindowAccumulator::<TestBackend, 5>::new([1, 1, 3, 1, 1], 2, &device);

        acc.merge(frames(&[4.0]), &[1]).unwrap();
        acc.merge(frames(&[6.0]), &[1]).unwrap();

        let values = data::to_vec(acc.into_tensor()).unwrap();
        assert_eq!(values, vec![0.0, 5.0, 0.0]);
    }

    #[test]
    fn test_first_write_of_zero_counts_as_written() {
        let device = Default::default();
        let mut acc = WindowAccumulator::<TestBackend, 5>::new([1, 1, 2, 1, 1], 2, &device);

        acc.merge(frames(&[0.0]), &[0]).unwrap();
        assert!(acc.is_written(0));
        acc.merge(frames(&[8.0]), &[0]).unwrap();

        let values = data::to_vec(acc.into_tensor()).unwrap();
        assert_eq!(values, vec![4.0, 0.0]);
    }

    #[test]
    fn test_overlapping_windows() {
        let device = Default::default();
        let mut acc = WindowAccumulator::<TestBackend, 5>::new([1, 1, 4, 1, 1], 2, &device);

        acc.merge(frames(&[1.0, 2.0, 3.0]), &[0, 1, 2]).unwrap();
        acc.merge(frames(&[10.0, 20.0]), &[2, 3]).unwrap();

        assert!(acc.missing_frames().is_empty());
        let values = data::to_vec(acc.into_tensor()).unwrap();
        assert_eq!(values, vec![1.0, 2.0, 6.5, 20.0]);
    }

    #[test]
    fn test_merge_keeps_other_axes_intact() {
        let device = Default::default();
        let mut acc = WindowAccumulator::<TestBackend, 5>::new([1, 2, 3, 1, 2], 2, &device);
        let window = Tensor::<TestBackend, 5>::ones([1, 2, 2, 1, 2], &device);

        acc.merge(window, &[2, 0]).unwrap();
        assert_eq!(acc.missing_frames(), vec![1]);

        let values = data::to_vec(acc.into_tensor()).unwrap();
        // Layout [c][f][w]: frames 0 and 2 set for both channels
        assert_eq!(values, vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_merge_rejects_bad_shapes() {
        let device = Default::default();
        let mut acc = WindowAccumulator::<TestBackend, 5>::new([1, 1, 3, 1, 1], 2, &device);

        assert!(acc.merge(frames(&[1.0, 2.0]), &[0]).is_err());
        assert!(acc.merge(frames(&[1.0]), &[3]).is_err());
    }

    #[test]
    fn test_gather_window_with_wraparound() {
        let sequence = frames(&[0.0, 1.0, 2.0, 3.0]);

        let window = gather_window(sequence.clone(), 2, &[3, 0, 1]).unwrap();
        assert_eq!(window.dims(), [1, 1, 3, 1, 1]);
        assert_eq!(data::to_vec(window).unwrap(), vec![3.0, 0.0, 1.0]);

        assert!(gather_window(sequence.clone(), 2, &[4]).is_err());
        assert!(gather_window(sequence, 2, &[]).is_err());
    }
}
