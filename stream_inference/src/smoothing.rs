//! Per-client probability smoothing. Each client keeps a bounded FIFO of its
//! most recent probability matrices; classification reads the element-wise
//! mean over that history instead of the raw per-frame output.

use ndarray::{s, Array2, ArrayView1};
use std::collections::VecDeque;

/// Bounded history of probability batches for a single client.
///
/// Successive batches from one client may carry different frame counts, e.g.
/// an end-of-stream partial batch. Entries are zero-padded at the bottom so
/// every resident matrix shares the max row count seen in the current
/// contents; padding never leaves this type.
#[derive(Debug)]
pub struct SmoothingWindow {
    entries: VecDeque<Array2<f32>>,
    capacity: usize,
}

impl SmoothingWindow {
    /// `capacity` is the number of batches averaged over; values below 1 are
    /// clamped to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Folds a new probability batch into the window and returns the running
    /// average truncated to the caller's batch size.
    ///
    /// A first batch passes through unchanged. Otherwise the newcomer is
    /// padded up to the window's current max row count, or every resident
    /// entry is re-padded when the newcomer is larger, then the oldest entry
    /// is evicted once the window exceeds capacity.
    pub fn update(&mut self, new_probs: Array2<f32>) -> Array2<f32> {
        let curr_rows = new_probs.nrows();
        let cols = new_probs.ncols();

        if self.entries.is_empty() {
            self.entries.push_back(new_probs.clone());
            return new_probs;
        }

        debug_assert_eq!(cols, self.entries[0].ncols(), "class count changed");

        let max_rows = self
            .entries
            .iter()
            .map(|entry| entry.nrows())
            .max()
            .unwrap_or(curr_rows);

        let padded = if curr_rows <= max_rows {
            pad_rows(&new_probs, max_rows)
        } else {
            for entry in self.entries.iter_mut() {
                *entry = pad_rows(entry, curr_rows);
            }
            new_probs
        };

        self.entries.push_back(padded);
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }

        let rows = curr_rows.max(max_rows);
        let mut avg = Array2::<f32>::zeros((rows, cols));
        for entry in &self.entries {
            avg += entry;
        }
        avg /= self.entries.len() as f32;

        avg.slice(s![..curr_rows, ..]).to_owned()
    }
}

fn pad_rows(matrix: &Array2<f32>, rows: usize) -> Array2<f32> {
    if matrix.nrows() >= rows {
        return matrix.clone();
    }
    let mut padded = Array2::zeros((rows, matrix.ncols()));
    padded.slice_mut(s![..matrix.nrows(), ..]).assign(matrix);
    padded
}

/// First-occurrence argmax: ties resolve to the lowest index.
pub fn argmax_row(row: ArrayView1<f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (index, &value) in row.iter().enumerate() {
        if value > best_value {
            best = index;
            best_value = value;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array2};

    fn uniform_batch(rows: usize, value: [f32; 2]) -> Array2<f32> {
        Array2::from_shape_fn((rows, 2), |(_, c)| value[c])
    }

    #[test]
    fn first_update_returns_raw_probabilities() {
        let mut window = SmoothingWindow::new(5);
        let probs = arr2(&[[0.9, 0.1], [0.2, 0.8]]);
        let smoothed = window.update(probs.clone());
        assert_eq!(smoothed, probs);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn identical_batches_smooth_to_themselves() {
        let mut window = SmoothingWindow::new(5);
        let probs = arr2(&[[0.9, 0.1], [0.2, 0.8]]);
        for _ in 0..3 {
            let smoothed = window.update(probs.clone());
            assert_eq!(smoothed.dim(), (2, 2));
            for (got, want) in smoothed.iter().zip(probs.iter()) {
                assert!((got - want).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn never_exceeds_capacity() {
        for capacity in 1..=4 {
            let mut window = SmoothingWindow::new(capacity);
            for i in 0..10 {
                window.update(uniform_batch(1 + i % 3, [0.5, 0.5]));
                assert!(window.len() <= capacity);
            }
        }
    }

    #[test]
    fn rows_still_sum_to_one_with_stable_batch_size() {
        let mut window = SmoothingWindow::new(4);
        let batches = [
            arr2(&[[0.7, 0.3], [0.4, 0.6]]),
            arr2(&[[0.1, 0.9], [0.5, 0.5]]),
            arr2(&[[0.25, 0.75], [0.8, 0.2]]),
        ];
        for batch in batches {
            let smoothed = window.update(batch);
            for row in smoothed.rows() {
                assert!((row.sum() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn varying_batch_sizes_pad_and_truncate() {
        // Sizes 5, 3, 5, 7 with capacity 3, per the padding invariant: after
        // the third call every entry holds 5 rows; the fourth call re-pads
        // the survivors to 7 rows and returns exactly 7.
        let mut window = SmoothingWindow::new(3);

        let out = window.update(uniform_batch(5, [0.6, 0.4]));
        assert_eq!(out.nrows(), 5);

        let out = window.update(uniform_batch(3, [0.6, 0.4]));
        assert_eq!(out.nrows(), 3);

        let out = window.update(uniform_batch(5, [0.6, 0.4]));
        assert_eq!(out.nrows(), 5);
        assert_eq!(window.len(), 3);
        assert!(window.entries.iter().all(|entry| entry.nrows() == 5));

        let out = window.update(uniform_batch(7, [0.6, 0.4]));
        assert_eq!(out.nrows(), 7);
        assert_eq!(window.len(), 3);
        assert!(window.entries.iter().all(|entry| entry.nrows() == 7));
    }

    #[test]
    fn padded_rows_dilute_the_average() {
        let mut window = SmoothingWindow::new(5);
        window.update(uniform_batch(1, [1.0, 0.0]));
        // Second batch has an extra row; its second row averages with the
        // zero padding of the first entry.
        let out = window.update(uniform_batch(2, [1.0, 0.0]));
        assert!((out[[0, 0]] - 1.0).abs() < 1e-6);
        assert!((out[[1, 0]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn smaller_batch_is_padded_up_not_resident_entries() {
        let mut window = SmoothingWindow::new(5);
        window.update(uniform_batch(3, [0.5, 0.5]));
        let out = window.update(uniform_batch(2, [0.5, 0.5]));
        assert_eq!(out.nrows(), 2);
        assert!(window.entries.iter().all(|entry| entry.nrows() == 3));
    }

    #[test]
    fn capacity_below_one_is_clamped() {
        let mut window = SmoothingWindow::new(0);
        window.update(uniform_batch(1, [0.5, 0.5]));
        window.update(uniform_batch(1, [0.5, 0.5]));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn argmax_prefers_lowest_index_on_ties() {
        for _ in 0..100 {
            assert_eq!(argmax_row(arr1(&[0.5, 0.5]).view()), 0);
            assert_eq!(argmax_row(arr1(&[0.1, 0.45, 0.45]).view()), 1);
        }
        assert_eq!(argmax_row(arr1(&[0.1, 0.2, 0.7]).view()), 2);
    }
}
