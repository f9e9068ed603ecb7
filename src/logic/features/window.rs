//! Window Builder
//!
//! Overlapping fixed-length windows, stride 1, over a scaled matrix.
//! Window `i` covers rows `i..i+L`, so `N` rows yield `max(0, N-L+1)` windows.

use ndarray::{s, Array3, ArrayView2};

use crate::logic::error::{PipelineError, PipelineResult};

/// Number of windows `N` rows produce at length `len`
pub fn window_count(rows: usize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    (rows + 1).saturating_sub(len)
}

/// Stack windows into `[count, len, features]`
pub fn build_windows(matrix: ArrayView2<f64>, len: usize) -> PipelineResult<Array3<f64>> {
    if len == 0 {
        return Err(PipelineError::InvalidConfig("sequence_length must be >= 1".into()));
    }
    let (rows, features) = matrix.dim();
    if rows < len {
        return Err(PipelineError::InsufficientData { rows, required: len });
    }

    let count = window_count(rows, len);
    let mut windows = Array3::<f64>::zeros((count, len, features));
    for i in 0..count {
        windows
            .slice_mut(s![i, .., ..])
            .assign(&matrix.slice(s![i..i + len, ..]));
    }
    Ok(windows)
}

/// Windows that cover each row: `max(0, t-L+1) ..= min(t, count-1)`
pub fn covering_windows(row: usize, len: usize, count: usize) -> std::ops::RangeInclusive<usize> {
    let first = (row + 1).saturating_sub(len);
    let last = row.min(count.saturating_sub(1));
    first..=last
}
