//! Training row cap
//!
//! Large frames are reduced to `cap` rows: a contiguous block of the most
//! recent rows plus an evenly strided sample of everything older.

/// Row indices to keep, ascending. Identity when `rows <= cap`.
pub fn downsample_indices(rows: usize, cap: usize, recent_fraction: f64) -> Vec<usize> {
    if rows <= cap {
        return (0..rows).collect();
    }

    let recent = ((cap as f64 * recent_fraction.clamp(0.0, 1.0)).round() as usize).min(cap);
    let historical = cap - recent;
    let older = rows - recent;

    let mut keep: Vec<usize> = (0..historical).map(|i| i * older / historical).collect();
    keep.extend(older..rows);
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_frames_untouched() {
        assert_eq!(downsample_indices(5, 10, 0.3), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_cap_with_recent_block() {
        let keep = downsample_indices(10_000, 5000, 0.3);
        assert_eq!(keep.len(), 5000);
        // Last 1500 rows kept contiguously
        assert_eq!(&keep[3500..], &(8500..10_000).collect::<Vec<_>>()[..]);
        assert!(keep.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(keep[0], 0);
    }

    #[test]
    fn test_all_recent() {
        let keep = downsample_indices(100, 10, 1.0);
        assert_eq!(keep, (90..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_no_recent() {
        let keep = downsample_indices(100, 10, 0.0);
        assert_eq!(keep, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90]);
    }
}
