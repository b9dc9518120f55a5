//! Resampling between regular grids whose index transform is axis aligned.
//!
//! The combined transform is separable, so each target column and row maps
//! to a range of source columns and rows independently.

use crate::affine::AffineTransform;
use std::ops::Range;

const EPS: f64 = 1e-9;

/// Source index ranges for every target column and row.
#[derive(Debug, Clone)]
pub(crate) struct AffinePlan {
    src_width: usize,
    columns: Vec<Option<Range<usize>>>,
    rows: Vec<Option<Range<usize>>>,
    /// Set when every target column maps to exactly one source column,
    /// in order, starting at this offset.
    direct_column_offset: Option<usize>,
}

/// Source cells covered by target cells along one axis.
///
/// `scale` and `offset` map a target index to a source index. Coarser
/// targets take every source cell whose centre falls inside the footprint;
/// finer or equal targets take the cell enclosing the target centre.
fn axis_ranges(scale: f64, offset: f64, target_len: usize, source_len: usize) -> Vec<Option<Range<usize>>> {
    let n = source_len as f64;
    (0..target_len)
        .map(|t| {
            let t = t as f64;
            if scale.abs() > 1.0 + EPS {
                let a = scale * t + offset;
                let b = scale * (t + 1.0) + offset;
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                let start = (lo - 0.5 - EPS).ceil().max(0.0);
                let end = (hi - 0.5 - EPS).ceil().min(n);
                (start < end).then(|| start as usize..end as usize)
            } else {
                let u = scale * (t + 0.5) + offset;
                let k = (u + EPS).floor();
                (k >= 0.0 && k < n).then(|| k as usize..k as usize + 1)
            }
        })
        .collect()
}

fn direct_offset(columns: &[Option<Range<usize>>]) -> Option<usize> {
    let start = columns.first()?.as_ref()?.start;
    columns
        .iter()
        .enumerate()
        .all(|(t, r)| matches!(r, Some(r) if r.start == start + t && r.end == r.start + 1))
        .then_some(start)
}

impl AffinePlan {
    /// `ij_transform` maps target cell indices to source cell indices and
    /// must be axis aligned.
    pub(crate) fn new(
        ij_transform: &AffineTransform,
        target_size: (usize, usize),
        source_size: (usize, usize),
    ) -> Self {
        let columns = axis_ranges(ij_transform.a, ij_transform.c, target_size.0, source_size.0);
        let rows = axis_ranges(ij_transform.e, ij_transform.f, target_size.1, source_size.1);
        let direct_column_offset = direct_offset(&columns);
        Self {
            src_width: source_size.0,
            columns,
            rows,
            direct_column_offset,
        }
    }

    pub(crate) fn apply(&self, source: &[f64]) -> Vec<f64> {
        let width = self.columns.len();
        let mut out = vec![f64::NAN; width * self.rows.len()];

        for (tj, row) in self.rows.iter().enumerate() {
            let Some(row) = row else { continue };
            let out_row = &mut out[tj * width..(tj + 1) * width];

            if let (Some(offset), 1) = (self.direct_column_offset, row.len()) {
                let start = row.start * self.src_width + offset;
                out_row.copy_from_slice(&source[start..start + width]);
                continue;
            }

            for (value, column) in out_row.iter_mut().zip(&self.columns) {
                let Some(column) = column else { continue };
                *value = block_mean(source, self.src_width, row, column);
            }
        }
        out
    }
}

/// Mean of the finite values in a source block, NaN if there are none.
fn block_mean(source: &[f64], src_width: usize, rows: &Range<usize>, columns: &Range<usize>) -> f64 {
    if rows.len() == 1 && columns.len() == 1 {
        return source[rows.start * src_width + columns.start];
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for j in rows.clone() {
        for &v in &source[j * src_width + columns.start..j * src_width + columns.end] {
            if v.is_finite() {
                sum += v;
                count += 1;
            }
        }
    }
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downscale_by_two() {
        let source: Vec<f64> = (0..16).map(f64::from).collect();
        let plan = AffinePlan::new(&AffineTransform::from_scale_offset(2.0, 0.0, 2.0, 0.0), (2, 2), (4, 4));
        assert_eq!(plan.apply(&source), vec![2.5, 4.5, 10.5, 12.5]);
    }

    #[test]
    fn test_downscale_skips_nan() {
        let mut source: Vec<f64> = (0..16).map(f64::from).collect();
        source[0] = f64::NAN;
        source[2] = f64::NAN;
        source[3] = f64::NAN;
        source[6] = f64::NAN;
        source[7] = f64::NAN;
        let plan = AffinePlan::new(&AffineTransform::from_scale_offset(2.0, 0.0, 2.0, 0.0), (2, 2), (4, 4));
        let out = plan.apply(&source);
        assert_eq!(out[0], (1.0 + 4.0 + 5.0) / 3.0);
        assert!(out[1].is_nan());
    }

    #[test]
    fn test_upscale_nearest() {
        let source = vec![1.0, 2.0, 3.0, 4.0];
        let plan = AffinePlan::new(&AffineTransform::from_scale_offset(0.5, 0.0, 0.5, 0.0), (4, 4), (2, 2));
        assert_eq!(
            plan.apply(&source),
            vec![1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0, 3.0, 3.0, 4.0, 4.0]
        );
    }

    #[test]
    fn test_outside_domain_is_nan() {
        let source = vec![1.0, 2.0, 3.0, 4.0];
        // shifted one target cell to the left
        let plan = AffinePlan::new(&AffineTransform::from_scale_offset(1.0, -1.0, 1.0, 0.0), (2, 2), (2, 2));
        let out = plan.apply(&source);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 1.0);
        assert!(out[2].is_nan());
        assert_eq!(out[3], 3.0);
    }

    #[test]
    fn test_direct_slice() {
        let source: Vec<f64> = (0..12).map(f64::from).collect();
        let plan = AffinePlan::new(&AffineTransform::from_scale_offset(1.0, 1.0, 1.0, 1.0), (2, 2), (4, 3));
        assert_eq!(plan.direct_column_offset, Some(1));
        assert_eq!(plan.apply(&source), vec![5.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn test_flipped_rows() {
        let source = vec![1.0, 2.0, 3.0, 4.0];
        let plan = AffinePlan::new(&AffineTransform::from_scale_offset(1.0, 0.0, -1.0, 2.0), (2, 2), (2, 2));
        assert_eq!(plan.apply(&source), vec![3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_non_integer_ratio() {
        // 3 source cells into 2 target cells: centres 0.5 | 1.5, 2.5
        let source = vec![1.0, 2.0, 4.0];
        let plan = AffinePlan::new(&AffineTransform::from_scale_offset(1.5, 0.0, 1.0, 0.0), (2, 1), (3, 1));
        assert_eq!(plan.apply(&source), vec![1.0, 3.0]);
    }
}
