//! Rectification: resampling by locating every target sample in the source.
//!
//! Target cells (optionally supersampled `kx * ky` times when the target is
//! coarser than the source) are transformed into the source CRS and looked
//! up in the source grid. The sample-to-cell assignment is computed once and
//! reused for every plane of every variable.

use crate::affine::AffineTransform;
use crate::config::ResampleOptions;
use crate::error::{GridProcessorError, Result};
use crate::gridmapping::{GridKind, GridMapping};
use projection::geographic::to_lon_convention;
use projection::ProjectionProvider;
use std::sync::Arc;
use tracing::debug;

/// Upper bound on sample points per plan.
const MAX_SAMPLES: usize = 1 << 24;

/// Finds the source cell containing a point in source CRS coordinates.
enum CellLocator {
    Affine {
        inverse: AffineTransform,
        width: usize,
        height: usize,
    },
    Indexed(CellIndex),
}

impl CellLocator {
    fn new(gm: &GridMapping) -> Result<Self> {
        match gm.kind() {
            GridKind::Regular { transform } => {
                let inverse = transform
                    .inverse()
                    .ok_or_else(|| GridProcessorError::resampling("source transform is not invertible"))?;
                Ok(CellLocator::Affine {
                    inverse,
                    width: gm.width(),
                    height: gm.height(),
                })
            }
            GridKind::Irregular { x_coords, y_coords } => Ok(CellLocator::Indexed(CellIndex::new(
                Arc::clone(x_coords),
                Arc::clone(y_coords),
                gm,
            ))),
        }
    }

    fn locate(&self, x: f64, y: f64) -> Option<u32> {
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }
        match self {
            CellLocator::Affine { inverse, width, height } => {
                let (i, j) = inverse.apply(x, y);
                let (i, j) = (i.floor(), j.floor());
                if i < 0.0 || j < 0.0 || i >= *width as f64 || j >= *height as f64 {
                    return None;
                }
                Some((j as usize * width + i as usize) as u32)
            }
            CellLocator::Indexed(index) => index.nearest(x, y),
        }
    }
}

/// Bucket grid over the cell centres of an irregular grid.
struct CellIndex {
    xs: Arc<Vec<f64>>,
    ys: Arc<Vec<f64>>,
    origin: (f64, f64),
    bucket_size: f64,
    num_x: usize,
    num_y: usize,
    buckets: Vec<Vec<u32>>,
    max_dist: f64,
}

impl CellIndex {
    fn new(xs: Arc<Vec<f64>>, ys: Arc<Vec<f64>>, gm: &GridMapping) -> Self {
        let bbox = gm.xy_bbox();
        let max_dist = gm.x_res().hypot(gm.y_res());
        let mut bucket_size = max_dist.max(f64::MIN_POSITIVE);

        // Keep the bucket count in proportion to the cell count.
        let max_buckets = (xs.len() * 4).max(1) as f64;
        let count = |size: f64| ((bbox.width() / size).ceil().max(1.0), (bbox.height() / size).ceil().max(1.0));
        let (mut num_x, mut num_y) = count(bucket_size);
        while num_x * num_y > max_buckets {
            bucket_size *= 2.0;
            (num_x, num_y) = count(bucket_size);
        }
        let (num_x, num_y) = (num_x as usize, num_y as usize);

        let mut index = Self {
            origin: (bbox.min_x, bbox.min_y),
            bucket_size,
            num_x,
            num_y,
            buckets: vec![Vec::new(); num_x * num_y],
            max_dist,
            xs,
            ys,
        };
        for k in 0..index.xs.len() {
            if let Some((bx, by)) = index.bucket_of(index.xs[k], index.ys[k]) {
                index.buckets[by * num_x + bx].push(k as u32);
            }
        }
        index
    }

    fn bucket_coords(&self, x: f64, y: f64) -> (i64, i64) {
        (
            ((x - self.origin.0) / self.bucket_size).floor() as i64,
            ((y - self.origin.1) / self.bucket_size).floor() as i64,
        )
    }

    fn bucket_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }
        let (bx, by) = self.bucket_coords(x, y);
        let bx = bx.clamp(0, self.num_x as i64 - 1) as usize;
        let by = by.clamp(0, self.num_y as i64 - 1) as usize;
        Some((bx, by))
    }

    fn nearest(&self, x: f64, y: f64) -> Option<u32> {
        let (bx, by) = self.bucket_coords(x, y);
        let mut best: Option<(f64, u32)> = None;
        for ny in (by - 1).max(0)..=(by + 1).min(self.num_y as i64 - 1) {
            for nx in (bx - 1).max(0)..=(bx + 1).min(self.num_x as i64 - 1) {
                for &k in &self.buckets[ny as usize * self.num_x + nx as usize] {
                    let d = (self.xs[k as usize] - x).hypot(self.ys[k as usize] - y);
                    if best.map_or(true, |(bd, _)| d < bd) {
                        best = Some((d, k));
                    }
                }
            }
        }
        best.filter(|(d, _)| *d <= self.max_dist).map(|(_, k)| k)
    }
}

/// Source samples for each target cell in CSR layout.
#[derive(Debug, Clone)]
pub(crate) struct RectifyPlan {
    offsets: Vec<usize>,
    samples: Vec<u32>,
}

impl RectifyPlan {
    pub(crate) fn new(
        source_gm: &GridMapping,
        target_gm: &GridMapping,
        projections: &dyn ProjectionProvider,
        options: &ResampleOptions,
    ) -> Result<Self> {
        let target_transform = target_gm
            .ij_to_xy_transform()
            .ok_or_else(|| GridProcessorError::resampling("target grid mapping must be regular"))?;
        let same_crs = source_gm.crs().is_equivalent(target_gm.crs());
        let (width, height) = target_gm.size();

        let (mut kx, mut ky) = supersampling(source_gm, target_gm, projections, options)?;
        while width * height * kx * ky > MAX_SAMPLES && (kx > 1 || ky > 1) {
            kx = (kx / 2).max(1);
            ky = (ky / 2).max(1);
        }
        debug!(
            target_width = width,
            target_height = height,
            kx,
            ky,
            irregular_source = !source_gm.is_regular(),
            "Building rectification plan"
        );

        let locator = CellLocator::new(source_gm)?;
        let per_row = width * kx * ky;
        let mut offsets = Vec::with_capacity(width * height + 1);
        let mut samples = Vec::with_capacity(width * height * kx * ky);
        offsets.push(0);

        let mut xs = Vec::with_capacity(per_row);
        let mut ys = Vec::with_capacity(per_row);
        for j in 0..height {
            xs.clear();
            ys.clear();
            for i in 0..width {
                for q in 0..ky {
                    for p in 0..kx {
                        let ti = i as f64 + (p as f64 + 0.5) / kx as f64;
                        let tj = j as f64 + (q as f64 + 0.5) / ky as f64;
                        let (x, y) = target_transform.apply(ti, tj);
                        xs.push(x);
                        ys.push(y);
                    }
                }
            }

            let (sx, sy) = if same_crs {
                (std::mem::take(&mut xs), std::mem::take(&mut ys))
            } else {
                projections.transform_points(target_gm.crs(), source_gm.crs(), &xs, &ys)?
            };

            for cell in 0..width {
                for s in cell * kx * ky..(cell + 1) * kx * ky {
                    let mut x = sx[s];
                    if source_gm.is_geographic() {
                        x = to_lon_convention(x, source_gm.is_lon_360());
                    }
                    if let Some(k) = locator.locate(x, sy[s]) {
                        samples.push(k);
                    }
                }
                offsets.push(samples.len());
            }

            if same_crs {
                xs = sx;
                ys = sy;
            }
        }

        Ok(Self { offsets, samples })
    }

    pub(crate) fn apply(&self, source: &[f64]) -> Vec<f64> {
        self.offsets
            .windows(2)
            .map(|w| {
                let mut sum = 0.0;
                let mut count = 0usize;
                for &k in &self.samples[w[0]..w[1]] {
                    let v = source[k as usize];
                    if v.is_finite() {
                        sum += v;
                        count += 1;
                    }
                }
                if count == 0 {
                    f64::NAN
                } else {
                    sum / count as f64
                }
            })
            .collect()
    }
}

/// Samples per target cell along x and y.
///
/// The target cell size is measured in source CRS units around the target
/// centre; once it exceeds the source resolution by `1 / downscale_threshold`
/// each cell is supersampled by the rounded ratio.
fn supersampling(
    source_gm: &GridMapping,
    target_gm: &GridMapping,
    projections: &dyn ProjectionProvider,
    options: &ResampleOptions,
) -> Result<(usize, usize)> {
    let (width, height) = target_gm.size();
    let (ci, cj) = (width / 2, height / 2);
    let t = target_gm
        .ij_to_xy_transform()
        .ok_or_else(|| GridProcessorError::resampling("target grid mapping must be regular"))?;
    let points = [
        t.apply(ci as f64, cj as f64),
        t.apply(ci as f64 + 1.0, cj as f64),
        t.apply(ci as f64, cj as f64 + 1.0),
    ];
    let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.1).collect();

    let (sx, sy) = if source_gm.crs().is_equivalent(target_gm.crs()) {
        (xs, ys)
    } else {
        projections.transform_points(target_gm.crs(), source_gm.crs(), &xs, &ys)?
    };

    let distance = |a: usize, b: usize| {
        let mut dx = (sx[b] - sx[a]).abs();
        if source_gm.is_geographic() && dx > 180.0 {
            dx = 360.0 - dx;
        }
        dx.hypot(sy[b] - sy[a])
    };
    let factor = |cell_size: f64, source_res: f64| {
        let ratio = cell_size / source_res;
        if !ratio.is_finite() || ratio * options.downscale_threshold < 1.0 {
            1
        } else {
            (ratio.round() as usize).clamp(1, options.max_supersampling)
        }
    };

    Ok((
        factor(distance(0, 1), source_gm.x_res()),
        factor(distance(0, 2), source_gm.y_res()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cube_common::Crs;
    use projection::BuiltinProjections;

    #[test]
    fn test_irregular_source_nearest() {
        // 2x2 irregular grid with centres on a unit lattice
        let source = GridMapping::irregular(
            (2, 2),
            vec![0.5, 1.5, 0.5, 1.5],
            vec![1.5, 1.5, 0.5, 0.5],
            Crs::Wgs84,
        )
        .unwrap();
        let target = GridMapping::regular((4, 4), (0.0, 0.0), (0.5, 0.5), Crs::Wgs84).unwrap();
        let plan = RectifyPlan::new(&source, &target, &BuiltinProjections::new(), &ResampleOptions::default()).unwrap();
        let out = plan.apply(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&out[0..4], &[1.0, 1.0, 2.0, 2.0]);
        assert_eq!(&out[12..16], &[3.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn test_far_points_are_nan() {
        let source = GridMapping::irregular((2, 1), vec![0.5, 1.5], vec![0.5, 0.5], Crs::Wgs84).unwrap();
        let target = GridMapping::regular((2, 1), (10.0, 0.0), (1.0, 1.0), Crs::Wgs84).unwrap();
        let plan = RectifyPlan::new(&source, &target, &BuiltinProjections::new(), &ResampleOptions::default()).unwrap();
        assert!(plan.apply(&[1.0, 2.0]).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_supersampling_averages() {
        let source = GridMapping::irregular(
            (2, 2),
            vec![0.5, 1.5, 0.5, 1.5],
            vec![1.5, 1.5, 0.5, 0.5],
            Crs::Wgs84,
        )
        .unwrap();
        let target = GridMapping::regular((1, 1), (0.0, 0.0), (2.0, 2.0), Crs::Wgs84).unwrap();
        let plan = RectifyPlan::new(&source, &target, &BuiltinProjections::new(), &ResampleOptions::default()).unwrap();
        assert_eq!(plan.apply(&[1.0, 2.0, 3.0, 4.0]), vec![2.5]);
    }

    #[test]
    fn test_mercator_target_from_geographic_source() {
        let source = GridMapping::regular((360, 170), (-180.0, -85.0), (1.0, 1.0), Crs::Wgs84).unwrap();
        let target = GridMapping::regular((4, 4), (0.0, 0.0), (100_000.0, 100_000.0), Crs::WebMercator).unwrap();
        let plan = RectifyPlan::new(&source, &target, &BuiltinProjections::new(), &ResampleOptions::default()).unwrap();
        let data: Vec<f64> = (0..360 * 170).map(|k| (k % 360) as f64).collect();
        let out = plan.apply(&data);
        // column index equals floor(lon + 180); 0..400 km east is lon 0..3.6
        assert!(out.iter().all(|v| (180.0..184.0).contains(v)));
    }
}
