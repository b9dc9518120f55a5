//! Coordinate reference system transformations.
//!
//! Implements the projections the data cube service needs from scratch:
//! geographic lon/lat, spherical Web Mercator and Lambert conformal conic.
//! Everything is routed through [`ProjectionProvider`] so callers can plug
//! in a different transformation library.

pub mod cf;
pub mod error;
pub mod geographic;
pub mod lambert;
pub mod mercator;

pub use error::{ProjectionError, Result};
pub use lambert::LambertConformal;

use cube_common::{BoundingBox, Crs};
use serde_json::{Map, Value};
use tracing::trace;

/// Number of points sampled along each bbox edge when reprojecting boxes.
const BBOX_EDGE_SAMPLES: usize = 21;

/// Forward/inverse projection between coordinate reference systems.
pub trait ProjectionProvider: Send + Sync {
    /// Transform a single point from `from` to `to`.
    ///
    /// Points outside the domain of the target projection come back as NaN.
    /// An error means the two systems cannot be related at all.
    fn transform_point(&self, from: &Crs, to: &Crs, x: f64, y: f64) -> Result<(f64, f64)>;

    /// Whether a transformation path between the two systems exists.
    fn can_transform(&self, from: &Crs, to: &Crs) -> bool;

    /// True if `crs` is a plain longitude/latitude system.
    fn is_geographic(&self, crs: &Crs) -> bool {
        crs.is_geographic()
    }

    /// CF grid-mapping attributes for `crs`.
    fn cf_attributes(&self, crs: &Crs) -> Map<String, Value> {
        cf::grid_mapping_attrs(crs)
    }

    /// Transform coordinate arrays.
    fn transform_points(
        &self,
        from: &Crs,
        to: &Crs,
        xs: &[f64],
        ys: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        if xs.len() != ys.len() {
            return Err(ProjectionError::LengthMismatch(xs.len(), ys.len()));
        }
        let mut out_x = Vec::with_capacity(xs.len());
        let mut out_y = Vec::with_capacity(ys.len());
        for (&x, &y) in xs.iter().zip(ys) {
            let (tx, ty) = self.transform_point(from, to, x, y)?;
            out_x.push(tx);
            out_y.push(ty);
        }
        Ok((out_x, out_y))
    }

    /// Envelope of a box after transformation, sampled along its edges.
    ///
    /// Returns `None` when no sampled point lands inside the target domain.
    fn transform_bbox(&self, from: &Crs, to: &Crs, bbox: &BoundingBox) -> Result<Option<BoundingBox>> {
        if from.is_equivalent(to) {
            return Ok(Some(*bbox));
        }
        let mut xs = Vec::with_capacity(BBOX_EDGE_SAMPLES * 4);
        let mut ys = Vec::with_capacity(BBOX_EDGE_SAMPLES * 4);
        for k in 0..BBOX_EDGE_SAMPLES {
            let t = k as f64 / (BBOX_EDGE_SAMPLES - 1) as f64;
            let x = bbox.min_x + t * bbox.width();
            let y = bbox.min_y + t * bbox.height();
            xs.extend_from_slice(&[x, x, bbox.min_x, bbox.max_x]);
            ys.extend_from_slice(&[bbox.min_y, bbox.max_y, y, y]);
        }
        let (tx, ty) = self.transform_points(from, to, &xs, &ys)?;
        Ok(BoundingBox::from_points(&tx, &ty))
    }
}

/// The projections implemented in this crate.
#[derive(Debug, Clone, Default)]
pub struct BuiltinProjections;

impl BuiltinProjections {
    pub fn new() -> Self {
        Self
    }

    fn supports(crs: &Crs) -> bool {
        !matches!(crs, Crs::Other(_))
    }

    fn to_geographic(crs: &Crs, x: f64, y: f64) -> Result<(f64, f64)> {
        match crs {
            Crs::Wgs84 | Crs::Crs84 | Crs::Nad83 => Ok((x, y)),
            Crs::WebMercator => Ok(mercator::inverse(x, y)),
            Crs::LambertConformal(params) => Ok(LambertConformal::new(*params)?.inverse(x, y)),
            Crs::Other(name) => Err(ProjectionError::Unsupported {
                from: name.clone(),
                to: Crs::Crs84.to_string(),
            }),
        }
    }

    fn from_geographic(crs: &Crs, lon: f64, lat: f64) -> Result<(f64, f64)> {
        match crs {
            Crs::Wgs84 | Crs::Crs84 | Crs::Nad83 => Ok((lon, lat)),
            Crs::WebMercator => Ok(mercator::forward(lon, lat)),
            Crs::LambertConformal(params) => Ok(LambertConformal::new(*params)?.forward(lon, lat)),
            Crs::Other(name) => Err(ProjectionError::Unsupported {
                from: Crs::Crs84.to_string(),
                to: name.clone(),
            }),
        }
    }
}

impl ProjectionProvider for BuiltinProjections {
    fn transform_point(&self, from: &Crs, to: &Crs, x: f64, y: f64) -> Result<(f64, f64)> {
        if from.is_equivalent(to) {
            return Ok((x, y));
        }
        if !self.can_transform(from, to) {
            return Err(ProjectionError::Unsupported {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let (lon, lat) = Self::to_geographic(from, x, y)?;
        Self::from_geographic(to, lon, lat)
    }

    fn can_transform(&self, from: &Crs, to: &Crs) -> bool {
        from.is_equivalent(to) || (Self::supports(from) && Self::supports(to))
    }

    fn transform_points(
        &self,
        from: &Crs,
        to: &Crs,
        xs: &[f64],
        ys: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        if xs.len() != ys.len() {
            return Err(ProjectionError::LengthMismatch(xs.len(), ys.len()));
        }
        if from.is_equivalent(to) {
            return Ok((xs.to_vec(), ys.to_vec()));
        }
        if !self.can_transform(from, to) {
            return Err(ProjectionError::Unsupported {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        trace!(from = %from, to = %to, points = xs.len(), "Transforming points");

        // Build the cone constants once per batch.
        let src_lcc = match from {
            Crs::LambertConformal(p) => Some(LambertConformal::new(*p)?),
            _ => None,
        };
        let dst_lcc = match to {
            Crs::LambertConformal(p) => Some(LambertConformal::new(*p)?),
            _ => None,
        };

        let mut out_x = Vec::with_capacity(xs.len());
        let mut out_y = Vec::with_capacity(ys.len());
        for (&x, &y) in xs.iter().zip(ys) {
            let (lon, lat) = match (&src_lcc, from) {
                (Some(lcc), _) => lcc.inverse(x, y),
                (None, Crs::WebMercator) => mercator::inverse(x, y),
                _ => (x, y),
            };
            let (tx, ty) = match (&dst_lcc, to) {
                (Some(lcc), _) => lcc.forward(lon, lat),
                (None, Crs::WebMercator) => mercator::forward(lon, lat),
                _ => (lon, lat),
            };
            out_x.push(tx);
            out_y.push(ty);
        }
        Ok((out_x, out_y))
    }
}
