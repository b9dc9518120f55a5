//! Grid mappings: how a dataset's cells are placed in a CRS.
//!
//! A [`GridMapping`] is either *regular* (an affine transform maps cell
//! indices to CRS coordinates) or *irregular* (explicit per-cell x/y
//! coordinate arrays, e.g. a curvilinear satellite swath). Both shapes share
//! size, resolution, bounding box and CRS, and the resampler branches on
//! [`GridKind`] to pick its algorithm.

mod coords;
mod transform;

pub use coords::{discover_crs, find_xy_var_names};

use crate::affine::AffineTransform;
use crate::dataset::{Dataset, Variable};
use crate::error::{GridProcessorError, Result};
use cube_common::{BoundingBox, Crs};
use serde_json::json;
use std::sync::Arc;

/// Largest default tile edge for a grid mapping.
pub const DEFAULT_TILE_SIZE: usize = 512;

/// Relative tolerance used when comparing coordinates and resolutions.
pub const DEFAULT_TOLERANCE: f64 = 1e-5;

/// Payload that differs between regular and irregular grids.
#[derive(Debug, Clone)]
pub enum GridKind {
    /// Cell index to CRS coordinate is affine.
    Regular { transform: AffineTransform },
    /// Cell centre coordinates, row-major `height * width`.
    Irregular {
        x_coords: Arc<Vec<f64>>,
        y_coords: Arc<Vec<f64>>,
    },
}

/// Spatial sampling of a dataset. Immutable once built.
#[derive(Debug, Clone)]
pub struct GridMapping {
    crs: Crs,
    size: (usize, usize),
    tile_size: (usize, usize),
    xy_res: (f64, f64),
    xy_bbox: BoundingBox,
    is_j_axis_up: bool,
    is_lon_360: bool,
    xy_dim_names: (String, String),
    xy_var_names: (String, String),
    kind: GridKind,
}

/// Conventional (x, y) dimension names for a CRS.
pub fn default_dim_names(crs: &Crs) -> (String, String) {
    if crs.is_geographic() {
        ("lon".to_string(), "lat".to_string())
    } else {
        ("x".to_string(), "y".to_string())
    }
}

fn check_latitude_range(y_min: f64, y_max: f64, y_res: f64) -> Result<()> {
    let eps = y_res * DEFAULT_TOLERANCE;
    if y_min < -90.0 - eps {
        return Err(GridProcessorError::grid_mapping(format!(
            "latitude must not be below -90, got {}",
            y_min
        )));
    }
    if y_max > 90.0 + eps {
        return Err(GridProcessorError::grid_mapping(format!(
            "latitude must not exceed 90, got {}",
            y_max
        )));
    }
    Ok(())
}

fn default_tile_size(size: (usize, usize)) -> (usize, usize) {
    (size.0.min(DEFAULT_TILE_SIZE), size.1.min(DEFAULT_TILE_SIZE))
}

impl GridMapping {
    /// A regular grid of `size` (width, height) cells whose lower-left corner
    /// is `xy_min`, with cell size `xy_res`. Rows run north to south.
    ///
    /// Geographic grids must stay within the latitude range [-90, 90].
    pub fn regular(size: (usize, usize), xy_min: (f64, f64), xy_res: (f64, f64), crs: Crs) -> Result<Self> {
        let gm = Self::regular_unchecked(size, xy_min, xy_res, crs)?;
        if gm.crs.is_geographic() {
            check_latitude_range(gm.xy_bbox.min_y, gm.xy_bbox.max_y, gm.xy_res.1)?;
        }
        Ok(gm)
    }

    /// Like [`GridMapping::regular`] but without the latitude range check.
    ///
    /// Grids derived from coordinate variables or from coarsening may
    /// overhang the poles by up to one cell.
    pub(crate) fn regular_unchecked(
        size: (usize, usize),
        xy_min: (f64, f64),
        xy_res: (f64, f64),
        crs: Crs,
    ) -> Result<Self> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(GridProcessorError::grid_mapping(format!(
                "size must be positive, got {}x{}",
                width, height
            )));
        }
        let (x_res, y_res) = xy_res;
        if !(x_res.is_finite() && y_res.is_finite() && x_res > 0.0 && y_res > 0.0) {
            return Err(GridProcessorError::grid_mapping(format!(
                "resolution must be positive, got ({}, {})",
                x_res, y_res
            )));
        }
        let (x_min, y_min) = xy_min;
        if !(x_min.is_finite() && y_min.is_finite()) {
            return Err(GridProcessorError::grid_mapping("origin must be finite"));
        }

        let x_max = x_min + width as f64 * x_res;
        let y_max = y_min + height as f64 * y_res;

        let is_lon_360 = crs.is_geographic() && x_max > 180.0;
        let names = default_dim_names(&crs);

        Ok(Self {
            size,
            tile_size: default_tile_size(size),
            xy_res,
            xy_bbox: BoundingBox::new(x_min, y_min, x_max, y_max),
            is_j_axis_up: false,
            is_lon_360,
            xy_dim_names: names.clone(),
            xy_var_names: names,
            kind: GridKind::Regular {
                transform: AffineTransform::from_scale_offset(x_res, x_min, -y_res, y_max),
            },
            crs,
        })
    }

    /// A regular grid covering `bbox` with the given resolution. The size is
    /// rounded up so the whole box is covered, keeping the upper-left corner.
    fn covering(bbox: &BoundingBox, xy_res: (f64, f64), crs: Crs) -> Result<Self> {
        if !bbox.is_valid() {
            return Err(GridProcessorError::grid_mapping(format!("invalid bounding box {:?}", bbox)));
        }
        if !(xy_res.0 > 0.0 && xy_res.1 > 0.0) {
            return Err(GridProcessorError::grid_mapping("resolution must be positive"));
        }
        let width = cells_covering(bbox.width(), xy_res.0);
        let height = cells_covering(bbox.height(), xy_res.1);
        let y_min = bbox.max_y - height as f64 * xy_res.1;
        Self::regular_unchecked((width, height), (bbox.min_x, y_min), xy_res, crs)
    }

    /// An irregular grid from per-cell centre coordinates (row-major).
    ///
    /// Non-finite coordinates are allowed and mark cells outside the domain.
    pub fn irregular(
        size: (usize, usize),
        x_coords: Vec<f64>,
        y_coords: Vec<f64>,
        crs: Crs,
    ) -> Result<Self> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(GridProcessorError::grid_mapping(format!(
                "size must be positive, got {}x{}",
                width, height
            )));
        }
        let n = width * height;
        if x_coords.len() != n || y_coords.len() != n {
            return Err(GridProcessorError::grid_mapping(format!(
                "coordinate arrays of length {} and {} do not match size {}x{}",
                x_coords.len(),
                y_coords.len(),
                width,
                height
            )));
        }

        let x_res = median_step(&x_coords, &y_coords, width, height, Axis::I);
        let y_res = median_step(&x_coords, &y_coords, width, height, Axis::J);
        let (x_res, y_res) = match (x_res, y_res) {
            (Some(x), Some(y)) => (x, y),
            (Some(x), None) => (x, x),
            (None, Some(y)) => (y, y),
            (None, None) => {
                return Err(GridProcessorError::grid_mapping(
                    "cannot determine resolution of irregular grid",
                ))
            }
        };

        let bbox = BoundingBox::from_points(&x_coords, &y_coords)
            .ok_or_else(|| GridProcessorError::grid_mapping("irregular grid has no finite coordinates"))?
            .expand(x_res / 2.0, y_res / 2.0);

        let first_col_y: Vec<f64> = (0..height).map(|j| y_coords[j * width]).filter(|v| v.is_finite()).collect();
        let is_j_axis_up = match (first_col_y.first(), first_col_y.last()) {
            (Some(first), Some(last)) => first < last,
            _ => false,
        };
        let is_lon_360 = crs.is_geographic() && bbox.max_x > 180.0;
        let names = default_dim_names(&crs);

        Ok(Self {
            size,
            tile_size: default_tile_size(size),
            xy_res: (x_res, y_res),
            xy_bbox: bbox,
            is_j_axis_up,
            is_lon_360,
            xy_dim_names: names.clone(),
            xy_var_names: names,
            kind: GridKind::Irregular {
                x_coords: Arc::new(x_coords),
                y_coords: Arc::new(y_coords),
            },
            crs,
        })
    }

    /// Same grid with rows running south to north (`true`) or north to south.
    pub fn with_j_axis_up(mut self, up: bool) -> Self {
        if let GridKind::Regular { transform } = &mut self.kind {
            let (x_res, y_res) = self.xy_res;
            *transform = if up {
                AffineTransform::from_scale_offset(x_res, self.xy_bbox.min_x, y_res, self.xy_bbox.min_y)
            } else {
                AffineTransform::from_scale_offset(x_res, self.xy_bbox.min_x, -y_res, self.xy_bbox.max_y)
            };
            self.is_j_axis_up = up;
        }
        self
    }

    pub fn with_tile_size(mut self, tile_size: (usize, usize)) -> Self {
        self.tile_size = (
            tile_size.0.clamp(1, self.size.0),
            tile_size.1.clamp(1, self.size.1),
        );
        self
    }

    /// Rename the spatial dimensions (x, y).
    pub fn with_dim_names(mut self, x_dim: &str, y_dim: &str) -> Self {
        self.xy_dim_names = (x_dim.to_string(), y_dim.to_string());
        if matches!(self.kind, GridKind::Regular { .. }) {
            self.xy_var_names = self.xy_dim_names.clone();
        }
        self
    }

    /// Rename the coordinate variables (x, y). Regular grids name them after
    /// their dimensions, so this only matters for irregular ones.
    pub fn with_var_names(mut self, x_var: &str, y_var: &str) -> Self {
        self.xy_var_names = (x_var.to_string(), y_var.to_string());
        self
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    /// (width, height) in cells.
    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    pub fn width(&self) -> usize {
        self.size.0
    }

    pub fn height(&self) -> usize {
        self.size.1
    }

    pub fn tile_size(&self) -> (usize, usize) {
        self.tile_size
    }

    pub fn xy_res(&self) -> (f64, f64) {
        self.xy_res
    }

    pub fn x_res(&self) -> f64 {
        self.xy_res.0
    }

    pub fn y_res(&self) -> f64 {
        self.xy_res.1
    }

    /// Mean of x and y resolution.
    pub fn avg_res(&self) -> f64 {
        (self.xy_res.0 + self.xy_res.1) / 2.0
    }

    pub fn xy_bbox(&self) -> &BoundingBox {
        &self.xy_bbox
    }

    pub fn is_regular(&self) -> bool {
        matches!(self.kind, GridKind::Regular { .. })
    }

    pub fn is_j_axis_up(&self) -> bool {
        self.is_j_axis_up
    }

    pub fn is_lon_360(&self) -> bool {
        self.is_lon_360
    }

    pub fn is_geographic(&self) -> bool {
        self.crs.is_geographic()
    }

    /// (x, y) dimension names.
    pub fn xy_dim_names(&self) -> (&str, &str) {
        (&self.xy_dim_names.0, &self.xy_dim_names.1)
    }

    /// (x, y) coordinate variable names.
    pub fn xy_var_names(&self) -> (&str, &str) {
        (&self.xy_var_names.0, &self.xy_var_names.1)
    }

    pub fn kind(&self) -> &GridKind {
        &self.kind
    }

    /// Cell index to CRS coordinate. `None` for irregular grids.
    pub fn ij_to_xy_transform(&self) -> Option<AffineTransform> {
        match &self.kind {
            GridKind::Regular { transform } => Some(*transform),
            GridKind::Irregular { .. } => None,
        }
    }

    /// CRS coordinate to cell index. `None` for irregular grids.
    pub fn xy_to_ij_transform(&self) -> Option<AffineTransform> {
        self.ij_to_xy_transform().and_then(|t| t.inverse())
    }

    /// Transform from `other`'s cell indices to this grid's cell indices.
    pub fn ij_transform_from(&self, other: &GridMapping) -> Option<AffineTransform> {
        let to_ij = self.xy_to_ij_transform()?;
        let from_ij = other.ij_to_xy_transform()?;
        Some(to_ij.compose(&from_ij))
    }

    /// Centre of cell `(i, j)`.
    pub fn cell_center(&self, i: usize, j: usize) -> (f64, f64) {
        match &self.kind {
            GridKind::Regular { transform } => transform.apply(i as f64 + 0.5, j as f64 + 0.5),
            GridKind::Irregular { x_coords, y_coords } => {
                let k = j * self.size.0 + i;
                (x_coords[k], y_coords[k])
            }
        }
    }

    /// Centre coordinates of all cells, row-major.
    pub fn cell_centers(&self) -> (Vec<f64>, Vec<f64>) {
        match &self.kind {
            GridKind::Regular { transform } => {
                let (w, h) = self.size;
                let mut xs = Vec::with_capacity(w * h);
                let mut ys = Vec::with_capacity(w * h);
                for j in 0..h {
                    for i in 0..w {
                        let (x, y) = transform.apply(i as f64 + 0.5, j as f64 + 0.5);
                        xs.push(x);
                        ys.push(y);
                    }
                }
                (xs, ys)
            }
            GridKind::Irregular { x_coords, y_coords } => (x_coords.to_vec(), y_coords.to_vec()),
        }
    }

    /// 1-D x centres of a regular grid.
    pub fn x_centers(&self) -> Option<Vec<f64>> {
        let t = self.ij_to_xy_transform()?;
        Some((0..self.size.0).map(|i| t.apply(i as f64 + 0.5, 0.5).0).collect())
    }

    /// 1-D y centres of a regular grid, in row order.
    pub fn y_centers(&self) -> Option<Vec<f64>> {
        let t = self.ij_to_xy_transform()?;
        Some((0..self.size.1).map(|j| t.apply(0.5, j as f64 + 0.5).1).collect())
    }

    /// Whether two grid mappings describe the same cells.
    pub fn is_close(&self, other: &GridMapping, tolerance: f64) -> bool {
        if !self.crs.is_equivalent(&other.crs)
            || self.size != other.size
            || self.is_j_axis_up != other.is_j_axis_up
            || self.is_lon_360 != other.is_lon_360
        {
            return false;
        }
        let tol_x = tolerance * self.xy_res.0;
        let tol_y = tolerance * self.xy_res.1;
        if (self.xy_res.0 - other.xy_res.0).abs() > tol_x
            || (self.xy_res.1 - other.xy_res.1).abs() > tol_y
            || !self.xy_bbox.approx_eq(&other.xy_bbox, tol_x.max(tol_y))
        {
            return false;
        }
        match (&self.kind, &other.kind) {
            (GridKind::Regular { transform: a }, GridKind::Regular { transform: b }) => {
                a.approx_eq(b, tol_x.max(tol_y))
            }
            (
                GridKind::Irregular { x_coords: ax, y_coords: ay },
                GridKind::Irregular { x_coords: bx, y_coords: by },
            ) => {
                (Arc::ptr_eq(ax, bx) && Arc::ptr_eq(ay, by))
                    || (all_close(ax, bx, tol_x) && all_close(ay, by, tol_y))
            }
            _ => false,
        }
    }

    /// Index window `(i0, j0, i1, j1)` (exclusive ends) of the cells whose
    /// extent intersects `bbox`. `None` if the box misses the grid.
    pub fn ij_bbox_from_xy_bbox(&self, bbox: &BoundingBox) -> Option<(usize, usize, usize, usize)> {
        let (w, h) = self.size;
        match &self.kind {
            GridKind::Regular { .. } => {
                let inv = self.xy_to_ij_transform()?;
                let corners = [
                    inv.apply(bbox.min_x, bbox.min_y),
                    inv.apply(bbox.max_x, bbox.max_y),
                ];
                let (i_lo, i_hi) = min_max(corners[0].0, corners[1].0);
                let (j_lo, j_hi) = min_max(corners[0].1, corners[1].1);
                let eps = DEFAULT_TOLERANCE;
                let i0 = (i_lo + eps).floor().max(0.0);
                let j0 = (j_lo + eps).floor().max(0.0);
                let i1 = (i_hi - eps).ceil().min(w as f64);
                let j1 = (j_hi - eps).ceil().min(h as f64);
                if i0 >= i1 || j0 >= j1 {
                    return None;
                }
                Some((i0 as usize, j0 as usize, i1 as usize, j1 as usize))
            }
            GridKind::Irregular { x_coords, y_coords } => {
                let mut window: Option<(usize, usize, usize, usize)> = None;
                for j in 0..h {
                    for i in 0..w {
                        let k = j * w + i;
                        if bbox.contains_point(x_coords[k], y_coords[k]) {
                            window = Some(match window {
                                None => (i, j, i + 1, j + 1),
                                Some((i0, j0, i1, j1)) => (i0.min(i), j0.min(j), i1.max(i + 1), j1.max(j + 1)),
                            });
                        }
                    }
                }
                window
            }
        }
    }

    /// The grid restricted to the index window `(i0, j0, i1, j1)`.
    pub fn subset(&self, i0: usize, j0: usize, i1: usize, j1: usize) -> Result<GridMapping> {
        let (w, h) = self.size;
        if i0 >= i1 || j0 >= j1 || i1 > w || j1 > h {
            return Err(GridProcessorError::grid_mapping(format!(
                "window [{}..{}, {}..{}] outside grid of {}x{}",
                i0, i1, j0, j1, w, h
            )));
        }
        let sub_size = (i1 - i0, j1 - j0);
        let mut gm = match &self.kind {
            GridKind::Regular { transform } => {
                let (x0, y0) = transform.apply(i0 as f64, j0 as f64);
                let (x1, y1) = transform.apply(i1 as f64, j1 as f64);
                let gm = GridMapping::regular_unchecked(sub_size, (x0.min(x1), y0.min(y1)), self.xy_res, self.crs.clone())?;
                gm.with_j_axis_up(self.is_j_axis_up)
            }
            GridKind::Irregular { x_coords, y_coords } => {
                let mut xs = Vec::with_capacity(sub_size.0 * sub_size.1);
                let mut ys = Vec::with_capacity(sub_size.0 * sub_size.1);
                for j in j0..j1 {
                    xs.extend_from_slice(&x_coords[j * w + i0..j * w + i1]);
                    ys.extend_from_slice(&y_coords[j * w + i0..j * w + i1]);
                }
                GridMapping::irregular(sub_size, xs, ys, self.crs.clone())?
            }
        };
        gm.xy_dim_names = self.xy_dim_names.clone();
        gm.xy_var_names = self.xy_var_names.clone();
        Ok(gm.with_tile_size(self.tile_size))
    }

    /// A regular grid `factor` times coarser, covering the same area.
    ///
    /// Regular grids keep their upper-left (or lower-left when the j axis
    /// points up) corner; irregular grids are replaced by a regular grid over
    /// their bounding box.
    pub fn coarsened(&self, factor: usize) -> Result<GridMapping> {
        if factor == 0 {
            return Err(GridProcessorError::grid_mapping("coarsening factor must be positive"));
        }
        let res = (self.xy_res.0 * factor as f64, self.xy_res.1 * factor as f64);
        let gm = match &self.kind {
            GridKind::Regular { .. } => {
                let width = self.size.0.div_ceil(factor);
                let height = self.size.1.div_ceil(factor);
                let y_min = if self.is_j_axis_up {
                    self.xy_bbox.min_y
                } else {
                    self.xy_bbox.max_y - height as f64 * res.1
                };
                let mut gm = GridMapping::regular_unchecked((width, height), (self.xy_bbox.min_x, y_min), res, self.crs.clone())?
                    .with_j_axis_up(self.is_j_axis_up);
                gm.xy_dim_names = self.xy_dim_names.clone();
                gm.xy_var_names = self.xy_dim_names.clone();
                gm
            }
            GridKind::Irregular { .. } => GridMapping::covering(&self.xy_bbox, res, self.crs.clone())?,
        };
        Ok(gm.with_tile_size(self.tile_size))
    }

    /// Coordinate variables describing this grid, keyed by name.
    ///
    /// Regular grids get 1-D centre coordinates plus `*_bnds`-free CF
    /// attributes, irregular grids 2-D coordinate arrays.
    pub fn coord_variables(&self) -> Vec<(String, Variable)> {
        let (x_dim, y_dim) = self.xy_dim_names();
        let (x_attrs, y_attrs) = if self.crs.is_geographic() {
            (
                [("standard_name", "longitude"), ("long_name", "longitude"), ("units", "degrees_east")],
                [("standard_name", "latitude"), ("long_name", "latitude"), ("units", "degrees_north")],
            )
        } else {
            (
                [
                    ("standard_name", "projection_x_coordinate"),
                    ("long_name", "x coordinate of projection"),
                    ("units", "m"),
                ],
                [
                    ("standard_name", "projection_y_coordinate"),
                    ("long_name", "y coordinate of projection"),
                    ("units", "m"),
                ],
            )
        };

        let decorate = |mut var: Variable, attrs: &[(&str, &str)]| {
            for (k, v) in attrs {
                var.attrs.insert(k.to_string(), json!(v));
            }
            var
        };

        match &self.kind {
            GridKind::Regular { .. } => {
                let xs = self.x_centers().unwrap_or_default();
                let ys = self.y_centers().unwrap_or_default();
                vec![
                    (x_dim.to_string(), decorate(Variable::new_1d(x_dim, xs), &x_attrs)),
                    (y_dim.to_string(), decorate(Variable::new_1d(y_dim, ys), &y_attrs)),
                ]
            }
            GridKind::Irregular { x_coords, y_coords } => {
                let (x_var, y_var) = self.xy_var_names();
                let dims = vec![y_dim.to_string(), x_dim.to_string()];
                let shape = vec![self.size.1, self.size.0];
                let make = |data: &Arc<Vec<f64>>| Variable {
                    dims: dims.clone(),
                    shape: shape.clone(),
                    data: Arc::clone(data),
                    attrs: Default::default(),
                };
                vec![
                    (x_var.to_string(), decorate(make(x_coords), &x_attrs)),
                    (y_var.to_string(), decorate(make(y_coords), &y_attrs)),
                ]
            }
        }
    }

    /// A dataset holding only the coordinate variables of this grid.
    pub fn xy_coords_dataset(&self) -> Dataset {
        self.coord_variables()
            .into_iter()
            .fold(Dataset::new(), |ds, (name, var)| ds.with_coord(&name, var))
    }
}

fn cells_covering(extent: f64, res: f64) -> usize {
    let n = extent / res;
    let rounded = n.round();
    if (n - rounded).abs() <= DEFAULT_TOLERANCE * n.max(1.0) {
        (rounded as usize).max(1)
    } else {
        (n.ceil() as usize).max(1)
    }
}

fn min_max(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn all_close(a: &[f64], b: &[f64], tolerance: f64) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            (x.is_nan() && y.is_nan()) || (x - y).abs() <= tolerance
        })
}

#[derive(Clone, Copy)]
enum Axis {
    I,
    J,
}

/// Median distance between neighbouring cell centres along one axis.
fn median_step(xs: &[f64], ys: &[f64], width: usize, height: usize, axis: Axis) -> Option<f64> {
    const MAX_SAMPLES: usize = 10_000;
    let (count, step_of): (usize, Box<dyn Fn(usize) -> (usize, usize)>) = match axis {
        Axis::I if width > 1 => (
            (width - 1) * height,
            Box::new(move |k| {
                let (j, i) = (k / (width - 1), k % (width - 1));
                (j * width + i, j * width + i + 1)
            }),
        ),
        Axis::J if height > 1 => (
            width * (height - 1),
            Box::new(move |k| {
                let (j, i) = (k / width, k % width);
                (j * width + i, (j + 1) * width + i)
            }),
        ),
        _ => return None,
    };

    let stride = (count / MAX_SAMPLES).max(1);
    let mut steps: Vec<f64> = (0..count)
        .step_by(stride)
        .filter_map(|k| {
            let (p, q) = step_of(k);
            let d = (xs[q] - xs[p]).hypot(ys[q] - ys[p]);
            (d.is_finite() && d > 0.0).then_some(d)
        })
        .collect();
    if steps.is_empty() {
        return None;
    }
    steps.sort_by(|a, b| a.total_cmp(b));
    Some(steps[steps.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gm_8x4() -> GridMapping {
        GridMapping::regular((8, 4), (0.0, 0.0), (2.0, 2.0), Crs::Wgs84).unwrap()
    }

    #[test]
    fn test_regular_geometry() {
        let gm = gm_8x4();
        assert_eq!(gm.size(), (8, 4));
        assert_eq!(*gm.xy_bbox(), BoundingBox::new(0.0, 0.0, 16.0, 8.0));
        assert!(gm.is_regular());
        assert!(!gm.is_j_axis_up());
        assert!(!gm.is_lon_360());
        assert_eq!(gm.cell_center(0, 0), (1.0, 7.0));
        assert_eq!(gm.cell_center(7, 3), (15.0, 1.0));
        assert_eq!(gm.xy_dim_names(), ("lon", "lat"));
        let t = gm.ij_to_xy_transform().unwrap();
        assert_eq!(t, AffineTransform::new(2.0, 0.0, 0.0, 0.0, -2.0, 8.0));
    }

    #[test]
    fn test_regular_rejects_bad_input() {
        assert!(GridMapping::regular((0, 4), (0.0, 0.0), (1.0, 1.0), Crs::Wgs84).is_err());
        assert!(GridMapping::regular((4, 4), (0.0, 0.0), (0.0, 1.0), Crs::Wgs84).is_err());
        assert!(GridMapping::regular((4, 100), (0.0, 0.0), (1.0, 1.0), Crs::Wgs84).is_err());
        assert!(GridMapping::regular((4, 4), (0.0, -92.0), (1.0, 1.0), Crs::Wgs84).is_err());
        // Projected grids have no latitude limits.
        assert!(GridMapping::regular((4, 100), (0.0, 0.0), (1.0, 1.0), Crs::WebMercator).is_ok());
    }

    #[test]
    fn test_lon_360() {
        let gm = GridMapping::regular((10, 10), (175.0, 0.0), (1.0, 1.0), Crs::Wgs84).unwrap();
        assert!(gm.is_lon_360());
    }

    #[test]
    fn test_j_axis_up() {
        let gm = gm_8x4().with_j_axis_up(true);
        assert!(gm.is_j_axis_up());
        assert_eq!(gm.cell_center(0, 0), (1.0, 1.0));
        assert_eq!(gm.y_centers().unwrap(), vec![1.0, 3.0, 5.0, 7.0]);
        assert!(!gm.is_close(&gm_8x4(), DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_ij_transform_from() {
        let fine = gm_8x4();
        let coarse = fine.coarsened(2).unwrap();
        assert_eq!(coarse.size(), (4, 2));
        let t = fine.ij_transform_from(&coarse).unwrap();
        // coarse cell (1, 1) starts at fine cell (2, 2)
        let (i, j) = t.apply(1.0, 1.0);
        assert!((i - 2.0).abs() < 1e-12 && (j - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_coarsened_odd_size_keeps_top_left() {
        let gm = GridMapping::regular((5, 3), (0.0, 0.0), (1.0, 1.0), Crs::WebMercator).unwrap();
        let coarse = gm.coarsened(2).unwrap();
        assert_eq!(coarse.size(), (3, 2));
        assert_eq!(coarse.xy_bbox().min_x, 0.0);
        assert_eq!(coarse.xy_bbox().max_y, 3.0);
        assert_eq!(coarse.xy_bbox().min_y, -1.0);
    }

    #[test]
    fn test_coarsened_global_odd_height_overhangs_south_pole() {
        let gm = GridMapping::regular((10, 5), (-180.0, -90.0), (36.0, 36.0), Crs::Wgs84).unwrap();
        let coarse = gm.coarsened(2).unwrap();
        assert_eq!(coarse.size(), (5, 3));
        assert_eq!(coarse.xy_bbox().min_x, -180.0);
        assert_eq!(coarse.xy_bbox().max_y, 90.0);
        assert_eq!(coarse.xy_bbox().min_y, -126.0);
    }

    #[test]
    fn test_coarsened_irregular_keeps_top_left() {
        let xs = vec![0.5, 1.5, 2.5, 0.5, 1.5, 2.5, 0.5, 1.5, 2.5];
        let ys = vec![-87.5, -87.5, -87.5, -88.5, -88.5, -88.5, -89.5, -89.5, -89.5];
        let gm = GridMapping::irregular((3, 3), xs, ys, Crs::Wgs84).unwrap();
        assert_eq!(*gm.xy_bbox(), BoundingBox::new(0.0, -90.0, 3.0, -87.0));
        let coarse = gm.coarsened(2).unwrap();
        assert!(coarse.is_regular());
        assert_eq!(coarse.size(), (2, 2));
        assert_eq!(coarse.xy_bbox().max_y, -87.0);
        assert_eq!(coarse.xy_bbox().min_y, -91.0);
    }

    #[test]
    fn test_is_close() {
        let a = gm_8x4();
        let b = GridMapping::regular((8, 4), (1e-9, 0.0), (2.0, 2.0), Crs::Crs84).unwrap();
        assert!(a.is_close(&b, DEFAULT_TOLERANCE));
        let c = GridMapping::regular((8, 4), (0.5, 0.0), (2.0, 2.0), Crs::Wgs84).unwrap();
        assert!(!a.is_close(&c, DEFAULT_TOLERANCE));
        let d = GridMapping::regular((8, 4), (0.0, 0.0), (2.0, 2.0), Crs::WebMercator).unwrap();
        assert!(!a.is_close(&d, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_ij_bbox_from_xy_bbox() {
        let gm = gm_8x4();
        assert_eq!(
            gm.ij_bbox_from_xy_bbox(&BoundingBox::new(2.0, 2.0, 6.0, 6.0)),
            Some((1, 1, 3, 3))
        );
        assert_eq!(
            gm.ij_bbox_from_xy_bbox(&BoundingBox::new(-10.0, -10.0, 1.0, 1.0)),
            Some((0, 3, 1, 4))
        );
        assert_eq!(gm.ij_bbox_from_xy_bbox(&BoundingBox::new(20.0, 0.0, 30.0, 8.0)), None);
    }

    #[test]
    fn test_irregular() {
        // 3x2 grid, slightly sheared
        let xs = vec![0.0, 1.0, 2.0, 0.1, 1.1, 2.1];
        let ys = vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let gm = GridMapping::irregular((3, 2), xs, ys, Crs::Wgs84).unwrap();
        assert!(!gm.is_regular());
        assert!(gm.ij_to_xy_transform().is_none());
        assert!((gm.x_res() - 1.0).abs() < 1e-12);
        assert!(gm.y_res() > 1.0);
        assert!(!gm.is_j_axis_up());
        assert_eq!(gm.cell_center(2, 1), (2.1, 0.0));
        assert_eq!(
            gm.ij_bbox_from_xy_bbox(&BoundingBox::new(0.5, -0.5, 1.5, 0.5)),
            Some((1, 1, 2, 2))
        );
        assert!(GridMapping::irregular((3, 2), vec![0.0; 5], vec![0.0; 6], Crs::Wgs84).is_err());
    }

    #[test]
    fn test_subset() {
        let gm = gm_8x4();
        let sub = gm.subset(2, 1, 6, 3).unwrap();
        assert_eq!(sub.size(), (4, 2));
        assert_eq!(*sub.xy_bbox(), BoundingBox::new(4.0, 2.0, 12.0, 6.0));
        assert!(gm.subset(2, 1, 9, 3).is_err());
    }

    #[test]
    fn test_coord_variables() {
        let vars = gm_8x4().coord_variables();
        assert_eq!(vars[0].0, "lon");
        assert_eq!(vars[0].1.values()[0], 1.0);
        assert_eq!(vars[1].1.values(), &[7.0, 5.0, 3.0, 1.0]);
        assert_eq!(vars[1].1.attrs["units"], json!("degrees_north"));

        let ds = gm_8x4().xy_coords_dataset();
        let rebuilt = GridMapping::from_dataset(&ds, Some(Crs::Wgs84), DEFAULT_TOLERANCE).unwrap();
        assert!(rebuilt.is_close(&gm_8x4(), DEFAULT_TOLERANCE));
    }
}
