//! Grid mapping discovery from coordinate variables.

use super::{GridMapping, DEFAULT_TOLERANCE};
use crate::dataset::{Dataset, Variable};
use crate::error::{GridProcessorError, Result};
use cube_common::Crs;
use projection::cf;
use serde_json::Value;

/// Coordinate name pairs tried, in order, when looking for spatial coordinates.
const XY_VAR_NAMES: [(&str, &str); 3] = [("lon", "lat"), ("longitude", "latitude"), ("x", "y")];

/// Properties of a 1-D coordinate axis.
#[derive(Debug, Clone, Copy)]
struct Axis1d {
    res: f64,
    is_regular: bool,
    is_increasing: bool,
}

fn analyse_axis(name: &str, values: &[f64], tolerance: f64) -> Result<Axis1d> {
    if values.len() < 2 {
        return Err(GridProcessorError::grid_mapping(format!(
            "coordinate '{}' needs at least 2 values, has {}",
            name,
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(GridProcessorError::grid_mapping(format!(
            "coordinate '{}' contains non-finite values",
            name
        )));
    }

    let diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let mean = (values[values.len() - 1] - values[0]) / diffs.len() as f64;
    let monotonic = diffs.iter().all(|d| *d > 0.0) || diffs.iter().all(|d| *d < 0.0);
    let evenly = mean != 0.0 && diffs.iter().all(|d| (d - mean).abs() <= tolerance * mean.abs());

    let res = if monotonic && evenly {
        mean.abs()
    } else {
        let mut abs: Vec<f64> = diffs.iter().map(|d| d.abs()).filter(|d| *d > 0.0).collect();
        if abs.is_empty() {
            return Err(GridProcessorError::grid_mapping(format!(
                "coordinate '{}' has constant values",
                name
            )));
        }
        abs.sort_by(|a, b| a.total_cmp(b));
        abs[abs.len() / 2]
    };

    Ok(Axis1d {
        res,
        is_regular: monotonic && evenly,
        is_increasing: mean > 0.0,
    })
}

/// Shift negative longitudes by 360 when the coordinates jump across the
/// antimeridian.
fn unwrap_antimeridian(xs: &mut [f64], row_len: usize) {
    let crosses = xs
        .chunks(row_len.max(1))
        .any(|row| row.windows(2).any(|w| (w[1] - w[0]).abs() > 180.0));
    if crosses {
        for x in xs.iter_mut() {
            if *x < 0.0 {
                *x += 360.0;
            }
        }
    }
}

impl GridMapping {
    /// Build a grid mapping from x and y coordinate variables.
    ///
    /// 1-D coordinates that are evenly spaced with increasing x give a
    /// regular grid; 2-D coordinates are checked for separability first.
    /// Everything else becomes an irregular grid.
    pub fn from_coords(
        x_name: &str,
        x_coords: &Variable,
        y_name: &str,
        y_coords: &Variable,
        crs: Crs,
        tolerance: f64,
    ) -> Result<GridMapping> {
        match (x_coords.ndim(), y_coords.ndim()) {
            (1, 1) => {
                let mut xs = x_coords.values().to_vec();
                if crs.is_geographic() {
                    let n = xs.len();
                    unwrap_antimeridian(&mut xs, n);
                }
                from_1d(
                    (x_coords.dims[0].as_str(), x_name, xs.as_slice()),
                    (y_coords.dims[0].as_str(), y_name, y_coords.values()),
                    crs,
                    tolerance,
                )
            }
            (2, 2) => {
                if x_coords.dims != y_coords.dims || x_coords.shape != y_coords.shape {
                    return Err(GridProcessorError::grid_mapping(format!(
                        "2-D coordinates '{}' {:?} and '{}' {:?} disagree in shape",
                        x_name, x_coords.shape, y_name, y_coords.shape
                    )));
                }
                let (height, width) = (x_coords.shape[0], x_coords.shape[1]);
                let (y_dim, x_dim) = (x_coords.dims[0].as_str(), x_coords.dims[1].as_str());
                let mut xs = x_coords.values().to_vec();
                let ys = y_coords.values().to_vec();
                if crs.is_geographic() {
                    unwrap_antimeridian(&mut xs, width);
                }

                if let Some((row, col)) = separable(&xs, &ys, width, height, tolerance) {
                    if let Ok(gm) = from_1d((x_dim, x_dim, row.as_slice()), (y_dim, y_dim, col.as_slice()), crs.clone(), tolerance) {
                        if gm.is_regular() {
                            return Ok(gm);
                        }
                    }
                }

                Ok(GridMapping::irregular((width, height), xs, ys, crs)?
                    .with_dim_names(x_dim, y_dim)
                    .with_var_names(x_name, y_name))
            }
            (x_ndim, y_ndim) => Err(GridProcessorError::grid_mapping(format!(
                "coordinates '{}' ({}-D) and '{}' ({}-D) are not both 1-D or 2-D",
                x_name, x_ndim, y_name, y_ndim
            ))),
        }
    }

    /// Derive the grid mapping of a dataset from its spatial coordinates.
    ///
    /// `crs` overrides whatever CRS the dataset declares.
    pub fn from_dataset(ds: &Dataset, crs: Option<Crs>, tolerance: f64) -> Result<GridMapping> {
        let (x_name, y_name) = find_xy_var_names(ds).ok_or_else(|| {
            GridProcessorError::grid_mapping("dataset has no spatial coordinates (lon/lat, longitude/latitude or x/y)")
        })?;
        let crs = match crs {
            Some(crs) => crs,
            None => discover_crs(ds, x_name).ok_or_else(|| {
                GridProcessorError::grid_mapping(format!(
                    "cannot determine CRS of coordinates '{}'/'{}'",
                    x_name, y_name
                ))
            })?,
        };
        let x_coords = ds.any_variable(x_name).ok_or_else(|| GridProcessorError::VariableNotFound(x_name.to_string()))?;
        let y_coords = ds.any_variable(y_name).ok_or_else(|| GridProcessorError::VariableNotFound(y_name.to_string()))?;
        GridMapping::from_coords(x_name, x_coords, y_name, y_coords, crs, tolerance)
    }
}

fn from_1d(
    x: (&str, &str, &[f64]),
    y: (&str, &str, &[f64]),
    crs: Crs,
    tolerance: f64,
) -> Result<GridMapping> {
    let (x_dim, x_name, xs) = x;
    let (y_dim, y_name, ys) = y;
    let x_axis = analyse_axis(x_name, xs, tolerance)?;
    let y_axis = analyse_axis(y_name, ys, tolerance)?;
    let (width, height) = (xs.len(), ys.len());

    if x_axis.is_regular && y_axis.is_regular && x_axis.is_increasing {
        let x_min = xs[0] - x_axis.res / 2.0;
        let y_first = if y_axis.is_increasing { ys[0] } else { ys[height - 1] };
        let y_min = y_first - y_axis.res / 2.0;
        return Ok(GridMapping::regular_unchecked((width, height), (x_min, y_min), (x_axis.res, y_axis.res), crs)?
            .with_j_axis_up(y_axis.is_increasing)
            .with_dim_names(x_dim, y_dim));
    }

    let mut x_2d = Vec::with_capacity(width * height);
    let mut y_2d = Vec::with_capacity(width * height);
    for &y in ys {
        x_2d.extend_from_slice(xs);
        y_2d.extend(std::iter::repeat(y).take(width));
    }
    Ok(GridMapping::irregular((width, height), x_2d, y_2d, crs)?
        .with_dim_names(x_dim, y_dim)
        .with_var_names(x_name, y_name))
}

/// If x only varies along rows and y only along columns, return the first
/// row of x and the first column of y.
fn separable(xs: &[f64], ys: &[f64], width: usize, height: usize, tolerance: f64) -> Option<(Vec<f64>, Vec<f64>)> {
    let row: Vec<f64> = xs[..width].to_vec();
    let col: Vec<f64> = (0..height).map(|j| ys[j * width]).collect();
    let span = |v: &[f64]| {
        let (lo, hi) = v.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(*x), hi.max(*x)));
        (hi - lo).abs()
    };
    let tol_x = tolerance * span(&row).max(f64::MIN_POSITIVE) / width.max(1) as f64;
    let tol_y = tolerance * span(&col).max(f64::MIN_POSITIVE) / height.max(1) as f64;

    for j in 0..height {
        for i in 0..width {
            let k = j * width + i;
            if (xs[k] - row[i]).abs() > tol_x || (ys[k] - col[j]).abs() > tol_y {
                return None;
            }
        }
    }
    Some((row, col))
}

/// First coordinate name pair present in the dataset.
pub fn find_xy_var_names(ds: &Dataset) -> Option<(&'static str, &'static str)> {
    XY_VAR_NAMES
        .iter()
        .copied()
        .find(|(x, y)| ds.any_variable(x).is_some() && ds.any_variable(y).is_some())
}

/// Work out the CRS a dataset declares.
///
/// Looks at the `grid_mapping` variable referenced by a data variable, then
/// a `crs` or `spatial_ref` variable, then the dataset attributes. Datasets
/// with lon/lat coordinates and no declaration are taken as CRS84.
pub fn discover_crs(ds: &Dataset, x_name: &str) -> Option<Crs> {
    let referenced = ds
        .data_vars
        .values()
        .filter_map(|var| var.attrs.get("grid_mapping").and_then(Value::as_str))
        .filter_map(|name| ds.any_variable(name));
    for var in referenced {
        if let Some(crs) = cf::crs_from_attrs(&var.attrs) {
            return Some(crs);
        }
    }

    for name in ["crs", "spatial_ref"] {
        if let Some(crs) = ds.any_variable(name).and_then(|var| cf::crs_from_attrs(&var.attrs)) {
            return Some(crs);
        }
    }

    if let Some(crs) = cf::crs_from_attrs(&ds.attrs) {
        return Some(crs);
    }

    if x_name == "lon" || x_name == "longitude" {
        return Some(Crs::Crs84);
    }
    None
}

/// Convenience for the common case of default tolerance and declared CRS.
impl TryFrom<&Dataset> for GridMapping {
    type Error = GridProcessorError;

    fn try_from(ds: &Dataset) -> Result<Self> {
        GridMapping::from_dataset(ds, None, DEFAULT_TOLERANCE)
    }
}
