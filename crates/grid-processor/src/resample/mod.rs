//! Spatial resampling of datasets onto a target grid mapping.
//!
//! [`resample_in_space`] picks one of two algorithms:
//!
//! * **affine**: source and target are regular grids in the same CRS whose
//!   combined index transform is axis aligned. Each axis maps to source
//!   index ranges independently; coarser targets average the covered cells,
//!   finer targets take the enclosing cell.
//! * **rectification**: everything else. Target cell centres (supersampled
//!   when the target is coarser) are transformed into the source CRS and
//!   looked up in the source grid.
//!
//! No-data is NaN throughout; `_FillValue` marks additional no-data values
//! on input.

mod affine;
mod rectify;

use crate::config::ResampleOptions;
use crate::dataset::{Dataset, Variable};
use crate::error::{GridProcessorError, Result};
use crate::gridmapping::{GridMapping, DEFAULT_TOLERANCE};
use affine::AffinePlan;
use projection::ProjectionProvider;
use rectify::RectifyPlan;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the scalar variable carrying CF grid-mapping attributes.
pub const CRS_VAR_NAME: &str = "crs";

/// Precomputed source-to-target cell assignment.
enum Plan {
    Affine(AffinePlan),
    Rectify(RectifyPlan),
}

impl Plan {
    fn new(
        source_gm: &GridMapping,
        target_gm: &GridMapping,
        projections: &dyn ProjectionProvider,
        options: &ResampleOptions,
    ) -> Result<Self> {
        let affine_transform = if source_gm.crs().is_equivalent(target_gm.crs())
            && source_gm.is_lon_360() == target_gm.is_lon_360()
        {
            source_gm
                .ij_transform_from(target_gm)
                .filter(|t| t.is_axis_aligned(DEFAULT_TOLERANCE))
        } else {
            None
        };

        match affine_transform {
            Some(t) => {
                debug!(transform = ?t, "Resampling with affine transform");
                Ok(Plan::Affine(AffinePlan::new(&t, target_gm.size(), source_gm.size())))
            }
            None => Ok(Plan::Rectify(RectifyPlan::new(source_gm, target_gm, projections, options)?)),
        }
    }

    fn apply(&self, plane: &[f64]) -> Vec<f64> {
        match self {
            Plan::Affine(plan) => plan.apply(plane),
            Plan::Rectify(plan) => plan.apply(plane),
        }
    }
}

/// Resample the spatial variables of `source` from `source_gm` onto
/// `target_gm`.
///
/// `var_names` restricts the data variables carried over. Variables without
/// the source's spatial dimensions are copied unchanged; variables whose
/// spatial dimensions are not the trailing two are dropped. A target that
/// equals the source grid returns the (subset) dataset unchanged.
pub fn resample_in_space(
    source: &Dataset,
    source_gm: &GridMapping,
    target_gm: &GridMapping,
    var_names: Option<&[String]>,
    projections: &dyn ProjectionProvider,
    options: &ResampleOptions,
) -> Result<Dataset> {
    let (width, height) = target_gm.size();
    if width == 0 || height == 0 {
        return Err(GridProcessorError::resampling(format!(
            "target grid has zero size {}x{}",
            width, height
        )));
    }
    if !target_gm.is_regular() {
        return Err(GridProcessorError::resampling("target grid mapping must be regular"));
    }

    let source = match var_names {
        Some(names) => source.select_vars(names)?,
        None => source.clone(),
    };

    if source_gm.is_close(target_gm, DEFAULT_TOLERANCE) {
        debug!("Target grid equals source grid, skipping resampling");
        return Ok(source);
    }

    if !source_gm.crs().is_equivalent(target_gm.crs())
        && !projections.can_transform(target_gm.crs(), source_gm.crs())
    {
        return Err(GridProcessorError::resampling(format!(
            "no transformation from {} to {}",
            target_gm.crs(),
            source_gm.crs()
        )));
    }

    let plan = Plan::new(source_gm, target_gm, projections, options)?;
    let (src_x_dim, src_y_dim) = source_gm.xy_dim_names();
    let (src_x_var, src_y_var) = source_gm.xy_var_names();
    let (dst_x_dim, dst_y_dim) = target_gm.xy_dim_names();
    let is_spatial = |var: &Variable| var.has_dim(src_x_dim) || var.has_dim(src_y_dim);

    let mut target = Dataset {
        attrs: source.attrs.clone(),
        ..Dataset::default()
    };

    // Coordinates along non-spatial dimensions survive; spatial ones are
    // rebuilt from the target grid mapping.
    for (name, coord) in &source.coords {
        if !is_spatial(coord) && name != src_x_var && name != src_y_var {
            target.coords.insert(name.clone(), coord.clone());
        }
    }
    for (name, coord) in target_gm.coord_variables() {
        target.coords.insert(name, coord);
    }

    for (name, var) in &source.data_vars {
        if name == src_x_var || name == src_y_var || (options.encode_cf && name == CRS_VAR_NAME) {
            continue;
        }
        if !is_spatial(var) {
            target.data_vars.insert(name.clone(), var.clone());
            continue;
        }
        if !var.has_trailing_dims(src_y_dim, src_x_dim) {
            warn!(
                var_name = %name,
                dims = ?var.dims,
                "Skipping variable whose spatial dimensions are not trailing"
            );
            continue;
        }

        let mut data = Vec::with_capacity(var.num_planes() * width * height);
        for k in 0..var.num_planes() {
            let plane = var
                .masked_plane(k)
                .ok_or_else(|| GridProcessorError::invalid_dataset(format!("variable '{}' is truncated", name)))?;
            data.extend(plan.apply(&plane));
        }

        let n = var.dims.len();
        let mut dims = var.dims.clone();
        dims[n - 2] = dst_y_dim.to_string();
        dims[n - 1] = dst_x_dim.to_string();
        let mut shape = var.shape.clone();
        shape[n - 2] = height;
        shape[n - 1] = width;

        let mut attrs = var.attrs.clone();
        attrs.remove("_FillValue");
        if options.encode_cf {
            attrs.insert("grid_mapping".to_string(), json!(CRS_VAR_NAME));
        } else {
            attrs.remove("grid_mapping");
        }

        target.data_vars.insert(
            name.clone(),
            Variable {
                dims,
                shape,
                data: Arc::new(data),
                attrs,
            },
        );
    }

    if options.encode_cf {
        let mut crs_var = Variable::scalar(0.0);
        crs_var.attrs = projections.cf_attributes(target_gm.crs());
        target.data_vars.insert(CRS_VAR_NAME.to_string(), crs_var);
    }
    if target.attrs.contains_key("crs") {
        target
            .attrs
            .insert("crs".to_string(), Value::String(target_gm.crs().to_string()));
    }

    Ok(target)
}
