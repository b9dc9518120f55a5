//! Spatial subsetting of datasets.

use crate::dataset::{Dataset, Variable};
use crate::error::Result;
use crate::gridmapping::GridMapping;
use cube_common::{BoundingBox, Crs};
use projection::ProjectionProvider;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cut `ds` to the cells of `gm` intersecting `bbox` (given in the CRS of
/// `gm`).
///
/// Returns the subset together with its grid mapping, or `None` when the
/// box misses the grid.
pub fn select_spatial_subset(
    ds: &Dataset,
    gm: &GridMapping,
    bbox: &BoundingBox,
) -> Result<Option<(Dataset, GridMapping)>> {
    let Some((i0, j0, i1, j1)) = gm.ij_bbox_from_xy_bbox(bbox) else {
        return Ok(None);
    };
    if (i0, j0, i1, j1) == (0, 0, gm.width(), gm.height()) {
        return Ok(Some((ds.clone(), gm.clone())));
    }

    let subset_gm = gm.subset(i0, j0, i1, j1)?;
    let (x_dim, y_dim) = gm.xy_dim_names();

    let cut = |vars: &BTreeMap<String, Variable>| -> Result<BTreeMap<String, Variable>> {
        let mut out = BTreeMap::new();
        for (name, var) in vars {
            let sliced = if var.has_trailing_dims(y_dim, x_dim) {
                Some(var.slice_plane(i0, j0, i1, j1)?)
            } else if var.dims == [x_dim] {
                Some(slice_1d(var, i0, i1))
            } else if var.dims == [y_dim] {
                Some(slice_1d(var, j0, j1))
            } else if var.has_dim(x_dim) || var.has_dim(y_dim) {
                warn!(var_name = %name, dims = ?var.dims, "Dropping variable with non-trailing spatial dimensions");
                None
            } else {
                Some(var.clone())
            };
            if let Some(sliced) = sliced {
                out.insert(name.clone(), sliced);
            }
        }
        Ok(out)
    };

    let subset = Dataset {
        coords: cut(&ds.coords)?,
        data_vars: cut(&ds.data_vars)?,
        attrs: ds.attrs.clone(),
    };
    Ok(Some((subset, subset_gm)))
}

/// Cut `ds` down to the cells needed to fill `target`, keeping `margin`
/// extra source cells on every side.
///
/// Returns the whole dataset when the target extent cannot be located in
/// the source CRS, wraps across the longitude seam of the source, or misses
/// the source grid.
pub fn select_for_target(
    ds: &Dataset,
    gm: &GridMapping,
    target: &GridMapping,
    projections: &dyn ProjectionProvider,
    margin: usize,
) -> Result<(Dataset, GridMapping)> {
    let whole = || Ok((ds.clone(), gm.clone()));

    let geographic = if target.crs().is_geographic() {
        Some(*target.xy_bbox())
    } else {
        projections.transform_bbox(target.crs(), &Crs::Crs84, target.xy_bbox())?
    };
    let Some(geographic) = geographic else {
        return whole();
    };
    if geographic.min_x < -180.0 || geographic.max_x > 180.0 {
        return whole();
    }
    if gm.crs().is_geographic() && gm.is_lon_360() && geographic.min_x < 0.0 && geographic.max_x > 0.0 {
        return whole();
    }

    let Some(native) = gm.geographic_bbox_to_native(&geographic, projections)? else {
        return whole();
    };
    let native = native.expand(margin as f64 * gm.x_res(), margin as f64 * gm.y_res());
    match select_spatial_subset(ds, gm, &native)? {
        Some((subset, subset_gm)) => {
            debug!(
                from = ?gm.size(),
                to = ?subset_gm.size(),
                "Cut source to target extent"
            );
            Ok((subset, subset_gm))
        }
        None => whole(),
    }
}

fn slice_1d(var: &Variable, start: usize, end: usize) -> Variable {
    Variable {
        dims: var.dims.clone(),
        shape: vec![end - start],
        data: Arc::new(var.values()[start..end].to_vec()),
        attrs: var.attrs.clone(),
    }
}
