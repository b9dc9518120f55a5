//! Reprojection of grid mappings.

use super::{default_dim_names, GridMapping};
use crate::dataset::Variable;
use crate::error::{GridProcessorError, Result};
use cube_common::{BoundingBox, Crs};
use projection::geographic::normalize_lon_360;
use projection::ProjectionProvider;

impl GridMapping {
    /// The same cells expressed in `target`.
    ///
    /// Cell centres are projected; when the result is still separable and
    /// evenly spaced the new mapping is regular, otherwise irregular.
    pub fn transform(&self, target: &Crs, projections: &dyn ProjectionProvider, tolerance: f64) -> Result<GridMapping> {
        if self.crs.is_equivalent(target) {
            let mut gm = self.clone();
            gm.crs = target.clone();
            return Ok(gm);
        }
        if !projections.can_transform(&self.crs, target) {
            return Err(GridProcessorError::grid_mapping(format!(
                "cannot transform grid from {} to {}",
                self.crs, target
            )));
        }

        let (xs, ys) = self.cell_centers();
        let (mut px, py) = projections.transform_points(&self.crs, target, &xs, &ys)?;
        if target.is_geographic() && self.is_lon_360 {
            px.iter_mut().for_each(|x| *x = normalize_lon_360(*x));
        }

        let (width, height) = self.size;
        let (x_dim, y_dim) = default_dim_names(target);
        let all_finite = px.iter().chain(&py).all(|v| v.is_finite());

        if all_finite {
            let x_var = Variable::new_2d(&y_dim, &x_dim, height, width, px.clone())?;
            let y_var = Variable::new_2d(&y_dim, &x_dim, height, width, py.clone())?;
            if let Ok(gm) = GridMapping::from_coords(&x_dim, &x_var, &y_dim, &y_var, target.clone(), tolerance) {
                return Ok(gm.with_tile_size(self.tile_size));
            }
        }

        Ok(GridMapping::irregular(self.size, px, py, target.clone())?
            .with_dim_names(&x_dim, &y_dim)
            .with_tile_size(self.tile_size))
    }

    /// A geographic (CRS84) box expressed in this grid's CRS and longitude
    /// convention. `None` if it falls outside the projection's domain.
    pub fn geographic_bbox_to_native(
        &self,
        bbox: &BoundingBox,
        projections: &dyn ProjectionProvider,
    ) -> Result<Option<BoundingBox>> {
        if self.crs.is_geographic() {
            if self.is_lon_360 && bbox.min_x < 0.0 {
                let shifted = BoundingBox::new(bbox.min_x + 360.0, bbox.min_y, bbox.max_x + 360.0, bbox.max_y);
                return Ok(Some(shifted));
            }
            return Ok(Some(*bbox));
        }
        Ok(projections.transform_bbox(&Crs::Crs84, &self.crs, bbox)?)
    }
}
