//! Tile pyramids derived from a grid mapping.
//!
//! Tile levels count from the coarsest (`0`) to native resolution
//! (`num_levels - 1`). Multi-level datasets number their levels the other
//! way round, see [`TileGrid::ml_level`].

use crate::error::{GridProcessorError, Result};
use crate::gridmapping::GridMapping;
use cube_common::{BoundingBox, Crs};
use serde::Serialize;

/// Number of pyramid levels for an image of `size` cut into `tile_size`
/// tiles.
///
/// Sizes are halved (rounding up) until either dimension fits into a single
/// tile; every size visited, including the original, is one level.
pub fn compute_num_levels(size: (usize, usize), tile_size: (usize, usize)) -> usize {
    subdivide_size(size, tile_size).len()
}

/// Image sizes of all pyramid levels, native first.
pub fn subdivide_size(size: (usize, usize), tile_size: (usize, usize)) -> Vec<(usize, usize)> {
    let (mut width, mut height) = size;
    let mut sizes = vec![(width, height)];
    while width > tile_size.0 && height > tile_size.1 {
        width = width.div_ceil(2);
        height = height.div_ceil(2);
        sizes.push((width, height));
    }
    sizes
}

/// Geometry of one tile level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileLevel {
    pub width: usize,
    pub height: usize,
    pub num_tiles_x: usize,
    pub num_tiles_y: usize,
    pub tile_size: (usize, usize),
    pub xy_res: (f64, f64),
    pub xy_bbox: BoundingBox,
}

/// A tile pyramid over a grid mapping.
#[derive(Debug, Clone)]
pub struct TileGrid {
    crs: Crs,
    tile_size: (usize, usize),
    levels: Vec<TileLevel>,
    /// Grid mapping of each multi-level dataset level, native first.
    grid_mappings: Vec<GridMapping>,
}

impl TileGrid {
    /// Derive a pyramid from `gm`.
    ///
    /// The coarsest level is the first whose image fits into one tile along
    /// either axis; `max_levels` caps the depth, dropping coarse levels.
    pub fn from_grid_mapping(gm: &GridMapping, tile_size: usize, max_levels: Option<usize>) -> Result<Self> {
        if tile_size == 0 {
            return Err(GridProcessorError::grid_mapping("tile size must be positive"));
        }
        let mut num_levels = compute_num_levels(gm.size(), (tile_size, tile_size));
        if let Some(max) = max_levels {
            num_levels = num_levels.min(max.max(1));
        }
        Self::new(gm, tile_size, num_levels)
    }

    /// A pyramid with an explicit number of levels.
    pub fn new(gm: &GridMapping, tile_size: usize, num_levels: usize) -> Result<Self> {
        if tile_size == 0 || num_levels == 0 {
            return Err(GridProcessorError::grid_mapping(
                "tile size and number of levels must be positive",
            ));
        }
        let tile_size = (tile_size, tile_size);

        let mut grid_mappings = Vec::with_capacity(num_levels);
        grid_mappings.push(gm.clone());
        for ml_level in 1..num_levels {
            let coarser = grid_mappings[ml_level - 1].coarsened(2)?;
            grid_mappings.push(coarser);
        }

        let levels = grid_mappings
            .iter()
            .rev()
            .map(|level_gm| {
                let (width, height) = level_gm.size();
                TileLevel {
                    width,
                    height,
                    num_tiles_x: width.div_ceil(tile_size.0),
                    num_tiles_y: height.div_ceil(tile_size.1),
                    tile_size,
                    xy_res: level_gm.xy_res(),
                    xy_bbox: *level_gm.xy_bbox(),
                }
            })
            .collect();

        Ok(Self {
            crs: gm.crs().clone(),
            tile_size,
            levels,
            grid_mappings,
        })
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn tile_size(&self) -> (usize, usize) {
        self.tile_size
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// All levels, coarsest first.
    pub fn levels(&self) -> &[TileLevel] {
        &self.levels
    }

    pub fn level(&self, level: usize) -> Option<&TileLevel> {
        self.levels.get(level)
    }

    /// Multi-level dataset level of a tile level.
    pub fn ml_level(&self, tile_level: usize) -> usize {
        self.num_levels().saturating_sub(1).saturating_sub(tile_level)
    }

    /// Tile level of a multi-level dataset level.
    pub fn tile_level(&self, ml_level: usize) -> usize {
        self.ml_level(ml_level)
    }

    /// Grid mapping at native resolution.
    pub fn grid_mapping(&self) -> &GridMapping {
        &self.grid_mappings[0]
    }

    /// Grid mapping of a multi-level dataset level (0 = native).
    pub fn ml_grid_mapping(&self, ml_level: usize) -> Option<&GridMapping> {
        self.grid_mappings.get(ml_level)
    }

    /// Native resolution (average of x and y).
    pub fn min_resolution(&self) -> f64 {
        self.levels.last().map(|l| avg(l.xy_res)).unwrap_or(f64::NAN)
    }

    /// Resolution of the coarsest level.
    pub fn max_resolution(&self) -> f64 {
        self.levels.first().map(|l| avg(l.xy_res)).unwrap_or(f64::NAN)
    }

    /// Average resolution per tile level, coarsest first.
    pub fn resolutions(&self) -> Vec<f64> {
        self.levels.iter().map(|l| avg(l.xy_res)).collect()
    }

    /// Coarsest tile level that is at least as fine as `res`; the native
    /// level if none is.
    pub fn level_for_resolution(&self, res: f64) -> usize {
        let tol = 1e-9 * res.abs();
        self.levels
            .iter()
            .position(|l| avg(l.xy_res) <= res + tol)
            .unwrap_or(self.num_levels() - 1)
    }

    fn check_tile(&self, level: i64, x: i64, y: i64) -> Result<&TileLevel> {
        let tile_level = usize::try_from(level)
            .ok()
            .and_then(|l| self.levels.get(l))
            .ok_or_else(|| {
                GridProcessorError::tile_index(
                    level,
                    x,
                    y,
                    format!("level must be in 0..{}", self.num_levels()),
                )
            })?;
        if x < 0 || x >= tile_level.num_tiles_x as i64 {
            return Err(GridProcessorError::tile_index(
                level,
                x,
                y,
                format!("x must be in 0..{}", tile_level.num_tiles_x),
            ));
        }
        if y < 0 || y >= tile_level.num_tiles_y as i64 {
            return Err(GridProcessorError::tile_index(
                level,
                x,
                y,
                format!("y must be in 0..{}", tile_level.num_tiles_y),
            ));
        }
        Ok(tile_level)
    }

    /// Pixel window `(i0, j0, i1, j1)` of a tile in its level's image,
    /// clipped to the image. Tile rows follow the grid's j axis.
    pub fn tile_window(&self, level: i64, x: i64, y: i64) -> Result<(usize, usize, usize, usize)> {
        let tile_level = self.check_tile(level, x, y)?;
        let (tw, th) = self.tile_size;
        let i0 = x as usize * tw;
        let j0 = y as usize * th;
        Ok((
            i0,
            j0,
            (i0 + tw).min(tile_level.width),
            (j0 + th).min(tile_level.height),
        ))
    }

    /// CRS extent of a tile.
    ///
    /// Tiles of regular grids cover a full `tile_size` worth of cells even
    /// at the image edge; tiles of an irregular native level cover their
    /// cells' coordinates.
    pub fn get_tile_extent(&self, level: i64, x: i64, y: i64) -> Result<BoundingBox> {
        let (i0, j0, i1, j1) = self.tile_window(level, x, y)?;
        let ml_level = self.ml_level(level as usize);
        let gm = &self.grid_mappings[ml_level];
        match gm.ij_to_xy_transform() {
            Some(t) => {
                let (tw, th) = self.tile_size;
                let (xa, ya) = t.apply(i0 as f64, j0 as f64);
                let (xb, yb) = t.apply((i0 + tw) as f64, (j0 + th) as f64);
                Ok(BoundingBox::new(xa.min(xb), ya.min(yb), xa.max(xb), ya.max(yb)))
            }
            None => Ok(*gm.subset(i0, j0, i1, j1)?.xy_bbox()),
        }
    }

    /// JSON description of the pyramid.
    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "crs": self.crs.to_string(),
            "tile_size": [self.tile_size.0, self.tile_size.1],
            "num_levels": self.num_levels(),
            "levels": self.levels,
        })
    }
}

fn avg(res: (f64, f64)) -> f64 {
    (res.0 + res.1) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdivide_size() {
        assert_eq!(subdivide_size((256, 256), (256, 256)), vec![(256, 256)]);
        assert_eq!(subdivide_size((257, 300), (256, 256)), vec![(257, 300), (129, 150)]);
        assert_eq!(
            subdivide_size((4000, 2000), (512, 512)),
            vec![(4000, 2000), (2000, 1000), (1000, 500)]
        );
        // Stops as soon as one axis fits.
        assert_eq!(compute_num_levels((10_000, 100), (256, 256)), 1);
    }

    #[test]
    fn test_levels_coarsest_first() {
        let gm = GridMapping::regular((1000, 500), (-180.0, -90.0), (0.36, 0.36), Crs::Wgs84).unwrap();
        let tg = TileGrid::from_grid_mapping(&gm, 256, None).unwrap();
        assert_eq!(tg.num_levels(), 2);
        assert_eq!(tg.levels()[0].width, 500);
        assert_eq!(tg.levels()[0].num_tiles_x, 2);
        assert_eq!(tg.levels()[1].num_tiles_x, 4);
        assert_eq!(tg.levels()[1].num_tiles_y, 2);
        assert!((tg.levels()[0].xy_res.0 - 2.0 * tg.levels()[1].xy_res.0).abs() < 1e-12);
        assert_eq!(tg.ml_level(0), 1);
        assert_eq!(tg.tile_level(0), 1);
        assert!((tg.min_resolution() - 0.36).abs() < 1e-12);
        assert!((tg.max_resolution() - 0.72).abs() < 1e-12);
    }

    #[test]
    fn test_global_grid_with_odd_height() {
        let gm = GridMapping::regular((10, 5), (-180.0, -90.0), (36.0, 36.0), Crs::Wgs84).unwrap();
        let tg = TileGrid::from_grid_mapping(&gm, 2, None).unwrap();
        assert_eq!(tg.num_levels(), 3);
        assert_eq!(tg.levels()[1].height, 3);
        assert_eq!(tg.levels()[0].height, 2);
        // Coarse levels keep the top edge at the north pole.
        for level in 0..tg.num_levels() {
            let extent = tg.get_tile_extent(level as i64, 0, 0).unwrap();
            assert!((extent.max_y - 90.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_max_levels() {
        let gm = GridMapping::regular((4096, 4096), (0.0, 0.0), (1.0, 1.0), Crs::WebMercator).unwrap();
        assert_eq!(TileGrid::from_grid_mapping(&gm, 256, None).unwrap().num_levels(), 5);
        assert_eq!(TileGrid::from_grid_mapping(&gm, 256, Some(3)).unwrap().num_levels(), 3);
        assert_eq!(TileGrid::from_grid_mapping(&gm, 256, Some(0)).unwrap().num_levels(), 1);
    }

    #[test]
    fn test_tile_extent() {
        let gm = GridMapping::regular((8, 4), (0.0, 0.0), (2.0, 2.0), Crs::Wgs84).unwrap();
        let tg = TileGrid::new(&gm, 4, 2).unwrap();
        // native level: 2x1 tiles of 4x4 cells
        assert_eq!(tg.get_tile_extent(1, 1, 0).unwrap(), BoundingBox::new(8.0, 0.0, 16.0, 8.0));
        // coarse level: 4x2 cells at res 4 in one tile
        assert_eq!(tg.get_tile_extent(0, 0, 0).unwrap(), BoundingBox::new(0.0, -8.0, 16.0, 8.0));
        assert_eq!(tg.tile_window(0, 0, 0).unwrap(), (0, 0, 4, 2));
    }

    #[test]
    fn test_tile_index_errors() {
        let gm = GridMapping::regular((8, 4), (0.0, 0.0), (2.0, 2.0), Crs::Wgs84).unwrap();
        let tg = TileGrid::new(&gm, 4, 2).unwrap();
        for (level, x, y) in [(0, -1, 0), (0, 1, 0), (1, 0, 1), (2, 0, 0), (-1, 0, 0)] {
            assert!(matches!(
                tg.get_tile_extent(level, x, y),
                Err(GridProcessorError::TileIndex { .. })
            ));
        }
    }

    #[test]
    fn test_level_for_resolution() {
        let gm = GridMapping::regular((1024, 1024), (0.0, 0.0), (1.0, 1.0), Crs::WebMercator).unwrap();
        let tg = TileGrid::from_grid_mapping(&gm, 256, None).unwrap();
        assert_eq!(tg.resolutions(), vec![4.0, 2.0, 1.0]);
        assert_eq!(tg.level_for_resolution(10.0), 0);
        assert_eq!(tg.level_for_resolution(2.0), 1);
        assert_eq!(tg.level_for_resolution(1.5), 2);
        assert_eq!(tg.level_for_resolution(0.1), 2);
    }
}
