//! Common types shared by the data cube crates and the tile server.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod tile;

pub use bbox::BoundingBox;
pub use crs::{Crs, LccParams};
pub use error::{CubeError, CubeResult};
pub use tile::TileCoord;
