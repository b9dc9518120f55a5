//! Tile coordinates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a tile in a tile grid: level plus column / row.
///
/// Columns and rows are signed so that out-of-range requests (for example
/// `x = -1`) can be represented and rejected with a proper error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub level: u32,
    pub x: i64,
    pub y: i64,
}

impl TileCoord {
    pub fn new(level: u32, x: i64, y: i64) -> Self {
        Self { level, x, y }
    }

    /// Parent tile one level coarser, if any.
    pub fn parent(&self) -> Option<TileCoord> {
        if self.level == 0 {
            return None;
        }
        Some(TileCoord {
            level: self.level - 1,
            x: self.x.div_euclid(2),
            y: self.y.div_euclid(2),
        })
    }

    /// The four tiles covering this one at the next finer level.
    pub fn children(&self) -> [TileCoord; 4] {
        let x = self.x * 2;
        let y = self.y * 2;
        let level = self.level + 1;
        [
            TileCoord { level, x, y },
            TileCoord { level, x: x + 1, y },
            TileCoord { level, x, y: y + 1 },
            TileCoord {
                level,
                x: x + 1,
                y: y + 1,
            },
        ]
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_child() {
        let tile = TileCoord::new(3, 5, 2);
        let parent = tile.parent().unwrap();
        assert_eq!(parent, TileCoord::new(2, 2, 1));
        assert!(parent.children().contains(&tile));
        assert!(TileCoord::new(0, 0, 0).parent().is_none());
        assert_eq!(tile.to_string(), "3/5/2");
    }
}
