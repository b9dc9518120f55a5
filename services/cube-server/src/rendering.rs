//! Tile extraction and encoding.

use crate::config::ColorMapping;
use bytes::{BufMut, Bytes, BytesMut};
use cube_common::CubeResult;
use grid_processor::Variable;
use serde::Serialize;

/// Color bar used when none is configured.
pub const DEFAULT_COLOR_BAR: &str = "viridis";

/// Color bar and value range after falling back through style config and
/// variable attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedColorMapping {
    pub color_bar: String,
    pub value_range: (f64, f64),
}

/// Resolve the color mapping of `var`.
///
/// Order: the style's mapping, then `color_bar_name` / `color_value_min` /
/// `color_value_max` attributes, then `valid_min` / `valid_max` (or
/// `valid_range`), then the finite value range of the data.
pub fn resolve_color_mapping(style: Option<&ColorMapping>, var: &Variable) -> ResolvedColorMapping {
    let attr = |key: &str| var.attrs.get(key).and_then(serde_json::Value::as_f64);

    let color_bar = style
        .and_then(|m| m.color_bar.clone())
        .or_else(|| var.attrs.get("color_bar_name").and_then(|v| v.as_str()).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_COLOR_BAR.to_string());

    let from_attrs = |min_key: &str, max_key: &str| attr(min_key).zip(attr(max_key));
    let valid_range = var
        .attrs
        .get("valid_range")
        .and_then(|v| v.as_array())
        .and_then(|a| Some((a.first()?.as_f64()?, a.get(1)?.as_f64()?)));

    let value_range = style
        .and_then(|m| m.value_range)
        .map(|[lo, hi]| (lo, hi))
        .or_else(|| from_attrs("color_value_min", "color_value_max"))
        .or_else(|| from_attrs("valid_min", "valid_max"))
        .or(valid_range)
        .or_else(|| var.value_range())
        .unwrap_or((0.0, 1.0));

    ResolvedColorMapping { color_bar, value_range }
}

/// Turns tile values into bytes.
pub trait TileEncoder: Send + Sync {
    fn encode(&self, values: &[f64], width: usize, height: usize, mapping: &ResolvedColorMapping)
        -> CubeResult<Bytes>;

    fn content_type(&self) -> &'static str;
}

/// Row-major little-endian `f32` values normalised into `[0, 1]` by the
/// value range. NaN stays NaN.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawTileEncoder;

impl TileEncoder for RawTileEncoder {
    fn encode(
        &self,
        values: &[f64],
        _width: usize,
        _height: usize,
        mapping: &ResolvedColorMapping,
    ) -> CubeResult<Bytes> {
        let (lo, hi) = mapping.value_range;
        let span = hi - lo;
        let mut buf = BytesMut::with_capacity(values.len() * 4);
        for &v in values {
            let normalized = if v.is_nan() {
                f32::NAN
            } else if span.abs() < f64::EPSILON {
                0.0
            } else {
                ((v - lo) / span).clamp(0.0, 1.0) as f32
            };
            buf.put_f32_le(normalized);
        }
        Ok(buf.freeze())
    }

    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }
}

/// Cut a `tile_width x tile_height` window starting at `(i0, j0)` from the
/// first plane of `var`. Cells beyond the plane are NaN, as are fill values.
pub fn extract_tile(var: &Variable, i0: usize, j0: usize, tile_width: usize, tile_height: usize) -> Vec<f64> {
    let mut tile = vec![f64::NAN; tile_width * tile_height];
    let (Some((height, width)), Some(plane)) = (var.plane_shape(), var.masked_plane(0)) else {
        return tile;
    };

    let rows = height.saturating_sub(j0).min(tile_height);
    let cols = width.saturating_sub(i0).min(tile_width);
    for row in 0..rows {
        let src = (j0 + row) * width + i0;
        tile[row * tile_width..row * tile_width + cols].copy_from_slice(&plane[src..src + cols]);
    }
    tile
}
