//! CF conventions grid-mapping encoding.
//!
//! Produces the attributes of the scalar `crs` variable that CF-compliant
//! datasets reference through a `grid_mapping` attribute, and reads a CRS
//! back from such attributes.

use cube_common::crs::{WGS84_SEMI_MAJOR_AXIS, EARTH_RADIUS};
use cube_common::Crs;
use serde_json::{json, Map, Value};

const WGS84_INVERSE_FLATTENING: f64 = 298.257_223_563;

/// Attributes describing `crs` in CF grid-mapping terms.
pub fn grid_mapping_attrs(crs: &Crs) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("crs".to_string(), json!(crs.to_string()));
    attrs.insert("spatial_ref".to_string(), json!(crs.to_string()));

    match crs {
        Crs::Wgs84 | Crs::Crs84 | Crs::Nad83 => {
            attrs.insert("grid_mapping_name".to_string(), json!("latitude_longitude"));
            attrs.insert("semi_major_axis".to_string(), json!(WGS84_SEMI_MAJOR_AXIS));
            attrs.insert("inverse_flattening".to_string(), json!(WGS84_INVERSE_FLATTENING));
            attrs.insert("longitude_of_prime_meridian".to_string(), json!(0.0));
        }
        Crs::WebMercator => {
            attrs.insert("grid_mapping_name".to_string(), json!("mercator"));
            attrs.insert("semi_major_axis".to_string(), json!(WGS84_SEMI_MAJOR_AXIS));
            attrs.insert("semi_minor_axis".to_string(), json!(WGS84_SEMI_MAJOR_AXIS));
            attrs.insert("longitude_of_projection_origin".to_string(), json!(0.0));
            attrs.insert("standard_parallel".to_string(), json!(0.0));
            attrs.insert("false_easting".to_string(), json!(0.0));
            attrs.insert("false_northing".to_string(), json!(0.0));
        }
        Crs::LambertConformal(p) => {
            attrs.insert("grid_mapping_name".to_string(), json!("lambert_conformal_conic"));
            let parallels = if p.lat_1 == p.lat_2 {
                json!(p.lat_1)
            } else {
                json!([p.lat_1, p.lat_2])
            };
            attrs.insert("standard_parallel".to_string(), parallels);
            attrs.insert("longitude_of_central_meridian".to_string(), json!(p.lon_0));
            attrs.insert("latitude_of_projection_origin".to_string(), json!(p.lat_0));
            attrs.insert("false_easting".to_string(), json!(p.x_0));
            attrs.insert("false_northing".to_string(), json!(p.y_0));
            attrs.insert("earth_radius".to_string(), json!(p.radius));
        }
        Crs::Other(_) => {}
    }

    attrs
}

/// Recover a CRS from grid-mapping attributes.
///
/// An explicit `crs` / `spatial_ref` / `crs_wkt` string wins; otherwise the
/// `grid_mapping_name` is interpreted.
pub fn crs_from_attrs(attrs: &Map<String, Value>) -> Option<Crs> {
    for key in ["crs", "spatial_ref", "crs_wkt"] {
        if let Some(Value::String(s)) = attrs.get(key) {
            if let Ok(crs) = Crs::from_string(s) {
                return Some(crs);
            }
        }
    }

    let number = |key: &str| attrs.get(key).and_then(Value::as_f64);

    match attrs.get("grid_mapping_name").and_then(Value::as_str)? {
        "latitude_longitude" => Some(Crs::Crs84),
        "mercator" => Some(Crs::WebMercator),
        "lambert_conformal_conic" => {
            let (lat_1, lat_2) = match attrs.get("standard_parallel") {
                Some(Value::Array(values)) => {
                    let first = values.first().and_then(Value::as_f64)?;
                    let second = values.get(1).and_then(Value::as_f64).unwrap_or(first);
                    (first, second)
                }
                Some(value) => {
                    let v = value.as_f64()?;
                    (v, v)
                }
                None => return None,
            };
            Some(Crs::LambertConformal(cube_common::LccParams {
                lat_1,
                lat_2,
                lat_0: number("latitude_of_projection_origin").unwrap_or(lat_1),
                lon_0: number("longitude_of_central_meridian")?,
                x_0: number("false_easting").unwrap_or(0.0),
                y_0: number("false_northing").unwrap_or(0.0),
                radius: number("earth_radius").unwrap_or(EARTH_RADIUS),
            }))
        }
        _ => None,
    }
}
