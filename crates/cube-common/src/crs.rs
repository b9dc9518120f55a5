//! Coordinate reference system identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean earth radius used by the spherical projections (metres).
pub const EARTH_RADIUS: f64 = 6_371_229.0;

/// WGS84 semi-major axis (metres).
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// A coordinate reference system.
///
/// Geographic systems always use (longitude, latitude) axis order internally,
/// regardless of the axis order of their official definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// WGS84 geographic (EPSG:4326)
    Wgs84,
    /// WGS84 geographic with lon/lat axis order (OGC:CRS84)
    Crs84,
    /// NAD83 geographic (EPSG:4269)
    Nad83,
    /// Spherical Web Mercator (EPSG:3857)
    WebMercator,
    /// Lambert conformal conic on a sphere
    LambertConformal(LccParams),
    /// Any other identifier. Carried along but not transformable.
    Other(String),
}

/// Lambert conformal conic parameters, in degrees and metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LccParams {
    pub lat_1: f64,
    pub lat_2: f64,
    pub lat_0: f64,
    pub lon_0: f64,
    pub x_0: f64,
    pub y_0: f64,
    pub radius: f64,
}

impl Default for LccParams {
    fn default() -> Self {
        Self {
            lat_1: 25.0,
            lat_2: 25.0,
            lat_0: 25.0,
            lon_0: -95.0,
            x_0: 0.0,
            y_0: 0.0,
            radius: EARTH_RADIUS,
        }
    }
}

impl Crs {
    /// Parse a CRS identifier.
    ///
    /// Accepts formats like:
    /// - "EPSG:4326", "epsg:4326", "urn:ogc:def:crs:EPSG::4326"
    /// - "CRS84", "OGC:CRS84", "CRS:84"
    /// - "EPSG:3857", "EPSG:900913"
    /// - "+proj=lcc +lat_1=33 +lat_2=45 +lat_0=40 +lon_0=-97"
    pub fn from_string(s: &str) -> Result<Self, CrsParseError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CrsParseError::Empty);
        }
        if trimmed.starts_with("+proj=") {
            return Self::parse_proj_string(trimmed);
        }

        let normalized = trimmed.to_uppercase();
        let code = normalized
            .strip_prefix("URN:OGC:DEF:CRS:")
            .map(|rest| rest.replace("::", ":").replace(":1.3:", ":"))
            .unwrap_or_else(|| normalized.clone());

        match code.as_str() {
            "EPSG:4326" | "WGS84" => Ok(Crs::Wgs84),
            "CRS84" | "OGC:CRS84" | "CRS:84" => Ok(Crs::Crs84),
            "EPSG:4269" => Ok(Crs::Nad83),
            "EPSG:3857" | "EPSG:900913" | "EPSG:3785" => Ok(Crs::WebMercator),
            _ => Ok(Crs::Other(trimmed.to_string())),
        }
    }

    fn parse_proj_string(s: &str) -> Result<Self, CrsParseError> {
        let mut proj = None;
        let mut params = LccParams::default();
        let mut lat_2_given = false;

        for token in s.split_whitespace() {
            let token = token.trim_start_matches('+');
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            if key == "proj" {
                proj = Some(value.to_string());
                continue;
            }
            let parse = |v: &str| {
                v.parse::<f64>()
                    .map_err(|_| CrsParseError::InvalidParameter(format!("{}={}", key, v)))
            };
            match key {
                "lat_1" => params.lat_1 = parse(value)?,
                "lat_2" => {
                    params.lat_2 = parse(value)?;
                    lat_2_given = true;
                }
                "lat_0" => params.lat_0 = parse(value)?,
                "lon_0" => params.lon_0 = parse(value)?,
                "x_0" => params.x_0 = parse(value)?,
                "y_0" => params.y_0 = parse(value)?,
                "R" | "a" => params.radius = parse(value)?,
                _ => {}
            }
        }

        match proj.as_deref() {
            Some("lcc") => {
                if !lat_2_given {
                    params.lat_2 = params.lat_1;
                }
                Ok(Crs::LambertConformal(params))
            }
            Some("longlat") | Some("latlong") => Ok(Crs::Crs84),
            Some("merc") => Ok(Crs::WebMercator),
            _ => Ok(Crs::Other(s.to_string())),
        }
    }

    /// Check if this is a geographic (lon/lat) CRS.
    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84 | Crs::Crs84 | Crs::Nad83)
    }

    /// True if both are the same CRS, or both are plain geographic systems.
    pub fn is_equivalent(&self, other: &Crs) -> bool {
        self == other || (self.is_geographic() && other.is_geographic())
    }

    /// Linear unit name as used in CF metadata.
    pub fn units(&self) -> &'static str {
        if self.is_geographic() {
            "degrees"
        } else {
            "m"
        }
    }
}

impl Default for Crs {
    fn default() -> Self {
        Crs::Crs84
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Wgs84 => write!(f, "EPSG:4326"),
            Crs::Crs84 => write!(f, "OGC:CRS84"),
            Crs::Nad83 => write!(f, "EPSG:4269"),
            Crs::WebMercator => write!(f, "EPSG:3857"),
            Crs::LambertConformal(p) => write!(
                f,
                "+proj=lcc +lat_1={} +lat_2={} +lat_0={} +lon_0={} +x_0={} +y_0={} +R={}",
                p.lat_1, p.lat_2, p.lat_0, p.lon_0, p.x_0, p.y_0, p.radius
            ),
            Crs::Other(s) => write!(f, "{}", s),
        }
    }
}

impl TryFrom<String> for Crs {
    type Error = CrsParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Crs::from_string(&value)
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrsParseError {
    #[error("Empty CRS identifier")]
    Empty,

    #[error("Invalid CRS parameter: {0}")]
    InvalidParameter(String),
}
