//! Map points and the bounding-box queries derived from them.

use std::fmt;

use crate::error::{LiveDetectError, Result};

/// Default half-width of a discovery box, in degrees.
pub const DEFAULT_MARGIN_DEG: f64 = 0.05;

/// Decimal places the registry expects in query parameters.
pub const COORD_DECIMALS: i32 = 5;

const COORD_SCALE: f64 = 100_000.0;
const COORD_STEP: f64 = 1.0 / COORD_SCALE;
// Scaled values this close to a grid step are treated as on the step.
const SNAP_EPSILON: f64 = 1e-6;

/// A validated WGS84 point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    lat: f64,
    lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(LiveDetectError::InvalidCoordinate(format!(
                "latitude {} outside [-90, 90]",
                lat
            )));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(LiveDetectError::InvalidCoordinate(format!(
                "longitude {} outside [-180, 180]",
                lng
            )));
        }
        Ok(Self { lat, lng })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    /// The point rounded to the registry's precision, as shown to the user.
    pub fn rounded(&self) -> Self {
        Self {
            lat: round_nearest(self.lat),
            lng: round_nearest(self.lng),
        }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lng)
    }
}

/// Fixed entry points offered before the map is shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    West,
    South,
    East,
}

impl Region {
    pub fn point(self) -> GeoPoint {
        match self {
            Region::West => GeoPoint {
                lat: 36.5,
                lng: 126.3,
            },
            Region::South => GeoPoint {
                lat: 34.8,
                lng: 128.0,
            },
            Region::East => GeoPoint {
                lat: 37.524,
                lng: 129.114,
            },
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "west" => Some(Region::West),
            "south" => Some(Region::South),
            "east" => Some(Region::East),
            _ => None,
        }
    }
}

/// Map center used when no region was picked (Seoul city hall).
pub fn default_initial_point() -> GeoPoint {
    GeoPoint {
        lat: 37.5665,
        lng: 126.9780,
    }
}

/// Rectangle filter for the camera registry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBoxQuery {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
    pub margin: f64,
}

impl BoundingBoxQuery {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }
}

/// Build the discovery rectangle `point ± margin`.
///
/// Bounds are rounded outward at [`COORD_DECIMALS`] places (min floored, max
/// ceiled) so rounding can never shrink or invert the box. A non-positive
/// margin is replaced with one grid step.
pub fn build_query(point: GeoPoint, margin: f64) -> BoundingBoxQuery {
    let margin = if margin.is_finite() && margin > 0.0 {
        margin
    } else {
        log::warn!(
            "discovery margin {} is not positive; using {}",
            margin,
            COORD_STEP
        );
        COORD_STEP
    };

    let (min_lat, max_lat) = outward_bounds(point.lat, margin, 90.0);
    let (min_lng, max_lng) = outward_bounds(point.lng, margin, 180.0);
    BoundingBoxQuery {
        min_lat,
        max_lat,
        min_lng,
        max_lng,
        margin,
    }
}

fn outward_bounds(center: f64, margin: f64, limit: f64) -> (f64, f64) {
    let mut min = round_down(center - margin);
    let mut max = round_up(center + margin);
    if min >= max {
        min -= COORD_STEP;
        max += COORD_STEP;
    }
    (min.max(-limit), max.min(limit))
}

fn round_down(value: f64) -> f64 {
    let scaled = value * COORD_SCALE;
    let nearest = scaled.round();
    if (scaled - nearest).abs() < SNAP_EPSILON {
        nearest / COORD_SCALE
    } else {
        scaled.floor() / COORD_SCALE
    }
}

fn round_up(value: f64) -> f64 {
    let scaled = value * COORD_SCALE;
    let nearest = scaled.round();
    if (scaled - nearest).abs() < SNAP_EPSILON {
        nearest / COORD_SCALE
    } else {
        scaled.ceil() / COORD_SCALE
    }
}

fn round_nearest(value: f64) -> f64 {
    (value * COORD_SCALE).round() / COORD_SCALE
}
