use serde::{Deserialize, Serialize};

/// Earth mean radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Caller supplied a coordinate or radius outside its valid range.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidInput {
    #[error("latitude {0} must be a finite value within [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} must be a finite value within [-180, 180]")]
    Longitude(f64),
    #[error("radius {0} must be a finite number of meters greater than zero")]
    Radius(f64),
    #[error("coordinate '{0}' is not a decimal number")]
    Unparsable(String),
}

/// Latitude/longitude pair in decimal degrees.
///
/// A `GeoPoint` can only be built through [`GeoPoint::new`] (or serde, which
/// routes through the same check), so every instance satisfies the range
/// invariants and distance math never has to re-validate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeoPoint", into = "RawGeoPoint")]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawGeoPoint {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawGeoPoint> for GeoPoint {
    type Error = InvalidInput;

    fn try_from(raw: RawGeoPoint) -> Result<Self, Self::Error> {
        GeoPoint::new(raw.latitude, raw.longitude)
    }
}

impl From<GeoPoint> for RawGeoPoint {
    fn from(point: GeoPoint) -> Self {
        RawGeoPoint {
            latitude: point.latitude,
            longitude: point.longitude,
        }
    }
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidInput> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(InvalidInput::Latitude(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(InvalidInput::Longitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Parse a `"lat,lon"` pair as typed on the command line.
    pub fn parse_pair(raw: &str) -> Result<Self, InvalidInput> {
        let (lat, lon) = raw
            .split_once(',')
            .ok_or_else(|| InvalidInput::Unparsable(raw.to_string()))?;
        let latitude = parse_degrees(lat)?;
        let longitude = parse_degrees(lon)?;
        Self::new(latitude, longitude)
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        distance_meters(self, other)
    }
}

pub(crate) fn parse_degrees(raw: &str) -> Result<f64, InvalidInput> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| InvalidInput::Unparsable(raw.trim().to_string()))
}

/// Great-circle surface distance in meters between two points.
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair outside [0, 1] for near-antipodal points.
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Linear waypoint between two points; `fraction` is clamped to [0, 1].
///
/// Good enough for the short walks the demo and replay fixtures simulate,
/// not a geodesic.
pub fn interpolate(from: &GeoPoint, to: &GeoPoint, fraction: f64) -> GeoPoint {
    let t = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    GeoPoint {
        latitude: from.latitude + (to.latitude - from.latitude) * t,
        longitude: from.longitude + (to.longitude - from.longitude) * t,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).expect("valid point")
    }

    #[test]
    fn one_degree_of_longitude_at_equator() {
        let d = distance_meters(&point(0.0, 0.0), &point(0.0, 1.0));
        assert!((d - 111_195.0).abs() < 50.0, "got {d}");
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_identity() {
        let samples = [
            point(40.0, -75.0),
            point(-33.8688, 151.2093),
            point(51.5074, -0.1278),
            point(89.9, 179.9),
            point(-90.0, -180.0),
        ];
        for a in &samples {
            assert_eq!(distance_meters(a, a), 0.0);
            for b in &samples {
                let ab = distance_meters(a, b);
                let ba = distance_meters(b, a);
                assert!(ab >= 0.0);
                assert!((ab - ba).abs() < 1e-6, "{ab} != {ba}");
            }
        }
    }

    #[test]
    fn antipodal_points_are_half_the_circumference() {
        let d = distance_meters(&point(0.0, 0.0), &point(0.0, 180.0));
        let half = std::f64::consts::PI * EARTH_RADIUS_METERS;
        assert!((d - half).abs() < 1.0);
    }

    #[test]
    fn rejects_out_of_range_and_non_finite_coordinates() {
        assert_eq!(GeoPoint::new(90.5, 0.0), Err(InvalidInput::Latitude(90.5)));
        assert_eq!(
            GeoPoint::new(0.0, -180.01),
            Err(InvalidInput::Longitude(-180.01))
        );
        assert!(matches!(
            GeoPoint::new(f64::NAN, 0.0),
            Err(InvalidInput::Latitude(_))
        ));
        assert!(matches!(
            GeoPoint::new(0.0, f64::INFINITY),
            Err(InvalidInput::Longitude(_))
        ));
    }

    #[test]
    fn deserialization_runs_range_checks() {
        let ok: GeoPoint =
            serde_json::from_str(r#"{"latitude":40.0,"longitude":-75.0}"#).expect("valid json");
        assert_eq!(ok, point(40.0, -75.0));

        let err = serde_json::from_str::<GeoPoint>(r#"{"latitude":140.0,"longitude":-75.0}"#);
        assert!(err.is_err());
    }

    #[test]
    fn parse_pair_accepts_whitespace() {
        assert_eq!(
            GeoPoint::parse_pair(" 40.0 , -75.5 ").expect("parses"),
            point(40.0, -75.5)
        );
        assert!(matches!(
            GeoPoint::parse_pair("40.0"),
            Err(InvalidInput::Unparsable(_))
        ));
        assert!(matches!(
            GeoPoint::parse_pair("north,-75"),
            Err(InvalidInput::Unparsable(_))
        ));
    }

    #[test]
    fn interpolate_hits_endpoints_and_midpoint() {
        let from = point(40.0, -75.0);
        let to = point(40.01, -75.02);
        assert_eq!(interpolate(&from, &to, 0.0), from);
        assert!(interpolate(&from, &to, 1.0).distance_to(&to) < 1e-6);
        assert!(interpolate(&from, &to, 4.0).distance_to(&to) < 1e-6);
        let mid = interpolate(&from, &to, 0.5);
        assert!((mid.latitude() - 40.005).abs() < 1e-9);
        assert!((mid.longitude() + 75.01).abs() < 1e-9);
    }
}
