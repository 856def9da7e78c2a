use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geo::GeoPoint;
use super::source::LocationError;

/// One position fix reported by a location source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub point: GeoPoint,
    /// Horizontal accuracy radius in meters as reported by the device.
    pub accuracy_meters: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(point: GeoPoint, accuracy_meters: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            point,
            accuracy_meters,
            captured_at,
        }
    }

    /// Sample stamped with the current wall clock.
    pub fn now(point: GeoPoint, accuracy_meters: f64) -> Self {
        Self::new(point, accuracy_meters, Utc::now())
    }

    /// A negative or non-finite accuracy is how sources flag a failed fix.
    pub fn validate(&self) -> Result<(), SampleError> {
        if !self.accuracy_meters.is_finite() || self.accuracy_meters < 0.0 {
            return Err(SampleError::InvalidAccuracy {
                accuracy_meters: self.accuracy_meters,
            });
        }
        Ok(())
    }
}

/// A single update that must not move the access state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("sample accuracy {accuracy_meters} indicates a failed fix")]
    InvalidAccuracy { accuracy_meters: f64 },
    #[error("location source reported an error: {0}")]
    Source(LocationError),
}
