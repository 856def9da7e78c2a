//! Proximity gating: distance math, the geofence state machine, the location
//! source contract, and the unlock decision built on top of them.

pub mod evaluator;
pub mod geo;
pub mod sample;
pub mod session;
pub mod source;
pub mod unlock;

pub use evaluator::{
    AccessState, Evaluation, GeofenceEvaluator, GeofenceEvent, GeofenceObserver, GeofenceTarget,
};
pub use geo::{distance_meters, interpolate, GeoPoint, InvalidInput, EARTH_RADIUS_METERS};
pub use sample::{LocationSample, SampleError};
pub use session::{AccessSnapshot, GeofenceSession};
pub use source::{
    LocationError, LocationSource, LocationUpdate, PushLocationSource, PushOutcome,
    ReplayLocationSource, Subscription, WatchOptions,
};
pub use unlock::{
    request_unlock, ActuatorError, ConfirmingActuator, DenialReason, OwnerContact,
    UnlockActuator, UnlockDenied, UnlockGrant,
};
