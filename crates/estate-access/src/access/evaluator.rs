use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::geo::{GeoPoint, InvalidInput};
use super::sample::{LocationSample, SampleError};
use super::source::LocationError;

/// Protected coordinate plus the radius inside which unlocking is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeofenceTarget", into = "RawGeofenceTarget")]
pub struct GeofenceTarget {
    point: GeoPoint,
    radius_meters: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawGeofenceTarget {
    point: GeoPoint,
    radius_meters: f64,
}

impl TryFrom<RawGeofenceTarget> for GeofenceTarget {
    type Error = InvalidInput;

    fn try_from(raw: RawGeofenceTarget) -> Result<Self, Self::Error> {
        GeofenceTarget::new(raw.point, raw.radius_meters)
    }
}

impl From<GeofenceTarget> for RawGeofenceTarget {
    fn from(target: GeofenceTarget) -> Self {
        RawGeofenceTarget {
            point: target.point,
            radius_meters: target.radius_meters,
        }
    }
}

impl GeofenceTarget {
    pub fn new(point: GeoPoint, radius_meters: f64) -> Result<Self, InvalidInput> {
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(InvalidInput::Radius(radius_meters));
        }
        Ok(Self {
            point,
            radius_meters,
        })
    }

    pub fn point(&self) -> GeoPoint {
        self.point
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_meters
    }

    /// Inclusive at the boundary.
    pub fn contains(&self, distance_meters: f64) -> bool {
        distance_meters <= self.radius_meters
    }
}

/// Discrete access decision derived from the most recent accepted sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    #[default]
    Unknown,
    Locked,
    Unlocked,
}

impl AccessState {
    pub fn label(&self) -> &'static str {
        match self {
            AccessState::Unknown => "unknown",
            AccessState::Locked => "locked",
            AccessState::Unlocked => "unlocked",
        }
    }
}

impl fmt::Display for AccessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Notification emitted to observers as updates are processed.
#[derive(Debug, Clone, PartialEq)]
pub enum GeofenceEvent {
    /// Fires for every accepted sample, even when the state is unchanged.
    DistanceChanged { distance_meters: f64 },
    /// Fires only when the discrete state actually moves.
    StateChanged { from: AccessState, to: AccessState },
    SampleRejected(SampleError),
    LocationUnavailable(LocationError),
}

/// Consumer-side hook for evaluator notifications.
pub trait GeofenceObserver: Send {
    fn on_event(&mut self, event: &GeofenceEvent);
}

impl<F> GeofenceObserver for F
where
    F: FnMut(&GeofenceEvent) + Send,
{
    fn on_event(&mut self, event: &GeofenceEvent) {
        self(event)
    }
}

/// Result of applying one accepted sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub state: AccessState,
    pub distance_meters: f64,
    pub state_changed: bool,
}

/// Debounced locked/unlocked state machine for a single geofence session.
///
/// The evaluator is not internally synchronized; callers feed it from one
/// consumer (see [`GeofenceSession`](super::session::GeofenceSession)).
pub struct GeofenceEvaluator {
    target: GeofenceTarget,
    state: AccessState,
    distance_meters: Option<f64>,
    last_sample: Option<LocationSample>,
    observers: Vec<Box<dyn GeofenceObserver>>,
}

impl GeofenceEvaluator {
    pub fn new(target: GeofenceTarget) -> Self {
        Self {
            target,
            state: AccessState::Unknown,
            distance_meters: None,
            last_sample: None,
            observers: Vec::new(),
        }
    }

    pub fn observe(&mut self, observer: impl GeofenceObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn target(&self) -> &GeofenceTarget {
        &self.target
    }

    pub fn state(&self) -> AccessState {
        self.state
    }

    pub fn distance_meters(&self) -> Option<f64> {
        self.distance_meters
    }

    pub fn last_sample(&self) -> Option<&LocationSample> {
        self.last_sample.as_ref()
    }

    /// Evaluate a sample against the target.
    ///
    /// A sample whose accuracy flags a failed fix is routed through
    /// [`reject`](Self::reject) and leaves the state untouched.
    pub fn apply(&mut self, sample: &LocationSample) -> Result<Evaluation, SampleError> {
        if let Err(error) = sample.validate() {
            self.reject(error.clone());
            return Err(error);
        }

        let distance_meters = sample.point.distance_to(&self.target.point);
        let next = if self.target.contains(distance_meters) {
            AccessState::Unlocked
        } else {
            AccessState::Locked
        };
        let previous = self.state;

        self.state = next;
        self.distance_meters = Some(distance_meters);
        self.last_sample = Some(sample.clone());

        debug!(
            distance_meters,
            radius_meters = self.target.radius_meters,
            state = %next,
            "geofence sample evaluated"
        );
        self.notify(&GeofenceEvent::DistanceChanged { distance_meters });

        let state_changed = previous != next;
        if state_changed {
            info!(from = %previous, to = %next, "geofence access state changed");
            self.notify(&GeofenceEvent::StateChanged {
                from: previous,
                to: next,
            });
        }

        Ok(Evaluation {
            state: next,
            distance_meters,
            state_changed,
        })
    }

    /// Record a bad update without touching the state.
    pub fn reject(&mut self, error: SampleError) {
        warn!(%error, state = %self.state, "geofence sample rejected");
        self.notify(&GeofenceEvent::SampleRejected(error));
    }

    /// The source cannot produce fixes at all; the last state is retained.
    pub fn location_unavailable(&mut self, error: LocationError) {
        warn!(%error, state = %self.state, "location source unavailable");
        self.notify(&GeofenceEvent::LocationUnavailable(error));
    }

    fn notify(&mut self, event: &GeofenceEvent) {
        for observer in &mut self.observers {
            observer.on_event(event);
        }
    }
}

impl fmt::Debug for GeofenceEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeofenceEvaluator")
            .field("target", &self.target)
            .field("state", &self.state)
            .field("distance_meters", &self.distance_meters)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn target() -> GeofenceTarget {
        let point = GeoPoint::new(40.0, -75.0).expect("valid target");
        GeofenceTarget::new(point, 30.0).expect("valid radius")
    }

    fn sample_at(lat: f64, lon: f64) -> LocationSample {
        LocationSample::now(GeoPoint::new(lat, lon).expect("valid sample"), 5.0)
    }

    fn recording(evaluator: &mut GeofenceEvaluator) -> Arc<Mutex<Vec<GeofenceEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        evaluator.observe(move |event: &GeofenceEvent| {
            sink.lock().expect("event mutex").push(event.clone());
        });
        events
    }

    fn state_changes(events: &[GeofenceEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, GeofenceEvent::StateChanged { .. }))
            .count()
    }

    #[test]
    fn starts_unknown_without_distance() {
        let evaluator = GeofenceEvaluator::new(target());
        assert_eq!(evaluator.state(), AccessState::Unknown);
        assert!(evaluator.distance_meters().is_none());
        assert!(evaluator.last_sample().is_none());
    }

    #[test]
    fn sample_on_target_unlocks() {
        let mut evaluator = GeofenceEvaluator::new(target());
        let evaluation = evaluator
            .apply(&sample_at(40.0, -75.0))
            .expect("sample accepted");
        assert_eq!(evaluation.state, AccessState::Unlocked);
        assert_eq!(evaluation.distance_meters, 0.0);
        assert!(evaluation.state_changed);
    }

    #[test]
    fn sample_a_kilometer_away_locks() {
        let mut evaluator = GeofenceEvaluator::new(target());
        // 0.009 degrees of latitude is roughly 1000 m.
        let evaluation = evaluator
            .apply(&sample_at(40.009, -75.0))
            .expect("sample accepted");
        assert_eq!(evaluation.state, AccessState::Locked);
        assert!((evaluation.distance_meters - 1000.0).abs() < 10.0);
    }

    #[test]
    fn boundary_distance_counts_as_inside() {
        let target = target();
        assert!(target.contains(30.0));
        assert!(!target.contains(30.000_001));
    }

    #[test]
    fn sample_exactly_at_the_radius_unlocks() {
        let centre = GeoPoint::new(40.0, -75.0).expect("valid");
        let sample = sample_at(40.0002, -75.0);
        let boundary = sample.point.distance_to(&centre);

        let mut at_edge = GeofenceEvaluator::new(
            GeofenceTarget::new(centre, boundary).expect("valid radius"),
        );
        let evaluation = at_edge.apply(&sample).expect("sample accepted");
        assert_eq!(evaluation.distance_meters, boundary);
        assert_eq!(evaluation.state, AccessState::Unlocked);

        let mut just_short = GeofenceEvaluator::new(
            GeofenceTarget::new(centre, boundary * (1.0 - 1e-9)).expect("valid radius"),
        );
        let evaluation = just_short.apply(&sample).expect("sample accepted");
        assert_eq!(evaluation.state, AccessState::Locked);
    }

    #[test]
    fn deserializing_a_target_validates_the_radius() {
        let target: GeofenceTarget = serde_json::from_str(
            r#"{"point":{"latitude":40.0,"longitude":-75.0},"radius_meters":30.0}"#,
        )
        .expect("valid target");
        assert_eq!(target.radius_meters(), 30.0);

        let zero = serde_json::from_str::<GeofenceTarget>(
            r#"{"point":{"latitude":40.0,"longitude":-75.0},"radius_meters":0.0}"#,
        );
        assert!(zero.is_err());
    }

    #[test]
    fn rejects_non_positive_radius() {
        let point = GeoPoint::new(40.0, -75.0).expect("valid");
        assert_eq!(
            GeofenceTarget::new(point, 0.0),
            Err(InvalidInput::Radius(0.0))
        );
        assert!(GeofenceTarget::new(point, f64::NAN).is_err());
        assert!(GeofenceTarget::new(point, -5.0).is_err());
    }

    #[test]
    fn replaying_a_sample_does_not_repeat_state_change() {
        let mut evaluator = GeofenceEvaluator::new(target());
        let events = recording(&mut evaluator);
        let sample = sample_at(40.0001, -75.0);

        let first = evaluator.apply(&sample).expect("accepted");
        let second = evaluator.apply(&sample).expect("accepted");

        assert_eq!(first.state, second.state);
        assert_eq!(first.distance_meters, second.distance_meters);
        assert!(first.state_changed);
        assert!(!second.state_changed);

        let events = events.lock().expect("event mutex");
        assert_eq!(state_changes(&events), 1);
        let distance_events = events
            .iter()
            .filter(|event| matches!(event, GeofenceEvent::DistanceChanged { .. }))
            .count();
        assert_eq!(distance_events, 2);
    }

    #[test]
    fn distance_updates_while_state_stays_locked() {
        let mut evaluator = GeofenceEvaluator::new(target());
        let events = recording(&mut evaluator);

        evaluator.apply(&sample_at(40.02, -75.0)).expect("accepted");
        evaluator.apply(&sample_at(40.01, -75.0)).expect("accepted");

        assert_eq!(evaluator.state(), AccessState::Locked);
        let distance = evaluator.distance_meters().expect("distance recorded");
        assert!((distance - 1112.0).abs() < 5.0, "got {distance}");
        assert_eq!(state_changes(&events.lock().expect("event mutex")), 1);
    }

    #[test]
    fn bad_accuracy_keeps_last_state() {
        let mut evaluator = GeofenceEvaluator::new(target());
        let events = recording(&mut evaluator);
        evaluator.apply(&sample_at(40.0, -75.0)).expect("accepted");

        let mut noisy = sample_at(45.0, -75.0);
        noisy.accuracy_meters = -1.0;
        let result = evaluator.apply(&noisy);

        assert!(matches!(result, Err(SampleError::InvalidAccuracy { .. })));
        assert_eq!(evaluator.state(), AccessState::Unlocked);
        assert_eq!(evaluator.distance_meters(), Some(0.0));
        let events = events.lock().expect("event mutex");
        assert!(matches!(
            events.last(),
            Some(GeofenceEvent::SampleRejected(_))
        ));
    }

    #[test]
    fn unavailable_source_never_leaves_unknown() {
        let mut evaluator = GeofenceEvaluator::new(target());
        evaluator.location_unavailable(LocationError::PermissionDenied);
        evaluator.reject(SampleError::Source(LocationError::Timeout));
        assert_eq!(evaluator.state(), AccessState::Unknown);
    }

    #[test]
    fn crossing_back_out_emits_second_change() {
        let mut evaluator = GeofenceEvaluator::new(target());
        let events = recording(&mut evaluator);

        evaluator.apply(&sample_at(40.01, -75.0)).expect("accepted");
        evaluator.apply(&sample_at(40.0, -75.0)).expect("accepted");
        evaluator.apply(&sample_at(40.01, -75.0)).expect("accepted");

        let events = events.lock().expect("event mutex");
        let transitions: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                GeofenceEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                (AccessState::Unknown, AccessState::Locked),
                (AccessState::Locked, AccessState::Unlocked),
                (AccessState::Unlocked, AccessState::Locked),
            ]
        );
    }
}
