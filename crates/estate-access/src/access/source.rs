use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::geo::GeoPoint;
use super::sample::LocationSample;

/// Failure reported by a location source instead of a fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable (GPS disabled or no signal)")]
    PositionUnavailable,
    #[error("location request timed out")]
    Timeout,
    #[error("location source error: {0}")]
    Other(String),
}

impl LocationError {
    /// Whether the source cannot produce samples at all, as opposed to one
    /// bad reading.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            LocationError::PermissionDenied | LocationError::PositionUnavailable
        )
    }
}

/// Subscription parameters forwarded to the device location API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    /// Fixes closer than this to the previously delivered one are suppressed.
    pub distance_filter_meters: f64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            distance_filter_meters: 10.0,
        }
    }
}

/// Message pushed from a source into a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationUpdate {
    Sample(LocationSample),
    Error(LocationError),
}

/// Push-based provider of location updates.
pub trait LocationSource: Send + Sync {
    fn subscribe(
        &self,
        options: WatchOptions,
        sink: UnboundedSender<LocationUpdate>,
    ) -> Result<Subscription, LocationError>;
}

/// Handle for an active subscription. Unsubscribes exactly once, either
/// through [`Subscription::unsubscribe`] or when dropped.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Source-side suppression of fixes that barely moved.
#[derive(Debug, Clone)]
struct DistanceFilter {
    min_meters: f64,
    last: Option<GeoPoint>,
}

impl DistanceFilter {
    fn new(options: &WatchOptions) -> Self {
        Self {
            min_meters: options.distance_filter_meters.max(0.0),
            last: None,
        }
    }

    fn admit(&mut self, update: &LocationUpdate) -> bool {
        let LocationUpdate::Sample(sample) = update else {
            return true;
        };
        // Failed fixes always pass so the subscriber can surface them.
        if sample.validate().is_err() {
            return true;
        }
        if let Some(last) = &self.last {
            if last.distance_to(&sample.point) < self.min_meters {
                return false;
            }
        }
        self.last = Some(sample.point);
        true
    }
}

/// What happened to an update handed to a [`PushLocationSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    Delivered,
    Filtered,
    NoSubscriber,
}

#[derive(Default)]
struct PushState {
    generation: u64,
    active: Option<(u64, UnboundedSender<LocationUpdate>, DistanceFilter)>,
}

/// Source fed by an external caller, e.g. an HTTP client reporting the
/// device position. Supports one subscriber at a time.
#[derive(Clone, Default)]
pub struct PushLocationSource {
    state: Arc<Mutex<PushState>>,
}

impl PushLocationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, sample: LocationSample) -> PushOutcome {
        self.deliver(LocationUpdate::Sample(sample))
    }

    pub fn fail(&self, error: LocationError) -> PushOutcome {
        self.deliver(LocationUpdate::Error(error))
    }

    pub fn has_subscriber(&self) -> bool {
        self.lock().active.is_some()
    }

    fn deliver(&self, update: LocationUpdate) -> PushOutcome {
        let mut state = self.lock();
        let Some((_, sink, filter)) = state.active.as_mut() else {
            return PushOutcome::NoSubscriber;
        };
        if !filter.admit(&update) {
            debug!("location update suppressed by distance filter");
            return PushOutcome::Filtered;
        }
        if sink.send(update).is_err() {
            state.active = None;
            return PushOutcome::NoSubscriber;
        }
        PushOutcome::Delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PushState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocationSource for PushLocationSource {
    fn subscribe(
        &self,
        options: WatchOptions,
        sink: UnboundedSender<LocationUpdate>,
    ) -> Result<Subscription, LocationError> {
        let mut state = self.lock();
        if state.active.is_some() {
            return Err(LocationError::Other(
                "push source already has a subscriber".to_string(),
            ));
        }
        state.generation += 1;
        let generation = state.generation;
        state.active = Some((generation, sink, DistanceFilter::new(&options)));
        drop(state);

        let shared = self.state.clone();
        Ok(Subscription::new(move || {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(&state.active, Some((active, _, _)) if *active == generation) {
                state.active = None;
            }
        }))
    }
}

impl fmt::Debug for PushLocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushLocationSource")
            .field("has_subscriber", &self.has_subscriber())
            .finish()
    }
}

/// Scripted source that replays updates on a fixed tick. Used by the CLI
/// demo and by tests that need a realistic asynchronous producer.
#[derive(Debug, Clone)]
pub struct ReplayLocationSource {
    script: Arc<Vec<LocationUpdate>>,
    interval: Duration,
    active: Arc<AtomicUsize>,
}

impl ReplayLocationSource {
    pub fn new(script: Vec<LocationUpdate>, interval: Duration) -> Self {
        Self {
            script: Arc::new(script),
            interval,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build a straight walk of `steps + 1` fixes from `from` to `to`.
    pub fn walk(
        from: GeoPoint,
        to: GeoPoint,
        steps: usize,
        accuracy_meters: f64,
        interval: Duration,
    ) -> Self {
        let steps = steps.max(1);
        let script = (0..=steps)
            .map(|step| {
                let point = super::geo::interpolate(&from, &to, step as f64 / steps as f64);
                LocationUpdate::Sample(LocationSample::now(point, accuracy_meters))
            })
            .collect();
        Self::new(script, interval)
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

impl LocationSource for ReplayLocationSource {
    fn subscribe(
        &self,
        options: WatchOptions,
        sink: UnboundedSender<LocationUpdate>,
    ) -> Result<Subscription, LocationError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| LocationError::Other(format!("no async runtime: {err}")))?;

        let script = self.script.clone();
        // tokio intervals must be non-zero.
        let interval = self.interval.max(Duration::from_millis(1));
        let mut filter = DistanceFilter::new(&options);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for update in script.iter() {
                ticker.tick().await;
                if !filter.admit(update) {
                    continue;
                }
                if sink.send(update.clone()).is_err() {
                    break;
                }
            }
        });

        self.active.fetch_add(1, Ordering::AcqRel);
        let active = self.active.clone();
        Ok(Subscription::new(move || {
            task.abort();
            active.fetch_sub(1, Ordering::AcqRel);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sample(lat: f64) -> LocationSample {
        LocationSample::now(GeoPoint::new(lat, -75.0).expect("valid"), 5.0)
    }

    #[test]
    fn subscription_cancels_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_cancels() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        {
            let _subscription = Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unavailable_errors_are_classified() {
        assert!(LocationError::PermissionDenied.is_unavailable());
        assert!(LocationError::PositionUnavailable.is_unavailable());
        assert!(!LocationError::Timeout.is_unavailable());
        assert!(!LocationError::Other("flaky".into()).is_unavailable());
    }

    #[test]
    fn location_error_json_shape() {
        let parsed: LocationError =
            serde_json::from_str(r#"{"kind":"permission_denied"}"#).expect("parses");
        assert_eq!(parsed, LocationError::PermissionDenied);
        let other: LocationError =
            serde_json::from_str(r#"{"kind":"other","detail":"sensor reset"}"#).expect("parses");
        assert_eq!(other, LocationError::Other("sensor reset".into()));
    }

    #[test]
    fn push_source_applies_distance_filter() {
        let source = PushLocationSource::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = WatchOptions {
            high_accuracy: true,
            distance_filter_meters: 10.0,
        };
        let _subscription = source.subscribe(options, tx).expect("subscribes");

        assert_eq!(source.push(sample(40.0)), PushOutcome::Delivered);
        // ~1 m north of the previous fix.
        assert_eq!(source.push(sample(40.00001)), PushOutcome::Filtered);
        // ~111 m north.
        assert_eq!(source.push(sample(40.001)), PushOutcome::Delivered);
        assert_eq!(
            source.fail(LocationError::Timeout),
            PushOutcome::Delivered
        );

        let mut received = Vec::new();
        while let Ok(update) = rx.try_recv() {
            received.push(update);
        }
        assert_eq!(received.len(), 3);
    }

    #[test]
    fn push_source_rejects_second_subscriber_and_clears_on_unsubscribe() {
        let source = PushLocationSource::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let subscription = source
            .subscribe(WatchOptions::default(), tx)
            .expect("first subscriber");

        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert!(source.subscribe(WatchOptions::default(), tx2).is_err());

        subscription.unsubscribe();
        assert!(!source.has_subscriber());
        assert_eq!(source.push(sample(40.0)), PushOutcome::NoSubscriber);
    }

    #[tokio::test]
    async fn replay_source_emits_script_in_order() {
        let from = GeoPoint::new(40.0, -75.0).expect("valid");
        let to = GeoPoint::new(40.01, -75.0).expect("valid");
        let source = ReplayLocationSource::walk(from, to, 4, 5.0, Duration::from_millis(1));
        assert_eq!(source.len(), 5);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = source
            .subscribe(WatchOptions::default(), tx)
            .expect("subscribes");
        assert_eq!(source.active_subscriptions(), 1);

        let mut latitudes = Vec::new();
        while let Some(update) = rx.recv().await {
            if let LocationUpdate::Sample(sample) = update {
                latitudes.push(sample.point.latitude());
            }
        }
        assert_eq!(latitudes.len(), 5);
        assert!(latitudes.windows(2).all(|pair| pair[0] < pair[1]));

        drop(subscription);
        assert_eq!(source.active_subscriptions(), 0);
    }
}
