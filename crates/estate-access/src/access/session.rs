use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::evaluator::{AccessState, GeofenceEvaluator, GeofenceEvent, GeofenceTarget};
use super::sample::SampleError;
use super::source::{LocationError, LocationSource, LocationUpdate, Subscription, WatchOptions};
use super::unlock::{request_unlock, UnlockDenied, UnlockGrant};

const EVENT_CAPACITY: usize = 64;

/// Point-in-time view of a session, published after every processed update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccessSnapshot {
    pub state: AccessState,
    pub distance_meters: Option<f64>,
    /// Count of updates (samples and errors) the session has processed.
    pub updates: u64,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub location_unavailable: bool,
}

/// One detail-view geofence session.
///
/// Owns the location subscription and a single consumer task that feeds the
/// evaluator, so updates are applied strictly one at a time. Closing or
/// dropping the session unsubscribes and stops the task.
#[derive(Debug)]
pub struct GeofenceSession {
    target: GeofenceTarget,
    snapshots: watch::Receiver<AccessSnapshot>,
    events: broadcast::Sender<GeofenceEvent>,
    subscription: Option<Subscription>,
    task: Option<JoinHandle<()>>,
}

impl GeofenceSession {
    /// Subscribe to `source` and start evaluating against `target`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        source: &dyn LocationSource,
        target: GeofenceTarget,
        options: WatchOptions,
    ) -> Result<Self, LocationError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| LocationError::Other(format!("no async runtime: {err}")))?;

        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let subscription = source.subscribe(options, update_tx)?;

        let (snapshot_tx, snapshot_rx) = watch::channel(AccessSnapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let mut evaluator = GeofenceEvaluator::new(target);
        let forward = events_tx.clone();
        evaluator.observe(move |event: &GeofenceEvent| {
            // No listeners is fine; snapshots carry the durable view.
            let _ = forward.send(event.clone());
        });

        let task = runtime.spawn(consume(evaluator, update_rx, snapshot_tx));
        info!(
            latitude = target.point().latitude(),
            longitude = target.point().longitude(),
            radius_meters = target.radius_meters(),
            high_accuracy = options.high_accuracy,
            "geofence session started"
        );

        Ok(Self {
            target,
            snapshots: snapshot_rx,
            events: events_tx,
            subscription: Some(subscription),
            task: Some(task),
        })
    }

    pub fn target(&self) -> &GeofenceTarget {
        &self.target
    }

    pub fn snapshot(&self) -> AccessSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn state(&self) -> AccessState {
        self.snapshots.borrow().state
    }

    /// Live notifications; late subscribers only see subsequent events.
    pub fn events(&self) -> broadcast::Receiver<GeofenceEvent> {
        self.events.subscribe()
    }

    /// Watch handle for consumers that want to await snapshot changes.
    pub fn watch(&self) -> watch::Receiver<AccessSnapshot> {
        self.snapshots.clone()
    }

    /// Resolve once at least `updates` updates have been processed, or with
    /// the final snapshot if the source has finished.
    pub async fn wait_for_updates(&self, updates: u64) -> AccessSnapshot {
        let mut receiver = self.snapshots.clone();
        let reached = match receiver.wait_for(|snapshot| snapshot.updates >= updates).await {
            Ok(snapshot) => Some(snapshot.clone()),
            Err(_) => None,
        };
        reached.unwrap_or_else(|| self.snapshot())
    }

    pub fn request_unlock(&self) -> Result<UnlockGrant, UnlockDenied> {
        request_unlock(self.state())
    }

    pub fn is_active(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// End the session and return its final snapshot.
    pub async fn close(mut self) -> AccessSnapshot {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        let snapshot = self.snapshot();
        info!(state = %snapshot.state, updates = snapshot.updates, "geofence session closed");
        snapshot
    }
}

impl Drop for GeofenceSession {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn consume(
    mut evaluator: GeofenceEvaluator,
    mut updates: mpsc::UnboundedReceiver<LocationUpdate>,
    snapshots: watch::Sender<AccessSnapshot>,
) {
    while let Some(update) = updates.recv().await {
        let mut error = None;
        let mut unavailable = false;
        let mut sampled_at = None;

        match update {
            LocationUpdate::Sample(sample) => match evaluator.apply(&sample) {
                Ok(_) => sampled_at = Some(sample.captured_at),
                Err(err) => error = Some(err.to_string()),
            },
            LocationUpdate::Error(err) if err.is_unavailable() => {
                error = Some(err.to_string());
                unavailable = true;
                evaluator.location_unavailable(err);
            }
            LocationUpdate::Error(err) => {
                let err = SampleError::Source(err);
                error = Some(err.to_string());
                evaluator.reject(err);
            }
        }

        snapshots.send_modify(|snapshot| {
            snapshot.updates += 1;
            snapshot.state = evaluator.state();
            snapshot.distance_meters = evaluator.distance_meters();
            if let Some(at) = sampled_at {
                snapshot.last_sample_at = Some(at);
                snapshot.location_unavailable = false;
            }
            if unavailable {
                snapshot.location_unavailable = true;
            }
            snapshot.last_error = error;
        });
    }
    debug!("location update stream ended");
}
