use estate_access::access::{
    AccessSnapshot, GeoPoint, GeofenceSession, GeofenceTarget, LocationError, LocationSample,
    PushLocationSource, PushOutcome, UnlockActuator, WatchOptions,
};
use estate_access::config::GeofenceConfig;
use estate_access::error::AppError;
use estate_access::listings::{Estate, EstateCatalog};
use estate_access::saved::{BlobStore, SavedItemStore};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How long a sample request waits for its update to be evaluated.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Option<Arc<PrometheusHandle>>,
    pub(crate) catalog: Arc<EstateCatalog>,
    pub(crate) saved: Arc<SavedItemStore<dyn BlobStore>>,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) geofence: GeofenceConfig,
    pub(crate) actuator: Arc<dyn UnlockActuator>,
}

impl AppState {
    pub(crate) fn estate(&self, id: &str) -> Result<&Estate, AppError> {
        self.catalog
            .get(id)
            .ok_or_else(|| AppError::EstateNotFound(id.to_string()))
    }
}

/// A live session plus the push source the HTTP client feeds.
pub(crate) struct ActiveSession {
    pub(crate) session_id: String,
    pub(crate) estate_id: String,
    pub(crate) session: GeofenceSession,
    source: PushLocationSource,
    delivered: Mutex<u64>,
    last_seen: Mutex<Instant>,
}

/// Result of handing one client update to a session.
#[derive(Debug, Serialize)]
pub(crate) struct UpdateReceipt {
    pub(crate) outcome: PushOutcome,
    pub(crate) snapshot: AccessSnapshot,
}

impl ActiveSession {
    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn last_seen(&self) -> Instant {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) async fn push_sample(&self, sample: LocationSample) -> UpdateReceipt {
        let ordinal = self.deliver(|source| source.push(sample));
        self.settle(ordinal).await
    }

    pub(crate) async fn push_error(&self, error: LocationError) -> UpdateReceipt {
        let ordinal = self.deliver(|source| source.fail(error));
        self.settle(ordinal).await
    }

    /// Push under the counter lock so ordinals follow queue order.
    fn deliver(
        &self,
        push: impl FnOnce(&PushLocationSource) -> PushOutcome,
    ) -> (PushOutcome, Option<u64>) {
        let mut delivered = self.delivered.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = push(&self.source);
        if outcome == PushOutcome::Delivered {
            *delivered += 1;
            (outcome, Some(*delivered))
        } else {
            (outcome, None)
        }
    }

    async fn settle(&self, (outcome, ordinal): (PushOutcome, Option<u64>)) -> UpdateReceipt {
        let snapshot = match ordinal {
            Some(ordinal) => {
                tokio::time::timeout(SETTLE_TIMEOUT, self.session.wait_for_updates(ordinal))
                    .await
                    .unwrap_or_else(|_| self.session.snapshot())
            }
            None => self.session.snapshot(),
        };
        UpdateReceipt { outcome, snapshot }
    }
}

/// Open geofence sessions keyed by session id.
///
/// Sessions a client abandons without closing are evicted once they have been
/// idle for `idle_timeout`; eviction drops the session, which unsubscribes it
/// and stops its consumer task.
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ActiveSession>>>,
    sequence: AtomicU64,
    idle_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(GeofenceConfig::default().session_idle_timeout)
    }
}

impl SessionRegistry {
    pub(crate) fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            idle_timeout,
        }
    }

    pub(crate) fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub(crate) fn open(
        &self,
        estate: &Estate,
        radius_meters: f64,
        options: WatchOptions,
    ) -> Result<Arc<ActiveSession>, AppError> {
        self.evict_idle();
        let target = GeofenceTarget::new(estate.location()?, radius_meters)?;
        let source = PushLocationSource::new();
        let session = GeofenceSession::start(&source, target, options)?;

        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let session_id = format!("session-{id:06}");
        let active = Arc::new(ActiveSession {
            session_id: session_id.clone(),
            estate_id: estate.id.0.clone(),
            session,
            source,
            delivered: Mutex::new(0),
            last_seen: Mutex::new(Instant::now()),
        });

        self.lock().insert(session_id.clone(), active.clone());
        info!(%session_id, estate_id = %estate.id.0, "detail session opened");
        Ok(active)
    }

    /// Look up a session and mark it as in use.
    pub(crate) fn get(&self, session_id: &str) -> Result<Arc<ActiveSession>, AppError> {
        let active = self
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        active.touch();
        Ok(active)
    }

    /// Remove the session and close it once no request still holds it.
    pub(crate) async fn close(&self, session_id: &str) -> Result<AccessSnapshot, AppError> {
        let active = self
            .lock()
            .remove(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        let snapshot = match Arc::try_unwrap(active) {
            Ok(active) => active.session.close().await,
            // In-flight requests still hold a handle; the last one to drop it
            // tears the session down.
            Err(shared) => shared.session.snapshot(),
        };
        info!(%session_id, state = %snapshot.state, "detail session closed");
        Ok(snapshot)
    }

    pub(crate) fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    /// Remove every session idle for at least `idle_timeout` as of `now`.
    pub(crate) fn evict_idle_at(&self, now: Instant) -> usize {
        let mut evicted = Vec::new();
        self.lock().retain(|_, active| {
            let idle = now.saturating_duration_since(active.last_seen()) >= self.idle_timeout;
            if idle {
                evicted.push(active.clone());
            }
            !idle
        });
        // Sessions are torn down here, outside the registry lock.
        for active in &evicted {
            info!(
                session_id = %active.session_id,
                estate_id = %active.estate_id,
                "idle detail session evicted"
            );
        }
        evicted.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<ActiveSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Periodically evict abandoned sessions until the returned task is aborted.
pub(crate) fn spawn_session_sweeper(sessions: Arc<SessionRegistry>) -> JoinHandle<()> {
    let period = (sessions.idle_timeout() / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = sessions.evict_idle();
            if evicted > 0 {
                debug!(evicted, open = sessions.len(), "session sweep finished");
            }
        }
    })
}

pub(crate) fn parse_point(raw: &str) -> Result<GeoPoint, String> {
    GeoPoint::parse_pair(raw).map_err(|err| format!("expected 'lat,lon': {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use estate_access::listings::EstateCatalog;

    fn open_sample(registry: &SessionRegistry) -> (String, PushLocationSource) {
        let catalog = EstateCatalog::sample().expect("bundled catalog parses");
        let estate = catalog.get("1").expect("sample estate");
        let active = registry
            .open(estate, 30.0, WatchOptions::default())
            .expect("session opens");
        (active.session_id.clone(), active.source.clone())
    }

    #[tokio::test]
    async fn idle_session_is_evicted_and_unsubscribed() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let (session_id, source) = open_sample(&registry);
        assert!(source.has_subscriber());

        assert_eq!(registry.evict_idle_at(Instant::now()), 0);
        assert_eq!(registry.len(), 1);

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(registry.evict_idle_at(later), 1);
        assert_eq!(registry.len(), 0);
        assert!(!source.has_subscriber());
        assert!(matches!(
            registry.get(&session_id),
            Err(AppError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn lookups_keep_a_session_alive() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let (session_id, source) = open_sample(&registry);
        let opened_at = Instant::now();

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.get(&session_id).expect("session still open");

        // Idle for exactly the timeout as measured from open, but not from the lookup.
        assert_eq!(
            registry.evict_idle_at(opened_at + Duration::from_secs(60)),
            0
        );
        assert!(source.has_subscriber());
    }

    #[tokio::test]
    async fn opening_a_session_sweeps_abandoned_ones() {
        let registry = SessionRegistry::new(Duration::from_millis(10));
        let (_, abandoned) = open_sample(&registry);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let (_, fresh) = open_sample(&registry);

        assert_eq!(registry.len(), 1);
        assert!(!abandoned.has_subscriber());
        assert!(fresh.has_subscriber());
    }
}
