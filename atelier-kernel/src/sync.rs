/**
 * BACKGROUND SYNC - Tâche différée "factory-data-sync"
 *
 * RÔLE : Resynchroniser le store depuis l'instantané machines amont
 * quand le réseau revient.
 *
 * FONCTIONNEMENT :
 * - GET {origin}/api/machines via le cache manager (réseau d'abord)
 * - Seule une réponse réseau est appliquée : une copie cache ne doit
 *   jamais faire reculer l'état
 * - Chaque élément est décodé comme une trame télémétrie; un objet sans
 *   "type" est lu comme machineStatus
 * - Toute erreur finit dans SyncOutcome, jamais fatale
 */

use crate::cache::{CacheRequest, CacheResilienceManager, Destination, Fetcher, ResponseSource};
use crate::context::{FactoryContext, Shared};
use crate::models::TelemetryEvent;
use crate::store::Applied;
use crate::telemetry::decode_value;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

pub const SYNC_TAG: &str = "factory-data-sync";
pub const MACHINES_PATH: &str = "/api/machines";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed { applied: usize, skipped: usize },
    Failed { reason: String },
    UnknownTag { tag: String },
}

pub struct BackgroundSync<F: Fetcher> {
    manager: Arc<CacheResilienceManager<F>>,
    ctx: Shared<FactoryContext>,
}

impl<F: Fetcher> Clone for BackgroundSync<F> {
    fn clone(&self) -> Self {
        Self { manager: self.manager.clone(), ctx: self.ctx.clone() }
    }
}

impl<F: Fetcher> BackgroundSync<F> {
    pub fn new(manager: Arc<CacheResilienceManager<F>>, ctx: Shared<FactoryContext>) -> Self {
        Self { manager, ctx }
    }

    pub async fn trigger(&self, tag: &str) -> SyncOutcome {
        if tag != SYNC_TAG {
            warn!("[sync] unknown sync tag '{tag}'");
            return SyncOutcome::UnknownTag { tag: tag.to_string() };
        }
        let outcome = match self.resync().await {
            Ok((applied, skipped)) => SyncOutcome::Completed { applied, skipped },
            Err(reason) => SyncOutcome::Failed { reason },
        };
        match &outcome {
            SyncOutcome::Completed { applied, skipped } => {
                info!("[sync] {SYNC_TAG} done: {applied} applied, {skipped} skipped")
            }
            SyncOutcome::Failed { reason } => warn!("[sync] {SYNC_TAG} failed: {reason}"),
            SyncOutcome::UnknownTag { .. } => {}
        }
        outcome
    }

    async fn resync(&self) -> Result<(usize, usize), String> {
        let url = self.manager.resolve(MACHINES_PATH).map_err(|e| e.to_string())?;
        let request = CacheRequest::get(url).with_destination(Destination::Other);
        let response = self.manager.handle(&request).await.map_err(|e| e.to_string())?;

        if response.source != ResponseSource::Network {
            return Err("upstream unreachable, cached snapshot not applied".into());
        }
        if !(200..300).contains(&response.status) {
            return Err(format!("upstream answered {}", response.status));
        }

        let items: Vec<Value> =
            serde_json::from_slice(&response.body).map_err(|e| format!("invalid snapshot: {e}"))?;

        let (mut applied, mut skipped) = (0, 0);
        for mut item in items {
            if let Value::Object(fields) = &mut item {
                fields.entry("type").or_insert_with(|| Value::String("machineStatus".into()));
            }
            // un instantané ne rejoue pas les alertes
            let event = match decode_value(item) {
                Ok(Some(event @ TelemetryEvent::MachineStatus(_))) => event,
                Ok(Some(TelemetryEvent::Alert(_)) | None) | Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            match self.ctx.lock().handle_event(event, OffsetDateTime::now_utc()) {
                Applied::Machine { .. } => applied += 1,
                Applied::UnknownMachine(_) | Applied::Alert(_) => skipped += 1,
            }
        }
        Ok((applied, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStorage, FetchError, FetchedResponse, Url};
    use crate::config::LayoutConf;
    use crate::context::new_state;
    use crate::health::HealthTracker;
    use crate::models::MachineStatus;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Upstream {
        body: Mutex<String>,
        offline: AtomicBool,
    }

    impl Fetcher for Upstream {
        async fn fetch(&self, _request: &CacheRequest) -> Result<FetchedResponse, FetchError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(FetchError::Network("connection refused".into()));
            }
            Ok(FetchedResponse::ok("application/json", self.body.lock().clone()))
        }
    }

    fn setup(body: &str) -> (BackgroundSync<Upstream>, Arc<Upstream>, Shared<FactoryContext>) {
        let upstream = Arc::new(Upstream { body: Mutex::new(body.into()), offline: AtomicBool::new(false) });
        let manager = Arc::new(CacheResilienceManager::new(
            Arc::new(CacheStorage::new()),
            upstream.clone(),
            "v1",
            Url::parse("http://factory.local").unwrap(),
        ));
        let ctx = new_state(
            FactoryContext::from_layout(&LayoutConf::default(), HealthTracker::new(), OffsetDateTime::now_utc())
                .unwrap(),
        );
        (BackgroundSync::new(manager, ctx.clone()), upstream, ctx)
    }

    #[tokio::test]
    async fn test_sync_applies_network_snapshot() {
        let (sync, _, ctx) = setup(
            r#"[
                {"type":"machineStatus","machineId":"press-02","status":"offline"},
                {"machineId":"weld-01","status":"stopped","temperature":91.5},
                {"machineId":"ghost","status":"running"},
                {"type":"telemetryV9"},
                {"type":"alert","message":"press 2 offline"},
                42
            ]"#,
        );
        assert_eq!(sync.trigger(SYNC_TAG).await, SyncOutcome::Completed { applied: 2, skipped: 4 });

        let guard = ctx.lock();
        assert!(guard.notifications.current().is_empty());
        assert_eq!(guard.health.get_health(&guard.store, None).alerts_raised, 0);
        assert_eq!(guard.store.snapshot("press-02").unwrap().status, MachineStatus::Offline);
        let weld = guard.store.snapshot("weld-01").unwrap();
        assert_eq!(weld.status, MachineStatus::Stopped);
        assert_eq!(weld.temperature, 91.5);
    }

    #[tokio::test]
    async fn test_cached_snapshot_is_never_applied() {
        let (sync, upstream, ctx) = setup(r#"[{"machineId":"press-01","status":"maintenance"}]"#);
        sync.manager.install(&[]).await.unwrap();
        sync.manager.activate();
        sync.trigger(SYNC_TAG).await;
        sync.manager.settle().await;

        ctx.lock().handle_event(
            crate::models::TelemetryEvent::MachineStatus(crate::models::MachineStatusEvent::new(
                "press-01",
                MachineStatus::Running,
            )),
            OffsetDateTime::now_utc(),
        );
        upstream.offline.store(true, Ordering::SeqCst);

        let outcome = sync.trigger(SYNC_TAG).await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        assert_eq!(ctx.lock().store.snapshot("press-01").unwrap().status, MachineStatus::Running);
    }

    #[tokio::test]
    async fn test_unknown_tag_and_bad_payload() {
        let (sync, _, _) = setup("not json");
        assert_eq!(sync.trigger("other-sync").await, SyncOutcome::UnknownTag { tag: "other-sync".into() });
        assert!(matches!(sync.trigger(SYNC_TAG).await, SyncOutcome::Failed { reason } if reason.starts_with("invalid snapshot")));
    }
}
