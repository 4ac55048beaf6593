/*!
Test Harness pour le kernel atelier

Monte un kernel complet sans broker ni réseau :
- contexte usine sur l'implantation par défaut
- cache résilient branché sur un MockFetcher
- canal télémétrie branché sur un MockBroker
- attente bornée des effets asynchrones
*/

use crate::mock_fetcher::MockFetcher;
use crate::mock_transport::MockBroker;
use anyhow::Result;
use atelier_kernel::cache::{CacheResilienceManager, CacheStorage, Url};
use atelier_kernel::config::LayoutConf;
use atelier_kernel::context::{event_handler, new_state, FactoryContext, Shared};
use atelier_kernel::health::{HealthTracker, KernelHealth};
use atelier_kernel::models::{LineStatus, Machine};
use atelier_kernel::sync::{BackgroundSync, SyncOutcome, SYNC_TAG};
use atelier_kernel::telemetry::{ChannelHandle, ConnectionState, Endpoint, TelemetryChannel};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

pub const TEST_ORIGIN: &str = "http://factory.test";
pub const TEST_CACHE_VERSION: &str = "factory-dashboard-test";

const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct TestHarness {
    pub broker: MockBroker,
    pub fetcher: MockFetcher,
    pub ctx: Shared<FactoryContext>,
    pub cache: Arc<CacheResilienceManager<MockFetcher>>,
    pub health: HealthTracker,
    channel: Option<ChannelHandle>,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_layout(&LayoutConf::default())
    }

    pub fn with_layout(layout: &LayoutConf) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let health = HealthTracker::new();
        let ctx = FactoryContext::from_layout(layout, health.clone(), OffsetDateTime::now_utc())?;
        let fetcher = MockFetcher::new();
        let cache = Arc::new(CacheResilienceManager::new(
            Arc::new(CacheStorage::new()),
            Arc::new(fetcher.clone()),
            TEST_CACHE_VERSION,
            Url::parse(TEST_ORIGIN)?,
        ));

        Ok(Self {
            broker: MockBroker::new(),
            fetcher,
            ctx: new_state(ctx),
            cache,
            health,
            channel: None,
        })
    }

    /// Lance le canal télémétrie sur le broker simulé
    pub fn start_channel(&mut self, reconnect_delay: Duration) {
        let mut channel = TelemetryChannel::new(self.broker.transport(), reconnect_delay);
        channel.on_message(event_handler(self.ctx.clone()));
        let handle = channel.spawn(Endpoint {
            host: "mock-broker".into(),
            port: 1883,
            topic: "atelier/telemetry@v1".into(),
            client_id: "atelier-devkit".into(),
            keep_alive: Duration::from_secs(15),
        });
        self.health.attach_channel(handle.subscribe(), handle.stats());
        self.channel = Some(handle);
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.channel.as_ref().map(ChannelHandle::state)
    }

    /// Attend que le canal atteigne `expected`
    pub async fn wait_for_state(&self, expected: ConnectionState, timeout: Duration) -> Result<()> {
        let Some(handle) = self.channel.as_ref() else {
            anyhow::bail!("telemetry channel not started");
        };
        let mut states = handle.subscribe();
        tokio::time::timeout(timeout, states.wait_for(|s| *s == expected))
            .await
            .map_err(|_| anyhow::anyhow!("timeout waiting for channel state {expected}"))??;
        Ok(())
    }

    /// Publie un message et attend qu'il soit consommé par le canal
    pub async fn send(&self, message: &Value) -> Result<()> {
        self.send_raw(serde_json::to_vec(message)?).await
    }

    /// Publie une trame brute (éventuellement invalide) et attend sa consommation
    pub async fn send_raw(&self, frame: impl Into<Vec<u8>>) -> Result<()> {
        let before = self.frames_seen();
        self.broker.publish(frame)?;
        self.wait_until(Duration::from_secs(1), || self.frames_seen() > before).await
    }

    fn frames_seen(&self) -> u64 {
        self.channel
            .as_ref()
            .map(|handle| handle.stats().snapshot().frames_handled)
            .unwrap_or(0)
    }

    /// Attend (en sondant) que `condition` devienne vraie
    pub async fn wait_until<C>(&self, timeout: Duration, condition: C) -> Result<()>
    where
        C: Fn() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while !condition() {
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("condition not met within {timeout:?}");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    pub fn machine(&self, machine_id: &str) -> Option<Machine> {
        self.ctx.lock().store.snapshot(machine_id)
    }

    pub fn line_status(&self, line_id: &str) -> Option<LineStatus> {
        self.ctx.lock().store.line(line_id).map(|l| l.derived_status)
    }

    pub fn notification_bodies(&self) -> Vec<String> {
        self.ctx.lock().notifications.current().into_iter().map(|n| n.body).collect()
    }

    pub fn health(&self) -> KernelHealth {
        let epoch = self.cache.active_epoch();
        let ctx = self.ctx.lock();
        self.health.get_health(&ctx.store, epoch)
    }

    /// Installe puis active le manifest donné (chemins relatifs à TEST_ORIGIN)
    pub async fn install_cache(&self, manifest: &[&str]) -> Result<()> {
        let manifest: Vec<String> = manifest.iter().map(|s| s.to_string()).collect();
        self.cache.install(&manifest).await?;
        self.cache.activate();
        Ok(())
    }

    pub async fn sync(&self) -> SyncOutcome {
        BackgroundSync::new(self.cache.clone(), self.ctx.clone()).trigger(SYNC_TAG).await
    }

    /// Arrête le canal (annule un éventuel timer de reconnexion)
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.channel.take() {
            handle.teardown().await;
        }
        log::info!("[harness] shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::TelemetryMessageBuilder;
    use atelier_kernel::cache::ResponseSource;
    use atelier_kernel::cache::CacheRequest;
    use atelier_kernel::models::MachineStatus;

    #[tokio::test]
    async fn test_telemetry_flows_into_store() {
        let mut harness = TestHarness::new().unwrap();
        harness.start_channel(Duration::from_secs(5));
        harness.wait_for_state(ConnectionState::Open, Duration::from_secs(1)).await.unwrap();

        harness
            .send(&TelemetryMessageBuilder::machine_status_with_metrics("weld-03", MachineStatus::Stopped, 95.0, 4.2, 61.0))
            .await
            .unwrap();
        assert_eq!(harness.line_status("line-b"), Some(LineStatus::Warning));
        assert_eq!(harness.machine("weld-03").unwrap().temperature, 95.0);

        harness.send(&TelemetryMessageBuilder::machine_status("weld-01", MachineStatus::Offline)).await.unwrap();
        assert_eq!(harness.line_status("line-b"), Some(LineStatus::Stopped));

        harness.send(&TelemetryMessageBuilder::alert("Welder 1 offline")).await.unwrap();
        harness.send(&TelemetryMessageBuilder::unknown("firmwareUpdate")).await.unwrap();
        harness.send_raw("{not json").await.unwrap();
        harness.send(&TelemetryMessageBuilder::machine_status("ghost-7", MachineStatus::Offline)).await.unwrap();

        assert_eq!(harness.notification_bodies(), vec!["Welder 1 offline"]);
        let health = harness.health();
        assert_eq!(health.events_applied, 2);
        assert_eq!(health.events_unknown_machine, 1);
        assert_eq!(health.frames_dropped, 1);
        assert_eq!(health.telemetry_status, "open");

        harness.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_send_waits_for_store_update_on_worker_threads() {
        let mut harness = TestHarness::new().unwrap();
        harness.start_channel(Duration::from_secs(5));
        harness.wait_for_state(ConnectionState::Open, Duration::from_secs(1)).await.unwrap();

        for (i, id) in ["cnc-01", "cnc-02", "cnc-03", "cnc-04"].into_iter().enumerate() {
            let status = if i % 2 == 0 { MachineStatus::Stopped } else { MachineStatus::Offline };
            harness.send(&TelemetryMessageBuilder::machine_status(id, status)).await.unwrap();
            assert_eq!(harness.machine(id).unwrap().status, status);
        }
        assert_eq!(harness.line_status("line-c"), Some(LineStatus::Stopped));

        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_broker_outage() {
        let mut harness = TestHarness::new().unwrap();
        harness.start_channel(Duration::from_secs(5));
        harness.wait_for_state(ConnectionState::Open, Duration::from_secs(1)).await.unwrap();

        harness.broker.set_refusing(true);
        harness.broker.drop_connection("broker restart");
        harness.wait_for_state(ConnectionState::ReconnectPending, Duration::from_secs(1)).await.unwrap();

        // 3 tentatives refusées à 5s d'intervalle
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(harness.broker.connect_attempts() >= 3);
        assert_eq!(harness.connection_state(), Some(ConnectionState::ReconnectPending));

        harness.broker.set_refusing(false);
        harness.wait_for_state(ConnectionState::Open, Duration::from_secs(6)).await.unwrap();
        harness.send(&TelemetryMessageBuilder::machine_status("press-02", MachineStatus::Maintenance)).await.unwrap();
        assert_eq!(harness.line_status("line-a"), Some(LineStatus::Stopped));

        harness.shutdown().await;
        assert_eq!(harness.connection_state(), None);
    }

    #[tokio::test]
    async fn test_offline_dashboard_and_resync() {
        let harness = TestHarness::new().unwrap();
        harness.fetcher.route_text("http://factory.test/", "text/html", "<h1>dashboard</h1>");
        harness.fetcher.route_text("http://factory.test/app.js", "text/javascript", "boot()");
        harness.fetcher.route_json(
            "http://factory.test/api/machines",
            &TelemetryMessageBuilder::machines_snapshot(&[("cnc-01", MachineStatus::Offline), ("cnc-02", MachineStatus::Running)]),
        );
        harness.install_cache(&["/", "/app.js"]).await.unwrap();

        assert_eq!(harness.sync().await, SyncOutcome::Completed { applied: 2, skipped: 0 });
        assert_eq!(harness.line_status("line-c"), Some(LineStatus::Stopped));

        harness.fetcher.set_offline(true);
        let calls = harness.fetcher.call_count();
        let root = CacheRequest::get(harness.cache.resolve("/").unwrap());
        let served = harness.cache.handle(&root).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
        assert_eq!(harness.fetcher.call_count(), calls);

        assert!(matches!(harness.sync().await, SyncOutcome::Failed { .. }));
        assert_eq!(harness.health().cache_epoch.as_deref(), Some(TEST_CACHE_VERSION));
    }
}
