use crate::models::LineStatus;
use crate::store::{Applied, FactoryStateStore};
use crate::telemetry::{ChannelStats, ChannelStatsSnapshot, ConnectionState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub machines_tracked: u32,
    pub lines_tracked: u32,
    pub lines_stopped: u32,
    pub memory_usage_mb: f32,
    pub telemetry_status: String,
    pub telemetry_connect_attempts: u64,
    pub telemetry_reconnects: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub events_applied: u64,
    pub events_unknown_machine: u64,
    pub alerts_raised: u64,
    pub cache_epoch: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    applied: AtomicU64,
    unknown: AtomicU64,
    alerts: AtomicU64,
}

struct ChannelProbe {
    state: watch::Receiver<ConnectionState>,
    stats: Arc<ChannelStats>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
    channel: Arc<Mutex<Option<ChannelProbe>>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
            channel: Arc::new(Mutex::new(None)),
        }
    }

    /// Branche l'état et les compteurs du canal télémétrie
    pub fn attach_channel(&self, state: watch::Receiver<ConnectionState>, stats: Arc<ChannelStats>) {
        *self.channel.lock() = Some(ChannelProbe { state, stats });
    }

    pub fn record(&self, applied: &Applied) {
        let counter = match applied {
            Applied::Machine { .. } => &self.counters.applied,
            Applied::UnknownMachine(_) => &self.counters.unknown,
            Applied::Alert(_) => &self.counters.alerts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn telemetry_status(&self) -> Option<ConnectionState> {
        self.channel.lock().as_ref().map(|probe| *probe.state.borrow())
    }

    pub fn get_health(&self, store: &FactoryStateStore, cache_epoch: Option<String>) -> KernelHealth {
        let (status, stats) = match self.channel.lock().as_ref() {
            Some(probe) => (probe.state.borrow().to_string(), probe.stats.snapshot()),
            None => ("detached".to_string(), ChannelStatsSnapshot::default()),
        };
        let lines = store.all_lines();

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            machines_tracked: store.len() as u32,
            lines_tracked: lines.len() as u32,
            lines_stopped: lines.iter().filter(|l| l.derived_status == LineStatus::Stopped).count() as u32,
            memory_usage_mb: get_memory_usage_mb(),
            telemetry_status: status,
            telemetry_connect_attempts: stats.connect_attempts,
            telemetry_reconnects: stats.reconnects_scheduled,
            frames_received: stats.frames_received,
            frames_dropped: stats.frames_dropped,
            events_applied: self.counters.applied.load(Ordering::Relaxed),
            events_unknown_machine: self.counters.unknown.load(Ordering::Relaxed),
            alerts_raised: self.counters.alerts.load(Ordering::Relaxed),
            cache_epoch,
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConf;
    use crate::models::MachineStatus;
    use time::macros::datetime;

    fn store() -> FactoryStateStore {
        FactoryStateStore::from_layout(&LayoutConf::default(), datetime!(2026-03-02 8:00 UTC)).unwrap()
    }

    #[test]
    fn test_health_without_channel() {
        let tracker = HealthTracker::new();
        let health = tracker.get_health(&store(), None);
        assert_eq!(health.machines_tracked, 12);
        assert_eq!(health.lines_tracked, 3);
        assert_eq!(health.telemetry_status, "detached");
        assert_eq!(health.telemetry_reconnects, 0);
        assert!(tracker.telemetry_status().is_none());
    }

    #[test]
    fn test_counters_and_channel_probe() {
        let tracker = HealthTracker::new();
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        tracker.attach_channel(rx, Arc::new(ChannelStats::default()));

        tracker.record(&Applied::Machine { machine_id: "press-01".into(), line_changed: false });
        tracker.record(&Applied::Machine { machine_id: "press-02".into(), line_changed: true });
        tracker.record(&Applied::UnknownMachine("ghost".into()));
        tracker.record(&Applied::Alert("hot".into()));
        tx.send(ConnectionState::Open).unwrap();

        let mut s = store();
        s.apply_machine_status(
            &crate::models::MachineStatusEvent::new("weld-01", MachineStatus::Offline),
            datetime!(2026-03-02 8:01 UTC),
        );
        let health = tracker.get_health(&s, Some("factory-dashboard-v1".into()));
        assert_eq!(health.events_applied, 2);
        assert_eq!(health.events_unknown_machine, 1);
        assert_eq!(health.alerts_raised, 1);
        assert_eq!(health.lines_stopped, 1);
        assert_eq!(health.telemetry_status, "open");
        assert_eq!(health.cache_epoch.as_deref(), Some("factory-dashboard-v1"));
        assert_eq!(tracker.telemetry_status(), Some(ConnectionState::Open));
    }
}
