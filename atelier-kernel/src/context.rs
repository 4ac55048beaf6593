use crate::config::LayoutConf;
use crate::health::HealthTracker;
use crate::models::TelemetryEvent;
use crate::notifications::NotificationGateway;
use crate::store::{Applied, FactoryStateStore, StoreError};
use parking_lot::Mutex;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Contexte unique du process : store, notifications et santé
pub struct FactoryContext {
    pub store: FactoryStateStore,
    pub notifications: NotificationGateway,
    pub health: HealthTracker,
}

impl FactoryContext {
    pub fn new(store: FactoryStateStore, health: HealthTracker) -> Self {
        Self { store, notifications: NotificationGateway::default(), health }
    }

    pub fn from_layout(layout: &LayoutConf, health: HealthTracker, now: OffsetDateTime) -> Result<Self, StoreError> {
        Ok(Self::new(FactoryStateStore::from_layout(layout, now)?, health))
    }

    /// Applique un événement; les alertes partent vers la gateway
    pub fn handle_event(&mut self, event: TelemetryEvent, now: OffsetDateTime) -> Applied {
        let applied = self.store.apply(event, now);
        match &applied {
            Applied::Machine { machine_id, line_changed: true } => {
                if let Some(line) = self.store.line_of(machine_id) {
                    info!("[store] {} is now {}", line.id, line.derived_status);
                }
            }
            Applied::Machine { .. } => {}
            Applied::UnknownMachine(id) => debug!("[store] ignoring event for unknown machine {id}"),
            Applied::Alert(message) => {
                self.notifications.show_alert(message, now);
            }
        }
        self.health.record(&applied);
        applied
    }
}

/// Handler du canal télémétrie : un événement = une prise de verrou
pub fn event_handler(ctx: Shared<FactoryContext>) -> impl FnMut(TelemetryEvent) + Send + 'static {
    move |event| {
        ctx.lock().handle_event(event, OffsetDateTime::now_utc());
    }
}
