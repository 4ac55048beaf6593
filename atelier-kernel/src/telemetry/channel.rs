/**
 * TELEMETRY CHANNEL - Canal de messages auto-réparant vers la source télémétrie
 *
 * FONCTIONNEMENT :
 * - connect(endpoint) : Closed -> Connecting -> Open
 * - chaque trame est décodée puis livrée au handler unique, dans l'ordre reçu
 * - trame illisible = jetée + log, le canal continue
 * - perte de connexion / échec : ReconnectPending, puis nouvelle tentative
 *   après un délai FIXE, indéfiniment (pas de backoff, pas de plafond)
 * - teardown via ChannelHandle : annule l'attente en cours, état Closed
 *
 * Rien n'est bufferisé entre deux connexions : un message en vol au moment
 * de la coupure est perdu.
 */

use super::codec::decode_frame;
use super::connection::{ConnectionState, Lifecycle};
use crate::models::TelemetryEvent;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type Frame = Vec<u8>;

/// Paramètres de connexion à la source télémétrie
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connection lost: {0}")]
    Lost(String),
}

/// Ouvre des sessions vers un endpoint
pub trait Transport: Send + 'static {
    type Session: FrameSource;

    fn connect(
        &mut self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}

/// Session ouverte : `None` = fermée par le pair, `Some(Err)` = panne
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<Frame, TransportError>>> + Send;
}

#[derive(Debug, Default)]
pub struct ChannelStats {
    connect_attempts: AtomicU64,
    reconnects_scheduled: AtomicU64,
    frames_received: AtomicU64,
    frames_handled: AtomicU64,
    frames_dropped: AtomicU64,
    events_ignored: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStatsSnapshot {
    pub connect_attempts: u64,
    pub reconnects_scheduled: u64,
    pub frames_received: u64,
    /// Trames dont le traitement (décodage + handler) est terminé
    pub frames_handled: u64,
    pub frames_dropped: u64,
    pub events_ignored: u64,
}

impl ChannelStats {
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_handled: self.frames_handled.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

type Handler = Box<dyn FnMut(TelemetryEvent) + Send>;

pub struct TelemetryChannel<T: Transport> {
    transport: T,
    reconnect_delay: Duration,
    handler: Option<Handler>,
    state: watch::Sender<ConnectionState>,
    stats: Arc<ChannelStats>,
}

impl<T: Transport> TelemetryChannel<T> {
    pub fn new(transport: T, reconnect_delay: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            transport,
            reconnect_delay,
            handler: None,
            state,
            stats: Arc::new(ChannelStats::default()),
        }
    }

    /// Enregistre le consommateur unique (remplace le précédent)
    pub fn on_message<H>(&mut self, handler: H)
    where
        H: FnMut(TelemetryEvent) + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Vue en lecture seule de l'état de connexion
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        self.stats.clone()
    }

    fn transition(&self, event: Lifecycle) {
        let mut scheduled = false;
        let mut changed = None;
        self.state.send_if_modified(|state| {
            let next = state.next(event);
            scheduled = state.schedules_reconnect(event);
            if next == *state {
                return false;
            }
            changed = Some((*state, next));
            *state = next;
            true
        });
        if scheduled {
            ChannelStats::bump(&self.stats.reconnects_scheduled);
        }
        if let Some((from, to)) = changed {
            debug!("[telemetry] {from} -> {to} on {event:?}");
        }
    }

    fn dispatch(&mut self, frame: &[u8]) {
        ChannelStats::bump(&self.stats.frames_received);
        match decode_frame(frame) {
            Ok(Some(event)) => {
                if let Some(handler) = self.handler.as_mut() {
                    handler(event);
                }
            }
            Ok(None) => {
                ChannelStats::bump(&self.stats.events_ignored);
                debug!("[telemetry] ignoring event of unknown type");
            }
            Err(e) => {
                ChannelStats::bump(&self.stats.frames_dropped);
                warn!("[telemetry] dropping frame: {e}");
            }
        }
    }

    /// Boucle de vie du canal; rend la main au teardown (ou si le handle est lâché)
    pub async fn connect(mut self, endpoint: Endpoint, mut shutdown: watch::Receiver<bool>) {
        self.transition(Lifecycle::ConnectRequested);

        loop {
            ChannelStats::bump(&self.stats.connect_attempts);
            let attempt = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = self.transport.connect(&endpoint) => result,
            };

            match attempt {
                Ok(mut session) => {
                    self.transition(Lifecycle::Opened);
                    info!("[telemetry] connected to {}:{} ({})", endpoint.host, endpoint.port, endpoint.topic);

                    let lost = loop {
                        let next = tokio::select! {
                            biased;
                            _ = shutdown.changed() => None,
                            frame = session.next_frame() => Some(frame),
                        };
                        match next {
                            None => break None,
                            Some(Some(Ok(frame))) => {
                                self.dispatch(&frame);
                                ChannelStats::bump(&self.stats.frames_handled);
                            }
                            Some(Some(Err(e))) => {
                                warn!("[telemetry] {e}");
                                break Some(Lifecycle::Failed);
                            }
                            Some(None) => {
                                warn!("[telemetry] connection closed by peer");
                                break Some(Lifecycle::Closed);
                            }
                        }
                    };
                    match lost {
                        Some(event) => self.transition(event),
                        None => break,
                    }
                }
                Err(e) => {
                    warn!("[telemetry] {e}");
                    self.transition(Lifecycle::Failed);
                }
            }

            info!("[telemetry] reconnecting in {:?}", self.reconnect_delay);
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
            self.transition(Lifecycle::RetryElapsed);
        }

        self.transition(Lifecycle::TornDown);
        info!("[telemetry] channel torn down");
    }

    /// Lance le canal dans une task tokio
    pub fn spawn(self, endpoint: Endpoint) -> ChannelHandle {
        let (shutdown, rx) = watch::channel(false);
        let state = self.state();
        let stats = self.stats();
        let task = tokio::spawn(self.connect(endpoint, rx));
        ChannelHandle { shutdown, state, stats, task }
    }
}

/// Poignée sur un canal lancé; la lâcher revient à un teardown
pub struct ChannelHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<ChannelStats>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        self.stats.clone()
    }

    /// Arrêt explicite : annule le timer de reconnexion en attente
    pub async fn teardown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("[telemetry] channel task ended abnormally: {e}");
        }
    }
}
