/*!
Broker télémétrie simulé

Remplace le transport MQTT du kernel dans les tests : chaque tentative de
connexion du canal ouvre une session pilotée par le test (trames, coupure,
fermeture propre, refus).
*/

use anyhow::Result;
use atelier_kernel::telemetry::{Endpoint, Frame, FrameSource, Transport, TransportError};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

enum Delivery {
    Frame(Frame),
    Lost(String),
}

#[derive(Default)]
struct BrokerInner {
    refusing: bool,
    live: Option<mpsc::UnboundedSender<Delivery>>,
    connect_attempts: usize,
    subscriptions: Vec<String>,
}

/// Poignée côté test sur le broker simulé
#[derive(Clone, Default)]
pub struct MockBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport à donner au TelemetryChannel
    pub fn transport(&self) -> MockTransport {
        MockTransport { broker: self.clone() }
    }

    /// Refuse (ou accepte de nouveau) les connexions
    pub fn set_refusing(&self, refusing: bool) {
        lock(&self.inner).refusing = refusing;
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner).live.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.inner).connect_attempts
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.inner).subscriptions.clone()
    }

    /// Pousse une trame brute sur la session ouverte
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let inner = lock(&self.inner);
        let Some(tx) = inner.live.as_ref() else {
            anyhow::bail!("no open telemetry session");
        };
        tx.send(Delivery::Frame(payload.into()))
            .map_err(|_| anyhow::anyhow!("telemetry session already gone"))?;
        log::info!("[mock-broker] frame published");
        Ok(())
    }

    pub fn publish_json(&self, message: &Value) -> Result<()> {
        self.publish(serde_json::to_vec(message)?)
    }

    /// Coupe la session courante sur une erreur transport
    pub fn drop_connection(&self, reason: &str) {
        if let Some(tx) = lock(&self.inner).live.take() {
            let _ = tx.send(Delivery::Lost(reason.to_string()));
            log::info!("[mock-broker] connection dropped: {reason}");
        }
    }

    /// Ferme proprement la session courante
    pub fn close(&self) {
        if lock(&self.inner).live.take().is_some() {
            log::info!("[mock-broker] connection closed");
        }
    }
}

pub struct MockTransport {
    broker: MockBroker,
}

pub struct MockSession {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Transport for MockTransport {
    type Session = MockSession;

    async fn connect(&mut self, endpoint: &Endpoint) -> Result<MockSession, TransportError> {
        let mut inner = lock(&self.broker.inner);
        inner.connect_attempts += 1;
        if inner.refusing {
            return Err(TransportError::Connect("mock broker refusing connections".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.live = Some(tx);
        inner.subscriptions.push(endpoint.topic.clone());
        Ok(MockSession { rx })
    }
}

impl FrameSource for MockSession {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        match self.rx.recv().await? {
            Delivery::Frame(frame) => Some(Ok(frame)),
            Delivery::Lost(reason) => Some(Err(TransportError::Lost(reason))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "mock".into(),
            port: 0,
            topic: "atelier/telemetry@v1".into(),
            client_id: "devkit".into(),
            keep_alive: Duration::from_secs(15),
        }
    }

    #[tokio::test]
    async fn test_session_receives_frames_then_closes() {
        let broker = MockBroker::new();
        let mut transport = broker.transport();
        let mut session = transport.connect(&endpoint()).await.unwrap();
        assert!(broker.is_connected());
        assert_eq!(broker.subscriptions(), vec!["atelier/telemetry@v1"]);

        broker.publish("hello").unwrap();
        assert_eq!(session.next_frame().await.unwrap().unwrap(), b"hello");

        broker.close();
        assert!(session.next_frame().await.is_none());
        assert!(broker.publish("late").is_err());
    }

    #[tokio::test]
    async fn test_refusal_and_drop() {
        let broker = MockBroker::new();
        let mut transport = broker.transport();
        broker.set_refusing(true);
        assert!(transport.connect(&endpoint()).await.is_err());

        broker.set_refusing(false);
        let mut session = transport.connect(&endpoint()).await.unwrap();
        broker.drop_connection("cable pulled");
        assert!(matches!(session.next_frame().await, Some(Err(TransportError::Lost(_)))));
        assert_eq!(broker.connect_attempts(), 2);
    }
}
