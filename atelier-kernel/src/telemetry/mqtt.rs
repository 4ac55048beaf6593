use super::channel::{Endpoint, Frame, FrameSource, Transport, TransportError};
use crate::config::MqttConf;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tracing::debug;

impl Endpoint {
    pub fn from_mqtt(conf: &MqttConf) -> Self {
        Self {
            host: conf.host.clone(),
            port: conf.port,
            topic: conf.topic.clone(),
            client_id: conf.client_id.clone(),
            keep_alive: Duration::from_secs(conf.keep_alive_secs),
        }
    }
}

/// Transport de production : une connexion MQTT neuve par tentative.
/// La reconnexion est pilotée par le canal, pas par l'eventloop rumqttc.
#[derive(Debug, Default)]
pub struct MqttTransport;

pub struct MqttSession {
    // garder le client vivant maintient la requête d'abonnement
    _client: AsyncClient,
    eventloop: EventLoop,
}

impl Transport for MqttTransport {
    type Session = MqttSession;

    async fn connect(&mut self, endpoint: &Endpoint) -> Result<MqttSession, TransportError> {
        let mut opts = MqttOptions::new(&endpoint.client_id, &endpoint.host, endpoint.port);
        opts.set_keep_alive(endpoint.keep_alive);
        opts.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Connect(format!("broker refused: {:?}", ack.code)));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(TransportError::Connect(e.to_string())),
            }
        }

        client
            .subscribe(endpoint.topic.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Connect(format!("subscribe {}: {e}", endpoint.topic)))?;
        debug!("[mqtt] subscribed to {}", endpoint.topic);

        Ok(MqttSession { _client: client, eventloop })
    }
}

impl FrameSource for MqttSession {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    return Some(Ok(publish.payload.to_vec()));
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(TransportError::Lost(e.to_string()))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_config() {
        let ep = Endpoint::from_mqtt(&MqttConf::default());
        assert_eq!(ep.host, "localhost");
        assert_eq!(ep.port, 1883);
        assert_eq!(ep.topic, "atelier/telemetry@v1");
        assert_eq!(ep.keep_alive, Duration::from_secs(15));
    }
}
