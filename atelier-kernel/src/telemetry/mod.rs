//! Canal télémétrie : décodage des trames, machine d'état de connexion,
//! boucle de reconnexion et transport MQTT.

pub mod channel;
pub mod codec;
pub mod connection;
pub mod mqtt;

pub use channel::{
    ChannelHandle, ChannelStats, ChannelStatsSnapshot, Endpoint, Frame, FrameSource, TelemetryChannel,
    Transport, TransportError,
};
pub use codec::{decode_frame, decode_value, DecodeError};
pub use connection::{ConnectionState, Lifecycle};
pub use mqtt::MqttTransport;
