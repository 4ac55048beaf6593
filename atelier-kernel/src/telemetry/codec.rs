//! Décodage des trames télémétrie (JSON texte) en événements typés.
//!
//! Une trame illisible est une erreur que le canal journalise puis jette;
//! un `type` inconnu n'est pas une erreur, juste `Ok(None)`.

use crate::models::{AlertEvent, MachineStatus, MachineStatusEvent, TelemetryEvent};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("invalid telemetry JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Format fil : `{"type": "machineStatus", ...}` ou `{"type": "alert", ...}`
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireMessage {
    #[serde(rename = "machineStatus")]
    MachineStatus {
        #[serde(rename = "machineId")]
        machine_id: String,
        status: MachineStatus,
        temperature: Option<f64>,
        vibration: Option<f64>,
        efficiency: Option<f64>,
    },
    #[serde(rename = "alert")]
    Alert { message: String },
    #[serde(other)]
    Unknown,
}

impl WireMessage {
    fn into_event(self) -> Option<TelemetryEvent> {
        match self {
            WireMessage::MachineStatus { machine_id, status, temperature, vibration, efficiency } => {
                Some(TelemetryEvent::MachineStatus(MachineStatusEvent {
                    machine_id,
                    status,
                    temperature,
                    vibration,
                    efficiency,
                }))
            }
            WireMessage::Alert { message } => Some(TelemetryEvent::Alert(AlertEvent { message })),
            WireMessage::Unknown => None,
        }
    }
}

pub fn decode_frame(frame: &[u8]) -> Result<Option<TelemetryEvent>, DecodeError> {
    let text = std::str::from_utf8(frame)?;
    let msg: WireMessage = serde_json::from_str(text)?;
    Ok(msg.into_event())
}

/// Même décodage, depuis une valeur JSON déjà parsée (ex: tableau de resync)
pub fn decode_value(value: serde_json::Value) -> Result<Option<TelemetryEvent>, DecodeError> {
    let msg: WireMessage = serde_json::from_value(value)?;
    Ok(msg.into_event())
}
