/*!
Construction des messages télémétrie au format fil

Produit les objets JSON tels qu'émis par les automates de l'atelier.
*/

use atelier_kernel::models::MachineStatus;
use serde_json::{json, Value};

pub struct TelemetryMessageBuilder;

impl TelemetryMessageBuilder {
    pub fn machine_status(machine_id: &str, status: MachineStatus) -> Value {
        json!({
            "type": "machineStatus",
            "machineId": machine_id,
            "status": status.as_str(),
        })
    }

    pub fn machine_status_with_metrics(
        machine_id: &str,
        status: MachineStatus,
        temperature: f64,
        vibration: f64,
        efficiency: f64,
    ) -> Value {
        let mut message = Self::machine_status(machine_id, status);
        message["temperature"] = json!(temperature);
        message["vibration"] = json!(vibration);
        message["efficiency"] = json!(efficiency);
        message
    }

    pub fn alert(message: &str) -> Value {
        json!({ "type": "alert", "message": message })
    }

    /// Message d'un type que le kernel ne connaît pas
    pub fn unknown(kind: &str) -> Value {
        json!({ "type": kind, "payload": {} })
    }

    /// Instantané amont servi sur /api/machines (objets sans "type")
    pub fn machines_snapshot(entries: &[(&str, MachineStatus)]) -> Value {
        Value::Array(
            entries
                .iter()
                .map(|(id, status)| json!({ "machineId": id, "status": status.as_str() }))
                .collect(),
        )
    }
}
