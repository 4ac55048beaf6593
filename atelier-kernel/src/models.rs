/**
 * MODÈLE USINE - Entités machines, lignes de production et événements télémétrie
 *
 * RÔLE : Types partagés entre le store, le moteur de maintenance, le canal
 * télémétrie et l'API REST.
 *
 * INVARIANT : une machine appartient à exactement une ligne ; le statut d'une
 * ligne est toujours dérivé, jamais posé directement.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Statut opérationnel d'une machine tel que remonté par la télémétrie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Running,
    Maintenance,
    Offline,
    Stopped,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Running => "running",
            MachineStatus::Maintenance => "maintenance",
            MachineStatus::Offline => "offline",
            MachineStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Famille de machine (purement descriptif)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineKind {
    Stamping,
    Welding,
    Cnc,
    Assembly,
    Painting,
    #[serde(other)]
    Other,
}

/// Statut agrégé d'une ligne de production
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Running,
    Warning,
    Stopped,
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LineStatus::Running => "running",
            LineStatus::Warning => "warning",
            LineStatus::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub kind: MachineKind,
    pub status: MachineStatus,
    pub temperature: f64,   // °C
    pub vibration: f64,     // Hz
    pub efficiency: f64,    // %
    #[serde(with = "time::serde::rfc3339")]
    pub last_maintenance: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub next_maintenance: OffsetDateTime,
    /// Dernier événement télémétrie appliqué (None tant qu'aucun n'est arrivé)
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionLine {
    pub id: String,
    pub name: String,
    pub member_machine_ids: Vec<String>,
    pub derived_status: LineStatus,
    pub color_tag: String,
}

/// Mise à jour (éventuellement partielle) d'une machine
#[derive(Debug, Clone, PartialEq)]
pub struct MachineStatusEvent {
    pub machine_id: String,
    pub status: MachineStatus,
    pub temperature: Option<f64>,
    pub vibration: Option<f64>,
    pub efficiency: Option<f64>,
}

impl MachineStatusEvent {
    pub fn new(machine_id: impl Into<String>, status: MachineStatus) -> Self {
        Self {
            machine_id: machine_id.into(),
            status,
            temperature: None,
            vibration: None,
            efficiency: None,
        }
    }

    pub fn with_metrics(
        mut self,
        temperature: Option<f64>,
        vibration: Option<f64>,
        efficiency: Option<f64>,
    ) -> Self {
        self.temperature = temperature;
        self.vibration = vibration;
        self.efficiency = efficiency;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub message: String,
}

/// Événement télémétrie décodé
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    MachineStatus(MachineStatusEvent),
    Alert(AlertEvent),
}
