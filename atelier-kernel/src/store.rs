/**
 * FACTORY STATE STORE - Modèle mémoire autoritaire des machines et lignes
 *
 * RÔLE : Applique les événements télémétrie aux machines et recalcule
 * immédiatement le statut dérivé de la ligne propriétaire.
 *
 * FONCTIONNEMENT :
 * - Machines indexées par id, lignes conservées dans l'ordre de création
 * - Index machine -> ligne construit une seule fois (membres figés)
 * - Machine inconnue = événement ignoré (jamais de création implicite)
 * - Mise à jour partielle : les métriques absentes gardent leur valeur
 */

use crate::config::LayoutConf;
use crate::models::{
    LineStatus, Machine, MachineStatus, MachineStatusEvent, ProductionLine, TelemetryEvent,
};
use std::collections::{HashMap, HashSet};
use time::{Duration, OffsetDateTime};
use tracing::debug;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("duplicate machine id: {0}")]
    DuplicateMachine(String),
    #[error("duplicate line id: {0}")]
    DuplicateLine(String),
    #[error("line {0} has no machines")]
    EmptyLine(String),
    #[error("maintenance window of machine {0} is out of range")]
    InvalidMaintenanceWindow(String),
}

fn days(n: i64) -> Option<Duration> {
    n.checked_mul(86_400).map(Duration::seconds)
}

/// Dernière et prochaine maintenance; None si hors des bornes de `OffsetDateTime`
fn maintenance_window(now: OffsetDateTime, days_ago: i64, interval: i64) -> Option<(OffsetDateTime, OffsetDateTime)> {
    let last = now.checked_sub(days(days_ago)?)?;
    let next = last.checked_add(days(interval)?)?;
    Some((last, next))
}

/// Règle d'agrégation : offline/maintenance > tout running > warning
pub fn aggregate_line_status<I>(statuses: I) -> LineStatus
where
    I: IntoIterator<Item = MachineStatus>,
{
    let mut all_running = true;
    for status in statuses {
        match status {
            MachineStatus::Offline | MachineStatus::Maintenance => return LineStatus::Stopped,
            MachineStatus::Running => {}
            MachineStatus::Stopped => all_running = false,
        }
    }
    if all_running { LineStatus::Running } else { LineStatus::Warning }
}

/// Résultat de l'application d'un événement
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Machine mise à jour; `line_changed` si le statut de ligne a basculé
    Machine { machine_id: String, line_changed: bool },
    /// Machine inconnue, rien n'a bougé
    UnknownMachine(String),
    /// Alerte à relayer vers la gateway de notifications
    Alert(String),
}

#[derive(Debug, Clone)]
pub struct FactoryStateStore {
    machines: HashMap<String, Machine>,
    lines: Vec<ProductionLine>,
    /// machine_id -> index dans `lines`
    owner: HashMap<String, usize>,
}

impl FactoryStateStore {
    /// Construit le store depuis des lignes complètes (machines + ligne)
    pub fn new(layout: Vec<(ProductionLine, Vec<Machine>)>) -> Result<Self, StoreError> {
        let mut machines = HashMap::new();
        let mut lines = Vec::with_capacity(layout.len());
        let mut owner = HashMap::new();
        let mut line_ids = HashSet::new();

        for (mut line, members) in layout {
            if !line_ids.insert(line.id.clone()) {
                return Err(StoreError::DuplicateLine(line.id));
            }
            if members.is_empty() {
                return Err(StoreError::EmptyLine(line.id));
            }
            let index = lines.len();
            line.member_machine_ids = members.iter().map(|m| m.id.clone()).collect();
            for machine in members {
                if owner.insert(machine.id.clone(), index).is_some() {
                    return Err(StoreError::DuplicateMachine(machine.id));
                }
                machines.insert(machine.id.clone(), machine);
            }
            lines.push(line);
        }

        let mut store = Self { machines, lines, owner };
        for index in 0..store.lines.len() {
            store.recompute_line(index);
        }
        Ok(store)
    }

    /// Construit le store depuis la configuration d'implantation
    pub fn from_layout(layout: &LayoutConf, now: OffsetDateTime) -> Result<Self, StoreError> {
        let lines = layout
            .lines
            .iter()
            .map(|line| {
                let machines = line
                    .machines
                    .iter()
                    .map(|m| {
                        let (last, next) =
                            maintenance_window(now, m.last_maintenance_days_ago, m.maintenance_interval_days)
                                .ok_or_else(|| StoreError::InvalidMaintenanceWindow(m.id.clone()))?;
                        Ok(Machine {
                            id: m.id.clone(),
                            name: m.name.clone(),
                            kind: m.kind,
                            status: m.status,
                            temperature: m.temperature,
                            vibration: m.vibration,
                            efficiency: m.efficiency,
                            last_maintenance: last,
                            next_maintenance: next,
                            updated_at: None,
                        })
                    })
                    .collect::<Result<Vec<_>, StoreError>>()?;
                let production_line = ProductionLine {
                    id: line.id.clone(),
                    name: line.name.clone(),
                    member_machine_ids: Vec::new(),
                    derived_status: LineStatus::Running,
                    color_tag: line.color_tag.clone(),
                };
                Ok((production_line, machines))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Self::new(lines)
    }

    /// Applique un événement télémétrie décodé
    pub fn apply(&mut self, event: TelemetryEvent, now: OffsetDateTime) -> Applied {
        match event {
            TelemetryEvent::MachineStatus(ev) => self.apply_machine_status(&ev, now),
            TelemetryEvent::Alert(alert) => Applied::Alert(alert.message),
        }
    }

    pub fn apply_machine_status(&mut self, event: &MachineStatusEvent, now: OffsetDateTime) -> Applied {
        let Some(machine) = self.machines.get_mut(&event.machine_id) else {
            return Applied::UnknownMachine(event.machine_id.clone());
        };

        let mut changed = machine.status != event.status;
        machine.status = event.status;
        for (slot, value) in [
            (&mut machine.temperature, event.temperature),
            (&mut machine.vibration, event.vibration),
            (&mut machine.efficiency, event.efficiency),
        ] {
            if let Some(value) = value {
                changed |= slot.to_bits() != value.to_bits();
                *slot = value;
            }
        }
        // horodatage du dernier changement effectif : un rejeu ne bouge rien
        if changed {
            machine.updated_at = Some(now);
        }

        let line_changed = match self.owner.get(&event.machine_id) {
            Some(&index) => self.recompute_line(index),
            None => false,
        };

        Applied::Machine { machine_id: event.machine_id.clone(), line_changed }
    }

    /// Recalcule le statut dérivé; retourne true s'il a changé
    fn recompute_line(&mut self, index: usize) -> bool {
        let line = &self.lines[index];
        let status = aggregate_line_status(
            line.member_machine_ids
                .iter()
                .filter_map(|id| self.machines.get(id))
                .map(|m| m.status),
        );
        let line = &mut self.lines[index];
        let changed = line.derived_status != status;
        if changed {
            debug!("[store] line {} {} -> {}", line.id, line.derived_status, status);
        }
        line.derived_status = status;
        changed
    }

    pub fn snapshot(&self, machine_id: &str) -> Option<Machine> {
        self.machines.get(machine_id).cloned()
    }

    pub fn all_lines(&self) -> &[ProductionLine] {
        &self.lines
    }

    pub fn line(&self, line_id: &str) -> Option<&ProductionLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn line_of(&self, machine_id: &str) -> Option<&ProductionLine> {
        self.owner.get(machine_id).map(|&i| &self.lines[i])
    }

    /// Machines dans l'ordre des lignes puis des membres
    pub fn machines(&self) -> impl Iterator<Item = &Machine> + '_ {
        self.lines
            .iter()
            .flat_map(|l| l.member_machine_ids.iter())
            .filter_map(|id| self.machines.get(id))
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}
