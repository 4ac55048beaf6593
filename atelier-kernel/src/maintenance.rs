/**
 * MAINTENANCE PRÉDICTIVE - Score de risque à partir d'un instantané machine
 *
 * RÔLE : Fonction pure `assess(machine, now)`. Quatre composantes normalisées
 * dans [0, 1] (température, vibration, efficacité, temps depuis maintenance),
 * moyenne non pondérée, puis fenêtre d'urgence de 0 à 14 jours.
 *
 * UTILITÉ : appelée à la demande par l'API REST, ne modifie jamais le store.
 */

use crate::models::Machine;
use crate::store::FactoryStateStore;
use serde::Serialize;
use std::fmt;
use time::{Duration, OffsetDateTime};

const TEMPERATURE_BASELINE: f64 = 75.0;
const TEMPERATURE_SPAN: f64 = 25.0;
const VIBRATION_SPAN: f64 = 10.0;
const EFFICIENCY_TARGET: f64 = 85.0;
const EFFICIENCY_SPAN: f64 = 20.0;
const MAINTENANCE_CYCLE_DAYS: f64 = 30.0;
const URGENCY_WINDOW_DAYS: f64 = 14.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn recommendation(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "schedule technician immediately",
            RiskLevel::High => "schedule technician within 24–48h",
            RiskLevel::Medium => "schedule technician this week",
            RiskLevel::Low => "normal operation",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskComponents {
    pub temperature: f64,
    pub vibration: f64,
    pub efficiency: f64,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub machine_id: String,
    pub components: RiskComponents,
    pub overall_risk: f64,
    pub days_to_maintenance: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub predicted_maintenance_date: OffsetDateTime,
    pub level: RiskLevel,
    pub recommendation: &'static str,
}

/// Borne dans [0, 1]; une valeur non finie (NaN) ne compte pas
fn unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

pub fn temperature_risk(temperature: f64) -> f64 {
    unit((temperature - TEMPERATURE_BASELINE) / TEMPERATURE_SPAN)
}

pub fn vibration_risk(vibration: f64) -> f64 {
    unit(vibration / VIBRATION_SPAN)
}

pub fn efficiency_risk(efficiency: f64) -> f64 {
    unit((EFFICIENCY_TARGET - efficiency) / EFFICIENCY_SPAN)
}

pub fn time_risk(last_maintenance: OffsetDateTime, now: OffsetDateTime) -> f64 {
    let elapsed_days = (now - last_maintenance).as_seconds_f64() / 86_400.0;
    unit(elapsed_days / MAINTENANCE_CYCLE_DAYS)
}

pub fn assess(machine: &Machine, now: OffsetDateTime) -> RiskAssessment {
    let components = RiskComponents {
        temperature: temperature_risk(machine.temperature),
        vibration: vibration_risk(machine.vibration),
        efficiency: efficiency_risk(machine.efficiency),
        time: time_risk(machine.last_maintenance, now),
    };
    let overall_risk =
        (components.temperature + components.vibration + components.efficiency + components.time) / 4.0;
    let days_to_maintenance = (URGENCY_WINDOW_DAYS - overall_risk * URGENCY_WINDOW_DAYS).max(0.0);

    let level = if overall_risk > 0.8 {
        RiskLevel::Critical
    } else if overall_risk > 0.6 {
        RiskLevel::High
    } else if days_to_maintenance <= 2.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskAssessment {
        machine_id: machine.id.clone(),
        components,
        overall_risk,
        days_to_maintenance,
        predicted_maintenance_date: now + Duration::seconds_f64(days_to_maintenance * 86_400.0),
        level,
        recommendation: level.recommendation(),
    }
}

/// Évalue toutes les machines du store, dans l'ordre des lignes
pub fn assess_all(store: &FactoryStateStore, now: OffsetDateTime) -> Vec<RiskAssessment> {
    store.machines().map(|m| assess(m, now)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MachineKind, MachineStatus};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-05-10 12:00 UTC);

    fn machine(temperature: f64, vibration: f64, efficiency: f64, days_since: i64) -> Machine {
        Machine {
            id: "cnc-01".into(),
            name: "CNC 1".into(),
            kind: MachineKind::Cnc,
            status: MachineStatus::Running,
            temperature,
            vibration,
            efficiency,
            last_maintenance: NOW - Duration::days(days_since),
            next_maintenance: NOW + Duration::days(30 - days_since),
            updated_at: None,
        }
    }

    #[test]
    fn test_temperature_boundaries() {
        assert_eq!(temperature_risk(75.0), 0.0);
        assert_eq!(temperature_risk(100.0), 1.0);
        assert_eq!(temperature_risk(40.0), 0.0);
        assert_eq!(temperature_risk(140.0), 1.0);
        assert!((temperature_risk(87.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_components_are_clamped() {
        assert_eq!(vibration_risk(25.0), 1.0);
        assert_eq!(vibration_risk(-3.0), 0.0);
        assert_eq!(efficiency_risk(99.0), 0.0);
        assert_eq!(efficiency_risk(10.0), 1.0);
        assert_eq!(time_risk(NOW + Duration::days(2), NOW), 0.0);
        assert_eq!(time_risk(NOW - Duration::days(90), NOW), 1.0);
        assert_eq!(vibration_risk(f64::NAN), 0.0);
    }

    #[test]
    fn test_healthy_machine_is_low() {
        let a = assess(&machine(60.0, 1.0, 95.0, 3), NOW);
        assert_eq!(a.level, RiskLevel::Low);
        assert_eq!(a.recommendation, "normal operation");
        assert!(a.days_to_maintenance > 2.0);
        assert!(a.predicted_maintenance_date > NOW);
    }

    #[test]
    fn test_tiers() {
        // 1 + 1 + 1 + 1 => 1.0
        let critical = assess(&machine(110.0, 12.0, 50.0, 45), NOW);
        assert_eq!(critical.level, RiskLevel::Critical);
        assert_eq!(critical.days_to_maintenance, 0.0);
        assert_eq!(critical.predicted_maintenance_date, NOW);

        // 1 + 0.7 + 0.5 + 0.5 => 0.675
        let high = assess(&machine(100.0, 7.0, 75.0, 15), NOW);
        assert_eq!(high.level, RiskLevel::High);
        assert_eq!(high.recommendation, "schedule technician within 24–48h");

        // 0.6 + 0.5 + 0.55 + 0.5 => 0.5375, encore 6.5 jours
        let moderate = assess(&machine(90.0, 5.0, 74.0, 15), NOW);
        assert!((moderate.overall_risk - 0.5375).abs() < 1e-9);
        assert_eq!(moderate.level, RiskLevel::Low);

        // MEDIUM demande days <= 2, donc un risque >= 12/14 : déjà CRITICAL
        let near = assess(&machine(100.0, 10.0, 65.0, 26), NOW);
        assert!(near.days_to_maintenance <= 2.0);
        assert_eq!(near.level, RiskLevel::Critical);
    }

    #[test]
    fn test_mean_is_unweighted() {
        // 0.5 + 0 + 0 + 0 => 0.125
        let a = assess(&machine(87.5, 0.0, 90.0, 0), NOW);
        assert!((a.overall_risk - 0.125).abs() < 1e-9);
        assert!((a.days_to_maintenance - 12.25).abs() < 1e-9);
    }

    #[test]
    fn test_monotonic_in_each_input() {
        let base = (80.0, 4.0, 80.0, 10);
        let risk = |t: f64, v: f64, e: f64, d: i64| assess(&machine(t, v, e, d), NOW).overall_risk;

        let mut previous = 0.0;
        for t in (0..=130).step_by(5) {
            let r = risk(t as f64, base.1, base.2, base.3);
            assert!(r >= previous);
            previous = r;
        }

        previous = 0.0;
        for v in 0..=15 {
            let r = risk(base.0, v as f64, base.2, base.3);
            assert!(r >= previous);
            previous = r;
        }

        previous = 0.0;
        for d in 0..=60 {
            let r = risk(base.0, base.1, base.2, d);
            assert!(r >= previous);
            previous = r;
        }

        previous = f64::MAX;
        for e in (0..=100).step_by(5) {
            let r = risk(base.0, base.1, e as f64, base.3);
            assert!(r <= previous);
            previous = r;
        }
    }

    #[test]
    fn test_assess_does_not_touch_machine() {
        let m = machine(95.0, 8.0, 70.0, 20);
        let copy = m.clone();
        let _ = assess(&m, NOW);
        assert_eq!(m, copy);
    }
}
