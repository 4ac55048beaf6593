use crate::models::{MachineKind, MachineStatus};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub mqtt: MqttConf,
    pub telemetry: TelemetryConf,
    pub cache: CacheConf,
    pub layout: LayoutConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConf {
    /// Délai fixe entre une perte de connexion et la tentative suivante
    pub reconnect_delay_secs: u64,
}

impl TelemetryConf {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConf {
    /// Nom de l'époque de cache (ex: "factory-dashboard-v2")
    pub version: String,
    /// Origine du dashboard, sert à distinguer contenu local / externe
    pub origin: String,
    /// Ressources précachées à l'installation (chemins locaux ou URLs absolues)
    pub manifest: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LayoutConf {
    pub lines: Vec<LineConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LineConf {
    pub id: String,
    pub name: String,
    #[serde(default = "default_color")]
    pub color_tag: String,
    pub machines: Vec<MachineConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MachineConf {
    pub id: String,
    pub name: String,
    pub kind: MachineKind,
    #[serde(default = "default_status")]
    pub status: MachineStatus,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_vibration")]
    pub vibration: f64,
    #[serde(default = "default_efficiency")]
    pub efficiency: f64,
    /// Ancienneté de la dernière maintenance au démarrage, en jours
    #[serde(default)]
    pub last_maintenance_days_ago: i64,
    #[serde(default = "default_interval")]
    pub maintenance_interval_days: i64,
}

fn default_color() -> String { "#4a90d9".into() }
fn default_status() -> MachineStatus { MachineStatus::Running }
fn default_temperature() -> f64 { 60.0 }
fn default_vibration() -> f64 { 2.0 }
fn default_efficiency() -> f64 { 92.0 }
fn default_interval() -> i64 { 30 }

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            topic: "atelier/telemetry@v1".into(),
            client_id: "atelier-kernel".into(),
            keep_alive_secs: 15,
        }
    }
}

impl Default for TelemetryConf {
    fn default() -> Self {
        Self { reconnect_delay_secs: 5 }
    }
}

impl Default for CacheConf {
    fn default() -> Self {
        Self {
            version: "factory-dashboard-v1".into(),
            origin: "http://localhost:3000".into(),
            manifest: vec![
                "/".into(),
                "/index.html".into(),
                "/styles.css".into(),
                "/app.js".into(),
                "/manifest.json".into(),
                "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css".into(),
            ],
        }
    }
}

impl Default for LayoutConf {
    fn default() -> Self {
        let line = |id: &str, name: &str, color: &str, prefix: &str, label: &str, kind: MachineKind| LineConf {
            id: id.into(),
            name: name.into(),
            color_tag: color.into(),
            machines: (1..=4)
                .map(|n| MachineConf {
                    id: format!("{prefix}-{n:02}"),
                    name: format!("{label} {n}"),
                    kind,
                    status: MachineStatus::Running,
                    temperature: default_temperature(),
                    vibration: default_vibration(),
                    efficiency: default_efficiency(),
                    last_maintenance_days_ago: 5 * n as i64,
                    maintenance_interval_days: default_interval(),
                })
                .collect(),
        };

        Self {
            lines: vec![
                line("line-a", "Stamping line", "#4a90d9", "press", "Press", MachineKind::Stamping),
                line("line-b", "Welding line", "#e2a03f", "weld", "Welder", MachineKind::Welding),
                line("line-c", "Machining line", "#50b36b", "cnc", "CNC", MachineKind::Cnc),
            ],
        }
    }
}

/// Lit et parse un fichier de configuration YAML; un fichier vide donne la config par défaut
pub async fn load_config_from(path: impl AsRef<Path>) -> Result<KernelConfig, ConfigError> {
    let txt = fs::read_to_string(path).await?;
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    Ok(serde_yaml::from_str(&txt)?)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("ATELIER_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if !Path::new(&path).exists() {
        info!("[config] no {path}, using default configuration");
        return KernelConfig::default();
    }
    match load_config_from(&path).await {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("[config] invalid configuration {path}: {e}");
            KernelConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_layout_has_three_lines_of_four() {
        let layout = LayoutConf::default();
        assert_eq!(layout.lines.len(), 3);
        assert!(layout.lines.iter().all(|l| l.machines.len() == 4));
        assert_eq!(layout.lines[0].machines[0].id, "press-01");
    }

    #[tokio::test]
    async fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "telemetry:\n  reconnect_delay_secs: 9\ncache:\n  version: factory-dashboard-v2").unwrap();

        let cfg = load_config_from(file.path()).await.unwrap();
        assert_eq!(cfg.telemetry.reconnect_delay(), Duration::from_secs(9));
        assert_eq!(cfg.cache.version, "factory-dashboard-v2");
        assert_eq!(cfg.cache.origin, "http://localhost:3000");
        assert!(!cfg.cache.manifest.is_empty());
        assert_eq!(cfg.mqtt.port, 1883);
    }

    #[tokio::test]
    async fn test_empty_file_gives_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let cfg = load_config_from(file.path()).await.unwrap();
        assert_eq!(cfg.telemetry.reconnect_delay_secs, 5);
        assert_eq!(cfg.layout.lines.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "telemetry: [not, a, map").unwrap();
        assert!(matches!(load_config_from(file.path()).await, Err(ConfigError::Yaml(_))));
    }
}
