use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    /// Hosts surveillés, dans l'ordre d'affichage des dashboards
    #[serde(default)]
    pub hosts: Vec<HostConf>,
    #[serde(default)]
    pub probe: ProbeConf,
    #[serde(default = "default_trend_capacity")]
    pub trend_capacity: usize,
    /// Session considérée inactive au-delà de cet âge
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: i64,
    pub mqtt: Option<MqttConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HostConf {
    pub name: String,
    pub addr: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProbeConf {
    #[serde(default = "default_probe_period_ms")]
    pub period_ms: u64,
    /// Deadline de probe; période du tick si absent
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

fn default_probe_period_ms() -> u64 {
    1000
}

fn default_trend_capacity() -> usize {
    100
}

fn default_stale_after_secs() -> i64 {
    5
}

impl ProbeConf {
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(self.period_ms)
    }
}

impl Default for ProbeConf {
    fn default() -> Self {
        Self { period_ms: default_probe_period_ms(), timeout_ms: None }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            probe: ProbeConf::default(),
            trend_capacity: default_trend_capacity(),
            stale_after_secs: default_stale_after_secs(),
            mqtt: Some(MqttConf { host: "localhost".into(), port: 1883 }),
        }
    }
}

pub async fn load_config() -> MonitorConfig {
    let path = std::env::var("VIGIL_MONITOR_CONFIG").unwrap_or_else(|_| "monitor.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return MonitorConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            eprintln!("[monitor] config invalide: {e}");
            MonitorConfig::default()
        })
    } else {
        eprintln!("[monitor] pas de monitor.yaml, usage config par défaut");
        MonitorConfig::default()
    }
}
