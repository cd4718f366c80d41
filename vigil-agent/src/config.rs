//! Agent configuration
//!
//! YAML file whose path comes from VIGIL_AGENT_CONFIG (default agent.yaml),
//! falling back to defaults when missing or invalid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default)]
    pub mqtt: MqttConf,
    #[serde(default = "default_sample_period_ms")]
    pub sample_period_ms: u64,
    /// Identité annoncée au monitor; hostname si absent.
    pub host_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

fn default_sample_period_ms() -> u64 {
    1000
}

impl Default for MqttConf {
    fn default() -> Self {
        Self { host: "localhost".into(), port: 1883 }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            sample_period_ms: default_sample_period_ms(),
            host_id: None,
        }
    }
}

pub async fn load_config() -> AgentConfig {
    let path = std::env::var("VIGIL_AGENT_CONFIG").unwrap_or_else(|_| "agent.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return AgentConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!("config invalide ({path}): {e}");
            AgentConfig::default()
        })
    } else {
        AgentConfig::default()
    }
}
