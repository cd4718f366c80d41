use crate::config::HostConf;
use crate::score::StatusColor;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Identité d'un host surveillé, fixée à la création du record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostIdentity {
    pub name: String,
    pub addr: String,
    pub port: u16,
}

/// Machine à états de la probe de latence, un cycle par tick.
/// Jamais sérialisé: c'est un handle interne, pas une donnée de vue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Probing { token: Uuid, started: Instant },
    Resolved,
    TimedOut,
}

/// Etat complet d'un host, muté uniquement sous le lock du registre.
/// Créé une fois au démarrage, jamais détruit.
#[derive(Debug)]
pub struct HostRecord {
    pub identity: HostIdentity,
    pub cpu_load: Option<f64>,
    pub memory_load: Option<f64>,
    /// None = probe en cours ou échouée
    pub latency_ms: Option<u64>,
    pub reachable: bool,
    pub requests_per_second: u64,
    pub requests_per_minute: u64,
    pub score: f64,
    pub status_color: StatusColor,
    pub score_trend: VecDeque<f64>,
    pub last_seen: Option<OffsetDateTime>,
    pub probe: ProbeState,
}

impl HostRecord {
    pub fn new(identity: HostIdentity) -> Self {
        Self {
            identity,
            cpu_load: None,
            memory_load: None,
            latency_ms: None,
            reachable: false,
            requests_per_second: 0,
            requests_per_minute: 0,
            score: 0.0,
            status_color: StatusColor::Unknown,
            score_trend: VecDeque::new(),
            last_seen: None,
            probe: ProbeState::Idle,
        }
    }

    /// Session active = un message reçu dans la fenêtre de fraîcheur
    pub fn session_active(&self, now: OffsetDateTime, stale_after: Duration) -> bool {
        self.last_seen.map(|seen| now - seen <= stale_after).unwrap_or(false)
    }
}

/// Registre des hosts: records par nom + ordre de configuration,
/// préservé pour toutes les vues sortantes
pub struct HostRegistry {
    pub records: HashMap<String, HostRecord>,
    pub order: Vec<String>,
}

impl HostRegistry {
    pub fn from_hosts(hosts: &[HostConf]) -> Self {
        let mut records = HashMap::new();
        let mut order = Vec::new();
        for conf in hosts {
            let identity = HostIdentity {
                name: conf.name.clone(),
                addr: conf.addr.clone(),
                port: conf.port,
            };
            records.insert(conf.name.clone(), HostRecord::new(identity));
            order.push(conf.name.clone());
        }
        Self { records, order }
    }

    /// Vues publiques dans l'ordre de configuration
    pub fn views(&self) -> Vec<HostView> {
        self.order
            .iter()
            .filter_map(|name| self.records.get(name))
            .map(to_view)
            .collect()
    }
}

// Messages MQTT entrants (agent -> monitor); les champs ignorés ici
// (timestamps agent) sont laissés au payload
#[derive(Debug, Deserialize)]
pub struct StatsIn {
    pub host_id: String,
    pub cpu_load: f64,
    pub memory_load: f64,
    pub requests_per_second: u64,
    pub requests_per_minute: u64,
}

#[derive(Debug, Deserialize)]
pub struct HelloIn {
    pub host_id: String,
    pub ip: String,
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PongIn {
    pub host_id: String,
    pub probe_id: Uuid,
}

// Messages sortants (monitor -> agents / dashboards)
#[derive(Debug, Serialize)]
pub struct PingOut {
    pub probe_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SnapshotV1 {
    pub ts: String,
    pub hosts: Vec<HostView>,
}

/// Vue publique d'un HostRecord: tout sauf l'état de probe interne
#[derive(Debug, Serialize)]
pub struct HostView {
    pub name: String,
    pub addr: String,
    pub port: u16,
    pub cpu_load: Option<f64>,
    pub memory_load: Option<f64>,
    pub latency_ms: Option<u64>,
    pub reachable: bool,
    pub requests_per_second: u64,
    pub requests_per_minute: u64,
    pub score: f64,
    pub status_color: String,
    pub score_trend: Vec<f64>,
    pub last_seen: Option<String>,
}

pub fn to_view(h: &HostRecord) -> HostView {
    HostView {
        name: h.identity.name.clone(),
        addr: h.identity.addr.clone(),
        port: h.identity.port,
        cpu_load: h.cpu_load,
        memory_load: h.memory_load,
        latency_ms: h.latency_ms,
        reachable: h.reachable,
        requests_per_second: h.requests_per_second,
        requests_per_minute: h.requests_per_minute,
        score: h.score,
        status_color: h.status_color.hex().to_string(),
        score_trend: h.score_trend.iter().copied().collect(),
        last_seen: h.last_seen.and_then(|t| t.format(&Rfc3339).ok()),
    }
}
