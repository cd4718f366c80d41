//! Probe de latence aller-retour, un cycle par host et par tick.
//!
//! Chaque probe se résout en exactement un des états Resolved/TimedOut.
//! Les deux écrivains (pong entrant, deadline) sont départagés par le
//! token du tick: le premier à commiter gagne, l'autre ne fait rien.

use crate::config::MonitorConfig;
use crate::models::{HostRecord, HostRegistry, PingOut, ProbeState};
use crate::score::rescore;
use crate::state::Shared;
use rumqttc::{AsyncClient, QoS};
use std::time::Instant;
use time::OffsetDateTime;
use tokio::task::{self, JoinHandle};
use tokio::time::Duration;
use uuid::Uuid;

/// Ouvre un cycle de probe: nouveau token, latence inconnue le temps du
/// vol. Un reliquat Probing du tick précédent (deadline perdue de
/// justesse) est d'abord soldé en timeout, pour qu'aucune probe ne reste
/// sans issue.
pub fn dispatch_probe(host: &mut HostRecord, trend_capacity: usize) -> Uuid {
    if let ProbeState::Probing { token, .. } = host.probe {
        commit_timeout(host, token, trend_capacity);
    }
    let token = Uuid::new_v4();
    host.probe = ProbeState::Probing { token, started: Instant::now() };
    host.latency_ms = None;
    token
}

/// Commit côté succès. No-op si la deadline a déjà gagné ce tick ou si
/// le token est périmé (pong tardif d'un tick précédent).
pub fn commit_success(host: &mut HostRecord, probe_id: Uuid, trend_capacity: usize) -> bool {
    if let ProbeState::Probing { token, started } = host.probe {
        if token == probe_id {
            host.latency_ms = Some(started.elapsed().as_millis() as u64);
            host.reachable = true;
            host.probe = ProbeState::Resolved;
            rescore(host, trend_capacity);
            return true;
        }
    }
    false
}

/// Commit côté deadline. No-op si le pong est arrivé avant.
pub fn commit_timeout(host: &mut HostRecord, probe_id: Uuid, trend_capacity: usize) -> bool {
    if let ProbeState::Probing { token, .. } = host.probe {
        if token == probe_id {
            host.latency_ms = None;
            host.reachable = false;
            host.probe = ProbeState::TimedOut;
            rescore(host, trend_capacity);
            return true;
        }
    }
    false
}

pub fn spawn_prober(
    registry: Shared<HostRegistry>,
    cfg: Shared<MonitorConfig>,
    client: AsyncClient,
) -> JoinHandle<()> {
    task::spawn(async move {
        let (period_ms, timeout_ms) = {
            let c = cfg.lock();
            (c.probe.period_ms, c.probe.timeout_ms())
        };
        let mut tick = tokio::time::interval(Duration::from_millis(period_ms));
        let mut deadline: Option<JoinHandle<()>> = None;

        loop {
            tick.tick().await;
            let (stale_after, trend_capacity) = {
                let c = cfg.lock();
                (time::Duration::seconds(c.stale_after_secs), c.trend_capacity)
            };
            let now = OffsetDateTime::now_utc();

            // Ouverture des cycles sous lock, envoi des pings hors lock
            let mut probed: Vec<(String, Uuid)> = Vec::new();
            {
                let mut reg = registry.lock();
                let order = reg.order.clone();
                for name in order {
                    let Some(host) = reg.records.get_mut(&name) else { continue };
                    if !host.session_active(now, stale_after) {
                        // Pas de session: champs de latence intacts, et une
                        // deadline encore en vol devient sans effet
                        host.probe = ProbeState::Idle;
                        continue;
                    }
                    let token = dispatch_probe(host, trend_capacity);
                    probed.push((name, token));
                }
            }

            for (name, token) in &probed {
                match serde_json::to_vec(&PingOut { probe_id: *token }) {
                    Ok(payload) => {
                        let topic = format!("vigil/agents/ping@v1/{name}");
                        if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, payload).await {
                            eprintln!("[prober] ping publish failed for {name}: {e:?}");
                        }
                    }
                    Err(e) => eprintln!("[prober] ping serialization failed: {e}"),
                }
            }

            // Une seule deadline par tick
            if let Some(handle) = deadline.take() {
                handle.abort();
            }
            if !probed.is_empty() {
                deadline = Some(task::spawn(expire_probes(
                    registry.clone(),
                    probed,
                    Duration::from_millis(timeout_ms),
                    trend_capacity,
                )));
            }
        }
    })
}

async fn expire_probes(
    registry: Shared<HostRegistry>,
    probed: Vec<(String, Uuid)>,
    timeout: Duration,
    trend_capacity: usize,
) {
    tokio::time::sleep(timeout).await;
    let mut reg = registry.lock();
    for (name, token) in probed {
        if let Some(host) = reg.records.get_mut(&name) {
            commit_timeout(host, token, trend_capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConf;
    use crate::models::{HostIdentity, HostRecord};
    use crate::state::new_state;

    fn record() -> HostRecord {
        let mut host = HostRecord::new(HostIdentity {
            name: "server-01".into(),
            addr: "localhost".into(),
            port: 5001,
        });
        host.cpu_load = Some(50.0);
        host.memory_load = Some(50.0);
        host
    }

    #[test]
    fn dispatch_marks_probe_outstanding() {
        let mut host = record();
        host.latency_ms = Some(12);
        let token = dispatch_probe(&mut host, 100);
        assert_eq!(host.latency_ms, None);
        assert!(matches!(host.probe, ProbeState::Probing { token: t, .. } if t == token));
    }

    #[test]
    fn success_commits_latency_and_reachability() {
        let mut host = record();
        let token = dispatch_probe(&mut host, 100);
        assert!(commit_success(&mut host, token, 100));
        assert!(host.reachable);
        assert!(host.latency_ms.is_some());
        assert_eq!(host.probe, ProbeState::Resolved);
        // le commit a recalculé le score
        assert_eq!(host.score_trend.len(), 1);
    }

    #[test]
    fn late_success_after_timeout_is_noop() {
        let mut host = record();
        let token = dispatch_probe(&mut host, 100);
        assert!(commit_timeout(&mut host, token, 100));
        assert!(!host.reachable);
        assert_eq!(host.latency_ms, None);
        let score_after_timeout = host.score;
        let trend_len = host.score_trend.len();

        // le pong arrive après coup: perdant idempotent
        assert!(!commit_success(&mut host, token, 100));
        assert!(!host.reachable);
        assert_eq!(host.latency_ms, None);
        assert_eq!(host.score, score_after_timeout);
        assert_eq!(host.score_trend.len(), trend_len);
    }

    #[test]
    fn late_timeout_after_success_is_noop() {
        let mut host = record();
        let token = dispatch_probe(&mut host, 100);
        assert!(commit_success(&mut host, token, 100));
        let latency = host.latency_ms;

        assert!(!commit_timeout(&mut host, token, 100));
        assert!(host.reachable);
        assert_eq!(host.latency_ms, latency);
    }

    #[test]
    fn stale_token_never_commits() {
        let mut host = record();
        let old_token = dispatch_probe(&mut host, 100);
        // tick suivant: le reliquat est soldé en timeout, nouveau token
        let new_token = dispatch_probe(&mut host, 100);
        assert_ne!(old_token, new_token);
        assert!(!commit_success(&mut host, old_token, 100));
        assert!(matches!(host.probe, ProbeState::Probing { token, .. } if token == new_token));
    }

    #[test]
    fn leftover_probe_is_settled_as_timeout_on_next_dispatch() {
        let mut host = record();
        dispatch_probe(&mut host, 100);
        assert!(host.score_trend.is_empty());
        dispatch_probe(&mut host, 100);
        // le cycle précédent a abouti (timeout), d'où un point de trend
        assert_eq!(host.score_trend.len(), 1);
        assert!(!host.reachable);
    }

    #[tokio::test]
    async fn deadline_expires_outstanding_probes() {
        let registry = new_state(HostRegistry::from_hosts(&[HostConf {
            name: "server-01".into(),
            addr: "localhost".into(),
            port: 5001,
        }]));
        let token = {
            let mut reg = registry.lock();
            let host = reg.records.get_mut("server-01").unwrap();
            host.reachable = true;
            dispatch_probe(host, 100)
        };

        expire_probes(registry.clone(), vec![("server-01".into(), token)], Duration::from_millis(10), 100).await;

        let reg = registry.lock();
        let host = &reg.records["server-01"];
        assert_eq!(host.probe, ProbeState::TimedOut);
        assert!(!host.reachable);
        assert_eq!(host.latency_ms, None);
    }

    #[tokio::test]
    async fn deadline_is_noop_for_resolved_probe() {
        let registry = new_state(HostRegistry::from_hosts(&[HostConf {
            name: "server-01".into(),
            addr: "localhost".into(),
            port: 5001,
        }]));
        let token = {
            let mut reg = registry.lock();
            let host = reg.records.get_mut("server-01").unwrap();
            let token = dispatch_probe(host, 100);
            assert!(commit_success(host, token, 100));
            token
        };

        expire_probes(registry.clone(), vec![("server-01".into(), token)], Duration::from_millis(10), 100).await;

        let reg = registry.lock();
        let host = &reg.records["server-01"];
        assert_eq!(host.probe, ProbeState::Resolved);
        assert!(host.reachable);
        assert!(host.latency_ms.is_some());
    }
}
