use crate::config::{MonitorConfig, MqttConf};
use crate::health::HealthTracker;
use crate::models::{HelloIn, HostRegistry, PongIn, StatsIn};
use crate::prober::commit_success;
use crate::score::rescore;
use crate::state::Shared;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use time::OffsetDateTime;
use tokio::task::{self, JoinHandle};

pub const STATS_TOPIC: &str = "vigil/agents/stats@v1";
pub const HELLO_TOPIC: &str = "vigil/agents/hello@v1";
pub const PONG_TOPIC: &str = "vigil/agents/pong@v1";

/// Client MQTT partagé par le listener, le prober et le broadcast
pub fn create_mqtt_client(cfg: &MonitorConfig) -> (AsyncClient, EventLoop) {
    let mqtt_cfg = cfg
        .mqtt
        .clone()
        .unwrap_or(MqttConf { host: "localhost".into(), port: 1883 });
    let mut opts = MqttOptions::new("vigil-monitor", &mqtt_cfg.host, mqtt_cfg.port);
    opts.set_keep_alive(std::time::Duration::from_secs(15));
    AsyncClient::new(opts, 10)
}

pub async fn subscribe_topics(client: &AsyncClient) -> anyhow::Result<()> {
    client.subscribe(STATS_TOPIC, QoS::AtLeastOnce).await?;
    client.subscribe(HELLO_TOPIC, QoS::AtLeastOnce).await?;
    client.subscribe(PONG_TOPIC, QoS::AtLeastOnce).await?;
    Ok(())
}

/// Boucle d'événements: remplit le registre au fil des messages agents
pub fn spawn_listener(
    registry: Shared<HostRegistry>,
    cfg: Shared<MonitorConfig>,
    mut eventloop: EventLoop,
    health: HealthTracker,
) -> JoinHandle<()> {
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    let trend_capacity = cfg.lock().trend_capacity;
                    match p.topic.as_str() {
                        STATS_TOPIC => match serde_json::from_slice::<StatsIn>(&p.payload) {
                            Ok(stats) => handle_stats(&mut registry.lock(), stats, trend_capacity),
                            Err(e) => eprintln!("[monitor] stats JSON invalide: {e}"),
                        },
                        HELLO_TOPIC => match serde_json::from_slice::<HelloIn>(&p.payload) {
                            Ok(hello) => handle_hello(&mut registry.lock(), hello),
                            Err(e) => eprintln!("[monitor] hello JSON invalide: {e}"),
                        },
                        PONG_TOPIC => match serde_json::from_slice::<PongIn>(&p.payload) {
                            Ok(pong) => handle_pong(&mut registry.lock(), pong, trend_capacity),
                            Err(e) => eprintln!("[monitor] pong JSON invalide: {e}"),
                        },
                        _ => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("[monitor] MQTT erreur: {:?}", e);
                    health.increment_reconnects();
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        }
    })
}

/// Nouvel échantillon: mise à jour des charges + recalcul du score dans
/// la même section critique, pour que le score ne mélange jamais deux
/// générations de champs.
pub fn handle_stats(reg: &mut HostRegistry, stats: StatsIn, trend_capacity: usize) {
    let Some(host) = reg.records.get_mut(&stats.host_id) else {
        println!("[monitor] stats from unknown host {}", stats.host_id);
        return;
    };
    host.cpu_load = Some(stats.cpu_load);
    host.memory_load = Some(stats.memory_load);
    host.requests_per_second = stats.requests_per_second;
    host.requests_per_minute = stats.requests_per_minute;
    host.last_seen = Some(OffsetDateTime::now_utc());
    rescore(host, trend_capacity);
}

pub fn handle_hello(reg: &mut HostRegistry, hello: HelloIn) {
    let Some(host) = reg.records.get_mut(&hello.host_id) else {
        println!("[monitor] hello from unknown host {}", hello.host_id);
        return;
    };
    host.last_seen = Some(OffsetDateTime::now_utc());
    println!(
        "[monitor] host {} connected ({} v{})",
        hello.host_id,
        hello.ip,
        hello.version.as_deref().unwrap_or("?")
    );
}

/// Réponse de probe: le commit passe par la règle du token, un pong
/// tardif après deadline est ignoré.
pub fn handle_pong(reg: &mut HostRegistry, pong: PongIn, trend_capacity: usize) {
    let Some(host) = reg.records.get_mut(&pong.host_id) else {
        println!("[monitor] pong from unknown host {}", pong.host_id);
        return;
    };
    commit_success(host, pong.probe_id, trend_capacity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConf;
    use crate::prober::dispatch_probe;

    fn registry() -> HostRegistry {
        HostRegistry::from_hosts(&[HostConf {
            name: "server-01".into(),
            addr: "localhost".into(),
            port: 5001,
        }])
    }

    fn stats(host_id: &str) -> StatsIn {
        StatsIn {
            host_id: host_id.into(),
            cpu_load: 42.5,
            memory_load: 61.25,
            requests_per_second: 7,
            requests_per_minute: 320,
        }
    }

    #[test]
    fn stats_update_rescores_atomically() {
        let mut reg = registry();
        handle_stats(&mut reg, stats("server-01"), 100);

        let host = &reg.records["server-01"];
        assert_eq!(host.cpu_load, Some(42.5));
        assert_eq!(host.memory_load, Some(61.25));
        assert_eq!(host.requests_per_second, 7);
        assert!(host.last_seen.is_some());
        // score recalculé: (42.5-10)/80 + (61.25-10)/80 + 0 - 0.125
        let expected = 32.5 / 80.0 + 51.25 / 80.0 - 0.125;
        assert!((host.score - expected).abs() < 1e-12);
        assert_eq!(host.score_trend.len(), 1);
    }

    #[test]
    fn unknown_host_stats_are_ignored() {
        let mut reg = registry();
        handle_stats(&mut reg, stats("intrus"), 100);
        assert!(!reg.records.contains_key("intrus"));
        assert_eq!(reg.records["server-01"].score_trend.len(), 0);
    }

    #[test]
    fn pong_resolves_outstanding_probe() {
        let mut reg = registry();
        let token = dispatch_probe(reg.records.get_mut("server-01").unwrap(), 100);
        handle_pong(&mut reg, PongIn { host_id: "server-01".into(), probe_id: token }, 100);

        let host = &reg.records["server-01"];
        assert!(host.reachable);
        assert!(host.latency_ms.is_some());
    }

    #[test]
    fn hello_refreshes_session() {
        let mut reg = registry();
        handle_hello(
            &mut reg,
            HelloIn { host_id: "server-01".into(), ip: "192.168.1.10".into(), version: None },
        );
        assert!(reg.records["server-01"].last_seen.is_some());
    }
}
