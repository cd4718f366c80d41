//! Vigil Agent - per-host sampling daemon
//!
//! Streams resource utilization to the central monitor:
//! - Samples CPU and memory percentages from kernel counters every second
//! - Publishes them with the current request rates over MQTT
//! - Answers latency probes immediately, off the sampling path

mod config;
mod counters;
mod sampler;

use counters::RequestCounters;
use gethostname::gethostname;
use local_ip_address::local_ip;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use sampler::Sampler;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::time::{Duration, interval};
use tracing::{debug, error, info, warn};

#[derive(Serialize, Debug)]
struct HelloV1 {
    host_id: String,
    ip: String,
    version: String,
    ts: String,
}

#[derive(Serialize, Debug)]
struct StatsV1 {
    host_id: String,
    ts: String,
    cpu_load: f64,
    memory_load: f64,
    requests_per_second: u64,
    requests_per_minute: u64,
}

#[derive(Deserialize, Debug)]
struct PingV1 {
    probe_id: String,
}

#[derive(Serialize, Debug)]
struct PongV1 {
    host_id: String,
    probe_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = config::load_config().await;

    // Identité machine
    let host_id = cfg
        .host_id
        .clone()
        .unwrap_or_else(|| gethostname().to_string_lossy().to_string());
    let ip = local_ip().map(|i| i.to_string()).unwrap_or_else(|_| "0.0.0.0".into());

    // MQTT async
    let mut opts = MqttOptions::new(format!("vigil-agent-{host_id}"), &cfg.mqtt.host, cfg.mqtt.port);
    opts.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(opts, 10);

    let ping_topic = format!("vigil/agents/ping@v1/{host_id}");
    client.subscribe(&ping_topic, QoS::AtLeastOnce).await?;

    // Compteurs de requêtes remis à zéro sur leurs propres fenêtres
    let counters = RequestCounters::new();
    let reset_tasks = counters.spawn_reset_tasks();

    // Boucle d'événements MQTT: répond aux pings tout de suite, jamais
    // bloquée par une lecture de compteurs lente
    let pong_client = client.clone();
    let ping_counters = counters.clone();
    let pong_host = host_id.clone();
    let event_task = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == ping_topic => {
                    ping_counters.record();
                    match serde_json::from_slice::<PingV1>(&p.payload) {
                        Ok(ping) => {
                            let pong = PongV1 {
                                host_id: pong_host.clone(),
                                probe_id: ping.probe_id,
                            };
                            match serde_json::to_vec(&pong) {
                                Ok(payload) => {
                                    if let Err(e) = pong_client
                                        .publish("vigil/agents/pong@v1", QoS::AtLeastOnce, false, payload)
                                        .await
                                    {
                                        error!("pong publish failed: {e:?}");
                                    }
                                }
                                Err(e) => error!("pong serialization failed: {e}"),
                            }
                        }
                        Err(e) => warn!("invalid ping payload: {e}"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    });

    // Annonce de session
    let hello = HelloV1 {
        host_id: host_id.clone(),
        ip: ip.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ts: humantime::format_rfc3339(SystemTime::now()).to_string(),
    };
    client
        .publish("vigil/agents/hello@v1", QoS::AtLeastOnce, false, serde_json::to_vec(&hello)?)
        .await?;
    info!("agent {host_id} announced ({ip})");

    // Boucle d'échantillonnage
    let mut sampler = Sampler::new();
    let mut tick = interval(Duration::from_millis(cfg.sample_period_ms));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let memory_load = sampler.memory_percent().await;
                let cpu_load = sampler.cpu_percent().await;
                let stats = StatsV1 {
                    host_id: host_id.clone(),
                    ts: humantime::format_rfc3339(SystemTime::now()).to_string(),
                    cpu_load,
                    memory_load,
                    requests_per_second: counters.per_second(),
                    requests_per_minute: counters.per_minute(),
                };
                debug!(?stats, "sampled");
                match serde_json::to_vec(&stats) {
                    Ok(payload) => {
                        if let Err(e) = client
                            .publish("vigil/agents/stats@v1", QoS::AtLeastOnce, false, payload)
                            .await
                        {
                            error!("stats publish failed: {e:?}");
                        }
                    }
                    Err(e) => error!("stats serialization failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    // Teardown: plus aucun timer ne doit survivre à l'agent
    event_task.abort();
    for task in reset_tasks {
        task.abort();
    }
    client.disconnect().await.ok();
    Ok(())
}
