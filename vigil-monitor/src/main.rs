/**
 * VIGIL MONITOR - Agrégateur central de la flotte
 *
 * RÔLE : Un record par host configuré, alimenté par les échantillons
 * agents (CPU/RAM/requêtes) et les probes de latence du monitor.
 * Chaque mise à jour recalcule le score composite de santé.
 *
 * ARCHITECTURE : Listener MQTT + prober périodique + broadcast snapshot
 * vers les dashboards + API REST de consultation.
 * UTILITÉ : Point unique de supervision de la flotte.
 */

mod broadcast;
mod config;
mod health;
mod http;
mod models;
mod mqtt;
mod prober;
mod score;
mod state;

use crate::config::MonitorConfig;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::models::HostRegistry;
use crate::state::{new_state, Shared};

use std::net::SocketAddr;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    // registre et conf partagés
    let cfg_loaded: MonitorConfig = config::load_config().await;
    if cfg_loaded.hosts.is_empty() {
        eprintln!("[monitor] aucun host configuré, dashboard vide");
    }
    let registry = new_state(HostRegistry::from_hosts(&cfg_loaded.hosts));
    println!("[monitor] tracking {} hosts", cfg_loaded.hosts.len());
    let cfg: Shared<MonitorConfig> = new_state(cfg_loaded.clone());

    // health tracker
    let health_tracker = HealthTracker::new();

    // Client MQTT partagé: listener (réception), prober et broadcast (envoi)
    let (client, eventloop) = mqtt::create_mqtt_client(&cfg_loaded);
    if let Err(e) = mqtt::subscribe_topics(&client).await {
        eprintln!("[monitor] subscribe MQTT failed: {e:?}");
    }
    mqtt::spawn_listener(registry.clone(), cfg.clone(), eventloop, health_tracker.clone());

    // probes de latence + snapshot dashboards
    prober::spawn_prober(registry.clone(), cfg.clone(), client.clone());
    broadcast::spawn_snapshot_publisher(registry.clone(), cfg.clone(), client);

    // fabrique l'état unique pour Axum
    let app_state = AppState { registry, health_tracker };

    // HTTP
    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    println!("[monitor] listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
