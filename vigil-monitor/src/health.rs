use crate::models::HostRegistry;
use crate::state::Shared;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct MonitorHealth {
    pub uptime_seconds: u64,
    pub hosts_tracked: u32,
    pub hosts_reachable: u32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: std::sync::Arc<std::sync::atomic::AtomicU32>,
    mqtt_status: std::sync::Arc<parking_lot::Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0)),
            mqtt_status: std::sync::Arc::new(parking_lot::Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self, registry: &Shared<HostRegistry>) -> MonitorHealth {
        let uptime = self.start_time.elapsed().as_secs();
        let (tracked, reachable) = {
            let reg = registry.lock();
            let tracked = reg.records.len() as u32;
            let reachable = reg.records.values().filter(|h| h.reachable).count() as u32;
            (tracked, reachable)
        };
        let mqtt_status = self.mqtt_status.lock().clone();
        let reconnects = self.mqtt_reconnects.load(std::sync::atomic::Ordering::Relaxed);

        MonitorHealth {
            uptime_seconds: uptime,
            hosts_tracked: tracked,
            hosts_reachable: reachable,
            mqtt_status,
            mqtt_reconnects: reconnects,
        }
    }
}
