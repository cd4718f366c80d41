use crate::config::MonitorConfig;
use crate::models::{HostRegistry, SnapshotV1};
use crate::state::Shared;
use rumqttc::{AsyncClient, QoS};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::task::{self, JoinHandle};
use tokio::time::Duration;

pub const SNAPSHOT_TOPIC: &str = "vigil/dashboard/snapshot@v1";

/// Pousse le snapshot consolidé vers les dashboards à cadence fixe,
/// dans l'ordre de configuration des hosts
pub fn spawn_snapshot_publisher(
    registry: Shared<HostRegistry>,
    cfg: Shared<MonitorConfig>,
    client: AsyncClient,
) -> JoinHandle<()> {
    task::spawn(async move {
        let period_ms = cfg.lock().probe.period_ms;
        let mut interval = tokio::time::interval(Duration::from_millis(period_ms));
        loop {
            interval.tick().await;
            let snapshot = {
                let reg = registry.lock();
                SnapshotV1 {
                    ts: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
                    hosts: reg.views(),
                }
            };
            match serde_json::to_string(&snapshot) {
                Ok(payload) => {
                    if let Err(e) = client.publish(SNAPSHOT_TOPIC, QoS::AtLeastOnce, false, payload).await {
                        eprintln!("[broadcast] failed to publish snapshot: {e:?}");
                    }
                }
                Err(e) => eprintln!("[broadcast] snapshot serialization failed: {e}"),
            }
        }
    })
}
