//! Score composite de santé par host.
//!
//! Quatre termes additifs (CPU, mémoire, latence, joignabilité), total
//! plafonné à 4 sans plancher, normalisé sur 4 pour le mapping couleur.
//! Recalculé à chaque changement d'entrée: nouvel échantillon, probe
//! résolue, probe expirée.

use crate::models::HostRecord;
use serde::{Deserialize, Serialize};

pub const SCORE_CEILING: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    /// Aucun score calculé pour l'instant
    Unknown,
    Red,
    Amber,
    Green,
    Blue,
}

impl StatusColor {
    pub fn hex(&self) -> &'static str {
        match self {
            StatusColor::Unknown => "#cccccc",
            StatusColor::Red => "#ff0000",
            StatusColor::Amber => "#ffcc00",
            StatusColor::Green => "#00cc00",
            StatusColor::Blue => "#006aff",
        }
    }
}

/// Terme de charge, même forme pour CPU et mémoire:
/// < 10% -> +1, > 90% -> -1, sinon interpolation sur (10,90).
/// Une charge jamais échantillonnée ne contribue pas.
fn load_term(load: Option<f64>) -> f64 {
    let Some(load) = load else { return 0.0 };
    if load < 10.0 {
        1.0
    } else if load > 90.0 {
        -1.0
    } else {
        (load - 10.0) / 80.0
    }
}

/// Terme de latence: seuls les extrêmes comptent, la zone 10..=100ms est
/// volontairement neutre. Probe en cours ou échouée: pas de contribution
/// (l'injoignabilité est déjà facturée par le terme dédié).
fn latency_term(latency_ms: Option<u64>) -> f64 {
    let Some(latency) = latency_ms else { return 0.0 };
    if latency < 10 {
        1.0
    } else if latency > 1000 {
        -1.0
    } else if latency > 100 {
        0.25
    } else {
        0.0
    }
}

fn reachability_term(reachable: bool) -> f64 {
    // L'état "aucune probe aboutie" est résolu en faux par le record,
    // jamais sauté: un host muet paie la pénalité.
    if reachable { 0.125 } else { -0.125 }
}

/// Somme brute des quatre termes, avant plafonnement.
pub fn composite_score(
    cpu_load: Option<f64>,
    memory_load: Option<f64>,
    latency_ms: Option<u64>,
    reachable: bool,
) -> f64 {
    load_term(cpu_load) + load_term(memory_load) + latency_term(latency_ms) + reachability_term(reachable)
}

/// Mapping couleur sur le score normalisé, bornes incluses dans le
/// bucket inférieur. Un score négatif reste négatif et tombe en rouge.
pub fn score_to_color(normalized: f64) -> StatusColor {
    if normalized <= 0.25 {
        StatusColor::Red
    } else if normalized <= 0.50 {
        StatusColor::Amber
    } else if normalized <= 0.75 {
        StatusColor::Green
    } else {
        StatusColor::Blue
    }
}

/// Recalcule le score d'un record et son historique, atomiquement du
/// point de vue de l'appelant (à appeler sous le lock du registre).
pub fn rescore(host: &mut HostRecord, trend_capacity: usize) {
    let total = composite_score(host.cpu_load, host.memory_load, host.latency_ms, host.reachable);

    // Le trend garde le total brut, jamais relu pour le scoring
    host.score_trend.push_back(total);
    while host.score_trend.len() > trend_capacity {
        host.score_trend.pop_front();
    }

    // Plafond à 4, pas de plancher: conservé tel quel
    let clamped = total.min(SCORE_CEILING);
    host.score = clamped;
    host.status_color = score_to_color(clamped / SCORE_CEILING);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HostIdentity, HostRecord};

    fn record() -> HostRecord {
        HostRecord::new(HostIdentity {
            name: "server-01".into(),
            addr: "localhost".into(),
            port: 5001,
        })
    }

    #[test]
    fn healthy_host_scores_blue() {
        // cpu=5, mem=5, latence=5ms, probe ok -> 1+1+1+0.125 = 3.125
        let total = composite_score(Some(5.0), Some(5.0), Some(5), true);
        assert_eq!(total, 3.125);
        assert_eq!(total / SCORE_CEILING, 0.78125);
        assert_eq!(score_to_color(total / SCORE_CEILING), StatusColor::Blue);
    }

    #[test]
    fn saturated_host_scores_negative_red() {
        // cpu=95, mem=95, latence=2000ms, probe échouée -> -3.125
        let total = composite_score(Some(95.0), Some(95.0), Some(2000), false);
        assert_eq!(total, -3.125);
        // normalisé négatif, premier bucket (<= 0.25) -> rouge
        assert_eq!(score_to_color(total / SCORE_CEILING), StatusColor::Red);
    }

    #[test]
    fn load_term_interpolates_between_thresholds() {
        assert_eq!(load_term(Some(9.99)), 1.0);
        assert_eq!(load_term(Some(10.0)), 0.0);
        assert_eq!(load_term(Some(50.0)), 0.5);
        assert_eq!(load_term(Some(90.0)), 1.0);
        assert_eq!(load_term(Some(90.01)), -1.0);
        assert_eq!(load_term(None), 0.0);
    }

    #[test]
    fn latency_dead_zone_is_neutral() {
        assert_eq!(latency_term(Some(9)), 1.0);
        assert_eq!(latency_term(Some(10)), 0.0);
        assert_eq!(latency_term(Some(100)), 0.0);
        assert_eq!(latency_term(Some(101)), 0.25);
        assert_eq!(latency_term(Some(1000)), 0.25);
        assert_eq!(latency_term(Some(1001)), -1.0);
        assert_eq!(latency_term(None), 0.0);
    }

    #[test]
    fn unprobed_host_pays_reachability_penalty() {
        let mut host = record();
        host.cpu_load = Some(5.0);
        host.memory_load = Some(5.0);
        rescore(&mut host, 100);
        // 1 + 1 + 0 - 0.125: jamais de probe aboutie -> pénalisé
        assert_eq!(host.score, 1.875);
    }

    #[test]
    fn color_buckets_closed_on_lower_edge() {
        assert_eq!(score_to_color(0.25), StatusColor::Red);
        assert_eq!(score_to_color(0.26), StatusColor::Amber);
        assert_eq!(score_to_color(0.50), StatusColor::Amber);
        assert_eq!(score_to_color(0.51), StatusColor::Green);
        assert_eq!(score_to_color(0.75), StatusColor::Green);
        assert_eq!(score_to_color(0.76), StatusColor::Blue);
        assert_eq!(score_to_color(-0.78125), StatusColor::Red);
    }

    #[test]
    fn trend_is_bounded_fifo() {
        let mut host = record();
        host.reachable = true;
        for i in 0..150 {
            host.cpu_load = Some(f64::from(i % 80));
            rescore(&mut host, 100);
        }
        assert_eq!(host.score_trend.len(), 100);
        // les 100 dernières valeurs, dans l'ordre d'arrivée
        let expected_first = composite_score(Some(f64::from(50 % 80)), None, None, true);
        assert_eq!(*host.score_trend.front().unwrap(), expected_first);
        let expected_last = composite_score(Some(f64::from(149 % 80)), None, None, true);
        assert_eq!(*host.score_trend.back().unwrap(), expected_last);
    }

    #[test]
    fn trend_keeps_raw_totals() {
        let mut host = record();
        host.cpu_load = Some(95.0);
        host.memory_load = Some(95.0);
        host.latency_ms = Some(2000);
        rescore(&mut host, 100);
        assert_eq!(*host.score_trend.back().unwrap(), -3.125);
        assert_eq!(host.score, -3.125);
        assert_eq!(host.status_color, StatusColor::Red);
    }

    #[test]
    fn rescore_updates_color() {
        let mut host = record();
        host.cpu_load = Some(5.0);
        host.memory_load = Some(5.0);
        host.latency_ms = Some(5);
        host.reachable = true;
        rescore(&mut host, 100);
        assert_eq!(host.score, 3.125);
        assert_eq!(host.status_color, StatusColor::Blue);
        assert_eq!(host.status_color.hex(), "#006aff");
    }
}
