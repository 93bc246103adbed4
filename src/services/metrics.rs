use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec};
use sqlx::PgPool;
use tracing::{info, warn};

lazy_static! {
    // ── Event counters ──────────────────────────────────────────────────────
    pub static ref LOGINS_COUNTER: CounterVec = register_counter_vec!(
        "ecole_logins_total",
        "Tentatives de connexion par statut",
        &["status"]
    ).unwrap();

    pub static ref MESSAGES_COUNTER: CounterVec = register_counter_vec!(
        "ecole_messages_created_total",
        "Messages créés par statut initial",
        &["status"]
    ).unwrap();

    pub static ref INCIDENTS_COUNTER: CounterVec = register_counter_vec!(
        "ecole_incidents_reported_total",
        "Incidents signalés par gravité",
        &["gravite"]
    ).unwrap();

    pub static ref ADMISSIONS_COUNTER: CounterVec = register_counter_vec!(
        "ecole_admissions_created_total",
        "Demandes d'admission enregistrées par priorité",
        &["priorite"]
    ).unwrap();

    pub static ref BULK_ACTIONS_COUNTER: CounterVec = register_counter_vec!(
        "ecole_bulk_actions_total",
        "Actions groupées exécutées",
        &["module", "action"]
    ).unwrap();

    // ── Business gauges ─────────────────────────────────────────────────────
    pub static ref ELEVES_GAUGE: Gauge = register_gauge!(
        "ecole_eleves_actifs",
        "Élèves actifs"
    ).unwrap();

    pub static ref INCIDENTS_GAUGE: GaugeVec = register_gauge_vec!(
        "ecole_incidents",
        "Incidents par statut",
        &["status"]
    ).unwrap();

    pub static ref ADMISSIONS_PENDING_GAUGE: Gauge = register_gauge!(
        "ecole_admissions_en_attente",
        "Demandes d'admission en attente"
    ).unwrap();

    /// Scheduled messages whose date has passed but are still `programme`:
    /// nothing sends them automatically.
    pub static ref SCHEDULED_OVERDUE_GAUGE: Gauge = register_gauge!(
        "ecole_messages_programmes_echus",
        "Messages programmés dont la date est passée"
    ).unwrap();
}

/// Spawn the background metrics collector (refreshes every 5 minutes).
pub fn start(pool: PgPool) {
    tokio::spawn(async move {
        if let Err(e) = collect(&pool).await {
            warn!("Metrics: initial collection failed: {}", e);
        }
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
            if let Err(e) = collect(&pool).await {
                warn!("Metrics: collection failed: {}", e);
            }
        }
    });
}

/// Replace the per-status incident series, dropping statuses no longer present.
fn set_incident_counts(counts: &[(String, i64)]) {
    INCIDENTS_GAUGE.reset();
    for (status, count) in counts {
        INCIDENTS_GAUGE.with_label_values(&[status.as_str()]).set(*count as f64);
    }
}

async fn collect(pool: &PgPool) -> anyhow::Result<()> {
    let eleves: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM eleves WHERE status = 'actif'")
        .fetch_one(pool)
        .await?;
    ELEVES_GAUGE.set(eleves as f64);

    let incidents: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM incidents GROUP BY status")
            .fetch_all(pool)
            .await?;
    set_incident_counts(&incidents);

    let pending: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM demandes_admission WHERE status = 'en_attente'")
            .fetch_one(pool)
            .await?;
    ADMISSIONS_PENDING_GAUGE.set(pending as f64);

    let overdue: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages WHERE status = 'programme' AND date_programmee <= NOW()",
    )
    .fetch_one(pool)
    .await?;
    SCHEDULED_OVERDUE_GAUGE.set(overdue as f64);
    if overdue > 0 {
        warn!("{} scheduled message(s) past their date are still waiting to be sent", overdue);
    }

    info!("Metrics: collected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn emptied_incident_status_disappears() {
        set_incident_counts(&[("nouveau".into(), 3), ("resolu".into(), 1)]);
        set_incident_counts(&[("resolu".into(), 4)]);

        let families = INCIDENTS_GAUGE.collect();
        let series: Vec<(String, f64)> = families[0]
            .get_metric()
            .iter()
            .map(|m| (m.get_label()[0].get_value().to_string(), m.get_gauge().get_value()))
            .collect();
        assert_eq!(series, vec![("resolu".to_string(), 4.0)]);
    }
}
