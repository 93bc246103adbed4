pub mod admissions;
pub mod annees;
pub mod auth;
pub mod classes;
pub mod eleves;
pub mod finance;
pub mod health;
pub mod incidents;
pub mod journal;
pub mod messages;
pub mod metrics;
pub mod sanctions;

use axum::{
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{middleware::permission, AppState};

/// Best-effort caller address for the audit log.
pub fn client_ip(h: &HeaderMap) -> Option<String> {
    h.get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            h.get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// 201 with a `Location` header pointing at the new resource.
pub fn created<T: Serialize>(location: String, body: T) -> Response {
    match HeaderValue::from_str(&location) {
        Ok(value) => (StatusCode::CREATED, [(header::LOCATION, value)], Json(body)).into_response(),
        Err(_) => (StatusCode::CREATED, Json(body)).into_response(),
    }
}

fn cors(base_url: String) -> CorsLayer {
    let origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(o) = origin.to_str() else {
            return false;
        };
        o == base_url || o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1")
    });

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .expose_headers([header::LOCATION, header::CONTENT_DISPOSITION])
        .allow_origin(origin)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::metrics_handler))
        // Auth
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        // School years
        .route("/annees-scolaires", get(annees::list_annees).post(annees::create_annee))
        .route("/annees-scolaires/{id}/activer", post(annees::activate_annee))
        // Classes
        .route("/classes", get(classes::list_classes).post(classes::create_classe))
        .route(
            "/classes/{id}",
            get(classes::get_classe)
                .put(classes::update_classe)
                .delete(classes::delete_classe),
        )
        // Students
        .route("/eleves", get(eleves::list_eleves).post(eleves::create_eleve))
        .route("/eleves/recherche", get(eleves::search_eleves))
        .route("/eleves/{id}", get(eleves::get_eleve).put(eleves::update_eleve))
        // Messages
        .route("/messages", get(messages::list_messages).post(messages::create_message))
        .route("/messages/bulk", post(messages::bulk_messages))
        .route("/messages/{id}", get(messages::get_message))
        .route("/messages/{id}/envoyer", post(messages::send_message))
        // Discipline
        .route("/incidents", get(incidents::list_incidents).post(incidents::create_incident))
        .route("/incidents/bulk", post(incidents::bulk_incidents))
        .route("/incidents/{id}", get(incidents::get_incident))
        .route("/incidents/{id}/statut", put(incidents::change_incident_status))
        .route("/sanctions", get(sanctions::list_sanctions).post(sanctions::create_sanction))
        .route("/sanctions/types", get(sanctions::list_types))
        .route("/sanctions/bulk", post(sanctions::bulk_sanctions))
        .route("/sanctions/{id}/statut", put(sanctions::change_sanction_status))
        // Finance
        .route("/finance/debiteurs", get(finance::list_debiteurs))
        .route("/finance/resume", get(finance::summary))
        .route("/finance/paiements", get(finance::list_paiements).post(finance::record_paiement))
        // Admissions
        .route("/admissions", get(admissions::list_admissions).post(admissions::create_admission))
        .route("/admissions/{id}", get(admissions::get_admission))
        .route("/admissions/{id}/statut", put(admissions::change_admission_status))
        .route("/admissions/{id}/inscrire", post(admissions::enroll_admission))
        // Audit
        .route("/journal", get(journal::list_journal))
        .layer(from_fn_with_state(state.clone(), permission::enforce))
        .layer(TraceLayer::new_for_http())
        .layer(cors(state.config.app_base_url.clone()))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_ip_wins_over_forwarded_chain() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.5, 172.16.0.1"));
        assert_eq!(client_ip(&h).as_deref(), Some("10.0.0.5"));

        h.insert("x-real-ip", HeaderValue::from_static("192.168.1.20"));
        assert_eq!(client_ip(&h).as_deref(), Some("192.168.1.20"));
    }

    #[test]
    fn missing_ip_is_none() {
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }
}
