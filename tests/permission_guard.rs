mod test_support;

use axum::http::{Method, StatusCode};
use ecole_api::models::user::Role;
use test_support::{app, errors, send, token};

#[tokio::test]
async fn protected_routes_require_a_token() {
    for (method, uri) in [
        (Method::GET, "/classes"),
        (Method::GET, "/eleves/recherche?q=ka"),
        (Method::POST, "/messages/bulk"),
        (Method::GET, "/finance/resume"),
        (Method::GET, "/auth/me"),
    ] {
        let (status, body) = send(app(), method.clone(), uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
        assert_eq!(errors(&body), vec!["Authentification requise"]);
    }
}

#[tokio::test]
async fn forged_token_is_rejected() {
    let forged = ecole_api::services::auth::AuthService::generate_access_token(
        7,
        Role::Admin,
        "un-autre-secret",
        3600,
    )
    .unwrap();
    let (status, _) = send(app(), Method::GET, "/classes", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(app(), Method::GET, "/classes", Some("pas-un-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn roles_outside_a_module_are_forbidden() {
    let cases = [
        (Role::Comptable, Method::GET, "/incidents"),
        (Role::Secretaire, Method::POST, "/sanctions/bulk"),
        (Role::Enseignant, Method::GET, "/finance/debiteurs"),
        (Role::Surveillant, Method::POST, "/admissions"),
        (Role::Directeur, Method::GET, "/journal"),
        (Role::Comptable, Method::POST, "/annees-scolaires/1/activer"),
    ];
    for (role, method, uri) in cases {
        let (status, body) = send(app(), method.clone(), uri, Some(&token(role)), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{role} {method} {uri}");
        assert_eq!(errors(&body), vec!["Accès refusé"]);
    }
}

#[tokio::test]
async fn metrics_are_public() {
    let (status, _) = send(app(), Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_is_public_and_reports_the_database() {
    let (status, body) = send(app(), Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["db"], "unreachable");
}
