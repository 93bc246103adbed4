//! Form checks that answer before any database access.

mod test_support;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use ecole_api::models::user::Role;
use serde_json::json;
use test_support::{app, errors, send, token};

#[tokio::test]
async fn scheduled_message_in_the_past_is_rejected() {
    let yesterday = Utc::now() - Duration::days(1);
    let body = json!({
        "destinataire_type": "tous",
        "sujet": "Réunion des parents",
        "contenu": "La réunion aura lieu samedi.",
        "programme": true,
        "date_programmee": yesterday,
    });

    let (status, body) = send(app(), Method::POST, "/messages", Some(&token(Role::Enseignant)), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(errors(&body), vec!["La date d'envoi programmé doit être dans le futur."]);
}

#[tokio::test]
async fn empty_class_form_lists_every_problem() {
    let (status, body) = send(app(), Method::POST, "/classes", Some(&token(Role::Directeur)), Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(errors(&body).len() >= 2, "{body}");
}

#[tokio::test]
async fn unknown_bulk_action_is_rejected() {
    let body = json!({ "ids": [1, 2], "action": "detruire" });
    let (status, body) = send(app(), Method::POST, "/messages/bulk", Some(&token(Role::Secretaire)), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(errors(&body), vec!["Action inconnue : detruire"]);
}

#[tokio::test]
async fn bulk_without_selection_is_rejected() {
    let body = json!({ "ids": [], "action": "archiver" });
    let (status, body) = send(app(), Method::POST, "/incidents/bulk", Some(&token(Role::Surveillant)), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(errors(&body), vec!["Aucun élément sélectionné."]);
}

#[tokio::test]
async fn future_incident_is_rejected() {
    let tomorrow = (Utc::now() + Duration::days(2)).date_naive();
    let body = json!({
        "eleve_id": 3,
        "description": "Bagarre dans la cour",
        "date_incident": tomorrow,
    });
    let (status, body) = send(app(), Method::POST, "/incidents", Some(&token(Role::Surveillant)), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(errors(&body), vec!["La date de l'incident ne peut pas être dans le futur."]);
}

#[tokio::test]
async fn admission_requires_the_child_and_parent() {
    let (status, body) = send(app(), Method::POST, "/admissions", Some(&token(Role::Secretaire)), Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(errors(&body).len(), 6);
}
