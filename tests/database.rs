//! Service behaviour against a real PostgreSQL. Each test provisions its own
//! schema on `DATABASE_URL` and returns early when the variable is unset.

mod test_support;

use chrono::{Datelike, Utc};

use ecole_api::{
    db::{
        filter::PAGE_SIZE,
        layout::{self, IncidentLayout, LayoutOverride, SanctionLayout},
    },
    error::AppError,
    models::{
        classe::ClasseForm,
        discipline::{IncidentForm, SanctionForm},
        eleve::EleveListQuery,
        message::MessageForm,
        user::Role,
        BulkRequest,
    },
    services::{
        classes::ClasseService, eleves::EleveService, incidents::IncidentService, messages::MessageService,
        sanctions::SanctionService,
    },
};
use test_support::{date, TestDb};

fn validation(result: Result<impl std::fmt::Debug, AppError>) -> Vec<String> {
    match result {
        Err(AppError::Validation(list)) => list,
        other => panic!("expected validation errors, got {other:?}"),
    }
}

fn classe(nom: &str) -> ClasseForm {
    ClasseForm {
        nom: Some(nom.into()),
        niveau: Some("primaire".into()),
        ..Default::default()
    }
}

fn broadcast(sujet: &str) -> MessageForm {
    MessageForm {
        destinataire_type: Some("tous".into()),
        sujet: Some(sujet.into()),
        contenu: Some("Informations de la semaine.".into()),
        envoyer: true,
        ..Default::default()
    }
}

fn bulk(action: &str, ids: Vec<i64>) -> BulkRequest {
    BulkRequest {
        ids,
        action: action.into(),
        status: None,
    }
}

#[tokio::test]
async fn class_names_are_unique_per_year_ignoring_case() {
    let Some(db) = TestDb::connect().await else { return };
    db.active_year().await;

    ClasseService::create(&db.pool, &classe("6e A")).await.unwrap();
    let errors = validation(ClasseService::create(&db.pool, &classe("6E a")).await);
    assert_eq!(errors, vec!["La classe « 6E a » existe déjà pour cette année scolaire."]);

    db.finish().await;
}

#[tokio::test]
async fn class_update_null_clears_head_teacher() {
    let Some(db) = TestDb::connect().await else { return };
    db.active_year().await;
    let titulaire = db.staff(None).await;

    let mut form = classe("CM1");
    form.titulaire_id = Some(Some(titulaire));
    form.salle = Some(Some("B12".into()));
    let created = ClasseService::create(&db.pool, &form).await.unwrap();
    assert_eq!(created.titulaire_id, Some(titulaire));

    let kept = ClasseService::update(&db.pool, created.id, &ClasseForm::default()).await.unwrap();
    assert_eq!(kept.titulaire_id, Some(titulaire));

    let cleared: ClasseForm = serde_json::from_str(r#"{"titulaire_id": null}"#).unwrap();
    let updated = ClasseService::update(&db.pool, created.id, &cleared).await.unwrap();
    assert_eq!(updated.titulaire_id, None);
    assert_eq!(updated.salle.as_deref(), Some("B12"));

    db.finish().await;
}

#[tokio::test]
async fn bulk_archive_counts_changed_rows_only() {
    let Some(db) = TestDb::connect().await else { return };
    let sender = db.user("direction@ecole.test", Role::Directeur).await;
    let reader = db.user("enseignant@ecole.test", Role::Enseignant).await;

    let mut ids = Vec::new();
    for sujet in ["Réunion", "Cantine", "Sortie"] {
        ids.push(MessageService::create(&db.pool, sender, &broadcast(sujet)).await.unwrap().id);
    }

    let first = MessageService::bulk(&db.pool, reader, &bulk("archiver", vec![ids[0], ids[1], 999_999]))
        .await
        .unwrap();
    assert_eq!(first, 2);

    let second = MessageService::bulk(&db.pool, reader, &bulk("archiver", ids.clone())).await.unwrap();
    assert_eq!(second, 1);

    db.finish().await;
}

#[tokio::test]
async fn recipients_cannot_delete_shared_messages() {
    let Some(db) = TestDb::connect().await else { return };
    let sender = db.user("direction@ecole.test", Role::Directeur).await;
    let reader = db.user("surveillant@ecole.test", Role::Surveillant).await;

    let id = MessageService::create(&db.pool, sender, &broadcast("Réunion")).await.unwrap().id;

    let removed = MessageService::bulk(&db.pool, reader, &bulk("supprimer", vec![id])).await.unwrap();
    assert_eq!(removed, 0);
    assert_eq!(MessageService::get(&db.pool, sender, id).await.unwrap().id, id);

    let removed = MessageService::bulk(&db.pool, sender, &bulk("supprimer", vec![id])).await.unwrap();
    assert_eq!(removed, 1);
    assert!(matches!(
        MessageService::get(&db.pool, sender, id).await,
        Err(AppError::NotFound(_))
    ));

    db.finish().await;
}

#[tokio::test]
async fn incidents_insert_on_the_legacy_table_shape() {
    let Some(db) = TestDb::connect().await else { return };
    sqlx::query("ALTER TABLE incidents DROP COLUMN rapporte_par")
        .execute(&db.pool)
        .await
        .unwrap();

    let resolved = layout::resolve(&db.pool, LayoutOverride::Auto).await.unwrap();
    assert_eq!(resolved.incidents, IncidentLayout::Legacy);
    assert_eq!(resolved.sanctions, SanctionLayout::Typed);

    let eleve_id = db.eleve(None).await;
    let form = IncidentForm {
        eleve_id: Some(eleve_id),
        description: Some("Bagarre dans la cour".into()),
        gravite: Some("moyenne".into()),
        rapporte_par: Some(42),
        ..Default::default()
    };
    let incident = IncidentService::create(&db.pool, resolved.incidents, 1, &form).await.unwrap();
    assert_eq!(incident.eleve_id, eleve_id);
    assert_eq!(incident.rapporte_par, None);
    assert_eq!(incident.status, "nouveau");

    db.finish().await;
}

#[tokio::test]
async fn page_past_the_end_is_empty() {
    let Some(db) = TestDb::connect().await else { return };
    db.eleve(None).await;

    let page = EleveService::list(&db.pool, &EleveListQuery::default(), 9).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.total, 1);
    assert_eq!(page.total_pages, 1);
    assert_eq!(page.page, 9);
    assert_eq!(page.per_page, PAGE_SIZE);

    db.finish().await;
}

#[tokio::test]
async fn hand_typed_long_matricule_does_not_break_numbering() {
    let Some(db) = TestDb::connect().await else { return };
    let year = Utc::now().year();

    db.eleve(Some(&format!("EL-{year}-{}", "9".repeat(20)))).await;
    let generated = EleveService::get(&db.pool, db.eleve(None).await).await.unwrap();
    assert_eq!(generated.eleve.numero_matricule, format!("EL-{year}-0001"));

    db.finish().await;
}

#[tokio::test]
async fn sanction_periods_are_validated_before_insert() {
    let Some(db) = TestDb::connect().await else { return };
    let eleve_id = db.eleve(None).await;
    let retenue: i64 = sqlx::query_scalar("SELECT id FROM types_sanctions WHERE nom = 'Retenue'")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    let form = |duree_jours: Option<i32>, date_fin| SanctionForm {
        eleve_id: Some(eleve_id),
        type_sanction_id: Some(retenue),
        date_debut: Some(date(2025, 10, 6)),
        duree_jours,
        date_fin,
        ..Default::default()
    };

    let errors = validation(
        SanctionService::create(&db.pool, SanctionLayout::Typed, &form(Some(i32::MAX), None)).await,
    );
    assert_eq!(errors, vec!["La durée doit être comprise entre 1 et 365 jours."]);

    let errors = validation(
        SanctionService::create(&db.pool, SanctionLayout::Typed, &form(Some(10), Some(date(2025, 10, 7)))).await,
    );
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("La durée (10 jours) ne correspond pas"));

    let sanction = SanctionService::create(&db.pool, SanctionLayout::Typed, &form(None, None)).await.unwrap();
    assert_eq!(sanction.date_fin, date(2025, 10, 6));
    assert_eq!(sanction.duree_jours, 1);

    db.finish().await;
}
