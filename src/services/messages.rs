use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    db::filter::{FilterValue, ListQuery, Page},
    error::{AppError, AppResult, ValidationErrors},
    models::{
        message::{
            Boite, DestinataireType, Message, MessageBulkAction, MessageForm, MessageListItem, MessageListQuery,
            MessageStatus, Priorite, TypeMessage,
        },
        BulkRequest,
    },
    services::{
        metrics::{BULK_ACTIONS_COUNTER, MESSAGES_COUNTER},
        parse_bulk,
    },
};

pub const SUJET_MAX_LEN: usize = 200;

const COLUMNS: &str = "m.id, m.expediteur_id, m.destinataire_type, m.destinataire_id, m.sujet, m.contenu,
    m.type_message, m.priorite, m.status, m.programme, m.date_programmee, m.date_envoi, m.date_lecture,
    m.created_at";

const LIST_SELECT: &str = "m.id, m.expediteur_id, u.prenom || ' ' || u.nom AS expediteur_nom,
    m.destinataire_type, m.destinataire_id, m.sujet, m.type_message, m.priorite, m.status,
    m.date_programmee, m.date_envoi, m.created_at";

const LIST_FROM: &str = "FROM messages m JOIN utilisateurs u ON u.id = m.expediteur_id";

/// Delivered messages addressed to the user `p`: directly, through a class
/// they are head teacher of, by broadcast or through a custom list.
fn inbox_condition(p: &str) -> String {
    let delivered = MessageStatus::ALL
        .iter()
        .filter(|s| s.is_delivered())
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "m.status IN ({delivered}) AND m.expediteur_id <> {p} AND (
            (m.destinataire_type = 'individuel' AND m.destinataire_id = {p})
            OR (m.destinataire_type = 'classe' AND m.destinataire_id IN (
                SELECT c.id FROM classes c JOIN personnel pe ON pe.id = c.titulaire_id
                WHERE pe.utilisateur_id = {p}))
            OR m.destinataire_type = 'tous'
            OR (m.destinataire_type = 'personnalise' AND EXISTS (
                SELECT 1 FROM message_destinataires md
                WHERE md.message_id = m.id AND md.utilisateur_id = {p})))"
    )
}

/// Messages the user `p` sent or received.
fn access_condition(p: &str) -> String {
    format!("m.expediteur_id = {p} OR ({})", inbox_condition(p))
}

/// Bulk statement over ids `$1` for the user `$2`. A message row is shared
/// by every recipient, so only its sender may delete it.
fn bulk_sql(action: MessageBulkAction) -> String {
    let access = access_condition("$2");
    match action {
        MessageBulkAction::MarquerLu => format!(
            "UPDATE messages m SET status = 'lu', date_lecture = COALESCE(m.date_lecture, NOW())
             WHERE m.id = ANY($1) AND m.status = 'envoye' AND ({access})"
        ),
        MessageBulkAction::Archiver => format!(
            "UPDATE messages m SET status = 'archive'
             WHERE m.id = ANY($1) AND m.status <> 'archive' AND ({access})"
        ),
        MessageBulkAction::Supprimer => {
            "DELETE FROM messages m WHERE m.id = ANY($1) AND m.expediteur_id = $2".to_string()
        }
    }
}

/// A checked message, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub destinataire_type: DestinataireType,
    pub destinataire_id: Option<i64>,
    pub destinataires: Vec<i64>,
    pub sujet: String,
    pub contenu: String,
    pub type_message: TypeMessage,
    pub priorite: Priorite,
    pub status: MessageStatus,
    pub date_programmee: Option<DateTime<Utc>>,
}

fn parse_or<E: std::str::FromStr>(
    raw: &Option<String>,
    default: Option<E>,
    missing: &str,
    invalid: &str,
    errors: &mut ValidationErrors,
) -> Option<E> {
    match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => {
            if default.is_none() {
                errors.push(missing);
            }
            default
        }
        Some(s) => match s.parse::<E>() {
            Ok(v) => Some(v),
            Err(_) => {
                errors.push(invalid);
                None
            }
        },
    }
}

/// Everything that can be checked without the database. `now` is the
/// submission time a scheduled date must be after.
pub fn validate_message(form: &MessageForm, now: DateTime<Utc>) -> AppResult<MessageDraft> {
    let mut errors = ValidationErrors::new();

    let sujet = form.sujet.as_deref().map(str::trim).unwrap_or_default().to_string();
    if sujet.is_empty() {
        errors.push("Le sujet est obligatoire.");
    } else if sujet.chars().count() > SUJET_MAX_LEN {
        errors.push(format!("Le sujet ne doit pas dépasser {SUJET_MAX_LEN} caractères."));
    }

    let contenu = form.contenu.as_deref().map(str::trim).unwrap_or_default().to_string();
    errors.check(!contenu.is_empty(), "Le contenu du message est obligatoire.");

    let destinataire_type = parse_or::<DestinataireType>(
        &form.destinataire_type,
        None,
        "Le type de destinataire est obligatoire.",
        "Le type de destinataire est invalide.",
        &mut errors,
    );
    let type_message = parse_or(
        &form.type_message,
        Some(TypeMessage::Information),
        "",
        "Le type de message est invalide.",
        &mut errors,
    );
    let priorite = parse_or(
        &form.priorite,
        Some(Priorite::Normale),
        "",
        "La priorité est invalide.",
        &mut errors,
    );

    let mut destinataires: Vec<i64> = form.destinataires.iter().copied().filter(|id| *id > 0).collect();
    destinataires.sort_unstable();
    destinataires.dedup();

    let destinataire_id = match destinataire_type {
        Some(DestinataireType::Individuel) => {
            errors.check(form.destinataire_id.is_some(), "Le destinataire est obligatoire.");
            form.destinataire_id
        }
        Some(DestinataireType::Classe) => {
            errors.check(form.destinataire_id.is_some(), "La classe destinataire est obligatoire.");
            form.destinataire_id
        }
        Some(DestinataireType::Personnalise) => {
            errors.check(!destinataires.is_empty(), "Sélectionnez au moins un destinataire.");
            None
        }
        Some(DestinataireType::Tous) | None => None,
    };
    if destinataire_type != Some(DestinataireType::Personnalise) {
        destinataires.clear();
    }

    let status = if form.programme {
        match form.date_programmee {
            None => errors.push("La date d'envoi programmé est obligatoire."),
            Some(date) if date <= now => {
                errors.push("La date d'envoi programmé doit être dans le futur.")
            }
            _ => {}
        }
        MessageStatus::Programme
    } else if form.envoyer {
        MessageStatus::Envoye
    } else {
        MessageStatus::Brouillon
    };

    match (destinataire_type, type_message, priorite) {
        (Some(destinataire_type), Some(type_message), Some(priorite)) if errors.is_empty() => Ok(MessageDraft {
            destinataire_type,
            destinataire_id,
            destinataires,
            sujet,
            contenu,
            type_message,
            priorite,
            status,
            date_programmee: if form.programme { form.date_programmee } else { None },
        }),
        _ => Err(errors.into_error()),
    }
}

pub struct MessageService;

impl MessageService {
    fn list_query(q: &MessageListQuery, user_id: i64) -> ListQuery {
        let mut query = ListQuery::new(LIST_SELECT, LIST_FROM, "m.id").order_by("m.created_at DESC");
        match q.boite.as_deref().and_then(|b| b.trim().parse::<Boite>().ok()) {
            Some(Boite::Envoyes) => {
                query.raw("m.expediteur_id = ?", vec![FilterValue::Int(user_id)]);
            }
            _ => {
                query.raw(inbox_condition("?"), vec![FilterValue::Int(user_id); 4]);
            }
        }
        query
            .search(&["m.sujet", "m.contenu"], q.search.as_deref())
            .eq_enum::<MessageStatus>("m.status", q.status.as_deref())
            .eq_enum::<TypeMessage>("m.type_message", q.type_message.as_deref())
            .eq_enum::<Priorite>("m.priorite", q.priorite.as_deref())
            .date_from("m.created_at::date", q.date_debut.as_deref())
            .date_to("m.created_at::date", q.date_fin.as_deref());
        query
    }

    pub async fn list(
        pool: &PgPool,
        user_id: i64,
        q: &MessageListQuery,
        page: i64,
    ) -> AppResult<Page<MessageListItem>> {
        Self::list_query(q, user_id).fetch_page(pool, page).await
    }

    /// Open a message. The individual recipient opening a sent message marks
    /// it read.
    pub async fn get(pool: &PgPool, user_id: i64, id: i64) -> AppResult<Message> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {COLUMNS} FROM messages m WHERE m.id = $1 AND ({})",
            access_condition("$2")
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Message introuvable"))?;

        let opened_by_recipient = message.status == MessageStatus::Envoye.as_str()
            && message.destinataire_type == DestinataireType::Individuel.as_str()
            && message.destinataire_id == Some(user_id);
        if !opened_by_recipient {
            return Ok(message);
        }

        let read = sqlx::query_as::<_, Message>(&format!(
            "UPDATE messages m SET status = 'lu', date_lecture = NOW()
             WHERE m.id = $1 AND m.status = 'envoye'
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(read.unwrap_or(message))
    }

    /// Recipients that must exist in the database.
    async fn check_recipients(pool: &PgPool, draft: &MessageDraft) -> AppResult<()> {
        let mut errors = ValidationErrors::new();
        match draft.destinataire_type {
            DestinataireType::Individuel => {
                let found: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM utilisateurs WHERE id = $1 AND actif = TRUE)",
                )
                .bind(draft.destinataire_id)
                .fetch_one(pool)
                .await?;
                errors.check(found, "Le destinataire sélectionné n'existe pas.");
            }
            DestinataireType::Classe => {
                let found: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM classes WHERE id = $1)")
                    .bind(draft.destinataire_id)
                    .fetch_one(pool)
                    .await?;
                errors.check(found, "La classe destinataire n'existe pas.");
            }
            DestinataireType::Personnalise => {
                let known: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM utilisateurs WHERE id = ANY($1) AND actif = TRUE",
                )
                .bind(&draft.destinataires)
                .fetch_one(pool)
                .await?;
                errors.check(
                    known == draft.destinataires.len() as i64,
                    "Certains destinataires sélectionnés n'existent pas.",
                );
            }
            DestinataireType::Tous => {}
        }
        errors.into_result()
    }

    pub async fn create(pool: &PgPool, user_id: i64, form: &MessageForm) -> AppResult<Message> {
        let draft = validate_message(form, Utc::now())?;
        Self::check_recipients(pool, &draft).await?;

        let mut tx = pool.begin().await?;

        let message = sqlx::query_as::<_, Message>(&format!(
            "INSERT INTO messages AS m
                (expediteur_id, destinataire_type, destinataire_id, sujet, contenu, type_message, priorite,
                 status, programme, date_programmee, date_envoi)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                     CASE WHEN $8 = 'envoye' THEN NOW() END)
             RETURNING {COLUMNS}"
        ))
        .bind(user_id)
        .bind(draft.destinataire_type.as_str())
        .bind(draft.destinataire_id)
        .bind(&draft.sujet)
        .bind(&draft.contenu)
        .bind(draft.type_message.as_str())
        .bind(draft.priorite.as_str())
        .bind(draft.status.as_str())
        .bind(draft.status == MessageStatus::Programme)
        .bind(draft.date_programmee)
        .fetch_one(&mut *tx)
        .await?;

        if !draft.destinataires.is_empty() {
            sqlx::query(
                "INSERT INTO message_destinataires (message_id, utilisateur_id)
                 SELECT $1, unnest($2::BIGINT[])",
            )
            .bind(message.id)
            .bind(&draft.destinataires)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        MESSAGES_COUNTER.with_label_values(&[draft.status.as_str()]).inc();
        Ok(message)
    }

    /// Send a draft or scheduled message now. Only its author may.
    pub async fn send(pool: &PgPool, user_id: i64, id: i64) -> AppResult<Message> {
        let status: String = sqlx::query_scalar("SELECT status FROM messages WHERE id = $1 AND expediteur_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Message introuvable"))?;

        let current: MessageStatus = status.parse()?;
        if !current.can_transition_to(MessageStatus::Envoye) {
            return Err(AppError::validation("Seuls les brouillons et les messages programmés peuvent être envoyés."));
        }

        let message = sqlx::query_as::<_, Message>(&format!(
            "UPDATE messages m SET status = 'envoye', date_envoi = NOW()
             WHERE m.id = $1 AND m.status = $2
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(current.as_str())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::validation("Le message a été modifié entre-temps, veuillez réessayer."))?;

        MESSAGES_COUNTER.with_label_values(&[MessageStatus::Envoye.as_str()]).inc();
        Ok(message)
    }

    /// Apply one action to the selected messages. Read marking and
    /// archiving cover what the caller sent or received; deletion only what
    /// they sent. Runs in one transaction.
    pub async fn bulk(pool: &PgPool, user_id: i64, req: &BulkRequest) -> AppResult<u64> {
        let (action, ids) = parse_bulk::<MessageBulkAction>(req)?;
        let sql = bulk_sql(action);

        let mut tx = pool.begin().await?;
        let affected = sqlx::query(&sql)
            .bind(&ids)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        BULK_ACTIONS_COUNTER
            .with_label_values(&["messages", action.as_str()])
            .inc();
        Ok(affected)
    }
}
