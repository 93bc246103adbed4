use sqlx::PgPool;

use crate::{
    db::filter::{parse_id, FilterValue, ListQuery, Op, Page},
    error::{is_unique_violation, AppError, AppResult, ValidationErrors},
    models::classe::{Classe, ClasseDetail, ClasseEleve, ClasseForm, ClasseListItem, ClasseListQuery, Niveau},
    services::annees::AnneeService,
};

pub const NOM_MAX_LEN: usize = 100;
pub const CAPACITE_DEFAUT: i32 = 40;
pub const CAPACITE_MAX: i32 = 200;

const LIST_SELECT: &str = "c.id, c.nom, c.niveau, c.section, c.salle, c.capacite_max, c.titulaire_id,
    p.prenom || ' ' || p.nom AS titulaire_nom, c.annee_scolaire_id, a.libelle AS annee_libelle,
    (SELECT COUNT(*) FROM inscriptions i WHERE i.classe_id = c.id AND i.status = 'inscrit') AS effectif";

const LIST_FROM: &str = "FROM classes c
    JOIN annees_scolaires a ON a.id = c.annee_scolaire_id
    LEFT JOIN personnel p ON p.id = c.titulaire_id";

const COLUMNS: &str =
    "id, nom, niveau, section, salle, capacite_max, titulaire_id, annee_scolaire_id, created_at";

/// Validated class fields, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ClasseFields {
    pub nom: String,
    pub niveau: Niveau,
    pub section: Option<String>,
    pub salle: Option<String>,
    pub capacite_max: i32,
    pub titulaire_id: Option<i64>,
    pub annee_scolaire_id: Option<i64>,
}

fn trimmed(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Checks that need no database access.
pub fn validate_fields(form: &ClasseForm) -> AppResult<ClasseFields> {
    let mut errors = ValidationErrors::new();

    let nom = trimmed(&form.nom);
    match &nom {
        None => errors.push("Le nom de la classe est obligatoire."),
        Some(n) if n.chars().count() > NOM_MAX_LEN => errors.push(format!(
            "Le nom de la classe ne doit pas dépasser {NOM_MAX_LEN} caractères."
        )),
        _ => {}
    }

    let niveau = match trimmed(&form.niveau) {
        None => {
            errors.push("Le niveau est obligatoire.");
            None
        }
        Some(raw) => match raw.parse::<Niveau>() {
            Ok(n) => Some(n),
            Err(_) => {
                errors.push("Le niveau sélectionné est invalide.");
                None
            }
        },
    };

    let capacite_max = form.capacite_max.unwrap_or(CAPACITE_DEFAUT);
    errors.check(
        (1..=CAPACITE_MAX).contains(&capacite_max),
        format!("La capacité maximale doit être comprise entre 1 et {CAPACITE_MAX}."),
    );

    match (nom, niveau) {
        (Some(nom), Some(niveau)) if errors.is_empty() => Ok(ClasseFields {
            nom,
            niveau,
            section: form.section.as_ref().and_then(trimmed),
            salle: form.salle.as_ref().and_then(trimmed),
            capacite_max,
            titulaire_id: form.titulaire_id.flatten(),
            annee_scolaire_id: form.annee_scolaire_id,
        }),
        _ => Err(errors.into_error()),
    }
}

/// Update form completed with the current values of the fields it omits.
fn merge_update(form: &ClasseForm, current: &Classe) -> ClasseForm {
    ClasseForm {
        nom: form.nom.clone().or_else(|| Some(current.nom.clone())),
        niveau: form.niveau.clone().or_else(|| Some(current.niveau.clone())),
        section: Some(form.section.clone().unwrap_or_else(|| current.section.clone())),
        salle: Some(form.salle.clone().unwrap_or_else(|| current.salle.clone())),
        capacite_max: form.capacite_max.or(Some(current.capacite_max)),
        titulaire_id: Some(form.titulaire_id.unwrap_or(current.titulaire_id)),
        annee_scolaire_id: form.annee_scolaire_id.or(Some(current.annee_scolaire_id)),
    }
}

fn duplicate_message(nom: &str) -> String {
    format!("La classe « {nom} » existe déjà pour cette année scolaire.")
}

pub struct ClasseService;

impl ClasseService {
    fn list_query(q: &ClasseListQuery, annee_id: Option<i64>) -> ListQuery {
        let mut query = ListQuery::new(LIST_SELECT, LIST_FROM, "c.id").order_by("c.niveau, c.nom");
        query
            .search(&["c.nom", "c.section", "c.salle"], q.search.as_deref())
            .eq_enum::<Niveau>("c.niveau", q.niveau.as_deref())
            .eq_id("c.titulaire_id", q.titulaire_id.as_deref());
        if let Some(annee_id) = annee_id {
            query.compare("c.annee_scolaire_id", Op::Eq, FilterValue::Int(annee_id));
        }
        query
    }

    /// The year filter defaults to the active year.
    async fn annee_filter(pool: &PgPool, q: &ClasseListQuery) -> AppResult<Option<i64>> {
        match parse_id(q.annee_scolaire_id.as_deref()) {
            Some(id) => Ok(Some(id)),
            None => AnneeService::active_id(pool).await,
        }
    }

    pub async fn list(pool: &PgPool, q: &ClasseListQuery, page: i64) -> AppResult<Page<ClasseListItem>> {
        let annee_id = Self::annee_filter(pool, q).await?;
        Self::list_query(q, annee_id).fetch_page(pool, page).await
    }

    pub async fn export_rows(pool: &PgPool, q: &ClasseListQuery) -> AppResult<Vec<ClasseListItem>> {
        let annee_id = Self::annee_filter(pool, q).await?;
        Self::list_query(q, annee_id).fetch_all(pool).await
    }

    pub async fn get(pool: &PgPool, id: i64) -> AppResult<ClasseDetail> {
        let classe = sqlx::query_as::<_, ClasseListItem>(&format!(
            "SELECT {LIST_SELECT} {LIST_FROM} WHERE c.id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Classe introuvable"))?;

        let eleves = sqlx::query_as::<_, ClasseEleve>(
            "SELECT e.id AS eleve_id, e.numero_matricule, e.nom, e.prenom, e.sexe, e.date_naissance,
                    i.date_inscription
             FROM inscriptions i
             JOIN eleves e ON e.id = i.eleve_id
             WHERE i.classe_id = $1 AND i.status = 'inscrit'
             ORDER BY e.nom, e.prenom, e.id",
        )
        .bind(id)
        .fetch_all(pool)
        .await?;

        Ok(ClasseDetail { classe, eleves })
    }

    async fn find(pool: &PgPool, id: i64) -> AppResult<Classe> {
        sqlx::query_as::<_, Classe>(&format!("SELECT {COLUMNS} FROM classes WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Classe introuvable"))
    }

    /// Checks that need the database: year, head teacher, name uniqueness.
    async fn check_references(
        pool: &PgPool,
        fields: &ClasseFields,
        annee_id: i64,
        exclude_id: Option<i64>,
    ) -> AppResult<()> {
        let mut errors = ValidationErrors::new();

        if !AnneeService::exists(pool, annee_id).await? {
            errors.push("L'année scolaire sélectionnée n'existe pas.");
        }

        if let Some(titulaire_id) = fields.titulaire_id {
            let found: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM personnel WHERE id = $1 AND actif = TRUE)",
            )
            .bind(titulaire_id)
            .fetch_one(pool)
            .await?;
            errors.check(found, "Le titulaire sélectionné n'existe pas.");
        }

        let duplicate: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM classes
                WHERE lower(nom) = lower($1) AND annee_scolaire_id = $2
                  AND ($3::BIGINT IS NULL OR id <> $3))",
        )
        .bind(&fields.nom)
        .bind(annee_id)
        .bind(exclude_id)
        .fetch_one(pool)
        .await?;
        errors.check(!duplicate, duplicate_message(&fields.nom));

        errors.into_result()
    }

    pub async fn create(pool: &PgPool, form: &ClasseForm) -> AppResult<Classe> {
        let fields = validate_fields(form)?;
        let annee_id = match fields.annee_scolaire_id {
            Some(id) => id,
            None => AnneeService::require_active(pool).await?,
        };
        Self::check_references(pool, &fields, annee_id, None).await?;

        let result = sqlx::query_as::<_, Classe>(&format!(
            "INSERT INTO classes (nom, niveau, section, salle, capacite_max, titulaire_id, annee_scolaire_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {COLUMNS}"
        ))
        .bind(&fields.nom)
        .bind(fields.niveau.as_str())
        .bind(&fields.section)
        .bind(&fields.salle)
        .bind(fields.capacite_max)
        .bind(fields.titulaire_id)
        .bind(annee_id)
        .fetch_one(pool)
        .await;

        match result {
            Ok(classe) => Ok(classe),
            Err(e) if is_unique_violation(&e) => Err(AppError::validation(duplicate_message(&fields.nom))),
            Err(e) => Err(e.into()),
        }
    }

    /// Fields missing from the form keep their current value; `null` clears
    /// section, room and head teacher.
    pub async fn update(pool: &PgPool, id: i64, form: &ClasseForm) -> AppResult<Classe> {
        let current = Self::find(pool, id).await?;
        let fields = validate_fields(&merge_update(form, &current))?;
        let annee_id = fields.annee_scolaire_id.unwrap_or(current.annee_scolaire_id);
        Self::check_references(pool, &fields, annee_id, Some(id)).await?;

        let enrolled: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM inscriptions WHERE classe_id = $1 AND status = 'inscrit'",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        if i64::from(fields.capacite_max) < enrolled {
            return Err(AppError::validation(format!(
                "La capacité ne peut pas être inférieure à l'effectif actuel ({enrolled} élèves)."
            )));
        }

        let result = sqlx::query_as::<_, Classe>(&format!(
            "UPDATE classes
             SET nom = $1, niveau = $2, section = $3, salle = $4, capacite_max = $5,
                 titulaire_id = $6, annee_scolaire_id = $7
             WHERE id = $8
             RETURNING {COLUMNS}"
        ))
        .bind(&fields.nom)
        .bind(fields.niveau.as_str())
        .bind(&fields.section)
        .bind(&fields.salle)
        .bind(fields.capacite_max)
        .bind(fields.titulaire_id)
        .bind(annee_id)
        .bind(id)
        .fetch_one(pool)
        .await;

        match result {
            Ok(classe) => Ok(classe),
            Err(e) if is_unique_violation(&e) => Err(AppError::validation(duplicate_message(&fields.nom))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(pool: &PgPool, id: i64) -> AppResult<Classe> {
        let classe = Self::find(pool, id).await?;

        let (inscriptions, demandes): (i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM inscriptions WHERE classe_id = $1),
                    (SELECT COUNT(*) FROM demandes_admission WHERE classe_demandee_id = $1)",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;

        let mut errors = ValidationErrors::new();
        errors.check(
            inscriptions == 0,
            format!("Impossible de supprimer la classe « {} » : des élèves y sont inscrits.", classe.nom),
        );
        errors.check(
            demandes == 0,
            format!(
                "Impossible de supprimer la classe « {} » : des demandes d'admission la référencent.",
                classe.nom
            ),
        );
        errors.into_result()?;

        sqlx::query("DELETE FROM classes WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(classe)
    }
}
