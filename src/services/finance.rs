use chrono::{NaiveDate, Utc};
use sqlx::{PgExecutor, PgPool};

use crate::{
    db::filter::{parse_id, FilterValue, ListQuery, Op, Page},
    error::{AppError, AppResult, ValidationErrors},
    models::finance::{
        Debiteur, DebiteurListQuery, FinanceSummary, FinanceTotals, ModePaiement, PaiementForm,
        PaiementListItem, PaiementListQuery, TypeFrais,
    },
    services::annees::AnneeService,
};

/// Enrolled students of a year with what they owe (`s.total_frais`) and what
/// they paid (`s.total_paye`). A fee applies to a class when it targets the
/// class itself, or no class and either no level or the class's level.
const BALANCE_FROM: &str = "FROM inscriptions i
    JOIN eleves e ON e.id = i.eleve_id
    JOIN classes c ON c.id = i.classe_id
    CROSS JOIN LATERAL (
        SELECT
            (SELECT COALESCE(SUM(f.montant), 0) FROM frais_scolaires f
              WHERE f.annee_scolaire_id = i.annee_scolaire_id
                AND (f.classe_id = c.id
                     OR (f.classe_id IS NULL AND (f.niveau IS NULL OR f.niveau = c.niveau))))::BIGINT
                AS total_frais,
            (SELECT COALESCE(SUM(p.montant), 0) FROM paiements p
              WHERE p.eleve_id = i.eleve_id AND p.annee_scolaire_id = i.annee_scolaire_id)::BIGINT
                AS total_paye
    ) s";

const DEBITEUR_SELECT: &str = "e.id AS eleve_id, e.numero_matricule, e.nom, e.prenom,
    c.id AS classe_id, c.nom AS classe_nom, s.total_frais, s.total_paye,
    s.total_frais - s.total_paye AS solde";

const PAIEMENT_SELECT: &str = "p.id, p.eleve_id, e.prenom || ' ' || e.nom AS eleve_nom, p.type_frais,
    p.montant, p.date_paiement, p.mode_paiement, p.reference, p.annee_scolaire_id, p.created_at";

const PAIEMENT_FROM: &str = "FROM paiements p JOIN eleves e ON e.id = p.eleve_id";

/// Validated payment, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PaiementFields {
    pub eleve_id: i64,
    pub type_frais: TypeFrais,
    pub montant: i64,
    pub date_paiement: NaiveDate,
    pub mode_paiement: ModePaiement,
    pub reference: Option<String>,
}

pub fn validate_paiement(form: &PaiementForm, today: NaiveDate) -> AppResult<PaiementFields> {
    let mut errors = ValidationErrors::new();

    errors.check(form.eleve_id.is_some(), "L'élève est obligatoire.");

    let type_frais = match form.type_frais.as_deref().map(str::trim) {
        None | Some("") => {
            errors.push("Le type de frais est obligatoire.");
            None
        }
        Some(raw) => raw.parse::<TypeFrais>().map_err(|_| errors.push("Le type de frais est invalide.")).ok(),
    };

    let mode_paiement = match form.mode_paiement.as_deref().map(str::trim) {
        None | Some("") => Some(ModePaiement::Especes),
        Some(raw) => raw
            .parse::<ModePaiement>()
            .map_err(|_| errors.push("Le mode de paiement est invalide."))
            .ok(),
    };

    match form.montant {
        None => errors.push("Le montant est obligatoire."),
        Some(m) if m <= 0 => errors.push("Le montant doit être supérieur à zéro."),
        _ => {}
    }

    let date_paiement = form.date_paiement.unwrap_or(today);
    errors.check(date_paiement <= today, "La date de paiement ne peut pas être dans le futur.");

    match (form.eleve_id, type_frais, mode_paiement, form.montant) {
        (Some(eleve_id), Some(type_frais), Some(mode_paiement), Some(montant)) if errors.is_empty() => {
            Ok(PaiementFields {
                eleve_id,
                type_frais,
                montant,
                date_paiement,
                mode_paiement,
                reference: form
                    .reference
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            })
        }
        _ => Err(errors.into_error()),
    }
}

pub struct FinanceService;

impl FinanceService {
    fn debiteurs_query(q: &DebiteurListQuery, annee_id: i64) -> ListQuery {
        let mut query = ListQuery::new(DEBITEUR_SELECT, BALANCE_FROM, "e.id")
            .order_by("(s.total_frais - s.total_paye) DESC");
        query
            .compare("i.annee_scolaire_id", Op::Eq, FilterValue::Int(annee_id))
            .raw("i.status = 'inscrit'", Vec::new())
            .raw("s.total_frais > s.total_paye", Vec::new())
            .search(&["e.nom", "e.prenom", "e.numero_matricule"], q.search.as_deref())
            .eq_id("c.id", q.classe_id.as_deref());
        query
    }

    /// Explicit year, else the active one. `None` when neither exists.
    async fn annee(pool: &PgPool, raw: Option<&str>) -> AppResult<Option<i64>> {
        match parse_id(raw) {
            Some(id) => Ok(Some(id)),
            None => AnneeService::active_id(pool).await,
        }
    }

    pub async fn debiteurs(pool: &PgPool, q: &DebiteurListQuery, page: i64) -> AppResult<Page<Debiteur>> {
        match Self::annee(pool, q.annee_scolaire_id.as_deref()).await? {
            Some(annee_id) => Self::debiteurs_query(q, annee_id).fetch_page(pool, page).await,
            None => Ok(Page::new(Vec::new(), 0, page)),
        }
    }

    pub async fn debiteurs_export(pool: &PgPool, q: &DebiteurListQuery) -> AppResult<Vec<Debiteur>> {
        match Self::annee(pool, q.annee_scolaire_id.as_deref()).await? {
            Some(annee_id) => Self::debiteurs_query(q, annee_id).fetch_all(pool).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn summary(pool: &PgPool, raw_annee: Option<&str>) -> AppResult<FinanceSummary> {
        let annee_id = match Self::annee(pool, raw_annee).await? {
            Some(id) => id,
            None => AnneeService::require_active(pool).await?,
        };

        let totals = sqlx::query_as::<_, FinanceTotals>(&format!(
            "SELECT COALESCE(SUM(s.total_frais), 0)::BIGINT AS total_attendu,
                    (SELECT COALESCE(SUM(montant), 0) FROM paiements WHERE annee_scolaire_id = $1)::BIGINT
                        AS total_encaisse,
                    COUNT(*) FILTER (WHERE s.total_frais > s.total_paye) AS nb_debiteurs
             {BALANCE_FROM}
             WHERE i.annee_scolaire_id = $1 AND i.status = 'inscrit'"
        ))
        .bind(annee_id)
        .fetch_one(pool)
        .await?;

        Ok(FinanceSummary::from_totals(annee_id, totals))
    }

    /// Outstanding balance of one student for a year; `None` when the
    /// student is not enrolled that year.
    pub async fn solde(pool: &PgPool, eleve_id: i64, annee_id: i64) -> AppResult<Option<i64>> {
        let solde = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT s.total_frais - s.total_paye {BALANCE_FROM}
             WHERE i.eleve_id = $1 AND i.annee_scolaire_id = $2"
        ))
        .bind(eleve_id)
        .bind(annee_id)
        .fetch_optional(pool)
        .await?;
        Ok(solde)
    }

    fn paiements_query(q: &PaiementListQuery) -> ListQuery {
        let mut query = ListQuery::new(PAIEMENT_SELECT, PAIEMENT_FROM, "p.id")
            .order_by("p.date_paiement DESC");
        query
            .search(&["e.nom", "e.prenom", "e.numero_matricule", "p.reference"], q.search.as_deref())
            .eq_id("p.eleve_id", q.eleve_id.as_deref())
            .eq_enum::<TypeFrais>("p.type_frais", q.type_frais.as_deref())
            .eq_enum::<ModePaiement>("p.mode_paiement", q.mode_paiement.as_deref())
            .date_from("p.date_paiement", q.date_debut.as_deref())
            .date_to("p.date_paiement", q.date_fin.as_deref());
        query
    }

    pub async fn paiements(pool: &PgPool, q: &PaiementListQuery, page: i64) -> AppResult<Page<PaiementListItem>> {
        Self::paiements_query(q).fetch_page(pool, page).await
    }

    pub async fn record_paiement(pool: &PgPool, form: &PaiementForm) -> AppResult<PaiementListItem> {
        let fields = validate_paiement(form, Utc::now().date_naive())?;
        let annee_id = match form.annee_scolaire_id {
            Some(id) => id,
            None => AnneeService::require_active(pool).await?,
        };

        let enrolled: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM inscriptions WHERE eleve_id = $1 AND annee_scolaire_id = $2)",
        )
        .bind(fields.eleve_id)
        .bind(annee_id)
        .fetch_one(pool)
        .await?;
        if !enrolled {
            return Err(AppError::validation(
                "L'élève n'est pas inscrit pour l'année scolaire sélectionnée.",
            ));
        }

        let id = Self::insert_paiement(pool, &fields, annee_id).await?;

        sqlx::query_as::<_, PaiementListItem>(&format!("SELECT {PAIEMENT_SELECT} {PAIEMENT_FROM} WHERE p.id = $1"))
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    /// Shared by payment recording and student registration.
    pub async fn insert_paiement<'e>(
        executor: impl PgExecutor<'e>,
        fields: &PaiementFields,
        annee_id: i64,
    ) -> AppResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO paiements
                (eleve_id, type_frais, montant, date_paiement, mode_paiement, reference, annee_scolaire_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
        )
        .bind(fields.eleve_id)
        .bind(fields.type_frais.as_str())
        .bind(fields.montant)
        .bind(fields.date_paiement)
        .bind(fields.mode_paiement.as_str())
        .bind(&fields.reference)
        .bind(annee_id)
        .fetch_one(executor)
        .await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 15).unwrap()
    }

    fn form() -> PaiementForm {
        PaiementForm {
            eleve_id: Some(7),
            type_frais: Some("scolarite".into()),
            montant: Some(25_000),
            ..Default::default()
        }
    }

    #[test]
    fn payment_defaults_to_cash_today() {
        let fields = validate_paiement(&form(), today()).unwrap();
        assert_eq!(fields.mode_paiement, ModePaiement::Especes);
        assert_eq!(fields.date_paiement, today());
        assert_eq!(fields.type_frais, TypeFrais::Scolarite);
    }

    #[test]
    fn zero_amount_and_future_date_are_rejected() {
        let mut f = form();
        f.montant = Some(0);
        f.date_paiement = NaiveDate::from_ymd_opt(2025, 10, 16);
        match validate_paiement(&f, today()) {
            Err(AppError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_fee_type_is_rejected() {
        let mut f = form();
        f.type_frais = Some("bibliotheque".into());
        assert!(matches!(validate_paiement(&f, today()), Err(AppError::Validation(_))));
    }

    #[test]
    fn debtor_query_filters_year_and_positive_balance() {
        let q = DebiteurListQuery {
            classe_id: Some("4".into()),
            ..Default::default()
        };
        let (sql, params) = FinanceService::debiteurs_query(&q, 2).page_sql(1);
        assert!(sql.contains(
            "WHERE i.annee_scolaire_id = $1 AND (i.status = 'inscrit') AND (s.total_frais > s.total_paye) AND c.id = $2"
        ));
        assert!(sql.contains("ORDER BY (s.total_frais - s.total_paye) DESC, e.id ASC"));
        assert_eq!(params[0], FilterValue::Int(2));
        assert_eq!(params[1], FilterValue::Int(4));
    }
}
