pub mod admissions;
pub mod annees;
pub mod audit;
pub mod auth;
pub mod classes;
pub mod eleves;
pub mod export;
pub mod finance;
pub mod incidents;
pub mod messages;
pub mod metrics;
pub mod sanctions;

use sqlx::PgExecutor;

use crate::{
    error::{AppError, AppResult},
    models::{admission::format_numero, BulkRequest},
};

/// Longest sequence taken into account. Anything longer was typed in by
/// hand and would not fit a BIGINT.
const SEQUENCE_MAX_DIGITS: usize = 18;

fn numero_sql(table: &str, column: &str) -> String {
    format!(
        "SELECT COALESCE(MAX(split_part({column}, '-', 3)::BIGINT), 0)
         FROM {table}
         WHERE {column} ~ ('^' || $1 || '-' || $2 || '-[0-9]{{1,{SEQUENCE_MAX_DIGITS}}}$')"
    )
}

/// Next `PREFIX-YEAR-NNNN` number for `column` of `table`, one past the
/// highest sequence already used that year.
pub async fn next_numero<'e>(
    executor: impl PgExecutor<'e>,
    table: &'static str,
    column: &'static str,
    prefix: &str,
    year: i32,
) -> AppResult<String> {
    let last: i64 = sqlx::query_scalar(&numero_sql(table, column))
        .bind(prefix)
        .bind(year.to_string())
        .fetch_one(executor)
        .await?;
    let next = last
        .checked_add(1)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("{prefix}-{year} sequence exhausted in {table}")))?;
    Ok(format_numero(prefix, year, next))
}

/// Action and cleaned ids of a bulk request, checked against the module's
/// allow-list `A`.
pub fn parse_bulk<A>(req: &BulkRequest) -> AppResult<(A, Vec<i64>)>
where
    A: std::str::FromStr,
{
    let action = req
        .action
        .trim()
        .parse::<A>()
        .map_err(|_| AppError::validation(format!("Action inconnue : {}", req.action.trim())))?;
    let ids = req.clean_ids();
    if ids.is_empty() {
        return Err(AppError::validation("Aucun élément sélectionné."));
    }
    Ok((action, ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageBulkAction;

    fn request(action: &str, ids: Vec<i64>) -> BulkRequest {
        BulkRequest {
            ids,
            action: action.into(),
            status: None,
        }
    }

    #[test]
    fn bulk_action_must_be_allowed() {
        match parse_bulk::<MessageBulkAction>(&request("detruire", vec![1])) {
            Err(AppError::Validation(errors)) => assert_eq!(errors, vec!["Action inconnue : detruire"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bulk_needs_a_selection() {
        match parse_bulk::<MessageBulkAction>(&request("archiver", vec![0, -4])) {
            Err(AppError::Validation(errors)) => assert_eq!(errors, vec!["Aucun élément sélectionné."]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bulk_ids_are_deduplicated() {
        let (action, ids) = parse_bulk::<MessageBulkAction>(&request(" marquer_lu ", vec![4, 2, 4])).unwrap();
        assert_eq!(action, MessageBulkAction::MarquerLu);
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn numbering_ignores_oversized_sequences() {
        let sql = numero_sql("eleves", "numero_matricule");
        assert!(sql.contains("'-[0-9]{1,18}$'"));
        assert!(sql.contains("split_part(numero_matricule, '-', 3)::BIGINT"));
    }
}
