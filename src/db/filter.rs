//! Filtered, paginated list queries.
//!
//! A [`ListQuery`] collects typed predicates from optional query-string
//! filters and renders them into one prepared statement. Placeholders are
//! numbered while the parameter vector is filled, so `$n` always lines up with
//! the n-th bound value. The same query serves the page, the total count and
//! unbounded exports.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{
    postgres::{PgArguments, PgRow},
    Arguments, FromRow, PgPool,
};

use crate::error::AppResult;

/// Rows per page on every list endpoint.
pub const PAGE_SIZE: i64 = 25;

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Int(i64),
    Date(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gte,
    Lte,
}

impl Op {
    fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Gte => ">=",
            Op::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone)]
enum Predicate {
    Compare {
        column: &'static str,
        op: Op,
        value: FilterValue,
    },
    /// `(a ILIKE $1 OR b ILIKE $2 ...)`, one placeholder per column.
    Search {
        columns: Vec<&'static str>,
        pattern: String,
    },
    /// Hand-written fragment; each `?` becomes the next placeholder.
    Raw {
        sql: String,
        values: Vec<FilterValue>,
    },
}

#[derive(Debug, Clone)]
pub struct ListQuery {
    select: String,
    from: String,
    predicates: Vec<Predicate>,
    order_by: String,
    tiebreak: &'static str,
}

/// Normalize a raw query-string value: absent, blank and whitespace-only all
/// mean "no filter".
pub fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Page number from the query string; anything unusable falls back to 1.
pub fn parse_page(raw: Option<&str>) -> i64 {
    non_empty(raw)
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1)
}

/// Positive integer id from the query string.
pub fn parse_id(raw: Option<&str>) -> Option<i64> {
    non_empty(raw)
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|id| *id > 0)
}

pub fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    non_empty(raw).and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// `%term%` with the LIKE wildcards of `term` escaped.
pub fn like_pattern(term: &str) -> String {
    format!("%{}%", escape_like(term))
}

/// `prefix%` with the LIKE wildcards of `prefix` escaped.
pub fn like_prefix(prefix: &str) -> String {
    format!("{}%", escape_like(prefix))
}

impl ListQuery {
    /// `select` is the column list (without `SELECT`), `from` the `FROM ...`
    /// clause with its static joins, `tiebreak` the primary key expression
    /// appended to every ordering.
    pub fn new(select: impl Into<String>, from: impl Into<String>, tiebreak: &'static str) -> Self {
        Self {
            select: select.into(),
            from: from.into(),
            predicates: Vec::new(),
            order_by: String::new(),
            tiebreak,
        }
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = order.into();
        self
    }

    pub fn search(&mut self, columns: &[&'static str], raw: Option<&str>) -> &mut Self {
        if let Some(term) = non_empty(raw) {
            self.predicates.push(Predicate::Search {
                columns: columns.to_vec(),
                pattern: like_pattern(term),
            });
        }
        self
    }

    /// Equality on an enum column. Values that do not parse as `E` are ignored.
    pub fn eq_enum<E>(&mut self, column: &'static str, raw: Option<&str>) -> &mut Self
    where
        E: std::str::FromStr + std::fmt::Display,
    {
        if let Some(value) = non_empty(raw).and_then(|s| s.parse::<E>().ok()) {
            self.compare(column, Op::Eq, FilterValue::Text(value.to_string()));
        }
        self
    }

    /// Equality on a foreign key given as a raw string.
    pub fn eq_id(&mut self, column: &'static str, raw: Option<&str>) -> &mut Self {
        if let Some(id) = parse_id(raw) {
            self.compare(column, Op::Eq, FilterValue::Int(id));
        }
        self
    }

    pub fn date_from(&mut self, column: &'static str, raw: Option<&str>) -> &mut Self {
        if let Some(date) = parse_date(raw) {
            self.compare(column, Op::Gte, FilterValue::Date(date));
        }
        self
    }

    pub fn date_to(&mut self, column: &'static str, raw: Option<&str>) -> &mut Self {
        if let Some(date) = parse_date(raw) {
            self.compare(column, Op::Lte, FilterValue::Date(date));
        }
        self
    }

    pub fn compare(&mut self, column: &'static str, op: Op, value: FilterValue) -> &mut Self {
        self.predicates.push(Predicate::Compare { column, op, value });
        self
    }

    pub fn raw(&mut self, sql: impl Into<String>, values: Vec<FilterValue>) -> &mut Self {
        self.predicates.push(Predicate::Raw {
            sql: sql.into(),
            values,
        });
        self
    }

    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    /// ` WHERE ...` (empty when there is nothing to filter on) and its values.
    fn where_clause(&self, params: &mut Vec<FilterValue>) -> String {
        if self.predicates.is_empty() {
            return String::new();
        }
        let mut parts = Vec::with_capacity(self.predicates.len());
        for predicate in &self.predicates {
            match predicate {
                Predicate::Compare { column, op, value } => {
                    params.push(value.clone());
                    parts.push(format!("{column} {} ${}", op.sql(), params.len()));
                }
                Predicate::Search { columns, pattern } => {
                    let mut alternatives = Vec::with_capacity(columns.len());
                    for column in columns {
                        params.push(FilterValue::Text(pattern.clone()));
                        alternatives.push(format!("{column} ILIKE ${}", params.len()));
                    }
                    parts.push(format!("({})", alternatives.join(" OR ")));
                }
                Predicate::Raw { sql, values } => {
                    let mut rendered = String::with_capacity(sql.len() + 8);
                    let mut values = values.iter();
                    for ch in sql.chars() {
                        if ch == '?' {
                            if let Some(value) = values.next() {
                                params.push(value.clone());
                                rendered.push_str(&format!("${}", params.len()));
                                continue;
                            }
                        }
                        rendered.push(ch);
                    }
                    parts.push(format!("({rendered})"));
                }
            }
        }
        format!(" WHERE {}", parts.join(" AND "))
    }

    fn order_clause(&self) -> String {
        if self.order_by.is_empty() {
            format!(" ORDER BY {} ASC", self.tiebreak)
        } else {
            format!(" ORDER BY {}, {} ASC", self.order_by, self.tiebreak)
        }
    }

    pub fn count_sql(&self) -> (String, Vec<FilterValue>) {
        let mut params = Vec::new();
        let where_clause = self.where_clause(&mut params);
        (format!("SELECT COUNT(*) {}{where_clause}", self.from), params)
    }

    pub fn page_sql(&self, page: i64) -> (String, Vec<FilterValue>) {
        let mut params = Vec::new();
        let where_clause = self.where_clause(&mut params);
        let offset = (page.max(1) - 1) * PAGE_SIZE;
        params.push(FilterValue::Int(PAGE_SIZE));
        let limit_idx = params.len();
        params.push(FilterValue::Int(offset));
        let offset_idx = params.len();
        (
            format!(
                "SELECT {} {}{where_clause}{} LIMIT ${limit_idx} OFFSET ${offset_idx}",
                self.select,
                self.from,
                self.order_clause()
            ),
            params,
        )
    }

    /// Unbounded variant used by exports.
    pub fn all_sql(&self) -> (String, Vec<FilterValue>) {
        let mut params = Vec::new();
        let where_clause = self.where_clause(&mut params);
        (
            format!("SELECT {} {}{where_clause}{}", self.select, self.from, self.order_clause()),
            params,
        )
    }

    pub async fn fetch_page<T>(&self, pool: &PgPool, page: i64) -> AppResult<Page<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let (count_sql, count_params) = self.count_sql();
        let total: i64 = sqlx::query_scalar_with::<_, i64, _>(&count_sql, arguments(&count_params)?)
            .fetch_one(pool)
            .await?;

        let (sql, params) = self.page_sql(page);
        let items = sqlx::query_as_with::<_, T, _>(&sql, arguments(&params)?)
            .fetch_all(pool)
            .await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn fetch_all<T>(&self, pool: &PgPool) -> AppResult<Vec<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let (sql, params) = self.all_sql();
        let rows = sqlx::query_as_with::<_, T, _>(&sql, arguments(&params)?)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }
}

fn arguments(params: &[FilterValue]) -> AppResult<PgArguments> {
    let mut args = PgArguments::default();
    for value in params {
        let bound = match value {
            FilterValue::Text(s) => args.add(s.clone()),
            FilterValue::Int(i) => args.add(*i),
            FilterValue::Date(d) => args.add(*d),
        };
        bound.map_err(|e| anyhow::anyhow!("failed to bind filter value: {e}"))?;
    }
    Ok(args)
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64) -> Self {
        Self {
            items,
            total,
            page,
            per_page: PAGE_SIZE,
            total_pages: total_pages(total),
        }
    }
}

pub fn total_pages(total: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        (total + PAGE_SIZE - 1) / PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum Niveau {
        Primaire,
    }

    impl std::str::FromStr for Niveau {
        type Err = ();
        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "primaire" => Ok(Niveau::Primaire),
                _ => Err(()),
            }
        }
    }

    impl std::fmt::Display for Niveau {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "primaire")
        }
    }

    fn classes() -> ListQuery {
        ListQuery::new("c.id, c.nom", "FROM classes c", "c.id").order_by("c.nom")
    }

    fn placeholder_count(sql: &str) -> usize {
        sql.matches('$').count()
    }

    #[test]
    fn no_filters_means_no_where_clause() {
        let q = classes();
        let (sql, params) = q.count_sql();
        assert_eq!(sql, "SELECT COUNT(*) FROM classes c");
        assert!(params.is_empty());
        assert!(!sql.contains("1=1"));
    }

    #[test]
    fn blank_inputs_add_nothing() {
        let mut q = classes();
        q.search(&["c.nom"], Some("   "))
            .eq_id("c.titulaire_id", Some(""))
            .eq_enum::<Niveau>("c.niveau", None)
            .date_from("c.created_at", Some("pas une date"));
        assert_eq!(q.predicate_count(), 0);
    }

    #[test]
    fn placeholders_follow_parameter_order() {
        let mut q = classes();
        q.search(&["c.nom", "c.section", "c.salle"], Some("6e"))
            .eq_enum::<Niveau>("c.niveau", Some("primaire"))
            .eq_id("c.annee_scolaire_id", Some("3"));
        let (sql, params) = q.page_sql(2);

        assert_eq!(
            sql,
            "SELECT c.id, c.nom FROM classes c WHERE (c.nom ILIKE $1 OR c.section ILIKE $2 OR c.salle ILIKE $3) \
             AND c.niveau = $4 AND c.annee_scolaire_id = $5 ORDER BY c.nom, c.id ASC LIMIT $6 OFFSET $7"
        );
        assert_eq!(placeholder_count(&sql), params.len());
        assert_eq!(params[0], FilterValue::Text("%6e%".into()));
        assert_eq!(params[3], FilterValue::Text("primaire".into()));
        assert_eq!(params[4], FilterValue::Int(3));
        assert_eq!(params[5], FilterValue::Int(PAGE_SIZE));
        assert_eq!(params[6], FilterValue::Int(PAGE_SIZE));
    }

    #[test]
    fn unknown_enum_values_are_ignored() {
        let mut q = classes();
        q.eq_enum::<Niveau>("c.niveau", Some("lycee"));
        assert_eq!(q.predicate_count(), 0);
    }

    #[test]
    fn date_bounds_use_inclusive_operators() {
        let mut q = classes();
        q.date_from("i.date_incident", Some("2025-09-01"))
            .date_to("i.date_incident", Some("2025-09-30"));
        let (sql, params) = q.count_sql();
        assert!(sql.ends_with("WHERE i.date_incident >= $1 AND i.date_incident <= $2"));
        assert_eq!(
            params,
            vec![
                FilterValue::Date(NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()),
                FilterValue::Date(NaiveDate::from_ymd_opt(2025, 9, 30).unwrap()),
            ]
        );
    }

    #[test]
    fn raw_fragments_continue_numbering() {
        let mut q = classes();
        q.eq_id("c.id", Some("9"))
            .raw("m.expediteur_id = ? OR m.destinataire_id = ?", vec![FilterValue::Int(4), FilterValue::Int(4)]);
        let (sql, params) = q.count_sql();
        assert!(sql.ends_with("WHERE c.id = $1 AND (m.expediteur_id = $2 OR m.destinataire_id = $3)"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn search_term_wildcards_are_escaped() {
        let mut q = classes();
        q.search(&["c.nom"], Some("50%_a"));
        let (_, params) = q.count_sql();
        assert_eq!(params, vec![FilterValue::Text("%50\\%\\_a%".into())]);
    }

    #[test]
    fn prefix_wildcards_are_escaped() {
        assert_eq!(like_prefix("message.bulk"), "message.bulk%");
        assert_eq!(like_prefix("a_b%"), "a\\_b\\%%");
    }

    #[test]
    fn export_sql_has_no_limit() {
        let mut q = classes();
        q.eq_enum::<Niveau>("c.niveau", Some("primaire"));
        let (sql, params) = q.all_sql();
        assert!(!sql.contains("LIMIT"));
        assert_eq!(params.len(), 1);
        assert!(sql.ends_with("ORDER BY c.nom, c.id ASC"));
    }

    #[test]
    fn offset_grows_with_page() {
        let (_, params) = classes().page_sql(4);
        assert_eq!(params, vec![FilterValue::Int(PAGE_SIZE), FilterValue::Int(3 * PAGE_SIZE)]);
    }

    #[test]
    fn page_numbers_are_normalized() {
        assert_eq!(parse_page(None), 1);
        assert_eq!(parse_page(Some("")), 1);
        assert_eq!(parse_page(Some("0")), 1);
        assert_eq!(parse_page(Some("-3")), 1);
        assert_eq!(parse_page(Some("abc")), 1);
        assert_eq!(parse_page(Some("7")), 7);
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0), 0);
        assert_eq!(total_pages(1), 1);
        assert_eq!(total_pages(25), 1);
        assert_eq!(total_pages(26), 2);
        assert_eq!(total_pages(100), 4);
    }

    #[test]
    fn page_beyond_last_is_not_clamped() {
        let page: Page<i64> = Page::new(Vec::new(), 30, 9);
        assert_eq!(page.page, 9);
        assert_eq!(page.total_pages, 2);
        assert!(page.items.is_empty());
    }
}
