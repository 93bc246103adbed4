//! Shapes of the `incidents` and `sanctions` tables.
//!
//! Databases created before staff reporting and the sanction-type catalogue
//! existed carry the older shapes. The layout is resolved once at startup and
//! services pick their SQL template by matching on it.

use std::str::FromStr;

use sqlx::PgPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentLayout {
    /// No `rapporte_par` column.
    Legacy,
    /// `rapporte_par` references the reporting staff member.
    WithReporter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanctionLayout {
    /// Free-text `type_sanction`, statuses `active`/`levee`.
    Legacy,
    /// `type_sanction_id` into `types_sanctions`, statuses
    /// `active`/`terminee`/`suspendue`/`annulee`.
    Typed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaLayout {
    pub incidents: IncidentLayout,
    pub sanctions: SanctionLayout,
}

impl SchemaLayout {
    pub const CURRENT: SchemaLayout = SchemaLayout {
        incidents: IncidentLayout::WithReporter,
        sanctions: SanctionLayout::Typed,
    };

    pub const LEGACY: SchemaLayout = SchemaLayout {
        incidents: IncidentLayout::Legacy,
        sanctions: SanctionLayout::Legacy,
    };

    /// Build the layout from the column names present on each table.
    pub fn from_columns(incident_columns: &[String], sanction_columns: &[String]) -> Self {
        let has = |cols: &[String], name: &str| cols.iter().any(|c| c == name);
        SchemaLayout {
            incidents: if has(incident_columns, "rapporte_par") {
                IncidentLayout::WithReporter
            } else {
                IncidentLayout::Legacy
            },
            sanctions: if has(sanction_columns, "type_sanction_id") {
                SanctionLayout::Typed
            } else {
                SanctionLayout::Legacy
            },
        }
    }
}

impl std::fmt::Display for SchemaLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let incidents = match self.incidents {
            IncidentLayout::Legacy => "legacy",
            IncidentLayout::WithReporter => "with_reporter",
        };
        let sanctions = match self.sanctions {
            SanctionLayout::Legacy => "legacy",
            SanctionLayout::Typed => "typed",
        };
        write!(f, "incidents={incidents}, sanctions={sanctions}")
    }
}

/// `SCHEMA_LAYOUT` configuration flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutOverride {
    Auto,
    Legacy,
    Current,
}

impl FromStr for LayoutOverride {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(LayoutOverride::Auto),
            "legacy" => Ok(LayoutOverride::Legacy),
            "current" => Ok(LayoutOverride::Current),
            other => Err(anyhow::anyhow!("Unknown SCHEMA_LAYOUT: {other}")),
        }
    }
}

/// Resolve the layout once: either forced by configuration or detected from
/// `information_schema`.
pub async fn resolve(pool: &PgPool, flag: LayoutOverride) -> anyhow::Result<SchemaLayout> {
    match flag {
        LayoutOverride::Legacy => Ok(SchemaLayout::LEGACY),
        LayoutOverride::Current => Ok(SchemaLayout::CURRENT),
        LayoutOverride::Auto => {
            let incidents = table_columns(pool, "incidents").await?;
            let sanctions = table_columns(pool, "sanctions").await?;
            Ok(SchemaLayout::from_columns(&incidents, &sanctions))
        }
    }
}

async fn table_columns(pool: &PgPool, table: &str) -> anyhow::Result<Vec<String>> {
    let columns: Vec<String> = sqlx::query_scalar(
        "SELECT column_name::TEXT FROM information_schema.columns
         WHERE table_schema = current_schema() AND table_name = $1",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;
    Ok(columns)
}
