//! Spreadsheet exports of list endpoints (`?format=csv|xls`).
//!
//! `xls` is an HTML table served as `application/vnd.ms-excel`, which
//! spreadsheet software opens directly.

use axum::{
    http::header,
    response::{IntoResponse, Response},
};

use crate::models::{
    admission::DemandeAdmission,
    classe::ClasseListItem,
    discipline::{IncidentListItem, SanctionListItem},
    eleve::EleveListItem,
    finance::Debiteur,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xls,
}

impl ExportFormat {
    /// `None` means the regular JSON page.
    pub fn from_query(raw: Option<&str>) -> Option<Self> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("csv") => Some(ExportFormat::Csv),
            Some("xls") | Some("excel") => Some(ExportFormat::Xls),
            _ => None,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Xls => "application/vnd.ms-excel; charset=utf-8",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xls => "xls",
        }
    }
}

/// A row that can be written to an export.
pub trait ExportRow {
    fn headers() -> &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

#[derive(Debug)]
pub struct Export {
    pub format: ExportFormat,
    pub filename: String,
    pub body: Vec<u8>,
}

impl IntoResponse for Export {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, self.format.content_type().to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", self.filename),
                ),
            ],
            self.body,
        )
            .into_response()
    }
}

pub fn render<T: ExportRow>(
    format: ExportFormat,
    school_name: &str,
    title: &str,
    basename: &str,
    rows: &[T],
) -> anyhow::Result<Export> {
    let body = match format {
        ExportFormat::Csv => render_csv(rows)?,
        ExportFormat::Xls => render_html_table(school_name, title, rows).into_bytes(),
    };
    let date = chrono::Local::now().format("%Y%m%d");
    Ok(Export {
        format,
        filename: format!("{basename}_{date}.{}", format.extension()),
        body,
    })
}

fn render_csv<T: ExportRow>(rows: &[T]) -> anyhow::Result<Vec<u8>> {
    // BOM so that spreadsheet software detects UTF-8 accents.
    let mut buffer = "\u{feff}".as_bytes().to_vec();
    {
        let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(&mut buffer);
        writer.write_record(T::headers())?;
        for row in rows {
            writer.write_record(row.cells())?;
        }
        writer.flush()?;
    }
    Ok(buffer)
}

fn render_html_table<T: ExportRow>(school_name: &str, title: &str, rows: &[T]) -> String {
    let mut html = String::from("<html><head><meta charset=\"utf-8\"></head><body>");
    html.push_str(&format!(
        "<h2>{}</h2><h3>{}</h3><table border=\"1\"><thead><tr>",
        escape_html(school_name),
        escape_html(title)
    ));
    for h in T::headers() {
        html.push_str(&format!("<th>{}</th>", escape_html(h)));
    }
    html.push_str("</tr></thead><tbody>");
    for row in rows {
        html.push_str("<tr>");
        for cell in row.cells() {
            html.push_str(&format!("<td>{}</td>", escape_html(&cell)));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table></body></html>");
    html
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

// ── Row shapes ──────────────────────────────────────────────────────────────

impl ExportRow for ClasseListItem {
    fn headers() -> &'static [&'static str] {
        &["Nom", "Niveau", "Section", "Salle", "Capacité", "Effectif", "Titulaire", "Année"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.nom.clone(),
            self.niveau.clone(),
            opt(&self.section),
            opt(&self.salle),
            self.capacite_max.to_string(),
            self.effectif.to_string(),
            opt(&self.titulaire_nom),
            self.annee_libelle.clone(),
        ]
    }
}

impl ExportRow for EleveListItem {
    fn headers() -> &'static [&'static str] {
        &["Matricule", "Nom", "Prénom", "Date de naissance", "Sexe", "Classe", "Statut"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.numero_matricule.clone(),
            self.nom.clone(),
            self.prenom.clone(),
            self.date_naissance.format("%d/%m/%Y").to_string(),
            self.sexe.clone(),
            opt(&self.classe_nom),
            self.status.clone(),
        ]
    }
}

impl ExportRow for IncidentListItem {
    fn headers() -> &'static [&'static str] {
        &["Date", "Élève", "Classe", "Lieu", "Gravité", "Statut", "Description", "Sanctions"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.date_incident.format("%d/%m/%Y").to_string(),
            self.eleve_nom.clone(),
            opt(&self.classe_nom),
            opt(&self.lieu),
            self.gravite.clone(),
            self.status.clone(),
            self.description.clone(),
            self.nb_sanctions.to_string(),
        ]
    }
}

impl ExportRow for SanctionListItem {
    fn headers() -> &'static [&'static str] {
        &["Date", "Élève", "Type", "Début", "Fin", "Durée (jours)", "Motif", "Statut"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.date_sanction.format("%d/%m/%Y").to_string(),
            self.eleve_nom.clone(),
            opt(&self.type_libelle),
            self.date_debut.format("%d/%m/%Y").to_string(),
            self.date_fin.format("%d/%m/%Y").to_string(),
            self.duree_jours.to_string(),
            opt(&self.motif),
            self.status.clone(),
        ]
    }
}

impl ExportRow for Debiteur {
    fn headers() -> &'static [&'static str] {
        &["Matricule", "Nom", "Prénom", "Classe", "Total dû", "Total payé", "Solde"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.numero_matricule.clone(),
            self.nom.clone(),
            self.prenom.clone(),
            self.classe_nom.clone(),
            self.total_frais.to_string(),
            self.total_paye.to_string(),
            self.solde.to_string(),
        ]
    }
}

impl ExportRow for DemandeAdmission {
    fn headers() -> &'static [&'static str] {
        &["Numéro", "Nom", "Prénom", "Classe demandée", "Parent", "Téléphone", "Priorité", "Statut", "Date"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.numero_demande.clone(),
            self.nom_eleve.clone(),
            self.prenom_eleve.clone(),
            self.classe_nom.clone(),
            self.nom_parent.clone(),
            opt(&self.telephone_parent),
            self.priorite.clone(),
            self.status.clone(),
            self.created_at.format("%d/%m/%Y").to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ligne(&'static str, i64);

    impl ExportRow for Ligne {
        fn headers() -> &'static [&'static str] {
            &["Nom", "Montant"]
        }
        fn cells(&self) -> Vec<String> {
            vec![self.0.to_string(), self.1.to_string()]
        }
    }

    #[test]
    fn format_is_read_from_query() {
        assert_eq!(ExportFormat::from_query(Some("csv")), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::from_query(Some("XLS")), Some(ExportFormat::Xls));
        assert_eq!(ExportFormat::from_query(Some("pdf")), None);
        assert_eq!(ExportFormat::from_query(None), None);
    }

    #[test]
    fn csv_has_bom_header_and_quoted_cells() {
        let rows = vec![Ligne("Mbala; Jean", 1500), Ligne("Kasa", 0)];
        let export = render(ExportFormat::Csv, "École", "Débiteurs", "debiteurs", &rows).unwrap();
        let text = String::from_utf8(export.body).unwrap();
        assert!(text.starts_with('\u{feff}'));
        let lines: Vec<&str> = text.trim_start_matches('\u{feff}').lines().collect();
        assert_eq!(lines, vec!["Nom;Montant", "\"Mbala; Jean\";1500", "Kasa;0"]);
        assert!(export.filename.starts_with("debiteurs_"));
        assert!(export.filename.ends_with(".csv"));
    }

    #[test]
    fn html_table_escapes_cells_and_carries_title() {
        let rows = vec![Ligne("<b>Ngoy</b> & fils", 10)];
        let export = render(ExportFormat::Xls, "Lycée Saint-Joseph", "Élèves", "eleves", &rows).unwrap();
        let html = String::from_utf8(export.body).unwrap();
        assert!(html.contains("<h2>Lycée Saint-Joseph</h2>"));
        assert!(html.contains("<td>&lt;b&gt;Ngoy&lt;/b&gt; &amp; fils</td>"));
        assert!(html.contains("<th>Montant</th>"));
        assert!(export.filename.ends_with(".xls"));
    }

    #[test]
    fn empty_export_still_has_headers() {
        let rows: Vec<Ligne> = Vec::new();
        let export = render(ExportFormat::Csv, "École", "Vide", "vide", &rows).unwrap();
        let text = String::from_utf8(export.body).unwrap();
        assert_eq!(text.trim_start_matches('\u{feff}').trim_end(), "Nom;Montant");
    }
}
