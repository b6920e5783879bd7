// src/report/mod.rs
//! Human-review artifacts for one run: a plain-text report and a tabular
//! (CSV) report with a fixed leading column order. Entries keep the order the
//! similarity engine discovered them in, and nothing run-specific (timestamps,
//! run ids) is written, so unchanged input gives byte-identical files.

use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::models::activity::{Activity, ActivityField, ActivityId};
use crate::models::matching::{CandidatePair, FieldSimilarity};

pub const TEXT_REPORT_FILE: &str = "potential_duplicates.txt";
pub const TABULAR_REPORT_FILE: &str = "potential_duplicates.csv";

const FIXED_HEADER: [&str; 11] = [
    "ID1",
    "Title1",
    "Description1",
    "Supplies1",
    "Instructions1",
    "ID2",
    "Title2",
    "Description2",
    "Supplies2",
    "Instructions2",
    "TitleSimilarity",
];

/// Scores are shown with two decimals; thresholds never look at this form.
/// Small negative scores print as `0.00`, not `-0.00`.
pub fn format_similarity(similarity: f64) -> String {
    let formatted = format!("{:.2}", similarity);
    match formatted.strip_prefix('-') {
        Some(magnitude) if magnitude.bytes().all(|b| b == b'0' || b == b'.') => {
            magnitude.to_string()
        }
        _ => formatted,
    }
}

fn similarity_column(field: ActivityField) -> String {
    format!("{}Similarity", field.label())
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateReportEntry {
    /// Raw (not normalized) snapshot of the lower-id record.
    pub left: Activity,
    pub right: Activity,
    pub scores: Vec<FieldSimilarity>,
}

impl DuplicateReportEntry {
    pub fn similarity(&self, field: ActivityField) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.field == field)
            .map(|s| s.similarity)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DuplicateReport {
    pub compared_fields: Vec<ActivityField>,
    pub entries: Vec<DuplicateReportEntry>,
}

#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub text: PathBuf,
    pub tabular: PathBuf,
}

/// Pairs each candidate with snapshots of both records, preserving pair order.
pub fn build_report(
    pairs: &[CandidatePair],
    activities: &[Activity],
    compared_fields: &BTreeSet<ActivityField>,
) -> DuplicateReport {
    let by_id: HashMap<ActivityId, &Activity> = activities.iter().map(|a| (a.id, a)).collect();
    let snapshot = |id: ActivityId| -> Activity {
        match by_id.get(&id) {
            Some(activity) => (*activity).clone(),
            None => {
                warn!("Activity {} missing from report snapshot; writing empty fields", id);
                Activity {
                    id,
                    ..Default::default()
                }
            }
        }
    };

    let entries = pairs
        .iter()
        .map(|pair| DuplicateReportEntry {
            left: snapshot(pair.id1),
            right: snapshot(pair.id2),
            scores: pair.scores.clone(),
        })
        .collect();

    DuplicateReport {
        compared_fields: compared_fields.iter().copied().collect(),
        entries,
    }
}

impl DuplicateReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary_line(&self) -> String {
        format!("Found {} potential duplicate(s).", self.entries.len())
    }

    /// Count line first, then one block per pair closed by `---`.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.summary_line());
        out.push('\n');
        for entry in &self.entries {
            out.push_str(&format!(
                "Potential duplicate: ID1={}, ID2={}\n",
                entry.left.id, entry.right.id
            ));
            for field in &self.compared_fields {
                let score = entry.similarity(*field).unwrap_or(0.0);
                out.push_str(&format!(
                    "{} similarity: {}\n",
                    field.label(),
                    format_similarity(score)
                ));
            }
            out.push_str("---\n");
        }
        out
    }

    fn extra_similarity_fields(&self) -> Vec<ActivityField> {
        self.compared_fields
            .iter()
            .copied()
            .filter(|f| *f != ActivityField::Title)
            .collect()
    }

    /// Writes the tabular report. `TitleSimilarity` is always present (empty
    /// when titles were not compared); other compared fields get their own
    /// `<Field>Similarity` column after it.
    pub fn write_tabular<W: Write>(&self, writer: W) -> Result<()> {
        let extra = self.extra_similarity_fields();
        let mut wtr = csv::Writer::from_writer(writer);

        let mut header: Vec<String> = FIXED_HEADER.iter().map(|h| h.to_string()).collect();
        header.extend(extra.iter().map(|f| similarity_column(*f)));
        wtr.write_record(&header)
            .context("Failed to write report header")?;

        let score_cell = |entry: &DuplicateReportEntry, field: ActivityField| -> String {
            if self.compared_fields.contains(&field) {
                format_similarity(entry.similarity(field).unwrap_or(0.0))
            } else {
                String::new()
            }
        };

        for entry in &self.entries {
            let mut row: Vec<String> = Vec::with_capacity(header.len());
            for activity in [&entry.left, &entry.right] {
                row.push(activity.id.to_string());
                for field in ActivityField::ALL {
                    row.push(activity.field(field).to_string());
                }
            }
            row.push(score_cell(entry, ActivityField::Title));
            for field in &extra {
                row.push(score_cell(entry, *field));
            }
            wtr.write_record(&row).with_context(|| {
                format!(
                    "Failed to write report row for pair ({}, {})",
                    entry.left.id, entry.right.id
                )
            })?;
        }
        wtr.flush().context("Failed to flush tabular report")?;
        Ok(())
    }

    /// Writes both artifacts into `dir`, creating it if needed.
    pub fn write_to_dir(&self, dir: &Path) -> Result<ReportPaths> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;

        let text_path = dir.join(TEXT_REPORT_FILE);
        fs::write(&text_path, self.render_text())
            .with_context(|| format!("Failed to write {}", text_path.display()))?;

        let tabular_path = dir.join(TABULAR_REPORT_FILE);
        let file = fs::File::create(&tabular_path)
            .with_context(|| format!("Failed to create {}", tabular_path.display()))?;
        self.write_tabular(file)
            .with_context(|| format!("Failed to write {}", tabular_path.display()))?;

        info!(
            "📝 Wrote {} pair(s) to {} and {}",
            self.entries.len(),
            text_path.display(),
            tabular_path.display()
        );
        Ok(ReportPaths {
            text: text_path,
            tabular: tabular_path,
        })
    }
}

/// Reads a tabular report back into candidate pairs, in file order. Scores
/// come from the `<Field>Similarity` columns and are therefore the rounded
/// values; empty score cells are skipped.
pub fn read_tabular_report(path: &Path) -> Result<Vec<CandidatePair>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open report {}", path.display()))?;
    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();

    let column = |name: &str| headers.iter().position(|h| h == name);
    let id1_col = column("ID1")
        .with_context(|| format!("{} has no ID1 column", path.display()))?;
    let id2_col = column("ID2")
        .with_context(|| format!("{} has no ID2 column", path.display()))?;
    let score_cols: Vec<(usize, ActivityField)> = headers
        .iter()
        .enumerate()
        .filter_map(|(idx, h)| {
            h.strip_suffix("Similarity")
                .and_then(|prefix| ActivityField::from_str(prefix).ok())
                .map(|field| (idx, field))
        })
        .collect();

    let mut pairs = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Malformed row {} in {}", line + 2, path.display()))?;
        let parse_id = |col: usize| -> Result<ActivityId> {
            let raw = record.get(col).unwrap_or("").trim();
            raw.parse::<ActivityId>()
                .with_context(|| format!("Invalid id '{}' on row {}", raw, line + 2))
        };
        let id1 = parse_id(id1_col)?;
        let id2 = parse_id(id2_col)?;

        let mut scores = Vec::with_capacity(score_cols.len());
        for (col, field) in &score_cols {
            let raw = record.get(*col).unwrap_or("").trim();
            if raw.is_empty() {
                continue;
            }
            let similarity = raw
                .parse::<f64>()
                .with_context(|| format!("Invalid {} similarity '{}' on row {}", field, raw, line + 2))?;
            scores.push(FieldSimilarity {
                field: *field,
                similarity,
            });
        }

        match CandidatePair::new(id1, id2, scores) {
            Some(pair) => pairs.push(pair),
            None => warn!("Ignoring self-pair for activity {} on row {}", id1, line + 2),
        }
    }

    info!("Read {} pair(s) from {}", pairs.len(), path.display());
    Ok(pairs)
}
