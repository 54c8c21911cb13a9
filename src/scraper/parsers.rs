//! Data page → [`Snapshot`].
//!
//! Every `<table>` on the page is classified by its header row into one of
//! three known shapes; anything else is skipped. Parsing is pure: the same
//! HTML always yields the same snapshot.

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

use super::cleaner::normalize_ws;
use super::student::extract_student;
use super::subject::{UNKNOWN_SUBJECT, find_subject_label, subject_key};
use crate::error::ParseAmbiguity;
use crate::models::{Record, Snapshot};

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid table selector"));
static ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("valid row selector"));
static CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td, th").expect("valid cell selector"));

const GRADE_HEADERS: &[&str] = &["datum", "zensur"];
const HOMEWORK_HEADERS: &[&str] = &["datum", "fach", "hausaufgaben"];
const REMARK_HEADERS: &[&str] = &["datum", "typ", "stunde", "bemerkung"];

// ── Table classification ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Grades,
    Homework,
    Remarks,
    Unrecognized,
}

/// Classify by case-insensitive header membership. Grades are checked first,
/// then homework, then remarks.
pub fn classify(headers: &[String]) -> TableKind {
    let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
    let has_all = |wanted: &[&str]| wanted.iter().all(|w| lowered.iter().any(|h| h == w));

    if has_all(GRADE_HEADERS) {
        TableKind::Grades
    } else if has_all(HOMEWORK_HEADERS) {
        TableKind::Homework
    } else if has_all(REMARK_HEADERS) {
        TableKind::Remarks
    } else {
        TableKind::Unrecognized
    }
}

/// Rows of `table` that contain at least one `td`/`th`, each cell's text
/// whitespace-normalised.
pub fn table_rows(table: ElementRef) -> Vec<Vec<String>> {
    table
        .select(&ROW_SEL)
        .filter_map(|tr| {
            let cells: Vec<String> = tr
                .select(&CELL_SEL)
                .map(|cell| normalize_ws(&cell.text().collect::<Vec<_>>().join(" ")))
                .collect();
            (!cells.is_empty()).then_some(cells)
        })
        .collect()
}

// ── Facade ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub snapshot: Snapshot,
    pub issues: Vec<ParseAmbiguity>,
}

/// Parse a data page into a snapshot, dropping the diagnostics.
pub fn parse_snapshot(html: &str) -> Snapshot {
    parse_with_diagnostics(html).snapshot
}

/// Parse a data page and report every table or heading that could not be
/// classified or resolved. The issues are also logged at debug level.
pub fn parse_with_diagnostics(html: &str) -> ParseOutcome {
    let doc = Html::parse_document(html);
    let mut snapshot = Snapshot {
        student: extract_student(&doc),
        ..Default::default()
    };
    let mut issues = Vec::new();

    for (index, table) in doc.select(&TABLE_SEL).enumerate() {
        let rows = table_rows(table);
        let Some((headers, data)) = rows.split_first() else {
            issues.push(ParseAmbiguity::EmptyTable { index });
            continue;
        };

        match classify(headers) {
            TableKind::Grades => {
                let label = find_subject_label(table).unwrap_or_else(|| {
                    issues.push(ParseAmbiguity::UnresolvedSubject { index });
                    UNKNOWN_SUBJECT.to_string()
                });
                let key = subject_key(&label);
                debug!("Table #{}: grades for {:?} → {} ({} rows)", index, label, key, data.len());
                // Registered even without data rows: the subject exists.
                let entries = snapshot.grades.entry(key).or_default();
                entries.extend(data.iter().map(|row| Record::from_row(headers, row)));
            }
            TableKind::Homework => {
                debug!("Table #{}: homework ({} rows)", index, data.len());
                snapshot
                    .homework
                    .extend(data.iter().map(|row| Record::from_row(headers, row)));
            }
            TableKind::Remarks => {
                debug!("Table #{}: remarks ({} rows)", index, data.len());
                snapshot
                    .remarks
                    .extend(data.iter().map(|row| Record::from_row(headers, row)));
            }
            TableKind::Unrecognized => issues.push(ParseAmbiguity::UnrecognizedTable {
                index,
                headers: headers.clone(),
            }),
        }
    }

    for issue in &issues {
        debug!("Parse: {}", issue);
    }
    debug!(
        "Parsed snapshot: {} subjects, {} grades, {} homework, {} remarks",
        snapshot.grades.len(),
        snapshot.grade_count(),
        snapshot.homework.len(),
        snapshot.remarks.len()
    );

    ParseOutcome { snapshot, issues }
}
