//! Derived values the host platform shows for a snapshot.
//!
//! Nothing here touches the network or mutates the snapshot; every view is
//! recomputed from the latest snapshot on demand.

pub mod calendar;

use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{Record, Snapshot, Student};
use crate::scraper::cleaner::parse_grade_mark;

/// Built-in display names for the dictionary subject keys.
const DEFAULT_SUBJECT_NAMES: &[(&str, &str)] = &[
    ("de", "Deutsch"),
    ("ma", "Mathematik"),
    ("en", "Englisch"),
    ("bio", "Biologie"),
    ("ch", "Chemie"),
    ("ph", "Physik"),
    ("ge", "Geschichte"),
    ("ek", "Erdkunde"),
    ("sp", "Sport"),
    ("mu", "Musik"),
    ("ku", "Kunst"),
    ("inf", "Informatik"),
    ("fr", "Französisch"),
    ("la", "Latein"),
];

// ── Subject names ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SubjectNames {
    overrides: BTreeMap<String, String>,
}

impl SubjectNames {
    pub fn new(overrides: BTreeMap<String, String>) -> Self {
        Self { overrides }
    }

    /// Configured name, else the built-in one, else the key upper-cased.
    pub fn display_name(&self, key: &str) -> String {
        if let Some(name) = self.overrides.get(key).filter(|n| !n.trim().is_empty()) {
            return name.clone();
        }
        DEFAULT_SUBJECT_NAMES
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| key.to_uppercase())
    }
}

// ── Grades ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradeAverage {
    /// Mean of the valid marks rounded to two decimals, 0 when there are none.
    pub average: f64,
    pub valid_count: usize,
    pub entry_count: usize,
}

/// Average over the `Zensur` column, counting only literal marks 1–6.
pub fn grade_average(entries: &[Record]) -> GradeAverage {
    let marks: Vec<u8> = entries
        .iter()
        .filter_map(|r| parse_grade_mark(r.field("Zensur")))
        .collect();
    let average = if marks.is_empty() {
        0.0
    } else {
        let sum: u32 = marks.iter().map(|&m| u32::from(m)).sum();
        let mean = f64::from(sum) / marks.len() as f64;
        (mean * 100.0).round() / 100.0
    };
    GradeAverage {
        average,
        valid_count: marks.len(),
        entry_count: entries.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectGrades {
    pub name: String,
    #[serde(flatten)]
    pub average: GradeAverage,
    pub entries: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradesView {
    pub total_entries: usize,
    pub subjects: Vec<String>,
    pub by_subject: BTreeMap<String, SubjectGrades>,
}

impl GradesView {
    pub fn build(snapshot: &Snapshot, names: &SubjectNames) -> Self {
        let by_subject = snapshot
            .grades
            .iter()
            .map(|(key, entries)| {
                let grades = SubjectGrades {
                    name: names.display_name(key),
                    average: grade_average(entries),
                    entries: entries.clone(),
                };
                (key.clone(), grades)
            })
            .collect();
        Self {
            total_entries: snapshot.grade_count(),
            subjects: snapshot.grades.keys().cloned().collect(),
            by_subject,
        }
    }
}

// ── Homework / remarks ────────────────────────────────────────────────────────

/// Count, full list and the first listed entry of a record list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryList {
    pub total_entries: usize,
    pub latest: Option<Record>,
    pub entries: Vec<Record>,
}

impl EntryList {
    pub fn build(entries: &[Record]) -> Self {
        Self {
            total_entries: entries.len(),
            latest: entries.first().cloned(),
            entries: entries.to_vec(),
        }
    }
}

// ── All views ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityValues {
    pub student: Student,
    pub grades: GradesView,
    pub homework: EntryList,
    pub remarks: EntryList,
}

impl EntityValues {
    pub fn build(snapshot: &Snapshot, names: &SubjectNames) -> Self {
        Self {
            student: snapshot.student.clone(),
            grades: GradesView::build(snapshot, names),
            homework: EntryList::build(&snapshot.homework),
            remarks: EntryList::build(&snapshot.remarks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marks(values: &[&str]) -> Vec<Record> {
        values
            .iter()
            .map(|v| [("Datum", "01.09.2025"), ("Zensur", *v)].into_iter().collect())
            .collect()
    }

    #[test]
    fn test_average_ignores_non_numeric_marks() {
        let avg = grade_average(&marks(&["2", "3", "-", "1"]));
        assert_eq!(avg.average, 2.0);
        assert_eq!(avg.valid_count, 3);
        assert_eq!(avg.entry_count, 4);
    }

    #[test]
    fn test_average_without_valid_marks_is_zero() {
        let avg = grade_average(&marks(&["-", "-"]));
        assert_eq!(avg.average, 0.0);
        assert_eq!(avg.valid_count, 0);
        assert_eq!(avg.entry_count, 2);

        let empty = grade_average(&[]);
        assert_eq!(empty.average, 0.0);
        assert_eq!(empty.entry_count, 0);
    }

    #[test]
    fn test_average_rounding_and_case_insensitive_column() {
        let entries: Vec<Record> = ["1", "2", "2"]
            .iter()
            .map(|v| [("zensur", *v)].into_iter().collect())
            .collect();
        assert_eq!(grade_average(&entries).average, 1.67);
        assert_eq!(grade_average(&marks(&["2+", "7", "0"])).valid_count, 0);
    }

    #[test]
    fn test_display_names() {
        let names = SubjectNames::new(BTreeMap::from([
            ("ma".to_string(), "Mathe".to_string()),
            ("xyl".to_string(), "Xylophon".to_string()),
            ("de".to_string(), "  ".to_string()),
        ]));
        assert_eq!(names.display_name("ma"), "Mathe");
        assert_eq!(names.display_name("xyl"), "Xylophon");
        assert_eq!(names.display_name("de"), "Deutsch");
        assert_eq!(names.display_name("bio"), "Biologie");
        assert_eq!(names.display_name("unb"), "UNB");
    }

    #[test]
    fn test_entity_values() {
        let mut snapshot = Snapshot::default();
        snapshot.grades.insert("ma".into(), marks(&["2", "4"]));
        snapshot.grades.insert("bio".into(), Vec::new());
        snapshot.homework = vec![
            [("Datum", "a"), ("Fach", "De")].into_iter().collect(),
            [("Datum", "b"), ("Fach", "Ma")].into_iter().collect(),
        ];

        let values = EntityValues::build(&snapshot, &SubjectNames::default());
        assert_eq!(values.grades.total_entries, 2);
        assert_eq!(values.grades.subjects, vec!["bio", "ma"]);
        assert_eq!(values.grades.by_subject["ma"].average.average, 3.0);

        let bio = &values.grades.by_subject["bio"];
        assert_eq!(bio.name, "Biologie");
        assert_eq!(bio.average.average, 0.0);
        assert_eq!(bio.average.entry_count, 0);

        assert_eq!(values.homework.total_entries, 2);
        assert_eq!(values.homework.latest.as_ref().unwrap().field("Fach"), "De");
        assert_eq!(values.remarks.latest, None);

        let json = serde_json::to_value(&values).unwrap();
        assert_eq!(json["grades"]["by_subject"]["ma"]["valid_count"], 2);
    }
}
