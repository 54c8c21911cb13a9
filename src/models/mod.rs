use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

// ── Record ────────────────────────────────────────────────────────────────────

/// One table row keyed by the column headers as they appeared on the page.
///
/// Field order follows the header row. Lookups through [`Record::get_ci`]
/// ignore case, so `Datum` and `datum` resolve to the same column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zip a header row with a data row. Missing trailing cells become `""`,
    /// surplus cells are dropped.
    pub fn from_row(headers: &[String], values: &[String]) -> Self {
        let mut record = Self::new();
        for (i, header) in headers.iter().enumerate() {
            let value = values.get(i).map(String::as_str).unwrap_or("");
            record.insert(header.clone(), value.to_string());
        }
        record
    }

    /// Insert or overwrite a field. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Case-insensitive lookup; an exact match wins over a case-folded one.
    pub fn get_ci(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.get(key) {
            return Some(v);
        }
        let wanted = key.to_lowercase();
        self.fields
            .iter()
            .find(|(k, _)| k.to_lowercase() == wanted)
            .map(|(_, v)| v.as_str())
    }

    /// Like [`Record::get_ci`] but yields `""` for absent columns.
    pub fn field(&self, key: &str) -> &str {
        self.get_ci(key).unwrap_or("")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column header to cell text")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
                let mut record = Record::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    record.insert(k, v);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub name: String,
    #[serde(rename = "klasse")]
    pub class_label: String,
}

/// Parsed result of one data page. Immutable once built; every poll produces
/// a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub student: Student,
    /// Subject key → grade rows. A key with an empty list means the subject
    /// exists but has no grades yet.
    pub grades: BTreeMap<String, Vec<Record>>,
    pub homework: Vec<Record>,
    pub remarks: Vec<Record>,
}

impl Snapshot {
    pub fn subjects(&self) -> Vec<&str> {
        self.grades.keys().map(String::as_str).collect()
    }

    pub fn grade_count(&self) -> usize {
        self.grades.values().map(Vec::len).sum()
    }

    pub fn homework_entries(&self) -> impl Iterator<Item = HomeworkEntry<'_>> {
        self.homework.iter().map(HomeworkEntry::from_record)
    }

    pub fn remark_entries(&self) -> impl Iterator<Item = RemarkEntry<'_>> {
        self.remarks.iter().map(RemarkEntry::from_record)
    }
}

// ── Typed views over records ──────────────────────────────────────────────────

/// Homework row: `Datum | Fach | Hausaufgaben`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomeworkEntry<'a> {
    pub date_text: &'a str,
    pub subject: &'a str,
    pub task: &'a str,
}

impl<'a> HomeworkEntry<'a> {
    pub fn from_record(record: &'a Record) -> Self {
        Self {
            date_text: record.field("Datum"),
            subject: record.field("Fach"),
            task: record.field("Hausaufgaben"),
        }
    }
}

/// Remark row: `Datum | Typ | Stunde | Bemerkung` (sometimes plus `Fach`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemarkEntry<'a> {
    pub date_text: &'a str,
    pub kind: &'a str,
    pub period: &'a str,
    pub text: &'a str,
}

impl<'a> RemarkEntry<'a> {
    pub fn from_record(record: &'a Record) -> Self {
        Self {
            date_text: record.field("Datum"),
            kind: record.field("Typ"),
            period: record.field("Stunde"),
            text: record.field("Bemerkung"),
        }
    }
}
