use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

use super::cleaner::normalize_ws;
use super::parsers::table_rows;
use crate::models::Student;

static PUPILINFO_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.pupilinfo").expect("valid pupilinfo selector"));
static INFO_TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.t01").expect("valid info table selector"));
static ANY_TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid table selector"));
static HINT_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".panel-hint, #content h1, #content h2, #content h3")
        .expect("valid hint selector")
});

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-ZÄÖÜ][a-zäöüß]+(?:\s+[A-ZÄÖÜ][a-zäöüß]+)+)\b").expect("valid name regex")
});
static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)klasse[:\s]+([A-Za-z0-9\-_/]+)").expect("valid class regex")
});

/// Student name and class.
///
/// The `div.pupilinfo` table is authoritative. Only when it leaves a field
/// empty do the heading heuristics fill that field in.
pub fn extract_student(doc: &Html) -> Student {
    let mut student = from_pupilinfo(doc);
    if student.name.is_empty() || student.class_label.is_empty() {
        let guess = from_headings(doc);
        debug!(
            "Student info incomplete (name={:?}, class={:?}), heading guess: {:?}",
            student.name, student.class_label, guess
        );
        if student.name.is_empty() {
            student.name = guess.name;
        }
        if student.class_label.is_empty() {
            student.class_label = guess.class_label;
        }
    }
    student
}

/// Reads `Name:` / `Klasse:` rows from `div.pupilinfo table.t01`
/// (or the first table in that block).
fn from_pupilinfo(doc: &Html) -> Student {
    let mut student = Student::default();

    let Some(info) = doc.select(&PUPILINFO_SEL).next() else {
        return student;
    };
    let Some(table) = info
        .select(&INFO_TABLE_SEL)
        .next()
        .or_else(|| info.select(&ANY_TABLE_SEL).next())
    else {
        return student;
    };

    for row in table_rows(table) {
        let [label, value, ..] = row.as_slice() else {
            continue;
        };
        match label.trim_end_matches(':').trim().to_lowercase().as_str() {
            "name" => student.name = value.clone(),
            "klasse" => student.class_label = value.clone(),
            _ => {}
        }
    }
    student
}

fn from_headings(doc: &Html) -> Student {
    let text = doc
        .select(&HINT_SEL)
        .map(|el| normalize_ws(&el.text().collect::<String>()))
        .collect::<Vec<_>>()
        .join(" ");

    let name = NAME_RE
        .captures(&text)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let class_label = CLASS_RE
        .captures(&text)
        .map(|c| c[1].to_string())
        .unwrap_or_default();

    Student { name, class_label }
}
