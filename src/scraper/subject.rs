//! Subject resolution for grade tables.
//!
//! Grade tables carry no subject attribute; the subject is the nearest
//! heading before the table, or failing that the first heading inside one of
//! its ancestor containers.

use scraper::{ElementRef, Selector};
use std::sync::LazyLock;

use super::cleaner::normalize_ws;

/// Label used when no heading could be found near a grade table.
pub const UNKNOWN_SUBJECT: &str = "unbekannt";

/// Key used when a label has no ASCII alphanumerics at all.
pub const FALLBACK_KEY: &str = "fach";

const SIBLING_HOPS: usize = 6;
const ANCESTOR_HOPS: usize = 4;
const HEADING_TAGS: [&str; 4] = ["h1", "h2", "h3", "strong"];

static HEADING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, strong").expect("valid heading selector"));

/// Known subject names and their short keys.
pub const SUBJECT_KEYS: &[(&str, &str)] = &[
    ("deutsch", "de"),
    ("mathematik", "ma"),
    ("englisch", "en"),
    ("biologie", "bio"),
    ("chemie", "ch"),
    ("physik", "ph"),
    ("geschichte", "ge"),
    ("erdkunde", "ek"),
    ("sport", "sp"),
    ("musik", "mu"),
    ("kunst", "ku"),
    ("informatik", "inf"),
    ("französisch", "fr"),
    ("latein", "la"),
];

/// Reduce a subject label to its stable short key.
///
/// Known names hit the dictionary; anything else becomes the first three
/// ASCII alphanumerics of the lowercased label. Two different unknown
/// subjects can collide on the same slug; nothing disambiguates them.
pub fn subject_key(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    if let Some((_, key)) = SUBJECT_KEYS.iter().find(|(name, _)| *name == lowered) {
        return key.to_string();
    }
    let slug: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(3)
        .collect();
    if slug.is_empty() {
        FALLBACK_KEY.to_string()
    } else {
        slug
    }
}

fn is_heading(el: &ElementRef) -> bool {
    HEADING_TAGS.contains(&el.value().name())
}

fn heading_text(el: ElementRef) -> Option<String> {
    let text = normalize_ws(&el.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

/// Find the heading text labelling `table`, if any.
///
/// Walks up to six preceding element siblings, then up to four ancestors,
/// searching each ancestor's subtree for its first heading.
pub fn find_subject_label(table: ElementRef) -> Option<String> {
    let preceding = table
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .take(SIBLING_HOPS);
    for sibling in preceding {
        if is_heading(&sibling) {
            if let Some(text) = heading_text(sibling) {
                return Some(text);
            }
        }
    }

    let ancestors = table
        .ancestors()
        .map_while(ElementRef::wrap)
        .take(ANCESTOR_HOPS);
    for ancestor in ancestors {
        if let Some(text) = ancestor.select(&HEADING_SEL).next().and_then(heading_text) {
            return Some(text);
        }
    }

    None
}
