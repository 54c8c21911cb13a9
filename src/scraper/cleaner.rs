use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;
use tracing::trace;

static DMY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").expect("valid date regex")
});

// ── Text ──────────────────────────────────────────────────────────────────────

/// Collapse every whitespace run to one space and trim.
/// "  Mathe \n  matik " → "Mathe matik"
pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Dated text ────────────────────────────────────────────────────────────────

/// All `dd.mm.yyyy` dates in order of appearance. Impossible dates
/// ("31.02.2025") are skipped.
pub fn extract_dates(s: &str) -> Vec<NaiveDate> {
    DMY_RE
        .captures_iter(s)
        .filter_map(|caps| {
            let day: u32 = caps[1].parse().ok()?;
            let month: u32 = caps[2].parse().ok()?;
            let year: i32 = caps[3].parse().ok()?;
            let date = NaiveDate::from_ymd_opt(year, month, day);
            if date.is_none() {
                trace!("Skipping invalid date {}", &caps[0]);
            }
            date
        })
        .collect()
}

/// Due date of a homework field: the latest date mentioned.
/// "16.09.2025 zum 18.09.2025" → 2025-09-18
pub fn due_date(s: &str) -> Option<NaiveDate> {
    extract_dates(s).into_iter().max()
}

/// First date mentioned, used for single-day remarks.
pub fn first_date(s: &str) -> Option<NaiveDate> {
    extract_dates(s).into_iter().next()
}

// ── Grade marks ───────────────────────────────────────────────────────────────

/// Only a literal single digit 1–6 counts as a grade. "2+", "-", "n.b." → None
pub fn parse_grade_mark(s: &str) -> Option<u8> {
    match s.trim().as_bytes() {
        [d @ b'1'..=b'6'] => Some(d - b'0'),
        _ => None,
    }
}
