//! All-day calendar events derived from homework and remarks.

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::models::Snapshot;
use crate::scraper::cleaner::{due_date, first_date};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEvent {
    pub summary: String,
    pub description: String,
    pub start: NaiveDate,
    /// Exclusive end, the day after `start`.
    pub end: NaiveDate,
}

impl CalendarEvent {
    fn all_day(day: NaiveDate, summary: String, description: String) -> Self {
        Self {
            summary,
            description,
            start: day,
            end: day.checked_add_days(Days::new(1)).unwrap_or(day),
        }
    }

    /// True if the event overlaps `[start, end)`.
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        !(self.end <= start || self.start >= end)
    }
}

/// One event per homework entry, on the latest date in its `Datum` field
/// ("16.09.2025 zum 18.09.2025" is due on the 18th).
pub fn homework_events(snapshot: &Snapshot) -> Vec<CalendarEvent> {
    let events: Vec<CalendarEvent> = snapshot
        .homework_entries()
        .filter_map(|hw| {
            let Some(due) = due_date(hw.date_text) else {
                debug!("Homework without date: {:?} ({})", hw.date_text, hw.subject);
                return None;
            };
            let summary = format!("{}: {}", hw.subject, hw.task)
                .trim_matches(|c| c == ':' || c == ' ')
                .to_string();
            Some(CalendarEvent::all_day(due, summary, hw.task.to_string()))
        })
        .collect();
    debug!("Built {} homework events", events.len());
    events
}

/// One event per remark, on the first date in its `Datum` field.
pub fn remark_events(snapshot: &Snapshot) -> Vec<CalendarEvent> {
    let events: Vec<CalendarEvent> = snapshot
        .remark_entries()
        .filter_map(|rm| {
            let Some(day) = first_date(rm.date_text) else {
                debug!("Remark without date: {:?} ({})", rm.date_text, rm.kind);
                return None;
            };
            let summary = if rm.period.is_empty() {
                rm.kind.trim().to_string()
            } else {
                format!("{} (Stunde {})", rm.kind, rm.period).trim().to_string()
            };
            let description = if rm.text.is_empty() {
                "Bemerkung".to_string()
            } else {
                rm.text.to_string()
            };
            Some(CalendarEvent::all_day(day, summary, description))
        })
        .collect();
    debug!("Built {} remark events", events.len());
    events
}

/// Events overlapping `[start, end)`.
pub fn events_in_range(events: &[CalendarEvent], start: NaiveDate, end: NaiveDate) -> Vec<CalendarEvent> {
    events
        .iter()
        .filter(|ev| ev.overlaps(start, end))
        .cloned()
        .collect()
}

/// The earliest event starting today or later; ties go to the smaller summary.
pub fn next_event(events: &[CalendarEvent], today: NaiveDate) -> Option<&CalendarEvent> {
    events
        .iter()
        .filter(|ev| ev.start >= today)
        .min_by(|a, b| (a.start, &a.summary).cmp(&(b.start, &b.summary)))
}
