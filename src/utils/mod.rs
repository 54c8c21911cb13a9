use std::time::{Duration, Instant};
use tracing::debug;

/// Logs how long a refresh cycle (or any other scope) took when dropped.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        debug!("Starting {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!("Finished {} in {:.2?}", self.label, self.start.elapsed());
    }
}

/// Shorten `s` to at most `max` characters for log output.
pub fn snippet(s: &str, max: usize) -> String {
    let mut out: String = s.chars().take(max).collect();
    if s.chars().count() > max {
        out.push('…');
    }
    out
}
