use crate::scraping::browser::Locator;
use chrono::{DateTime, FixedOffset};
use std::fmt;

/// Max characters of a listing title quoted in run notes.
const NOTE_TITLE_CHARS: usize = 70;
/// Notes included in the summary notification.
const SUMMARY_NOTES: usize = 10;

/// A listing eligible for an apply attempt in the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub title: String,
    /// Opaque reference to the listing's apply control on the results page.
    pub apply_handle: Locator,
    /// Absolute link to the listing when one was discoverable.
    pub external_link: Option<String>,
}

impl Candidate {
    /// Ledger identifier: the canonical link, or the title when there is none.
    pub fn ledger_key(&self) -> &str {
        self.external_link.as_deref().unwrap_or(&self.title)
    }

    /// Title shortened for chat notes.
    pub fn short_title(&self) -> String {
        self.title.chars().take(NOTE_TITLE_CHARS).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    AppliedSameTab,
    SkippedExternal,
    Failed(String),
}

impl ApplyOutcome {
    /// Whether this outcome earns ledger credit.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied | Self::AppliedSameTab)
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => f.write_str("Applied"),
            Self::AppliedSameTab => f.write_str("Applied (same tab)"),
            Self::SkippedExternal => f.write_str("External site — skipped"),
            Self::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// Notes and the success count for one cycle. Built fresh every run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    notes: Vec<String>,
    applied: usize,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn record(&mut self, candidate: &Candidate, outcome: &ApplyOutcome) {
        if outcome.is_applied() {
            self.applied += 1;
            self.note(format!("✅ {}…", candidate.short_title()));
        } else {
            self.note(format!("⛔ {}… – {}", candidate.short_title(), outcome));
        }
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Chat message for the end of a cycle: timestamp, search parameters,
    /// count, then the most recent notes.
    pub fn render(&self, now: DateTime<FixedOffset>, keywords: &str, location: &str) -> String {
        let mut text = format!(
            "🕒 {} (UTC{})\n🔎 *{}* in *{}*\n🎯 Applied this run: *{}*",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.offset(),
            keywords,
            location,
            self.applied
        );
        let skip = self.notes.len().saturating_sub(SUMMARY_NOTES);
        for note in &self.notes[skip..] {
            text.push('\n');
            text.push_str(note);
        }
        text
    }
}

/// What a finished cycle hands back to its trigger.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub applied: usize,
    pub notes: Vec<String>,
    pub summary: String,
}

impl CycleReport {
    pub fn notes_text(&self) -> String {
        self.notes.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(title: &str, link: Option<&str>) -> Candidate {
        Candidate {
            title: title.to_string(),
            apply_handle: Locator::css("#apply"),
            external_link: link.map(str::to_string),
        }
    }

    #[test]
    fn ledger_key_prefers_link_over_title() {
        assert_eq!(
            candidate("Rust Dev", Some("https://www.naukri.com/job-1")).ledger_key(),
            "https://www.naukri.com/job-1"
        );
        assert_eq!(candidate("Rust Dev", None).ledger_key(), "Rust Dev");
    }

    #[test]
    fn short_title_counts_chars_not_bytes() {
        let long = "é".repeat(100);
        assert_eq!(candidate(&long, None).short_title().chars().count(), 70);
    }

    #[test]
    fn only_applied_variants_count() {
        assert!(ApplyOutcome::Applied.is_applied());
        assert!(ApplyOutcome::AppliedSameTab.is_applied());
        assert!(!ApplyOutcome::SkippedExternal.is_applied());
        assert!(!ApplyOutcome::Failed("boom".into()).is_applied());
    }

    #[test]
    fn summary_keeps_only_the_last_ten_notes() {
        let mut summary = RunSummary::new();
        summary.note("🔑 Used saved cookies");
        for i in 0..12 {
            summary.record(&candidate(&format!("Job {i}"), None), &ApplyOutcome::Applied);
        }
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let now = offset.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap();
        let text = summary.render(now, "Rust", "Chennai");

        assert!(text.starts_with("🕒 2026-10-18 08:00:00 (UTC+05:30)"));
        assert!(text.contains("*Rust* in *Chennai*"));
        assert!(text.contains("Applied this run: *12*"));
        assert!(!text.contains("Used saved cookies"));
        assert!(!text.contains("Job 1…"));
        assert!(text.contains("Job 11…"));
        assert_eq!(text.lines().count(), 3 + 10);
    }

    #[test]
    fn failed_notes_carry_the_reason() {
        let mut summary = RunSummary::new();
        summary.record(
            &candidate("Backend Engineer", None),
            &ApplyOutcome::Failed("tab never loaded".into()),
        );
        assert_eq!(summary.applied(), 0);
        assert_eq!(
            summary.notes()[0],
            "⛔ Backend Engineer… – Failed: tab never loaded"
        );
    }
}
