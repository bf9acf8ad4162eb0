//! Derived caches rebuilt from the canonical log.
//!
//! Never a source of truth: every structure here is recomputable from the
//! `LogEntry` set in one pass. "Latest" fields are keyed by `updated_at`,
//! never by array position.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LogEntry, PracticeResult};

/// Per-question practice status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionStatus {
    pub attempt_count: u32,
    pub skip_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<PracticeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_correct_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_wrong_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_note: Option<String>,
    /// 0 means "not rated".
    pub last_difficulty: u8,
    pub last_predicted_difficulty: u8,
    // Per-field write times, kept so incremental updates resolve which
    // value is the latest without rescanning the log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_updated_at: Option<DateTime<Utc>>,
}

/// Per-day practice aggregates, keyed by the business date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub total: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub skipped: u32,
    pub browse: u32,
    pub total_seconds: u64,
    pub questions: BTreeSet<String>,
}

impl DailyStats {
    pub fn distinct_questions(&self) -> usize {
        self.questions.len()
    }
}

/// All derived caches over one `LogEntry` set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedCaches {
    pub by_question: HashMap<String, QuestionStatus>,
    pub by_day: BTreeMap<NaiveDate, DailyStats>,
}

impl DerivedCaches {
    /// Recompute all caches from the full entry set.
    ///
    /// Deterministic under permutation of `entries`: the fold order is
    /// fixed by (`updated_at`, `id`) before applying.
    pub fn rebuild(entries: &[LogEntry]) -> Self {
        let mut ordered: Vec<&LogEntry> = entries.iter().collect();
        ordered.sort_by(|a, b| (a.updated_at, &a.id).cmp(&(b.updated_at, &b.id)));

        let mut caches = Self::default();
        for entry in ordered {
            caches.apply(entry);
        }
        caches
    }

    /// Fold one entry into the caches.
    pub fn apply(&mut self, entry: &LogEntry) {
        let status = self.by_question.entry(entry.qid.clone()).or_default();
        status.attempt_count += 1;

        match entry.result {
            Some(PracticeResult::Skipped) => status.skip_count += 1,
            Some(PracticeResult::Correct) => {
                status.last_correct_at = status.last_correct_at.max(Some(entry.practiced_at));
            }
            Some(PracticeResult::Incorrect) => {
                status.last_wrong_at = status.last_wrong_at.max(Some(entry.practiced_at));
            }
            _ => {}
        }

        if entry.result.is_some() && Some(entry.updated_at) >= status.result_updated_at {
            status.last_result = entry.result;
            status.last_result_at = Some(entry.practiced_at);
            status.result_updated_at = Some(entry.updated_at);
        }
        if !entry.note.is_empty() && Some(entry.updated_at) >= status.note_updated_at {
            status.last_note = Some(entry.note.clone());
            status.note_updated_at = Some(entry.updated_at);
        }
        if entry.difficulty != 0 && Some(entry.updated_at) >= status.difficulty_updated_at {
            status.last_difficulty = entry.difficulty;
            status.difficulty_updated_at = Some(entry.updated_at);
        }
        if entry.predicted_difficulty != 0
            && Some(entry.updated_at) >= status.predicted_updated_at
        {
            status.last_predicted_difficulty = entry.predicted_difficulty;
            status.predicted_updated_at = Some(entry.updated_at);
        }

        let day = self.by_day.entry(entry.practiced_at.date_naive()).or_default();
        day.total += 1;
        day.total_seconds += u64::from(entry.time_spent_seconds);
        day.questions.insert(entry.qid.clone());
        match entry.result {
            Some(PracticeResult::Correct) => day.correct += 1,
            Some(PracticeResult::Incorrect) => day.incorrect += 1,
            Some(PracticeResult::Skipped) => day.skipped += 1,
            Some(PracticeResult::Browse) => day.browse += 1,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn entry(id: &str, qid: &str, t: i64, result: Option<PracticeResult>) -> LogEntry {
        let mut e = LogEntry::new(qid);
        e.id = id.to_string();
        e.practiced_at = Utc.timestamp_opt(t, 0).unwrap();
        e.updated_at = Utc.timestamp_opt(t, 0).unwrap();
        e.result = result;
        e
    }

    #[test]
    fn rebuild_is_deterministic() {
        let entries = vec![
            entry("a", "Q1", 100, Some(PracticeResult::Correct)),
            entry("b", "Q1", 200, Some(PracticeResult::Incorrect)),
            entry("c", "Q2", 150, Some(PracticeResult::Skipped)),
        ];
        assert_eq!(DerivedCaches::rebuild(&entries), DerivedCaches::rebuild(&entries));

        let mut reversed = entries.clone();
        reversed.reverse();
        assert_eq!(DerivedCaches::rebuild(&entries), DerivedCaches::rebuild(&reversed));
    }

    #[test]
    fn latest_result_keyed_by_updated_at_not_position() {
        // Newest entry listed first; the cache must still pick it.
        let entries = vec![
            entry("b", "Q1", 200, Some(PracticeResult::Incorrect)),
            entry("a", "Q1", 100, Some(PracticeResult::Correct)),
        ];
        let caches = DerivedCaches::rebuild(&entries);
        let status = &caches.by_question["Q1"];
        assert_eq!(status.last_result, Some(PracticeResult::Incorrect));
        assert_eq!(status.attempt_count, 2);
        assert_eq!(
            status.last_correct_at,
            Some(Utc.timestamp_opt(100, 0).unwrap())
        );
        assert_eq!(
            status.last_wrong_at,
            Some(Utc.timestamp_opt(200, 0).unwrap())
        );
    }

    #[test]
    fn skip_count_accumulates() {
        let entries = vec![
            entry("a", "Q1", 100, Some(PracticeResult::Skipped)),
            entry("b", "Q1", 200, Some(PracticeResult::Skipped)),
            entry("c", "Q1", 300, Some(PracticeResult::Correct)),
        ];
        let caches = DerivedCaches::rebuild(&entries);
        assert_eq!(caches.by_question["Q1"].skip_count, 2);
    }

    #[test]
    fn note_survives_later_noteless_entry() {
        let mut noted = entry("a", "Q1", 100, Some(PracticeResult::Correct));
        noted.note = "tricky".to_string();
        let entries = vec![noted, entry("b", "Q1", 200, Some(PracticeResult::Correct))];
        let caches = DerivedCaches::rebuild(&entries);
        assert_eq!(caches.by_question["Q1"].last_note.as_deref(), Some("tricky"));
    }

    #[test]
    fn daily_aggregates_accumulate() {
        let mut a = entry("a", "Q1", 100, Some(PracticeResult::Correct));
        a.time_spent_seconds = 60;
        let mut b = entry("b", "Q2", 200, Some(PracticeResult::Skipped));
        b.time_spent_seconds = 30;
        // One week later, a different day bucket.
        let c = entry("c", "Q1", 700_000, Some(PracticeResult::Incorrect));

        let caches = DerivedCaches::rebuild(&[a, b, c]);
        assert_eq!(caches.by_day.len(), 2);

        let first_day = caches.by_day.values().next().unwrap();
        assert_eq!(first_day.total, 2);
        assert_eq!(first_day.correct, 1);
        assert_eq!(first_day.skipped, 1);
        assert_eq!(first_day.total_seconds, 90);
        assert_eq!(first_day.distinct_questions(), 2);
    }

    #[test]
    fn incremental_apply_matches_rebuild() {
        let entries = vec![
            entry("a", "Q1", 100, Some(PracticeResult::Correct)),
            entry("b", "Q2", 200, None),
            entry("c", "Q1", 300, Some(PracticeResult::Incorrect)),
        ];
        let mut incremental = DerivedCaches::default();
        for e in &entries {
            incremental.apply(e);
        }
        assert_eq!(incremental, DerivedCaches::rebuild(&entries));
    }
}
