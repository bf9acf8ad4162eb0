//! Question bank drift guard.
//!
//! A large drop in the bank's question count between syncs usually means
//! the wrong or a corrupted bank is loaded. Merging against it would
//! silently drop entries as "foreign", so the sync is halted instead.

use std::collections::HashSet;

use crate::fingerprint::QuestionBankFingerprint;
use crate::types::LogEntry;

/// Legitimate bank edits rarely remove more than this many questions.
pub const DRIFT_THRESHOLD: usize = 50;

/// Outcome of the pre-merge drift check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftVerdict {
    Proceed,
    /// The bank shrank past the threshold; the sync must abort.
    Abort {
        previous_count: usize,
        current_count: usize,
    },
}

/// Compare the current bank against the fingerprint recorded at the last
/// successful sync. No baseline means no verdict to render.
pub fn check_bank_drift(
    previous: Option<&QuestionBankFingerprint>,
    current: &QuestionBankFingerprint,
) -> DriftVerdict {
    let Some(previous) = previous else {
        return DriftVerdict::Proceed;
    };
    let dropped = previous.count.saturating_sub(current.count);
    if dropped > DRIFT_THRESHOLD {
        DriftVerdict::Abort {
            previous_count: previous.count,
            current_count: current.count,
        }
    } else {
        DriftVerdict::Proceed
    }
}

/// Collect the entries (local and remote) that reference qids absent from
/// the current bank. Exported as evidence before an aborted sync.
pub fn orphaned_entries(
    local: &[LogEntry],
    remote: &[LogEntry],
    valid_qids: &HashSet<String>,
) -> Vec<LogEntry> {
    let mut orphans: Vec<LogEntry> = local
        .iter()
        .chain(remote.iter())
        .filter(|e| !valid_qids.contains(&e.qid))
        .cloned()
        .collect();
    orphans.sort_by(|a, b| (&a.qid, &a.id).cmp(&(&b.qid, &b.id)));
    orphans.dedup_by(|a, b| a.id == b.id);
    orphans
}
