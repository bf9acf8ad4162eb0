//! Last-write-wins merge of local and remote practice logs.
//!
//! The merge key is the question id, not the entry id: a question's
//! practice history is treated as a single current record for
//! synchronization, so the conflict surface is one comparison per
//! question and the remote store stays bounded at one row per question.

use std::collections::{HashMap, HashSet};

use crate::types::{LogEntry, SessionState};

/// Total order on entries: later `updated_at` wins, then the larger id.
///
/// The id tie-break keeps the merge commutative when two distinct records
/// share a timestamp; identical records compare equal and the remote copy
/// is preferred by the fold below.
fn beats(a: &LogEntry, b: &LogEntry) -> bool {
    (a.updated_at, a.id.as_str()) > (b.updated_at, b.id.as_str())
}

/// Combine local and remote entry sets into one canonical set.
///
/// Entries whose qid is not in `valid_qids` are excluded. The result holds
/// at most one entry per qid, every entry carries an id, and the function
/// is commutative and idempotent over its inputs. Output is sorted by qid.
pub fn merge_entries(
    local: &[LogEntry],
    remote: &[LogEntry],
    valid_qids: &HashSet<String>,
) -> Vec<LogEntry> {
    let mut winners: HashMap<&str, &LogEntry> = HashMap::new();

    for entry in local {
        if !valid_qids.contains(&entry.qid) {
            continue;
        }
        match winners.get(entry.qid.as_str()) {
            Some(current) if !beats(entry, current) => {}
            _ => {
                winners.insert(entry.qid.as_str(), entry);
            }
        }
    }

    for entry in remote {
        if !valid_qids.contains(&entry.qid) {
            continue;
        }
        match winners.get(entry.qid.as_str()) {
            // Ties fall to the remote copy so devices converge faster.
            Some(current) if beats(current, entry) => {}
            _ => {
                winners.insert(entry.qid.as_str(), entry);
            }
        }
    }

    let mut merged: Vec<LogEntry> = winners
        .into_values()
        .map(|entry| {
            let mut entry = entry.clone();
            entry.ensure_id();
            entry
        })
        .collect();
    merged.sort_by(|a, b| a.qid.cmp(&b.qid));
    merged
}

/// Merge the at-most-one session state per user: the newer side wins,
/// a lone side wins by default, ties prefer the remote copy.
pub fn merge_session_state(
    local: Option<SessionState>,
    remote: Option<SessionState>,
) -> Option<SessionState> {
    match (local, remote) {
        (None, None) => None,
        (Some(l), None) => Some(l),
        (None, Some(r)) => Some(r),
        (Some(l), Some(r)) => {
            if l.updated_at > r.updated_at {
                Some(l)
            } else {
                Some(r)
            }
        }
    }
}
