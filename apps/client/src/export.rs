//! Evidence export for aborted syncs.
//!
//! When the drift guard rejects a question bank update, the entries that
//! would have been silently orphaned are written out as JSON so the user
//! can inspect them before forcing the update through.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use drill_core::LogEntry;

/// Default export directory under the platform data dir.
pub fn default_export_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quizdrill")
}

/// Write the orphaned entries to a timestamped JSON file and return its
/// path. Failures are logged but never escalate past the drift abort
/// that triggered the export.
pub fn write_orphan_export(dir: &Path, user_id: &str, entries: &[LogEntry]) -> Option<PathBuf> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let path = dir.join(format!("orphaned-entries-{user_id}-{stamp}.json"));

    let bytes = match serde_json::to_vec_pretty(entries) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to encode orphan export: {e}");
            return None;
        }
    };
    if let Err(e) = fs::create_dir_all(dir) {
        warn!("failed to create export dir {}: {e}", dir.display());
        return None;
    }
    match fs::write(&path, bytes) {
        Ok(()) => {
            info!(
                count = entries.len(),
                path = %path.display(),
                "exported orphaned entries"
            );
            Some(path)
        }
        Err(e) => {
            warn!("failed to write orphan export {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_writes_readable_json() {
        let dir = std::env::temp_dir().join(format!("quizdrill-export-{}", uuid::Uuid::new_v4()));
        let entries = vec![LogEntry::new("Q1"), LogEntry::new("Q2")];

        let path = write_orphan_export(&dir, "user-1", &entries).expect("export path");
        let bytes = fs::read(&path).expect("export file");
        let decoded: Vec<LogEntry> = serde_json::from_slice(&bytes).expect("valid json");
        assert_eq!(decoded.len(), 2);

        fs::remove_dir_all(&dir).ok();
    }
}
