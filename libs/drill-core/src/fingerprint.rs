//! Question bank fingerprinting.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content hash + logical version of the currently loaded question bank.
///
/// Stamped onto new log entries, used to validate cross-device
/// comparability and to drive the drift guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionBankFingerprint {
    pub version: String,
    pub hash: String,
    pub count: usize,
}

impl QuestionBankFingerprint {
    /// Derive a fingerprint from the raw bank bytes.
    pub fn from_bytes(version: impl Into<String>, bytes: &[u8], count: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self {
            version: version.into(),
            hash: format!("{:x}", hasher.finalize()),
            count,
        }
    }

    /// Length-derived pseudo-hash for when the raw bytes are unavailable.
    pub fn fallback(version: impl Into<String>, byte_len: usize, count: usize) -> Self {
        Self {
            version: version.into(),
            hash: format!("len-{byte_len}"),
            count,
        }
    }
}
