//! Stage input fingerprints.

use sha2::{Digest, Sha256};

use crate::core::PipelineRequest;

/// Hashes the effective request a stage receives.
///
/// Two invocations with identical input always share a fingerprint, which is
/// how repeated loads are shown to have seen the same data.
#[must_use]
pub fn fingerprint(request: &PipelineRequest) -> String {
    let json = serde_json::to_vec(request).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&json);
    let result = hasher.finalize();
    hex::encode(&result[..16])
}
