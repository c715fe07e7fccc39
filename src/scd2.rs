//! Slowly-changing-dimension (type 2) decision for header versions.
//!
//! Per title the store is either without any version or has exactly one
//! current version. An incoming header either creates the first version, is
//! an unchanged re-submission, or supersedes the current version:
//!
//! ```text
//!   NoVersion ──insert──▶ Current(f)
//!   Current(f) ──same f──▶ Current(f)            (no write)
//!   Current(f) ──new g───▶ Current(g)            (close f, insert g)
//! ```
//!
//! This module holds no I/O; `store` applies decisions transactionally.

use crate::data::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionState {
    NoVersion,
    Current {
        version_id: i64,
        fingerprint: Fingerprint,
        valid_from: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// First sighting of the title.
    Insert,
    /// Fingerprint matches the current version.
    Skip { version_id: i64 },
    /// Close `previous_id` at the incoming timestamp, then insert.
    Supersede {
        previous_id: i64,
        previous_valid_from: String,
    },
}

pub fn decide(state: &VersionState, incoming: &Fingerprint) -> Decision {
    match state {
        VersionState::NoVersion => Decision::Insert,
        VersionState::Current {
            version_id,
            fingerprint,
            ..
        } if fingerprint == incoming => Decision::Skip {
            version_id: *version_id,
        },
        VersionState::Current {
            version_id,
            valid_from,
            ..
        } => Decision::Supersede {
            previous_id: *version_id,
            previous_valid_from: valid_from.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current(id: i64, fp: &str) -> VersionState {
        VersionState::Current {
            version_id: id,
            fingerprint: Fingerprint::from_hex(fp),
            valid_from: "2024-12-30 10:00:00.000".into(),
        }
    }

    #[test]
    fn test_no_version_inserts() {
        assert_eq!(
            decide(&VersionState::NoVersion, &Fingerprint::from_hex("aa")),
            Decision::Insert
        );
    }

    #[test]
    fn test_same_fingerprint_skips() {
        assert_eq!(
            decide(&current(7, "aa"), &Fingerprint::from_hex("aa")),
            Decision::Skip { version_id: 7 }
        );
    }

    #[test]
    fn test_changed_fingerprint_supersedes() {
        assert_eq!(
            decide(&current(7, "aa"), &Fingerprint::from_hex("bb")),
            Decision::Supersede {
                previous_id: 7,
                previous_valid_from: "2024-12-30 10:00:00.000".into(),
            }
        );
    }
}
