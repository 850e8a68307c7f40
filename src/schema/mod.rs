// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mirror schema version gate.
//!
//! The relational schema ships as a base file plus ordered upgrades; each
//! applied file appends a row to `mirror_schema(version)`. The engine never
//! migrates. It refuses to start unless the newest recorded version is the
//! one its statements were written against.
//!
//! ```
//! use mirror_sync::schema::{check_version, SCHEMA_VERSION};
//!
//! assert!(check_version(Some(SCHEMA_VERSION)).is_ok());
//! assert!(check_version(Some("1.1.1")).is_err());
//! assert!(check_version(None).is_err());
//! ```

use tracing::{error, info};

use crate::error::SyncError;
use crate::storage::traits::MirrorStore;

/// Version the engine's statements target.
pub const SCHEMA_VERSION: &str = "1.2.0";

/// Upgrade chain, oldest first.
pub const KNOWN_VERSIONS: &[&str] = &["1.0.0", "1.1.1", "1.2.0"];

/// Compare a recorded version against [`SCHEMA_VERSION`].
pub fn check_version(found: Option<&str>) -> Result<(), SyncError> {
    match found {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(v) if KNOWN_VERSIONS.contains(&v) => Err(SyncError::FatalIo(format!(
            "mirror schema {} is outdated, apply the upgrades up to {}",
            v, SCHEMA_VERSION
        ))),
        Some(v) => Err(SyncError::FatalIo(format!(
            "mirror schema {} is unknown, expected {}",
            v, SCHEMA_VERSION
        ))),
        None => Err(SyncError::FatalIo(
            "mirror schema version missing, import the schema first".to_string(),
        )),
    }
}

/// Read the mirror's version and check it.
pub async fn verify(mirror: &dyn MirrorStore) -> Result<(), SyncError> {
    let found = mirror.schema_version().await?;
    match check_version(found.as_deref()) {
        Ok(()) => {
            info!(version = SCHEMA_VERSION, "Mirror schema verified");
            Ok(())
        }
        Err(e) => {
            error!(expected = SCHEMA_VERSION, found = ?found, "Mirror schema mismatch");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryMirror;

    #[test]
    fn test_outdated_is_fatal() {
        let err = check_version(Some("1.0.0")).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("outdated"));
    }

    #[tokio::test]
    async fn test_verify_against_mirror() {
        let mirror = MemoryMirror::new();
        assert!(verify(&mirror).await.is_ok());

        mirror.set_schema_version(Some("1.1.1"));
        assert!(matches!(verify(&mirror).await, Err(SyncError::FatalIo(_))));

        mirror.set_schema_version(None);
        assert!(verify(&mirror).await.is_err());
    }
}
