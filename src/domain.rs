// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Domain directory conventions.
//!
//! An MXL domain is a directory (typically on tmpfs, e.g.
//! `/dev/shm/my_domain`) holding one subdirectory per flow, named by the
//! flow's canonical UUID string (lowercase, 8-4-4-4-12 hex). Each flow
//! subdirectory contains a single unified backing file, `flow.data`, that
//! carries the header, schema blob, index ring, and payload arena in one
//! mapping. Writer-exclusivity locking piggybacks on this file.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::{Error, Result};

/// Name of the unified flow backing file inside a flow directory.
pub(crate) const FLOW_DATA_FILE: &str = "flow.data";

/// Returns the directory holding the given flow's files.
pub(crate) fn flow_dir(domain: &Path, flow_id: Uuid) -> PathBuf {
    // Uuid's hyphenated Display form is the canonical lowercase string.
    domain.join(flow_id.to_string())
}

/// Returns the path of the flow's unified backing file.
pub(crate) fn flow_data_path(domain: &Path, flow_id: Uuid) -> PathBuf {
    flow_dir(domain, flow_id).join(FLOW_DATA_FILE)
}

/// Parses a canonical flow identifier string.
pub(crate) fn parse_flow_id(flow_id: &str) -> Result<Uuid> {
    Uuid::parse_str(flow_id).map_err(|_| Error::BadArg)
}

/// Creates the flow directory, applying group-sticky permissions so that
/// cooperating processes under one group can share the domain.
pub(crate) fn create_flow_dir(domain: &Path, flow_id: Uuid) -> Result<PathBuf> {
    let dir = flow_dir(domain, flow_id);
    std::fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o2775))?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_paths_use_canonical_uuid_strings() {
        let id = Uuid::parse_str("6b1e6d24-9d35-4b62-8e8e-0123456789ab").unwrap();
        let path = flow_data_path(Path::new("/dev/shm/domain"), id);
        assert_eq!(
            path,
            Path::new("/dev/shm/domain/6b1e6d24-9d35-4b62-8e8e-0123456789ab/flow.data")
        );
    }

    #[test]
    fn uppercase_ids_parse_to_the_same_flow() {
        let lower = parse_flow_id("6b1e6d24-9d35-4b62-8e8e-0123456789ab").unwrap();
        let upper = parse_flow_id("6B1E6D24-9D35-4B62-8E8E-0123456789AB").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn garbage_ids_are_rejected() {
        assert!(matches!(parse_flow_id("not-a-uuid"), Err(Error::BadArg)));
        assert!(matches!(parse_flow_id(""), Err(Error::BadArg)));
    }
}
