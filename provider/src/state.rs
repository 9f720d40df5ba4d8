//! State file persistence.

use crate::error::{ProviderError, Result};
use std::path::{Path, PathBuf};
use zabbix_sync_engine::{StateSnapshot, Timestamp};

/// Load the state file; a missing file is an empty state.
pub fn load(path: &Path) -> Result<StateSnapshot> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(StateSnapshot::from_json(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no state file, starting empty");
            Ok(StateSnapshot::new())
        }
        Err(e) => Err(ProviderError::io(path, e)),
    }
}

/// Write the state file through a sibling temporary file, so a crash never
/// leaves a truncated state behind.
pub fn save(path: &Path, snapshot: &StateSnapshot) -> Result<()> {
    let json = snapshot.to_json_pretty()?;
    let tmp = temporary_path(path);

    std::fs::write(&tmp, json).map_err(|e| ProviderError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| ProviderError::io(path, e))?;
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Milliseconds since the epoch.
pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
