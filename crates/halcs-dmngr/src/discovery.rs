use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{DmngrError, DmngrResult};

/// Scan `dir` for endpoint nodes whose file name matches `pattern` (a
/// trailing-`*` glob, the only shape the source's scanner needs). Returns
/// names in a stable, deterministic order. Safe to call repeatedly: the
/// caller (the registry) only ever inserts by name, so re-scanning never
/// duplicates entries.
pub fn scan_endpoints(dir: &Path, pattern: &str) -> DmngrResult<Vec<String>> {
    let prefix = pattern.trim_end_matches('*');

    let entries = std::fs::read_dir(dir)
        .map_err(|e| DmngrError::Discovery(dir.display().to_string(), e.to_string()))?;

    let mut found = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| DmngrError::Discovery(dir.display().to_string(), e.to_string()))?;
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(prefix) {
                found.insert(name.to_string());
            }
        }
    }
    Ok(found.into_iter().collect())
}
