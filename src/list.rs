//! Candidate whole-disk listing, for the `list` subcommand

use std::{fs, path::PathBuf};

use crate::device;

/// One listed candidate device
pub(crate) struct Candidate {
    /// Path under `/dev`
    pub path: PathBuf,
    /// Resolved model, or "unidentified" when probing failed
    pub model: String,
    /// Size in bytes, if it could be resolved
    pub size_bytes: Option<u64>,
}

/// Enumerate whole-disk block devices under `/dev/disk/by-id`, excluding partitions
///
/// Identification failures for one candidate never abort the whole listing.
pub(crate) fn candidates() -> anyhow::Result<Vec<Candidate>> {
    let mut seen_targets = std::collections::HashSet::new();
    let mut out = Vec::new();
    for entry in fs::read_dir("/dev/disk/by-id")? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_partition_entry(name) {
            continue;
        }
        let Ok(target) = fs::canonicalize(entry.path()) else {
            continue;
        };
        if !seen_targets.insert(target.clone()) {
            continue;
        }
        let (model, size_bytes) = match device::identify(&target) {
            Ok(descriptor) => (descriptor.model.unwrap_or_else(|| "unidentified".to_owned()), Some(descriptor.size_bytes)),
            Err(_) => ("unidentified".to_owned(), None),
        };
        out.push(Candidate {
            path: target,
            model,
            size_bytes,
        });
    }
    Ok(out)
}

/// Does this `/dev/disk/by-id` entry name refer to a partition rather than a whole disk?
fn is_partition_entry(name: &str) -> bool {
    name.trim_end_matches(char::is_numeric).ends_with("-part")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_entries_detected() {
        assert!(is_partition_entry("ata-WDC_WD40-part1"));
        assert!(is_partition_entry("ata-WDC_WD40-part12"));
        assert!(!is_partition_entry("ata-WDC_WD40"));
    }
}
