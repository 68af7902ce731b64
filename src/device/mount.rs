//! Mounted / root-backing detection via `/proc/mounts`

use std::{fs, path::Path};

/// Is `dev_path`, or any of its partitions, currently mounted?
pub(crate) fn is_mounted(dev_path: &Path) -> anyhow::Result<bool> {
    let mounts = fs::read_to_string("/proc/mounts")?;
    Ok(mounted_sources(&mounts).any(|source| is_device_or_partition(dev_path, source)))
}

/// Does `dev_path` back the device currently mounted at `/`?
pub(crate) fn backs_root(dev_path: &Path) -> anyhow::Result<bool> {
    let mounts = fs::read_to_string("/proc/mounts")?;
    let root_source = mounts
        .lines()
        .filter_map(parse_mount_line)
        .find(|(_source, target)| *target == "/")
        .map(|(source, _target)| source.to_owned());
    Ok(root_source.is_some_and(|source| is_device_or_partition(dev_path, &source)))
}

/// Mount sources from `/proc/mounts` content
fn mounted_sources(mounts: &str) -> impl Iterator<Item = &str> {
    mounts.lines().filter_map(parse_mount_line).map(|(source, _target)| source)
}

/// Parse one `/proc/mounts` line into `(source, target)`
fn parse_mount_line(line: &str) -> Option<(&str, &str)> {
    let mut fields = line.split_ascii_whitespace();
    let source = fields.next()?;
    let target = fields.next()?;
    Some((source, target))
}

/// Does `source` refer to `dev_path` itself or one of its partitions?
fn is_device_or_partition(dev_path: &Path, source: &str) -> bool {
    let Some(dev_name) = dev_path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(source_name) = Path::new(source).file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    source_name == dev_name
        || (source_name.starts_with(dev_name)
            && source_name[dev_name.len()..]
                .trim_start_matches('p')
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit()))
}
