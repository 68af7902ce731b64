//! Step-boundary checkpoint: strict key=value persistence for resume support

use std::{
    fs,
    io::Write as _,
    os::unix::fs::{MetadataExt as _, OpenOptionsExt as _},
    path::{Path, PathBuf},
};

use crate::error::CheckpointError;

/// Persisted step-boundary state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CheckpointRecord {
    /// Step identifier, 1..=6
    pub step: u8,
    /// Cycle counter, 1..=N
    pub cycle: u32,
    /// Cumulative paused seconds
    pub paused_seconds_total: u64,
    /// Cumulative seconds at or above the pause threshold
    pub above_pause_seconds_total: u64,
    /// Run-scoped minimum temperature, in millidegrees Celsius to keep the format integer-only
    pub temp_min_millic: Option<i64>,
    /// Run-scoped maximum temperature, in millidegrees Celsius
    pub temp_max_millic: Option<i64>,
}

/// Checkpoint file path for a given device serial, under `state_dir`
pub(crate) fn checkpoint_path(state_dir: &Path, serial: &str) -> PathBuf {
    state_dir.join(format!("{serial}.ng.state"))
}

/// Atomically write the checkpoint, with owner-only permissions
pub(crate) fn write(path: &Path, record: &CheckpointRecord) -> anyhow::Result<()> {
    let dir = path.parent().ok_or_else(|| anyhow::anyhow!("checkpoint path has no parent"))?;
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new().permissions(std::fs::Permissions::from_mode(0o600)).tempfile_in(dir)?;
    writeln!(tmp, "step={}", record.step)?;
    writeln!(tmp, "cycle={}", record.cycle)?;
    writeln!(tmp, "paused_seconds_total={}", record.paused_seconds_total)?;
    writeln!(tmp, "above_pause_seconds_total={}", record.above_pause_seconds_total)?;
    if let Some(v) = record.temp_min_millic {
        writeln!(tmp, "temp_min_millic={v}")?;
    }
    if let Some(v) = record.temp_max_millic {
        writeln!(tmp, "temp_max_millic={v}")?;
    }
    tmp.persist(path)?;
    Ok(())
}

/// Delete the checkpoint file; missing file is not an error
pub(crate) fn delete(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Read and strictly validate a checkpoint; any irregularity is treated as "no checkpoint"
/// rather than surfaced as a hard error
pub(crate) fn read(path: &Path) -> Option<CheckpointRecord> {
    match try_read(path) {
        Ok(record) => Some(record),
        Err(e) => {
            log::debug!("ignoring checkpoint at {path:?}: {e}");
            None
        }
    }
}

/// Fallible inner implementation of `read`, kept separate so every rejection reason
/// can be logged uniformly by the caller
fn try_read(path: &Path) -> Result<CheckpointRecord, CheckpointError> {
    let metadata = fs::metadata(path).map_err(|e| CheckpointError::Other(e.into()))?;
    if !metadata.is_file() {
        return Err(CheckpointError::Malformed(path.to_owned()));
    }
    let invoking_uid = nix::unistd::geteuid().as_raw();
    if metadata.uid() != invoking_uid {
        return Err(CheckpointError::WrongOwner(path.to_owned()));
    }
    if metadata.mode() & 0o077 != 0 {
        return Err(CheckpointError::UnsafePermissions(path.to_owned()));
    }

    let content = fs::read_to_string(path).map_err(|e| CheckpointError::Other(e.into()))?;
    parse(&content).ok_or_else(|| CheckpointError::Malformed(path.to_owned()))
}

/// Strict literal `key=value` parser; unknown keys ignored, non-numeric or
/// out-of-range values reject the whole record rather than being coerced
fn parse(content: &str) -> Option<CheckpointRecord> {
    let mut step = None;
    let mut cycle = None;
    let mut paused_seconds_total = 0u64;
    let mut above_pause_seconds_total = 0u64;
    let mut temp_min_millic = None;
    let mut temp_max_millic = None;

    for line in content.lines() {
        let (key, value) = line.split_once('=')?;
        match key {
            "step" => {
                let v: u8 = parse_unsigned(value)?;
                if !(1..=6).contains(&v) {
                    return None;
                }
                step = Some(v);
            }
            "cycle" => cycle = Some(parse_unsigned(value)?),
            "paused_seconds_total" => paused_seconds_total = parse_unsigned(value)?,
            "above_pause_seconds_total" => above_pause_seconds_total = parse_unsigned(value)?,
            "temp_min_millic" => temp_min_millic = Some(parse_signed(value)?),
            "temp_max_millic" => temp_max_millic = Some(parse_signed(value)?),
            _ => {}
        }
    }

    Some(CheckpointRecord {
        step: step?,
        cycle: cycle?,
        paused_seconds_total,
        above_pause_seconds_total,
        temp_min_millic,
        temp_max_millic,
    })
}

/// Accept only a literal run of ASCII digits, never whitespace, sign, or `eval`-style tricks
fn parse_unsigned<T: std::str::FromStr>(value: &str) -> Option<T> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Accept an optional leading `-` followed only by ASCII digits
fn parse_signed<T: std::str::FromStr>(value: &str) -> Option<T> {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> CheckpointRecord {
        CheckpointRecord {
            step: 4,
            cycle: 1,
            paused_seconds_total: 120,
            above_pause_seconds_total: 45,
            temp_min_millic: Some(30_000),
            temp_max_millic: Some(52_000),
        }
    }

    #[test]
    fn round_trip_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "WD-TEST1");
        let record = sample_record();
        write(&path, &record).unwrap();
        let read_back = read(&path).unwrap();
        assert_eq!(read_back, record);
    }

    #[test]
    fn delete_then_read_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "WD-TEST2");
        write(&path, &sample_record()).unwrap();
        delete(&path).unwrap();
        assert!(read(&path).is_none());
    }

    #[test]
    fn rejects_unsafe_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "WD-TEST3");
        write(&path, &sample_record()).unwrap();
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(read(&path).is_none());
    }

    #[test]
    fn rejects_out_of_range_step() {
        let parsed = parse("step=9\ncycle=1\n");
        assert!(parsed.is_none());
    }

    #[test]
    fn rejects_non_numeric_value() {
        let parsed = parse("step=$(rm -rf /)\ncycle=1\n");
        assert!(parsed.is_none());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let parsed = parse("step=2\ncycle=1\nfuture_field=whatever\n").unwrap();
        assert_eq!(parsed.step, 2);
    }
}
