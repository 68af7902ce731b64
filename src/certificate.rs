//! Certificate rendering: the end-of-run text artifact

use std::{
    fs,
    io::Write as _,
    path::{Path, PathBuf},
};

use crate::{
    device::DeviceDescriptor,
    health::Snapshot,
    pipeline::Step,
    thermal::{ThermalRecord, Thresholds},
};

/// Attributes whose before/after delta is worth reporting on the certificate
const DELTA_ATTRIBUTES: [&str; 5] = [
    "Reallocated_Sector_Ct",
    "Current_Pending_Sector",
    "Offline_Uncorrectable",
    "UDMA_CRC_Error_Count",
    "Temperature_Celsius",
];

/// Certificate file path for a given serial and timestamp
fn certificate_path(report_dir: &Path, serial: &str, timestamp: &str) -> PathBuf {
    report_dir.join(format!("preclear-ng_certificate_{serial}_{timestamp}.txt"))
}

/// Format a UTC timestamp the way certificate filenames and headers use it
fn format_timestamp(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y.%m.%d_%H.%M.%S").to_string()
}

/// Common header shared by every certificate variant
fn render_header(device: &DeviceDescriptor, thermal: &ThermalRecord, thresholds: &Thresholds, now: chrono::DateTime<chrono::Utc>) -> String {
    let mut out = String::new();
    out.push_str("preclear-ng certificate\n");
    out.push_str(&format!("date: {}\n", now.to_rfc3339()));
    out.push_str(&format!("device: {}\n", device.path.display()));
    out.push_str(&format!("model: {}\n", device.model.as_deref().unwrap_or("unknown")));
    out.push_str(&format!("serial: {}\n", device.serial.as_deref().unwrap_or("unknown")));
    out.push_str(&format!("size_bytes: {}\n", device.size_bytes));
    out.push_str(&format!("logical_sector_bytes: {}\n", device.logical_sector_bytes));
    out.push_str(&format!("rotational: {}\n", device.rotational));
    out.push_str("--- thermal record ---\n");
    out.push_str(&format!("run_min_c: {}\n", thermal.run_min_c.map_or("unknown".to_owned(), |v| v.to_string())));
    out.push_str(&format!("run_max_c: {}\n", thermal.run_max_c.map_or("unknown".to_owned(), |v| v.to_string())));
    out.push_str(&format!("paused_seconds_total: {}\n", thermal.paused_seconds_total));
    out.push_str(&format!("above_pause_seconds_total: {}\n", thermal.above_pause_seconds_total));
    out.push_str(&format!(
        "thresholds_c: resume={} pause={} abort={}\n",
        thresholds.resume_c, thresholds.pause_c, thresholds.abort_c
    ));
    out
}

/// Render the paths where the raw initial/current SMART snapshots were persisted
fn render_snapshot_paths(initial: &Path, current: &Path) -> String {
    format!("initial_smart_snapshot: {}\ncurrent_smart_snapshot: {}\n", initial.display(), current.display())
}

/// Render the attribute delta block between two snapshots
fn render_delta(initial: &Snapshot, current: &Snapshot) -> String {
    let mut out = String::new();
    out.push_str("--- attribute deltas ---\n");
    out.push_str(&format!("{:<24} {:>12} {:>12} {:>6}\n", "attribute", "initial", "current", "delta"));
    for name in DELTA_ATTRIBUTES {
        let before = initial.attribute(name);
        let after = current.attribute(name);
        let (Some(before), Some(after)) = (before, after) else {
            continue;
        };
        let arrow = match (before.parse::<i64>(), after.parse::<i64>()) {
            (Ok(b), Ok(a)) if a > b => "up",
            (Ok(b), Ok(a)) if a < b => "down",
            _ => "-",
        };
        out.push_str(&format!("{name:<24} {before:>12} {after:>12} {arrow:>6}\n"));
    }
    out
}

/// Persist `content` to `report_dir/preclear-ng_certificate_<serial>_<timestamp>.txt`
fn persist(report_dir: &Path, serial: &str, content: &str) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(report_dir)?;
    let now = utc_now();
    let path = certificate_path(report_dir, serial, &format_timestamp(now));
    let mut file = fs::File::create(&path)?;
    file.write_all(content.as_bytes())?;
    Ok(path)
}

/// Current time; isolated so it is the only non-deterministic call in this module
fn utc_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// Certificate for a fully successful run
pub(crate) fn write_success(
    report_dir: &Path,
    device: &DeviceDescriptor,
    thermal: &ThermalRecord,
    thresholds: &Thresholds,
    initial: &Snapshot,
    current: &Snapshot,
    snapshot_paths: (&Path, &Path),
    serial: &str,
) -> anyhow::Result<PathBuf> {
    let mut content = render_header(device, thermal, thresholds, utc_now());
    content.push_str("status: success\n");
    content.push_str(&render_snapshot_paths(snapshot_paths.0, snapshot_paths.1));
    content.push_str(&render_delta(initial, current));
    persist(report_dir, serial, &content)
}

/// Certificate for a thermal abort, naming the responsible step
pub(crate) fn write_abort(
    report_dir: &Path,
    device: &DeviceDescriptor,
    thermal: &ThermalRecord,
    thresholds: &Thresholds,
    initial: &Snapshot,
    current: &Snapshot,
    snapshot_paths: (&Path, &Path),
    step: Step,
    serial: &str,
) -> anyhow::Result<PathBuf> {
    let mut content = render_header(device, thermal, thresholds, utc_now());
    content.push_str(&format!("status: aborted at step {step} (thermal)\n"));
    content.push_str(&render_snapshot_paths(snapshot_paths.0, snapshot_paths.1));
    content.push_str(&render_delta(initial, current));
    persist(report_dir, serial, &content)
}

/// Certificate for a worker failure or stall, naming the responsible step
pub(crate) fn write_failure(
    report_dir: &Path,
    device: &DeviceDescriptor,
    thermal: &ThermalRecord,
    thresholds: &Thresholds,
    step: Step,
    serial: &str,
) -> anyhow::Result<PathBuf> {
    let mut content = render_header(device, thermal, thresholds, utc_now());
    content.push_str(&format!("status: failed at step {step}\n"));
    persist(report_dir, serial, &content)
}
