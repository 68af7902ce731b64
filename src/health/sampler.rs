//! Bounded-time SMART snapshot capture and attribute extraction

use std::{
    collections::HashMap,
    io::Read as _,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{Duration, Instant},
};

/// Minimum interval between automatic snapshot refreshes
const SMART_REFRESH_S: u64 = 300;
/// Hard ceiling on how long a single `smartctl` invocation is allowed to run
const CAPTURE_TIMEOUT_S: u64 = 30;

/// Known SMART attribute (id, name) pairs carrying a temperature, as reported by
/// `smartctl -A`'s vendor attribute table
const TEMP_ATTRIBS_ID_NAMES: [(u16, &str); 2] = [(194, "Temperature_Celsius"), (190, "Airflow_Temperature_Ce")];

/// A captured health report: the opaque text blob plus attributes parsed out of it
#[derive(Clone, Debug, Default)]
pub(crate) struct Snapshot {
    /// Full `smartctl` stdout, kept verbatim for certificate excerpts
    pub raw: String,
    /// Parsed attribute name -> raw value string
    pub attributes: HashMap<String, String>,
}

impl Snapshot {
    /// Is this an empty ("unknown") snapshot, e.g. after a timed-out capture?
    pub(crate) fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Current temperature, preferring named SMART attributes over a generic scan
    pub(crate) fn temperature(&self) -> Option<f64> {
        for (_, name) in TEMP_ATTRIBS_ID_NAMES {
            if let Some(v) = self.attributes.get(name).and_then(|v| v.parse().ok()) {
                return Some(v);
            }
        }
        self.raw
            .lines()
            .find(|l| l.trim_start().starts_with("Temperature:"))
            .and_then(|l| l.split(':').nth(1))
            .and_then(|v| v.split_ascii_whitespace().next())
            .and_then(|v| v.parse().ok())
    }

    /// Named attribute value, if present
    pub(crate) fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// One row of `smartctl -A`'s vendor attribute table
struct AttribRow {
    /// Attribute name, e.g. `Temperature_Celsius`
    name: String,
    /// Raw value column (index 9 in the table)
    value: String,
}

impl std::str::FromStr for AttribRow {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<_> = s.split_ascii_whitespace().collect();
        if tokens.len() < 10 {
            return Err("not enough columns");
        }
        tokens[0].parse::<u16>().map_err(|_| "not an attribute row")?;
        Ok(Self {
            name: tokens[1].to_owned(),
            value: tokens[9].split_ascii_whitespace().next().unwrap_or(tokens[9]).to_owned(),
        })
    }
}

/// Parse every attribute row out of a `smartctl -a`/`-A` blob
fn parse_attributes(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter_map(|l| l.parse::<AttribRow>().ok())
        .map(|row| (row.name, row.value))
        .collect()
}

/// Captures and caches SMART snapshots for one device
pub(crate) struct Sampler {
    /// Device path
    device: PathBuf,
    /// Transport hint passed as `-d <hint>`, if any (`--smart-type`)
    transport_hint: Option<String>,
    /// Most recently captured snapshot
    last: Option<Snapshot>,
    /// When `last` was captured
    last_capture_at: Option<Instant>,
}

impl Sampler {
    /// Build a sampler for `device`, optionally pinning a SMART transport hint
    pub(crate) fn new(device: &Path, transport_hint: Option<String>) -> Self {
        Self {
            device: device.to_owned(),
            transport_hint,
            last: None,
            last_capture_at: None,
        }
    }

    /// Most recently captured snapshot, if any
    pub(crate) fn last(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    /// Force a capture regardless of staleness, e.g. for the initial and finalize snapshots
    pub(crate) fn capture(&mut self) -> Snapshot {
        let snapshot = run_smartctl(&self.device, self.transport_hint.as_deref());
        self.last = Some(snapshot.clone());
        self.last_capture_at = Some(Instant::now());
        snapshot
    }

    /// Capture iff the last snapshot is older than `SMART_REFRESH_S`, or there is none yet
    pub(crate) fn refresh_if_stale(&mut self) -> Snapshot {
        let stale = self.last_capture_at.is_none_or(|at| at.elapsed() >= Duration::from_secs(SMART_REFRESH_S));
        if stale {
            self.capture()
        } else {
            self.last.clone().unwrap_or_default()
        }
    }
}

/// Persist a snapshot's raw text under `work_dir/smart_<serial>_<label>.txt`,
/// e.g. the `initial` and `last` snapshots referenced from the certificate
pub(crate) fn persist_snapshot(work_dir: &Path, serial: &str, label: &str, snapshot: &Snapshot) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(work_dir)?;
    let path = work_dir.join(format!("smart_{serial}_{label}.txt"));
    std::fs::write(&path, &snapshot.raw)?;
    Ok(path)
}

/// Request the device's long internal self-test without blocking on completion
pub(crate) fn request_long_self_test(device: &Path, transport_hint: Option<&str>) -> anyhow::Result<()> {
    let mut cmd = Command::new("smartctl");
    if let Some(hint) = transport_hint {
        cmd.arg("-d").arg(hint);
    }
    cmd.arg("-t").arg("long").arg(device).stdin(Stdio::null()).stderr(Stdio::null()).env("LANG", "C");
    let output = cmd.output()?;
    anyhow::ensure!(output.status.success(), "smartctl -t long failed with {}", output.status);
    Ok(())
}

/// Run `smartctl -a` with a bounded deadline; never returns an error, an empty
/// snapshot stands in for "unknown" on timeout or unreadable output
fn run_smartctl(device: &Path, transport_hint: Option<&str>) -> Snapshot {
    let mut cmd = Command::new("smartctl");
    cmd.arg("-a");
    if let Some(hint) = transport_hint {
        cmd.arg("-d").arg(hint);
    }
    cmd.arg(device).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null()).env("LANG", "C");

    let Ok(mut child) = cmd.spawn() else {
        log::warn!("failed to spawn smartctl for {device:?}");
        return Snapshot::default();
    };

    let deadline = Instant::now() + Duration::from_secs(CAPTURE_TIMEOUT_S);
    loop {
        match child.try_wait() {
            Ok(Some(_status)) => break,
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(200));
            }
            Ok(None) => {
                log::warn!("smartctl capture for {device:?} timed out after {CAPTURE_TIMEOUT_S}s, killing");
                let _ = child.kill();
                let _ = child.wait();
                return Snapshot::default();
            }
            Err(e) => {
                log::warn!("failed to wait on smartctl for {device:?}: {e}");
                return Snapshot::default();
            }
        }
    }

    let mut raw = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        if stdout.read_to_string(&mut raw).is_err() {
            return Snapshot::default();
        }
    }
    let attributes = parse_attributes(&raw);
    Snapshot { raw, attributes }
}

impl crate::worker::TemperatureSource for Sampler {
    fn current(&mut self) -> Option<crate::thermal::Temp> {
        self.refresh_if_stale().temperature()
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;

    use super::*;
    use crate::tests::BinaryMock;

    const ATTRIB_BLOB: &str = "smartctl 7.0\n\
ID# ATTRIBUTE_NAME          FLAG     VALUE WORST THRESH TYPE      UPDATED  WHEN_FAILED RAW_VALUE\n\
194 Temperature_Celsius     0x0002   171   171   000    Old_age   Always       -       35 (Min/Max 13/45)\n";

    #[serial_test::serial]
    #[test]
    fn capture_parses_temperature_attribute() {
        let _smartctl = BinaryMock::new("smartctl", ATTRIB_BLOB.as_bytes(), &[], 0).unwrap();
        let mut sampler = Sampler::new(Path::new("/dev/_sdX"), None);
        let snap = sampler.capture();
        assert!(approx_eq!(f64, snap.temperature().unwrap(), 35.0));
    }

    #[test]
    fn generic_temperature_line_fallback() {
        let snap = Snapshot {
            raw: "Current Temperature:                    30 Celsius\nTemperature: 30 Celsius\n".to_owned(),
            attributes: HashMap::new(),
        };
        assert!(approx_eq!(f64, snap.temperature().unwrap(), 30.0));
    }

    #[test]
    fn empty_snapshot_has_unknown_temperature() {
        let snap = Snapshot::default();
        assert!(snap.is_empty());
        assert_eq!(snap.temperature(), None);
    }

    #[serial_test::serial]
    #[test]
    fn refresh_if_stale_skips_recent_capture() {
        let _smartctl = BinaryMock::new("smartctl", ATTRIB_BLOB.as_bytes(), &[], 0).unwrap();
        let mut sampler = Sampler::new(Path::new("/dev/_sdX"), None);
        let first = sampler.refresh_if_stale();
        let second = sampler.refresh_if_stale();
        assert_eq!(first.raw, second.raw);
    }

    #[test]
    fn persist_snapshot_writes_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let snap = Snapshot {
            raw: "smartctl output\n".to_owned(),
            attributes: HashMap::new(),
        };
        let path = persist_snapshot(dir.path(), "SERIAL1", "initial", &snap).unwrap();
        assert_eq!(path, dir.path().join("smart_SERIAL1_initial.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "smartctl output\n");
    }

    #[test]
    fn attribute_lookup() {
        let mut attributes = HashMap::new();
        attributes.insert("Reallocated_Sector_Ct".to_owned(), "0".to_owned());
        let snap = Snapshot {
            raw: String::new(),
            attributes,
        };
        assert_eq!(snap.attribute("Reallocated_Sector_Ct"), Some("0"));
        assert_eq!(snap.attribute("Missing"), None);
    }
}
