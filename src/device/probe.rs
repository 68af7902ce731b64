//! Device identity and geometry resolution

use std::{
    fs,
    io::BufRead as _,
    os::unix::prelude::FileTypeExt as _,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::Context as _;

use super::mount;
use crate::{error::ProbeError, thermal::Thresholds};

/// Everything known about the target device, resolved once at startup
#[derive(Clone, Debug)]
pub(crate) struct DeviceDescriptor {
    /// Canonicalized device path
    pub path: PathBuf,
    /// Model string, if it could be resolved
    pub model: Option<String>,
    /// Serial number, used to key checkpoint/snapshot/certificate filenames
    pub serial: Option<String>,
    /// Total device size in bytes
    pub size_bytes: u64,
    /// Logical sector size in bytes
    pub logical_sector_bytes: u64,
    /// Whether the device is rotational media
    pub rotational: bool,
}

impl DeviceDescriptor {
    /// Serial number, falling back to the device file name when unknown
    pub(crate) fn serial_or_name(&self) -> String {
        self.serial.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_owned()
        })
    }
}

/// Resolve and validate the target device
pub(crate) fn identify(path: &Path) -> Result<DeviceDescriptor, ProbeError> {
    let dev_path = path
        .canonicalize()
        .map_err(|_| ProbeError::NotABlockDevice(path.to_owned()))?;
    let is_block = dev_path
        .metadata()
        .map_err(|_| ProbeError::NotABlockDevice(dev_path.clone()))?
        .file_type()
        .is_block_device();
    if !is_block {
        return Err(ProbeError::NotABlockDevice(dev_path));
    }

    if mount::is_mounted(&dev_path).unwrap_or(true) {
        return Err(ProbeError::Mounted(dev_path));
    }
    if mount::backs_root(&dev_path).unwrap_or(true) {
        return Err(ProbeError::BacksRoot(dev_path));
    }

    let dev_name = dev_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ProbeError::NotABlockDevice(dev_path.clone()))?;

    let size_bytes = read_sysfs_u64(dev_name, "size")
        .map(|sectors| sectors * 512)
        .map_err(|_| ProbeError::Geometry(dev_path.clone()))?;
    if size_bytes == 0 {
        return Err(ProbeError::Geometry(dev_path.clone()));
    }

    let logical_sector_bytes = read_sysfs_u64(dev_name, "queue/logical_block_size")
        .unwrap_or(512)
        .max(512);

    let rotational = read_sysfs_u64(dev_name, "queue/rotational").unwrap_or(1) != 0;

    let model = model_of(&dev_path).ok();
    let serial = serial_of(&dev_path).ok();

    Ok(DeviceDescriptor {
        path: dev_path,
        model,
        serial,
        size_bytes,
        logical_sector_bytes,
        rotational,
    })
}

/// Default thermal thresholds for the given device's media class
pub(crate) fn default_thermal(descriptor: &DeviceDescriptor) -> Thresholds {
    if descriptor.rotational {
        Thresholds::new(45.0, 50.0, 55.0, 0)
    } else {
        Thresholds::new(55.0, 60.0, 70.0, 0)
    }
}

/// Read an unsigned integer sysfs attribute for a block device
fn read_sysfs_u64(dev_name: &str, attr: &str) -> anyhow::Result<u64> {
    let path: PathBuf = ["/sys/class/block", dev_name, attr].iter().collect();
    let raw = fs::read_to_string(&path).with_context(|| format!("failed to read {path:?}"))?;
    raw.trim().parse().with_context(|| format!("unexpected contents in {path:?}"))
}

/// Resolve the drive model, preferring `hdparm` and falling back to `smartctl`
fn model_of(dev_path: &Path) -> anyhow::Result<String> {
    query_identity_field(dev_path, &["Model Number:", "Product:"])
}

/// Resolve the drive serial number, preferring `hdparm` and falling back to `smartctl`
fn serial_of(dev_path: &Path) -> anyhow::Result<String> {
    query_identity_field(dev_path, &["Serial Number:"])
}

/// Run `hdparm -I`, falling back to `smartctl -i`, and scan for the first matching field prefix
fn query_identity_field(dev_path: &Path, prefixes: &[&str]) -> anyhow::Result<String> {
    let dev = dev_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("invalid device path"))?;
    let cmds: [&[&str]; 2] = [&["hdparm", "-I", dev], &["smartctl", "-i", dev]];
    for cmd in cmds {
        log::trace!("{}", cmd.join(" "));
        let Ok(output) = Command::new(cmd[0])
            .args(&cmd[1..])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .env("LANG", "C")
            .output()
        else {
            continue;
        };
        if !output.status.success() {
            log::trace!("{}", output.status);
            continue;
        }
        if let Some(value) = output.stdout.lines().map_while(Result::ok).find_map(|l| {
            let l = l.trim_start();
            prefixes
                .iter()
                .find_map(|prefix| l.strip_prefix(prefix))
                .map(|v| v.trim().to_owned())
        }) {
            return Ok(value);
        }
    }
    anyhow::bail!("unable to resolve identity field for {dev_path:?}");
}
