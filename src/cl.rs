//! Command line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{error::ConfigError, thermal::Thresholds};

/// Parse a Celsius temperature, bounded to a plausible operating range
fn celsius(s: &str) -> Result<f64, String> {
    clap_num::number_range(s, -20.0, 120.0)
}

/// Parse one hex byte of a destructive write pattern, with an optional `0x` prefix
fn pattern_byte(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid pattern byte {s:?}: {e}"))
}

/// preclear-ng command line arguments
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct Args {
    /// Level of logging output (TRACE, DEBUG, INFO, WARN, ERROR).
    #[arg(short, default_value_t = log::Level::Info)]
    pub verbosity: log::Level,

    /// Main action
    #[command(subcommand)]
    pub command: Command,
}

/// Main command
#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run the pre-clear pipeline against a device
    Run(RunArgs),

    /// List whole-disk candidates under `/dev/disk/by-id`
    List,
}

/// `run` subcommand arguments
#[derive(clap::Args, Debug)]
pub(crate) struct RunArgs {
    /// Block device to pre-clear, e.g. `/dev/sdb`
    #[arg(value_name = "DEVICE")]
    pub device: PathBuf,

    /// Number of full pre-clear cycles to run
    #[arg(short, long, default_value_t = 1)]
    pub cycles: u32,

    /// Resume from a persisted checkpoint instead of starting at step 1
    #[arg(long)]
    pub resume: bool,

    /// Skip the interactive confirmation prompt; required for unattended runs
    #[arg(long)]
    pub no_prompt: bool,

    /// Skip the initial full-surface read pass
    #[arg(long)]
    pub skip_preread: bool,

    /// Skip the destructive pattern write passes
    #[arg(long)]
    pub skip_badblocks: bool,

    /// Skip the zero-fill pass
    #[arg(long)]
    pub skip_zero: bool,

    /// Skip the final full-surface verify read pass
    #[arg(long)]
    pub skip_postread: bool,

    /// Destructive write patterns, as a comma-separated list of hex bytes
    #[arg(long, value_delimiter = ',', value_parser = pattern_byte, default_values_t = [0xAA, 0x55, 0xFF, 0x00])]
    pub badblocks_patterns: Vec<u8>,

    /// Override the block size used by the read/write workers, in bytes
    #[arg(long)]
    pub block_size: Option<u64>,

    /// SMART transport type hint, passed through to `smartctl -d`
    #[arg(long)]
    pub smart_type: Option<String>,

    /// Request the device's internal long self-test as part of the pipeline
    #[arg(long)]
    pub smart_long: bool,

    /// Disable thermal monitoring entirely
    #[arg(long)]
    pub temp_disable: bool,

    /// Override the resume threshold, degrees Celsius
    #[arg(long, value_parser = celsius)]
    pub temp_resume: Option<f64>,

    /// Override the pause threshold, degrees Celsius
    #[arg(long, value_parser = celsius)]
    pub temp_pause: Option<f64>,

    /// Override the abort threshold, degrees Celsius
    #[arg(long, value_parser = celsius)]
    pub temp_abort: Option<f64>,

    /// Interval between thermal/progress ticks, ie. '5s', '1min'
    #[arg(long, default_value = "5s")]
    pub temp_interval: humantime::Duration,

    /// Minutes spent at or above the pause threshold before a sustained-heat abort; 0 disables
    #[arg(long, default_value_t = 0)]
    pub temp_fail_min: u32,

    /// Override the directory persisted checkpoints live under
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Override the directory raw SMART snapshots are written to
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Override the directory certificates are written to
    #[arg(long)]
    pub report_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Validate configuration clap's declarative parsing can't express
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.badblocks_patterns.is_empty() {
            return Err(ConfigError::EmptyPatternList);
        }
        if self.cycles == 0 {
            return Err(ConfigError::ZeroCycles);
        }
        Ok(())
    }

    /// Resolve final thermal thresholds from the device's defaults and any CLI
    /// overrides, validating `resume < pause < abort`
    pub(crate) fn resolve_thresholds(&self, default: Thresholds) -> Result<Thresholds, ConfigError> {
        let thresholds = Thresholds::new(
            self.temp_resume.unwrap_or(default.resume_c),
            self.temp_pause.unwrap_or(default.pause_c),
            self.temp_abort.unwrap_or(default.abort_c),
            self.temp_fail_min,
        );
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Directory persisted checkpoint files live under
    pub(crate) fn effective_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| PathBuf::from("/var/lib/preclear-ng"))
    }

    /// Directory raw SMART snapshots are written to
    pub(crate) fn effective_work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| PathBuf::from("/var/lib/preclear-ng/smart"))
    }

    /// Directory certificates are written to
    pub(crate) fn effective_report_dir(&self) -> PathBuf {
        self.report_dir.clone().unwrap_or_else(|| PathBuf::from("/var/log/preclear-ng"))
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut args = vec!["preclear-ng", "run", "/dev/sdx"];
        args.extend_from_slice(extra);
        Args::try_parse_from(args).unwrap()
    }

    fn run_args(args: Args) -> RunArgs {
        match args.command {
            Command::Run(run) => run,
            Command::List => panic!("expected Run"),
        }
    }

    #[test]
    fn run_requires_device_path() {
        let result = Args::try_parse_from(["preclear-ng", "run"]);
        assert!(result.is_err());
    }

    #[test]
    fn run_default_patterns() {
        let run = run_args(parse(&[]));
        assert_eq!(run.badblocks_patterns, vec![0xAA, 0x55, 0xFF, 0x00]);
        assert_eq!(run.cycles, 1);
        assert!(!run.resume);
    }

    #[test]
    fn run_custom_patterns() {
        let run = run_args(parse(&["--badblocks-patterns", "00,ff"]));
        assert_eq!(run.badblocks_patterns, vec![0x00, 0xFF]);
    }

    #[test]
    fn run_rejects_invalid_pattern() {
        let result = Args::try_parse_from(["preclear-ng", "run", "/dev/sdx", "--badblocks-patterns", "zz"]);
        assert!(result.is_err());
    }

    #[test]
    fn run_rejects_out_of_range_temperature() {
        let result = Args::try_parse_from(["preclear-ng", "run", "/dev/sdx", "--temp-abort", "500"]);
        assert!(result.is_err());
    }

    #[test]
    fn resolve_thresholds_applies_overrides() {
        let run = run_args(parse(&["--temp-pause", "48"]));
        let default = Thresholds::new(45.0, 50.0, 55.0, 0);
        let resolved = run.resolve_thresholds(default).unwrap();
        assert!((resolved.pause_c - 48.0).abs() < f64::EPSILON);
        assert!((resolved.resume_c - 45.0).abs() < f64::EPSILON);
    }

    #[test]
    fn resolve_thresholds_rejects_bad_order() {
        let run = run_args(parse(&["--temp-pause", "90"]));
        let default = Thresholds::new(45.0, 50.0, 55.0, 0);
        assert!(run.resolve_thresholds(default).is_err());
    }

    #[test]
    fn validate_rejects_empty_pattern_list() {
        let mut run = run_args(parse(&[]));
        run.badblocks_patterns.clear();
        assert!(run.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_cycles() {
        let run = run_args(parse(&["--cycles", "0"]));
        assert!(run.validate().is_err());
    }

    #[test]
    fn validate_accepts_one_cycle() {
        let run = run_args(parse(&["--cycles", "1"]));
        assert!(run.validate().is_ok());
    }

    #[test]
    fn effective_dirs_fall_back_to_defaults() {
        let run = run_args(parse(&[]));
        assert_eq!(run.effective_state_dir(), PathBuf::from("/var/lib/preclear-ng"));
        assert_eq!(run.effective_work_dir(), PathBuf::from("/var/lib/preclear-ng/smart"));
        assert_eq!(run.effective_report_dir(), PathBuf::from("/var/log/preclear-ng"));
    }

    #[test]
    fn effective_dirs_honor_overrides() {
        let run = run_args(parse(&["--state-dir", "/tmp/state"]));
        assert_eq!(run.effective_state_dir(), PathBuf::from("/tmp/state"));
    }

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }
}
