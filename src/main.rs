//! Supervised destructive pre-clear and conditioning pipeline for block devices

#![cfg_attr(feature = "generate-extras", expect(dead_code, unused_crate_dependencies, unused_imports))]

use std::{
    io::{self, Write as _},
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context as _;
use clap::Parser as _;
use itertools::Itertools as _;

mod certificate;
mod checkpoint;
mod cl;
mod device;
mod error;
#[cfg(feature = "generate-extras")]
mod extras;
mod health;
mod hud;
mod list;
mod pipeline;
#[cfg(test)]
mod tests;
mod thermal;
mod worker;

use pipeline::{Pipeline, PipelineResult};

/// Exit code used for thermal aborts, distinct from other failures
const EXIT_THERMAL: u8 = 75;

#[cfg(feature = "generate-extras")]
fn main() -> anyhow::Result<()> {
    let mut args = std::env::args_os().skip(1);
    let man_dir: std::path::PathBuf = args.next().ok_or_else(|| anyhow::anyhow!("Missing man page output dir argument"))?.into();
    let completions_dir: std::path::PathBuf = args.next().ok_or_else(|| anyhow::anyhow!("Missing shell completions output dir argument"))?.into();
    extras::generate_man_pages(&man_dir)?;
    extras::generate_shell_completions(None, Some(&completions_dir))?;
    Ok(())
}

/// Print one line per candidate disk for the `list` subcommand
fn print_candidates() -> anyhow::Result<()> {
    let candidates = list::candidates().context("failed to enumerate candidate disks")?;
    for candidate in candidates {
        let size = candidate.size_bytes.map_or_else(|| "unknown".to_owned(), |s| format!("{s} bytes"));
        println!("{}\t{}\t{}", candidate.path.display(), candidate.model, size);
    }
    Ok(())
}

/// Ask the operator to confirm a destructive run by typing `YES` exactly
fn confirm(device: &std::path::Path) -> anyhow::Result<bool> {
    print!("This will DESTROY ALL DATA on {}. Type YES to proceed: ", device.display());
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim() == "YES")
}

/// Run the pre-clear pipeline for the `run` subcommand
fn run(args: &cl::RunArgs) -> anyhow::Result<ExitCode> {
    args.validate().context("invalid run configuration")?;
    let device = device::identify(&args.device).context("failed to probe device")?;

    if !args.no_prompt && !confirm(&device.path)? {
        eprintln!("aborted: confirmation not given");
        return Ok(ExitCode::FAILURE);
    }

    let default_thresholds = device::default_thermal(&device);
    let thresholds = args.resolve_thresholds(default_thresholds).context("invalid thermal thresholds")?;
    log::info!("destructive pattern list: {}", args.badblocks_patterns.iter().map(|b| format!("{b:02x}")).join(", "));

    let exit_requested = Arc::new(AtomicBool::new(false));
    {
        let exit_requested = Arc::clone(&exit_requested);
        ctrlc::set_handler(move || exit_requested.store(true, Ordering::SeqCst)).context("failed to install SIGINT handler")?;
    }
    let cancel_requested = || exit_requested.load(Ordering::SeqCst);

    let mut pipeline = Pipeline::new(&device, args, thresholds, &cancel_requested)?;
    let result = pipeline.run(&args.effective_state_dir(), &args.effective_work_dir(), &args.effective_report_dir())?;

    match result {
        PipelineResult::Success { certificate_path } => {
            log::info!("pre-clear completed successfully, certificate at {}", certificate_path.display());
            Ok(ExitCode::SUCCESS)
        }
        PipelineResult::ThermalAbort { step, certificate_path } => {
            eprintln!("aborted at step {step} (thermal), certificate at {}", certificate_path.display());
            Ok(ExitCode::from(EXIT_THERMAL))
        }
        PipelineResult::Failed { step, certificate_path } => {
            eprintln!("failed at step {step}, certificate at {}", certificate_path.display());
            Ok(ExitCode::FAILURE)
        }
        PipelineResult::Cancelled { step } => {
            eprintln!("cancelled at step {step}, checkpoint preserved for --resume");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(not(feature = "generate-extras"))]
fn main() -> anyhow::Result<ExitCode> {
    let args = cl::Args::parse();
    simple_logger::init_with_level(args.verbosity).context("failed to init logger")?;

    match args.command {
        cl::Command::List => {
            print_candidates()?;
            Ok(ExitCode::SUCCESS)
        }
        cl::Command::Run(run_args) => run(&run_args),
    }
}
