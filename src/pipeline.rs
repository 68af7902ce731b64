//! Pipeline executor: the top-level `(cycle, step)` state machine

use std::path::PathBuf;

use anyhow::Context as _;

use crate::{
    certificate,
    checkpoint::{self, CheckpointRecord},
    cl::RunArgs,
    device::DeviceDescriptor,
    health::{self, Sampler},
    hud,
    thermal::{Governor, ThermalRecord, Thresholds},
    worker::{Outcome, PatternWriteWorker, ProgressSample, SurfaceReadWorker, Supervisor, ZeroWriteWorker},
};

/// Step identifiers, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub(crate) enum Step {
    /// Full-surface read pass
    PreRead = 1,
    /// Destructive pattern write passes
    Destructive = 2,
    /// Optional device-internal long self-test request
    LongSelfTest = 3,
    /// Full-device zero write
    ZeroFill = 4,
    /// Full-surface verify read
    VerifyRead = 5,
    /// Final health snapshot, certificate, checkpoint cleanup
    Finalize = 6,
}

impl Step {
    /// All steps in order
    const ALL: [Self; 6] = [
        Self::PreRead,
        Self::Destructive,
        Self::LongSelfTest,
        Self::ZeroFill,
        Self::VerifyRead,
        Self::Finalize,
    ];

    /// Build from the persisted numeric id
    fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| *s as u8 == v)
    }
}

/// Result of running the whole pipeline
#[derive(Debug)]
pub(crate) enum PipelineResult {
    /// Every requested cycle completed
    Success {
        /// Path to the emitted certificate
        certificate_path: PathBuf,
    },
    /// Thermal abort; exit code 75 per the CLI contract
    ThermalAbort {
        /// Step that was running when the abort occurred
        step: Step,
        /// Path to the abort certificate
        certificate_path: PathBuf,
    },
    /// A worker failed, or stalled, or the run was cancelled
    Failed {
        /// Step that was running when the run ended
        step: Step,
        /// Path to the failure certificate
        certificate_path: PathBuf,
    },
    /// Cancelled by an external signal; checkpoint preserved, no certificate
    Cancelled {
        /// Step that was running when cancellation was observed
        step: Step,
    },
}

/// Top-level executor
pub(crate) struct Pipeline<'a> {
    /// Resolved device
    device: &'a DeviceDescriptor,
    /// Run configuration
    args: &'a RunArgs,
    /// Thermal governor
    governor: Governor,
    /// Configured thermal thresholds, kept for certificate rendering
    thresholds: Thresholds,
    /// Health sampler
    sampler: Sampler,
    /// Accumulated thermal counters
    thermal: ThermalRecord,
    /// External cancellation flag
    cancel_requested: &'a dyn Fn() -> bool,
}

impl<'a> Pipeline<'a> {
    /// Build a pipeline executor for `device` driven by `args`
    pub(crate) fn new(
        device: &'a DeviceDescriptor,
        args: &'a RunArgs,
        thresholds: Thresholds,
        cancel_requested: &'a dyn Fn() -> bool,
    ) -> anyhow::Result<Self> {
        thresholds.validate().context("invalid thermal thresholds")?;
        Ok(Self {
            device,
            args,
            governor: Governor::new(thresholds, args.temp_disable),
            thresholds,
            sampler: Sampler::new(&device.path, args.smart_type.clone()),
            thermal: ThermalRecord::default(),
            cancel_requested,
        })
    }

    /// Run the whole pipeline: resume point, every cycle's steps, finalize
    pub(crate) fn run(&mut self, state_dir: &std::path::Path, work_dir: &std::path::Path, report_dir: &std::path::Path) -> anyhow::Result<PipelineResult> {
        let serial = self.device.serial_or_name();
        let checkpoint_path = checkpoint::checkpoint_path(state_dir, &serial);

        let (mut cycle, mut step) = if self.args.resume {
            checkpoint::read(&checkpoint_path)
                .and_then(|c| Step::from_u8(c.step).map(|s| (c.cycle, s)))
                .unwrap_or((1, Step::PreRead))
        } else {
            (1, Step::PreRead)
        };

        let initial_snapshot = self.sampler.capture();
        let initial_snapshot_path = health::persist_snapshot(work_dir, &serial, "initial", &initial_snapshot)?;

        'cycles: while cycle <= self.args.cycles {
            for candidate in Step::ALL {
                if candidate < step {
                    continue;
                }
                step = candidate;

                if self.skip_step(step) {
                    continue;
                }

                self.thermal.reset_step();
                self.persist_checkpoint(&checkpoint_path, cycle, step)?;
                log::info!("cycle {cycle}/{cycles}: starting step {step}", cycles = self.args.cycles);

                let outcome = self.run_step(step, cycle)?;
                if hud::enabled() {
                    hud::clear_line();
                }
                match outcome {
                    Outcome::Completed => {}
                    Outcome::AbortedThermalOverTemp | Outcome::AbortedThermalSustained => {
                        self.persist_checkpoint(&checkpoint_path, cycle, step)?;
                        let current_snapshot = self.sampler.capture();
                        let current_snapshot_path = health::persist_snapshot(work_dir, &serial, "last", &current_snapshot)?;
                        let path = certificate::write_abort(
                            report_dir,
                            self.device,
                            &self.thermal,
                            &self.thresholds,
                            &initial_snapshot,
                            &current_snapshot,
                            (&initial_snapshot_path, &current_snapshot_path),
                            step,
                            &serial,
                        )?;
                        return Ok(PipelineResult::ThermalAbort { step, certificate_path: path });
                    }
                    Outcome::AbortedStall | Outcome::WorkerFailed(_) => {
                        let path = certificate::write_failure(report_dir, self.device, &self.thermal, &self.thresholds, step, &serial)?;
                        return Ok(PipelineResult::Failed { step, certificate_path: path });
                    }
                    Outcome::Cancelled => {
                        self.persist_checkpoint(&checkpoint_path, cycle, step)?;
                        return Ok(PipelineResult::Cancelled { step });
                    }
                }
            }
            step = Step::PreRead;
            cycle += 1;
            if cycle > self.args.cycles {
                break 'cycles;
            }
        }

        let final_snapshot = self.sampler.capture();
        let final_snapshot_path = health::persist_snapshot(work_dir, &serial, "last", &final_snapshot)?;
        let path = certificate::write_success(
            report_dir,
            self.device,
            &self.thermal,
            &self.thresholds,
            &initial_snapshot,
            &final_snapshot,
            (&initial_snapshot_path, &final_snapshot_path),
            &serial,
        )?;
        checkpoint::delete(&checkpoint_path)?;
        Ok(PipelineResult::Success { certificate_path: path })
    }

    /// Does the configured skip set exclude `step`?
    fn skip_step(&self, step: Step) -> bool {
        match step {
            Step::PreRead => self.args.skip_preread,
            Step::Destructive => self.args.skip_badblocks,
            Step::LongSelfTest => !self.args.smart_long,
            Step::ZeroFill => self.args.skip_zero,
            Step::VerifyRead => self.args.skip_postread,
            Step::Finalize => false,
        }
    }

    /// Write the checkpoint for the given cycle/step, translating current thermal state
    fn persist_checkpoint(&self, path: &std::path::Path, cycle: u32, step: Step) -> anyhow::Result<()> {
        #[expect(clippy::cast_possible_truncation)]
        let to_millic = |t: Option<f64>| t.map(|v| (v * 1000.0) as i64);
        let record = CheckpointRecord {
            step: step as u8,
            cycle,
            paused_seconds_total: self.thermal.paused_seconds_total,
            above_pause_seconds_total: self.thermal.above_pause_seconds_total,
            temp_min_millic: to_millic(self.thermal.run_min_c),
            temp_max_millic: to_millic(self.thermal.run_max_c),
        };
        checkpoint::write(path, &record)
    }

    /// Run one step, retrying once without direct I/O for read/write steps on failure
    fn run_step(&mut self, step: Step, cycle: u32) -> anyhow::Result<Outcome> {
        let expected_bytes = self.device.size_bytes;
        let block_size = self.args.block_size.unwrap_or(self.device.logical_sector_bytes).max(self.device.logical_sector_bytes);
        let supervisor = Supervisor::new(*self.args.temp_interval);
        let cycles = self.args.cycles;
        let on_tick = progress_renderer(step, cycle, cycles, expected_bytes);

        match step {
            Step::PreRead | Step::VerifyRead => {
                let worker = SurfaceReadWorker::new(&self.device.path, block_size, true);
                let outcome = supervisor.run(worker, &self.governor, &mut self.thermal, &mut self.sampler, self.cancel_requested, &on_tick)?;
                if let Outcome::WorkerFailed(_) = outcome {
                    log::warn!("surface read failed with direct I/O, retrying without it");
                    let worker = SurfaceReadWorker::new(&self.device.path, block_size, false);
                    return supervisor.run(worker, &self.governor, &mut self.thermal, &mut self.sampler, self.cancel_requested, &on_tick);
                }
                Ok(outcome)
            }
            Step::ZeroFill => {
                let worker = ZeroWriteWorker::new(&self.device.path, block_size, true);
                let outcome = supervisor.run(worker, &self.governor, &mut self.thermal, &mut self.sampler, self.cancel_requested, &on_tick)?;
                if let Outcome::WorkerFailed(_) = outcome {
                    log::warn!("zero write failed with direct I/O, retrying without it");
                    let worker = ZeroWriteWorker::new(&self.device.path, block_size, false);
                    return supervisor.run(worker, &self.governor, &mut self.thermal, &mut self.sampler, self.cancel_requested, &on_tick);
                }
                Ok(outcome)
            }
            Step::Destructive => {
                for pattern_byte in &self.args.badblocks_patterns {
                    self.thermal.reset_pattern();
                    let worker = PatternWriteWorker::new(&self.device.path, block_size, *pattern_byte, expected_bytes);
                    let outcome = supervisor.run(worker, &self.governor, &mut self.thermal, &mut self.sampler, self.cancel_requested, &on_tick)?;
                    if outcome != Outcome::Completed {
                        return Ok(outcome);
                    }
                }
                Ok(Outcome::Completed)
            }
            Step::LongSelfTest => {
                crate::health::request_long_self_test(&self.device.path, self.args.smart_type.as_deref())?;
                Ok(Outcome::Completed)
            }
            Step::Finalize => Ok(Outcome::Completed),
        }
    }
}

/// Build the per-tick HUD callback for one step; a no-op when stdout isn't a TTY,
/// leaving the `log::info!` step-boundary lines as the only progress output
fn progress_renderer(step: Step, cycle: u32, cycles: u32, expected_bytes: u64) -> impl Fn(Option<&ProgressSample>, Option<crate::thermal::Temp>) {
    move |sample, temp_c| {
        if !hud::enabled() {
            return;
        }
        let percent = sample.map_or(0, |s| {
            if expected_bytes == 0 {
                0
            } else {
                u8::try_from((u128::from(s.bytes_done) * 100 / u128::from(expected_bytes)).min(100)).unwrap_or(100)
            }
        });
        hud::render(step, cycle, cycles, percent, sample.map(|s| s.rate_bytes_per_sec), temp_c);
    }
}
