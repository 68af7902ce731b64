//! Supervised external worker abstraction

mod dd_worker;
#[cfg(test)]
pub(crate) mod fake;
mod supervisor;

use std::time::Instant;

pub(crate) use dd_worker::{PatternWriteWorker, SurfaceReadWorker, ZeroWriteWorker};
pub(crate) use supervisor::{Supervisor, TemperatureSource};

/// Kind of worker, used for logging and certificate rendering
#[derive(Clone, Copy, Debug, strum::Display)]
pub(crate) enum WorkerKind {
    /// Full-surface read pass
    SurfaceRead,
    /// Full-device zero write pass
    ZeroWrite,
    /// Full-device destructive pattern write pass
    PatternWrite,
    /// Out-of-band health probe, modeled as a worker for a common spawn/wait path
    HealthProbe,
}

/// A progress observation from a running worker
#[derive(Clone, Copy, Debug)]
pub(crate) struct ProgressSample {
    /// Bytes processed so far
    pub bytes_done: u64,
    /// Instantaneous rate in bytes/second, if known
    pub rate_bytes_per_sec: Option<f64>,
    /// When this sample was observed
    pub observed_at: Instant,
}

/// How a supervised step ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The worker exited successfully and all expected bytes were processed
    Completed,
    /// Terminated by the governor: over-temperature
    AbortedThermalOverTemp,
    /// Terminated by the governor: sustained heat budget exceeded
    AbortedThermalSustained,
    /// Terminated after no progress for longer than the stall-kill window
    AbortedStall,
    /// The worker process exited with a non-zero status
    WorkerFailed(i32),
    /// An external cancellation request (e.g. SIGINT) interrupted the step
    Cancelled,
}

/// Capability shared by every concrete worker and by the in-process test fake
pub(crate) trait SupervisedWorker {
    /// Start the worker; returns immediately, the worker runs in the background
    fn spawn(&mut self) -> anyhow::Result<()>;

    /// Non-blocking poll for the latest progress sample, if any new one is available
    fn poll_progress(&mut self) -> anyhow::Result<Option<ProgressSample>>;

    /// Has the worker process exited? Returns its exit code once it has.
    fn try_wait(&mut self) -> anyhow::Result<Option<i32>>;

    /// Pause the worker (e.g. `SIGSTOP` to its process group)
    fn pause(&mut self) -> anyhow::Result<()>;

    /// Resume a paused worker (e.g. `SIGCONT`)
    fn resume(&mut self) -> anyhow::Result<()>;

    /// Ask the worker to terminate, then force-kill if it hasn't exited in time
    fn terminate(&mut self) -> anyhow::Result<()>;
}

/// RAII guard ensuring a paused worker is resumed before it is dropped
///
/// A worker left `SIGSTOP`'d when the supervisor exits would otherwise survive
/// as an orphaned stopped process.
pub(crate) struct WorkerHandle<W: SupervisedWorker> {
    /// The supervised worker
    worker: W,
    /// Mirrors the worker's paused state so drop knows whether a resume is needed
    paused: bool,
}

impl<W: SupervisedWorker> WorkerHandle<W> {
    /// Wrap a freshly spawned worker
    pub(crate) fn new(worker: W) -> Self {
        Self { worker, paused: false }
    }

    /// Borrow the wrapped worker
    pub(crate) fn inner_mut(&mut self) -> &mut W {
        &mut self.worker
    }

    /// Pause, tracking the new state for the drop guard
    pub(crate) fn pause(&mut self) -> anyhow::Result<()> {
        self.worker.pause()?;
        self.paused = true;
        Ok(())
    }

    /// Resume, tracking the new state for the drop guard
    pub(crate) fn resume(&mut self) -> anyhow::Result<()> {
        self.worker.resume()?;
        self.paused = false;
        Ok(())
    }

    /// Resume if paused, then terminate; safe to call more than once
    pub(crate) fn terminate(&mut self) -> anyhow::Result<()> {
        if self.paused {
            self.resume()?;
        }
        self.worker.terminate()
    }
}

impl<W: SupervisedWorker> Drop for WorkerHandle<W> {
    fn drop(&mut self) {
        if self.paused {
            let _ = self.worker.resume();
        }
    }
}
