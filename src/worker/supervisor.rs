//! Worker supervisor: the tick loop driving one step of the pipeline

use std::time::Duration;

use crate::thermal::{Directive, Governor, ThermalRecord};

use super::{Outcome, ProgressSample, SupervisedWorker, WorkerHandle};

/// How long without byte progress before a warning is logged
const HANG_WARN_S: u64 = 600;
/// How long without byte progress before the worker is killed
const HANG_KILL_S: u64 = 1200;

/// Anything that can report the current temperature on demand
pub(crate) trait TemperatureSource {
    /// Current temperature, or `None` if unavailable this tick
    fn current(&mut self) -> Option<crate::thermal::Temp>;
}

/// Drives one external (or fake) worker through to completion, applying thermal
/// directives and stall detection on a fixed tick interval
pub(crate) struct Supervisor {
    /// Interval between ticks; also used as the elapsed-time input to the governor
    tick_interval: Duration,
}

impl Supervisor {
    /// Build a supervisor with the given tick interval (default: 5s)
    pub(crate) fn new(tick_interval: Duration) -> Self {
        Self { tick_interval }
    }

    /// Run `worker` to completion under thermal and stall supervision
    #[expect(clippy::too_many_lines)]
    pub(crate) fn run<W: SupervisedWorker>(
        &self,
        worker: W,
        governor: &Governor,
        thermal: &mut ThermalRecord,
        temperature: &mut dyn TemperatureSource,
        cancel_requested: &dyn Fn() -> bool,
        on_tick: &dyn Fn(Option<&ProgressSample>, Option<crate::thermal::Temp>),
    ) -> anyhow::Result<Outcome> {
        let mut handle = WorkerHandle::new(worker);
        handle.inner_mut().spawn()?;

        let dt_secs = self.tick_interval.as_secs().max(1);
        let mut last_progress_bytes: Option<u64> = None;
        let mut stall_age_secs: u64 = 0;

        loop {
            if cancel_requested() {
                handle.terminate()?;
                return Ok(Outcome::Cancelled);
            }

            let sample: Option<ProgressSample> = handle.inner_mut().poll_progress()?;

            let temp_c = temperature.current();
            on_tick(sample.as_ref(), temp_c);
            let directive = governor.tick(thermal, temp_c, dt_secs);
            match directive {
                Directive::Pause => {
                    log::warn!("thermal governor requested pause");
                    handle.pause()?;
                }
                Directive::Resume => {
                    log::info!("thermal governor requested resume");
                    handle.resume()?;
                }
                Directive::AbortOverTemp => {
                    log::error!("aborting worker: over-temperature");
                    handle.terminate()?;
                    return Ok(Outcome::AbortedThermalOverTemp);
                }
                Directive::AbortSustained => {
                    log::error!("aborting worker: sustained heat budget exceeded");
                    handle.terminate()?;
                    return Ok(Outcome::AbortedThermalSustained);
                }
                Directive::Continue => {}
            }

            if !thermal.paused {
                if let Some(sample) = sample {
                    if Some(sample.bytes_done) == last_progress_bytes {
                        stall_age_secs += dt_secs;
                    } else {
                        last_progress_bytes = Some(sample.bytes_done);
                        stall_age_secs = 0;
                    }
                }
                if stall_age_secs >= HANG_KILL_S {
                    log::error!("worker stalled for {stall_age_secs}s, killing");
                    handle.terminate()?;
                    return Ok(Outcome::AbortedStall);
                } else if stall_age_secs >= HANG_WARN_S {
                    log::warn!("worker has made no progress for {stall_age_secs}s");
                }
            }

            if let Some(code) = handle.inner_mut().try_wait()? {
                return Ok(if code == 0 {
                    Outcome::Completed
                } else {
                    Outcome::WorkerFailed(code)
                });
            }

            std::thread::sleep(self.tick_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        thermal::Thresholds,
        worker::fake::ScriptedWorker,
    };

    /// Fixed-temperature source for tests
    struct FixedTemp(Vec<Option<crate::thermal::Temp>>, usize);

    impl TemperatureSource for FixedTemp {
        fn current(&mut self) -> Option<crate::thermal::Temp> {
            let idx = self.1.min(self.0.len().saturating_sub(1));
            let v = self.0.get(idx).copied().flatten();
            self.1 += 1;
            v
        }
    }

    fn no_cancel() -> bool {
        false
    }

    #[test]
    fn completes_successfully() {
        let supervisor = Supervisor::new(Duration::from_millis(0));
        let governor = Governor::new(Thresholds::new(45.0, 50.0, 55.0, 0), false);
        let mut thermal = ThermalRecord::default();
        let mut temps = FixedTemp(vec![Some(30.0); 10], 0);
        let worker = ScriptedWorker::new(vec![10, 20, 30], 0);
        let outcome = supervisor
            .run(worker, &governor, &mut thermal, &mut temps, &no_cancel, &|_, _| {})
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
    }

    #[test]
    fn worker_failure_is_classified() {
        let supervisor = Supervisor::new(Duration::from_millis(0));
        let governor = Governor::new(Thresholds::new(45.0, 50.0, 55.0, 0), false);
        let mut thermal = ThermalRecord::default();
        let mut temps = FixedTemp(vec![Some(30.0); 10], 0);
        let worker = ScriptedWorker::new(vec![10], 1);
        let outcome = supervisor
            .run(worker, &governor, &mut thermal, &mut temps, &no_cancel, &|_, _| {})
            .unwrap();
        assert_eq!(outcome, Outcome::WorkerFailed(1));
    }

    #[test]
    fn over_temperature_aborts_and_terminates_worker() {
        let supervisor = Supervisor::new(Duration::from_secs(5));
        let governor = Governor::new(Thresholds::new(45.0, 50.0, 55.0, 0), false);
        let mut thermal = ThermalRecord::default();
        let mut temps = FixedTemp(vec![Some(58.0); 10], 0);
        let worker = ScriptedWorker::new(vec![10, 20, 30, 40, 50], 0);
        let outcome = supervisor
            .run(worker, &governor, &mut thermal, &mut temps, &no_cancel, &|_, _| {})
            .unwrap();
        assert_eq!(outcome, Outcome::AbortedThermalOverTemp);
    }

    #[test]
    fn cancellation_terminates_worker() {
        let supervisor = Supervisor::new(Duration::from_millis(0));
        let governor = Governor::new(Thresholds::new(45.0, 50.0, 55.0, 0), false);
        let mut thermal = ThermalRecord::default();
        let mut temps = FixedTemp(vec![Some(30.0); 10], 0);
        let worker = ScriptedWorker::new(vec![10, 20, 30, 40, 50], 0);
        let outcome = supervisor
            .run(worker, &governor, &mut thermal, &mut temps, &|| true, &|_, _| {})
            .unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
    }
}
