//! Thermal governor: turns a temperature reading into a pause/resume/abort directive

use crate::error::ConfigError;

/// Temperature in degrees Celsius
pub(crate) type Temp = f64;

/// Configured thermal thresholds for a run
#[derive(Clone, Copy, Debug)]
pub(crate) struct Thresholds {
    /// Below this, a paused worker is resumed
    pub resume_c: Temp,
    /// At or above this, the worker is paused
    pub pause_c: Temp,
    /// At or above this, the step aborts immediately
    pub abort_c: Temp,
    /// Minutes spent at or above `pause_c` before a sustained-heat abort; 0 disables
    pub sustained_fail_minutes: u32,
}

impl Thresholds {
    /// Build thresholds, skipping the ordering check (callers must validate separately)
    pub(crate) fn new(resume_c: Temp, pause_c: Temp, abort_c: Temp, sustained_fail_minutes: u32) -> Self {
        Self {
            resume_c,
            pause_c,
            abort_c,
            sustained_fail_minutes,
        }
    }

    /// Validate `resume_c < pause_c < abort_c`
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.resume_c < self.pause_c && self.pause_c < self.abort_c {
            Ok(())
        } else {
            Err(ConfigError::ThresholdOrder {
                resume: self.resume_c,
                pause: self.pause_c,
                abort: self.abort_c,
            })
        }
    }
}

/// Accumulated thermal counters for a run, and the current step's view of them
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ThermalRecord {
    /// Lowest temperature observed this run
    pub run_min_c: Option<Temp>,
    /// Highest temperature observed this run
    pub run_max_c: Option<Temp>,
    /// Lowest temperature observed this step
    pub step_min_c: Option<Temp>,
    /// Highest temperature observed this step
    pub step_max_c: Option<Temp>,
    /// Cumulative seconds spent paused, run-scoped, never reset
    pub paused_seconds_total: u64,
    /// Cumulative seconds spent at or above `pause_c`, run-scoped, never reset
    pub above_pause_seconds_total: u64,
    /// Is the worker currently paused by the governor?
    pub paused: bool,
}

impl ThermalRecord {
    /// Reset the step-scoped min/max at a step boundary; run-scoped fields are untouched
    pub(crate) fn reset_step(&mut self) {
        self.step_min_c = None;
        self.step_max_c = None;
    }

    /// Reset the instantaneous paused flag at a pattern boundary inside step 2;
    /// cumulative counters are untouched
    pub(crate) fn reset_pattern(&mut self) {
        self.paused = false;
    }
}

/// Directive issued by the governor on each tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Directive {
    /// No action required
    Continue,
    /// Pause the worker
    Pause,
    /// Resume a paused worker
    Resume,
    /// Abort: temperature reached the abort threshold
    AbortOverTemp,
    /// Abort: sustained time above the pause threshold exceeded the budget
    AbortSustained,
}

/// Thermal governor, driven one tick at a time
pub(crate) struct Governor {
    /// Configured thresholds
    thresholds: Thresholds,
    /// Disables all control action when set, per `--temp-disable`
    disabled: bool,
}

impl Governor {
    /// Build a governor from validated thresholds
    pub(crate) fn new(thresholds: Thresholds, disabled: bool) -> Self {
        Self { thresholds, disabled }
    }

    /// Evaluate one tick; `dt_secs` is the elapsed time since the previous tick
    pub(crate) fn tick(
        &self,
        record: &mut ThermalRecord,
        temp_c: Option<Temp>,
        dt_secs: u64,
    ) -> Directive {
        if self.disabled {
            return Directive::Continue;
        }

        let Some(temp_c) = temp_c else {
            return Directive::Continue;
        };

        record.run_min_c = Some(record.run_min_c.map_or(temp_c, |m| m.min(temp_c)));
        record.run_max_c = Some(record.run_max_c.map_or(temp_c, |m| m.max(temp_c)));
        record.step_min_c = Some(record.step_min_c.map_or(temp_c, |m| m.min(temp_c)));
        record.step_max_c = Some(record.step_max_c.map_or(temp_c, |m| m.max(temp_c)));

        if temp_c >= self.thresholds.abort_c {
            return Directive::AbortOverTemp;
        }

        let mut directive = Directive::Continue;
        if temp_c >= self.thresholds.pause_c {
            record.above_pause_seconds_total += dt_secs;
            if !record.paused {
                record.paused = true;
                directive = Directive::Pause;
            }
        }

        if record.paused && temp_c <= self.thresholds.resume_c {
            record.paused = false;
            directive = Directive::Resume;
        }

        if record.paused {
            record.paused_seconds_total += dt_secs;
        }

        if directive == Directive::Continue
            && self.thresholds.sustained_fail_minutes > 0
            && record.above_pause_seconds_total >= u64::from(self.thresholds.sustained_fail_minutes) * 60
        {
            return Directive::AbortSustained;
        }

        directive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> Governor {
        Governor::new(Thresholds::new(45.0, 50.0, 55.0, 10), false)
    }

    #[test]
    fn threshold_order_validated() {
        assert!(Thresholds::new(45.0, 50.0, 55.0, 0).validate().is_ok());
        assert!(Thresholds::new(50.0, 45.0, 55.0, 0).validate().is_err());
        assert!(Thresholds::new(40.0, 55.0, 50.0, 0).validate().is_err());
    }

    #[test]
    fn unknown_temperature_does_not_advance_counters() {
        let gov = governor();
        let mut record = ThermalRecord::default();
        assert_eq!(gov.tick(&mut record, None, 5), Directive::Continue);
        assert_eq!(record.run_max_c, None);
        assert_eq!(record.above_pause_seconds_total, 0);
    }

    #[test]
    fn pause_then_resume_sequence() {
        let gov = governor();
        let mut record = ThermalRecord::default();
        let temps = [40.0, 48.0, 52.0, 52.0, 46.0, 44.0, 40.0];
        let mut directives = Vec::new();
        for temp in temps {
            directives.push(gov.tick(&mut record, Some(temp), 5));
        }
        assert_eq!(directives[2], Directive::Pause);
        assert_eq!(directives[5], Directive::Resume);
        assert!(!record.paused);
        assert_eq!(record.paused_seconds_total, 15);
    }

    #[test]
    fn over_temp_aborts_immediately() {
        let gov = governor();
        let mut record = ThermalRecord::default();
        assert_eq!(gov.tick(&mut record, Some(58.0), 5), Directive::AbortOverTemp);
    }

    #[test]
    fn sustained_heat_aborts_after_budget() {
        let gov = Governor::new(Thresholds::new(45.0, 50.0, 55.0, 10), false);
        let mut record = ThermalRecord::default();
        let mut last = Directive::Continue;
        for _ in 0..132 {
            last = gov.tick(&mut record, Some(51.0), 5);
            if last == Directive::AbortSustained {
                break;
            }
        }
        assert_eq!(last, Directive::AbortSustained);
    }

    #[test]
    fn disabled_governor_never_acts() {
        let gov = Governor::new(Thresholds::new(45.0, 50.0, 55.0, 1), true);
        let mut record = ThermalRecord::default();
        assert_eq!(gov.tick(&mut record, Some(99.0), 5), Directive::Continue);
        assert_eq!(record.run_max_c, None);
    }

    #[test]
    fn step_reset_keeps_run_bounds() {
        let gov = governor();
        let mut record = ThermalRecord::default();
        gov.tick(&mut record, Some(42.0), 5);
        record.reset_step();
        assert_eq!(record.step_min_c, None);
        assert_eq!(record.run_max_c, Some(42.0));
    }

    #[test]
    fn pattern_reset_clears_flag_not_counters() {
        let mut record = ThermalRecord {
            paused: true,
            paused_seconds_total: 30,
            ..ThermalRecord::default()
        };
        record.reset_pattern();
        assert!(!record.paused);
        assert_eq!(record.paused_seconds_total, 30);
    }
}
