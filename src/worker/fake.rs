//! In-process `SupervisedWorker` test double, driven by a scripted sample sequence
//!
//! The deterministic way to exercise the supervisor tick loop and thermal governor
//! interaction without a real subprocess.

use std::time::Instant;

use super::{ProgressSample, SupervisedWorker};

/// A scripted worker: each call to `poll_progress` advances to the next queued sample,
/// and `exit_code` is only observed by `try_wait` once the script is exhausted
/// (or immediately, if `exit_after_samples` is `0`).
pub(crate) struct ScriptedWorker {
    /// Remaining byte counts to report, in order
    samples: std::vec::IntoIter<u64>,
    /// Last sample handed out
    last_bytes: u64,
    /// Exit code to report once the script is exhausted
    exit_code: i32,
    /// Whether the worker has been told to spawn
    spawned: bool,
    /// Whether the worker is currently paused; `poll_progress` is inert while paused
    paused: bool,
    /// Number of times `pause` was called, for test assertions
    pub pause_count: u32,
    /// Number of times `terminate` was called, for test assertions
    pub terminate_count: u32,
}

impl ScriptedWorker {
    /// Build a worker that reports `samples` in order, then exits with `exit_code`
    pub(crate) fn new(samples: Vec<u64>, exit_code: i32) -> Self {
        Self {
            samples: samples.into_iter(),
            last_bytes: 0,
            exit_code,
            spawned: false,
            paused: false,
            pause_count: 0,
            terminate_count: 0,
        }
    }
}

impl SupervisedWorker for ScriptedWorker {
    fn spawn(&mut self) -> anyhow::Result<()> {
        self.spawned = true;
        Ok(())
    }

    fn poll_progress(&mut self) -> anyhow::Result<Option<ProgressSample>> {
        if self.paused {
            return Ok(None);
        }
        if let Some(bytes) = self.samples.next() {
            self.last_bytes = bytes;
        }
        Ok(Some(ProgressSample {
            bytes_done: self.last_bytes,
            rate_bytes_per_sec: None,
            observed_at: Instant::now(),
        }))
    }

    fn try_wait(&mut self) -> anyhow::Result<Option<i32>> {
        if self.samples.len() == 0 {
            Ok(Some(self.exit_code))
        } else {
            Ok(None)
        }
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        self.paused = true;
        self.pause_count += 1;
        Ok(())
    }

    fn resume(&mut self) -> anyhow::Result<()> {
        self.paused = false;
        Ok(())
    }

    fn terminate(&mut self) -> anyhow::Result<()> {
        self.terminate_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_samples_then_exit_code() {
        let mut worker = ScriptedWorker::new(vec![10, 20, 30], 0);
        worker.spawn().unwrap();
        assert_eq!(worker.poll_progress().unwrap().unwrap().bytes_done, 10);
        assert_eq!(worker.poll_progress().unwrap().unwrap().bytes_done, 20);
        assert_eq!(worker.poll_progress().unwrap().unwrap().bytes_done, 30);
        assert_eq!(worker.try_wait().unwrap(), Some(0));
    }

    #[test]
    fn paused_worker_reports_no_new_progress() {
        let mut worker = ScriptedWorker::new(vec![10, 20], 0);
        worker.spawn().unwrap();
        worker.poll_progress().unwrap();
        worker.pause().unwrap();
        assert!(worker.poll_progress().unwrap().is_none());
        assert_eq!(worker.pause_count, 1);
    }
}
