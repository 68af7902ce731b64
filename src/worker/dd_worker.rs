//! Concrete `dd`-based surface read, zero write, and pattern write workers

use std::{
    io::{BufRead as _, BufReader, Write as _},
    os::unix::process::CommandExt as _,
    path::PathBuf,
    process::{Child, ChildStdin, Command, Stdio},
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Instant,
};

use nix::{
    sys::signal::{Signal, killpg},
    unistd::Pid,
};

use super::{ProgressSample, SupervisedWorker};

/// Put the spawned child in its own process group so pause/resume/terminate signals
/// reach every process it may itself fork (e.g. `dd`'s helper processes)
fn in_own_process_group(cmd: &mut Command) {
    // SAFETY: `setsid` is async-signal-safe and is the only call made before exec.
    unsafe {
        cmd.pre_exec(|| nix::unistd::setsid().map(|_| ()).map_err(std::io::Error::from));
    }
}

/// Send `signal` to the whole process group of `child`
fn signal_group(child: &Child, signal: Signal) -> anyhow::Result<()> {
    let pid = Pid::from_raw(i32::try_from(child.id())?);
    match killpg(pid, signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Scale factor for one of `dd`'s rate unit suffixes, bytes/second per unit
fn rate_unit_scale(unit: &str) -> Option<f64> {
    match unit {
        "B/s" => Some(1.0),
        "kB/s" => Some(1e3),
        "MB/s" => Some(1e6),
        "GB/s" => Some(1e9),
        "TB/s" => Some(1e12),
        "KiB/s" => Some(1024.0),
        "MiB/s" => Some(1024.0 * 1024.0),
        "GiB/s" => Some(1024.0 * 1024.0 * 1024.0),
        "TiB/s" => Some(1024.0 * 1024.0 * 1024.0 * 1024.0),
        _ => None,
    }
}

/// Parse `dd`'s trailing `<value> <unit>` rate field (e.g. `100 MB/s`) into bytes/second
fn parse_dd_rate(rate_field: &str) -> Option<f64> {
    let mut parts = rate_field.split_ascii_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    Some(value * rate_unit_scale(unit)?)
}

/// Parse a `dd ... status=progress` line: `<bytes> bytes ... copied, <s> s, <value> <unit>`
fn parse_dd_progress(line: &str) -> Option<(u64, Option<f64>)> {
    let bytes_str = line.split_ascii_whitespace().next()?;
    let bytes = bytes_str.parse().ok()?;
    let rate = line.rsplit(", ").next().and_then(parse_dd_rate);
    Some((bytes, rate))
}

/// Spawn a background thread tailing `dd`'s stderr progress lines into `progress`
fn spawn_progress_reader(
    stderr: std::process::ChildStderr,
    progress: Arc<Mutex<Option<ProgressSample>>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stderr);
        for line in reader.lines().map_while(Result::ok) {
            if let Some((bytes_done, rate_bytes_per_sec)) = parse_dd_progress(&line) {
                if let Ok(mut guard) = progress.lock() {
                    *guard = Some(ProgressSample {
                        bytes_done,
                        rate_bytes_per_sec,
                        observed_at: Instant::now(),
                    });
                }
            }
        }
    })
}

/// Shared plumbing for the two `dd`-backed workers (surface read, zero write)
struct DdWorker {
    /// Fully built command, consumed on spawn
    command: Option<Command>,
    /// Running child process
    child: Option<Child>,
    /// Latest progress sample, updated by the background reader thread
    progress: Arc<Mutex<Option<ProgressSample>>>,
    /// Background stderr-tailing thread
    reader: Option<JoinHandle<()>>,
}

impl DdWorker {
    /// Build from a ready-to-spawn `dd` command
    fn new(mut command: Command) -> Self {
        command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());
        in_own_process_group(&mut command);
        Self {
            command: Some(command),
            child: None,
            progress: Arc::new(Mutex::new(None)),
            reader: None,
        }
    }
}

impl SupervisedWorker for DdWorker {
    fn spawn(&mut self) -> anyhow::Result<()> {
        let mut command = self
            .command
            .take()
            .ok_or_else(|| anyhow::anyhow!("worker already spawned"))?;
        let mut child = command.spawn()?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("missing stderr pipe"))?;
        self.reader = Some(spawn_progress_reader(stderr, Arc::clone(&self.progress)));
        self.child = Some(child);
        Ok(())
    }

    fn poll_progress(&mut self) -> anyhow::Result<Option<ProgressSample>> {
        Ok(self.progress.lock().ok().and_then(|g| *g))
    }

    fn try_wait(&mut self) -> anyhow::Result<Option<i32>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        Ok(child.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        let child = self.child.as_ref().ok_or_else(|| anyhow::anyhow!("worker not spawned"))?;
        signal_group(child, Signal::SIGSTOP)
    }

    fn resume(&mut self) -> anyhow::Result<()> {
        let child = self.child.as_ref().ok_or_else(|| anyhow::anyhow!("worker not spawned"))?;
        signal_group(child, Signal::SIGCONT)
    }

    fn terminate(&mut self) -> anyhow::Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        signal_group(child, Signal::SIGTERM)?;
        let deadline = Instant::now() + std::time::Duration::from_secs(2);
        while Instant::now() < deadline {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            thread::sleep(std::time::Duration::from_millis(50));
        }
        signal_group(child, Signal::SIGKILL)?;
        child.wait()?;
        Ok(())
    }
}

/// Full-device surface read, used for step 1 (pre-read) and step 5 (verify-read)
pub(crate) struct SurfaceReadWorker(DdWorker);

impl SurfaceReadWorker {
    /// Build a surface read of `device` with the given block size
    ///
    /// `direct` selects `O_DIRECT`; callers retry once with `direct = false` on failure.
    pub(crate) fn new(device: &std::path::Path, block_size: u64, direct: bool) -> Self {
        let mut cmd = Command::new("dd");
        cmd.arg(format!("if={}", device.display()))
            .arg("of=/dev/null")
            .arg(format!("bs={block_size}"))
            .arg("status=progress");
        if direct {
            cmd.arg("iflag=direct");
        }
        Self(DdWorker::new(cmd))
    }
}

impl SupervisedWorker for SurfaceReadWorker {
    fn spawn(&mut self) -> anyhow::Result<()> {
        self.0.spawn()
    }
    fn poll_progress(&mut self) -> anyhow::Result<Option<ProgressSample>> {
        self.0.poll_progress()
    }
    fn try_wait(&mut self) -> anyhow::Result<Option<i32>> {
        self.0.try_wait()
    }
    fn pause(&mut self) -> anyhow::Result<()> {
        self.0.pause()
    }
    fn resume(&mut self) -> anyhow::Result<()> {
        self.0.resume()
    }
    fn terminate(&mut self) -> anyhow::Result<()> {
        self.0.terminate()
    }
}

/// Full-device zero write, used for step 4
pub(crate) struct ZeroWriteWorker(DdWorker);

impl ZeroWriteWorker {
    /// Build a zero write of `device` with the given block size
    ///
    /// `direct` selects `oflag=direct,sync`; the retry path uses `oflag=sync` only.
    pub(crate) fn new(device: &std::path::Path, block_size: u64, direct: bool) -> Self {
        let mut cmd = Command::new("dd");
        cmd.arg("if=/dev/zero")
            .arg(format!("of={}", device.display()))
            .arg(format!("bs={block_size}"))
            .arg(if direct { "oflag=direct,sync" } else { "oflag=sync" })
            .arg("status=progress");
        Self(DdWorker::new(cmd))
    }
}

impl SupervisedWorker for ZeroWriteWorker {
    fn spawn(&mut self) -> anyhow::Result<()> {
        self.0.spawn()
    }
    fn poll_progress(&mut self) -> anyhow::Result<Option<ProgressSample>> {
        self.0.poll_progress()
    }
    fn try_wait(&mut self) -> anyhow::Result<Option<i32>> {
        self.0.try_wait()
    }
    fn pause(&mut self) -> anyhow::Result<()> {
        self.0.pause()
    }
    fn resume(&mut self) -> anyhow::Result<()> {
        self.0.resume()
    }
    fn terminate(&mut self) -> anyhow::Result<()> {
        self.0.terminate()
    }
}

/// Full-device destructive pattern write
///
/// `dd` has no percent-complete mode, so progress here is synthesized by the supervisor
/// from bytes pushed through the child's stdin pipe, rather than scraped from worker text.
pub(crate) struct PatternWriteWorker {
    /// Fully built command, consumed on spawn
    command: Option<Command>,
    /// Running child process
    child: Option<Child>,
    /// Child's stdin, fed by this process's writer thread
    stdin: Option<ChildStdin>,
    /// Repeating pattern buffer written to the child
    pattern_buf: Vec<u8>,
    /// Expected total bytes for this pass
    expected_bytes: u64,
    /// Bytes written so far, shared with the writer thread
    bytes_written: Arc<Mutex<u64>>,
    /// Background writer thread
    writer: Option<JoinHandle<anyhow::Result<()>>>,
}

impl PatternWriteWorker {
    /// Build a pattern write of `device` with the given block size and fill byte
    pub(crate) fn new(device: &std::path::Path, block_size: u64, pattern_byte: u8, expected_bytes: u64) -> Self {
        let mut cmd = Command::new("dd");
        cmd.arg(format!("of={}", device.display()))
            .arg(format!("bs={block_size}"))
            .arg("oflag=direct")
            .arg("conv=notrunc")
            .arg("status=none")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        in_own_process_group(&mut cmd);
        #[expect(clippy::cast_possible_truncation)]
        let buf_len = block_size.min(1 << 20) as usize;
        Self {
            command: Some(cmd),
            child: None,
            stdin: None,
            pattern_buf: vec![pattern_byte; buf_len.max(1)],
            expected_bytes,
            bytes_written: Arc::new(Mutex::new(0)),
            writer: None,
        }
    }
}

impl SupervisedWorker for PatternWriteWorker {
    fn spawn(&mut self) -> anyhow::Result<()> {
        let mut command = self
            .command
            .take()
            .ok_or_else(|| anyhow::anyhow!("worker already spawned"))?;
        let mut child = command.spawn()?;
        let mut stdin = child.stdin.take().ok_or_else(|| anyhow::anyhow!("missing stdin pipe"))?;
        let pattern = self.pattern_buf.clone();
        let expected = self.expected_bytes;
        let bytes_written = Arc::clone(&self.bytes_written);
        self.writer = Some(thread::spawn(move || -> anyhow::Result<()> {
            let mut written = 0u64;
            while written < expected {
                let remaining = expected - written;
                #[expect(clippy::cast_possible_truncation)]
                let chunk_len = remaining.min(pattern.len() as u64) as usize;
                if stdin.write_all(&pattern[..chunk_len]).is_err() {
                    break;
                }
                written += chunk_len as u64;
                if let Ok(mut guard) = bytes_written.lock() {
                    *guard = written;
                }
            }
            Ok(())
        }));
        self.child = Some(child);
        Ok(())
    }

    fn poll_progress(&mut self) -> anyhow::Result<Option<ProgressSample>> {
        let bytes_done = self.bytes_written.lock().ok().map(|g| *g).unwrap_or(0);
        Ok(Some(ProgressSample {
            bytes_done,
            rate_bytes_per_sec: None,
            observed_at: Instant::now(),
        }))
    }

    fn try_wait(&mut self) -> anyhow::Result<Option<i32>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        Ok(child.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        let child = self.child.as_ref().ok_or_else(|| anyhow::anyhow!("worker not spawned"))?;
        signal_group(child, Signal::SIGSTOP)
    }

    fn resume(&mut self) -> anyhow::Result<()> {
        let child = self.child.as_ref().ok_or_else(|| anyhow::anyhow!("worker not spawned"))?;
        signal_group(child, Signal::SIGCONT)
    }

    fn terminate(&mut self) -> anyhow::Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        signal_group(child, Signal::SIGTERM)?;
        let deadline = Instant::now() + std::time::Duration::from_secs(2);
        while Instant::now() < deadline {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            thread::sleep(std::time::Duration::from_millis(50));
        }
        signal_group(child, Signal::SIGKILL)?;
        child.wait()?;
        Ok(())
    }
}
