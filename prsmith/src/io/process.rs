//! Child processes with a timeout and bounded output capture.
//!
//! Every subprocess a job spawns (git and plan steps) goes through
//! [`run_bounded`], so a hung command can never block a job forever.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long the output readers may lag behind the child's exit before the
/// child's process group is killed, and again before the readers are abandoned.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Output captured from a finished (or killed) child.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded beyond the capture limit, stdout + stderr.
    pub truncated: usize,
    pub timed_out: bool,
    /// Background descendants kept the pipes open and capture stopped early.
    pub detached: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Stdout followed by stderr, lossily decoded, with notes for truncation and timeout.
    pub fn combined(&self) -> String {
        let mut buf = String::from_utf8_lossy(&self.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !stderr.trim().is_empty() {
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str(&stderr);
        }
        if self.truncated > 0 {
            buf.push_str(&format!("\n[output truncated {} bytes]\n", self.truncated));
        }
        if self.detached {
            buf.push_str("\n[output capture stopped: background processes held the pipes open]\n");
        }
        if self.timed_out {
            buf.push_str("\n[command timed out]\n");
        }
        buf
    }
}

/// Run `cmd` with stdin closed, killing it after `timeout`.
///
/// Stdout and stderr are drained on reader threads so a chatty child can't
/// deadlock on a full pipe; at most `output_limit_bytes` of each is kept.
/// On unix the child leads its own process group, and the whole group is
/// killed on timeout or when descendants outlive it holding the pipes.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_bounded(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };
    let pid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let mut stdout_reader = Reader::spawn(stdout, output_limit_bytes);
    let mut stderr_reader = Reader::spawn(stderr, output_limit_bytes);

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            kill_process_group(pid);
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let mut finished = wait_readers(&mut stdout_reader, &mut stderr_reader)?;
    if !finished {
        warn!("descendants still hold the output pipes, killing process group");
        kill_process_group(pid);
        finished = wait_readers(&mut stdout_reader, &mut stderr_reader)?;
    }
    let detached = !finished;
    if detached {
        warn!("abandoning output readers");
    }

    let (stdout, stdout_dropped) = stdout_reader.take();
    let (stderr, stderr_dropped) = stderr_reader.take();
    let truncated = stdout_dropped + stderr_dropped;
    if truncated > 0 {
        warn!(truncated, "command output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, detached, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        truncated,
        timed_out,
        detached,
    })
}

/// Signal every process in the group led by `pid`. Best effort.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let result = Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = result {
        debug!(err = %err, pid, "could not signal process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[derive(Debug, Default)]
struct Capture {
    kept: Vec<u8>,
    dropped: usize,
}

/// A pipe drained on its own thread into a shared buffer, so whatever was
/// read so far survives even when the thread has to be abandoned.
struct Reader {
    capture: Arc<Mutex<Capture>>,
    done: Receiver<Result<()>>,
    finished: bool,
}

impl Reader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let capture = Arc::new(Mutex::new(Capture::default()));
        let (tx, done) = mpsc::channel();
        let shared = Arc::clone(&capture);
        thread::spawn(move || {
            let _ = tx.send(drain_limited(reader, limit, &shared));
        });
        Self {
            capture,
            done,
            finished: false,
        }
    }

    /// True once the pipe hit EOF; false if `deadline` passed first.
    fn wait_until(&mut self, deadline: Instant) -> Result<bool> {
        if self.finished {
            return Ok(true);
        }
        match self
            .done
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        {
            Ok(result) => {
                result?;
                self.finished = true;
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
        }
    }

    fn take(&self) -> (Vec<u8>, usize) {
        let mut capture = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
        (std::mem::take(&mut capture.kept), capture.dropped)
    }
}

fn wait_readers(stdout: &mut Reader, stderr: &mut Reader) -> Result<bool> {
    let deadline = Instant::now() + READER_GRACE;
    let stdout_done = stdout.wait_until(deadline).context("read stdout")?;
    let stderr_done = stderr.wait_until(deadline).context("read stderr")?;
    Ok(stdout_done && stderr_done)
}

fn drain_limited<R: Read>(mut reader: R, limit: usize, capture: &Mutex<Capture>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
        let room = limit.saturating_sub(capture.kept.len()).min(n);
        capture.kept.extend_from_slice(&chunk[..room]);
        capture.dropped += n - room;
    }
}
