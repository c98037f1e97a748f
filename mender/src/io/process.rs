//! External collaborators as child processes: JSON request on stdin, JSON
//! response on stdout, bounded by a deadline and an output cap.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::budget::CallTimeout;

/// Bytes kept from one output stream, plus how many were dropped past the cap.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    dropped: usize,
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim().to_string()
    }
}

/// How a collaborator process ended.
#[derive(Debug)]
struct Finished {
    status: ExitStatus,
    stdout: Captured,
    stderr: Captured,
    /// Killed at the deadline.
    killed: bool,
}

/// Run `argv` with `request` serialized on stdin and parse stdout as JSON.
///
/// The child is killed once `timeout` passes and the error then carries a
/// [`CallTimeout`]. A non-zero exit reports stderr; a response larger than
/// `output_limit_bytes` is rejected rather than parsed partially.
#[instrument(skip_all, fields(collaborator = collaborator))]
pub fn run_json_command(
    collaborator: &'static str,
    argv: &[String],
    request: &Value,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<Value> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("{collaborator} command is empty"))?;
    let payload = serde_json::to_vec(request).context("serialize command request")?;

    let started = Instant::now();
    let mut cmd = Command::new(program);
    cmd.args(args);
    let finished = supervise(cmd, payload, timeout, output_limit_bytes)
        .with_context(|| format!("run {collaborator} command {program}"))?;

    if finished.killed {
        return Err(CallTimeout {
            collaborator,
            timeout,
            elapsed: started.elapsed(),
        }
        .into());
    }
    if !finished.status.success() {
        bail!(
            "{collaborator} command failed with status {:?}: {}",
            finished.status.code(),
            finished.stderr.text()
        );
    }
    if finished.stdout.dropped > 0 {
        bail!("{collaborator} response exceeded {output_limit_bytes} bytes");
    }
    serde_json::from_slice(&finished.stdout.bytes)
        .with_context(|| format!("parse {collaborator} response as JSON"))
}

/// Spawn, feed stdin and drain both pipes on their own threads, then wait
/// with a deadline. Past the deadline the call returns as soon as the child
/// is reaped, without waiting for its output.
fn supervise(mut cmd: Command, payload: Vec<u8>, timeout: Duration, cap: usize) -> Result<Finished> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("spawn command")?;
    debug!(pid = child.id(), "collaborator process started");

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    let feeder = thread::spawn(move || feed(stdin, &payload));
    let stdout = drain(child.stdout.take(), cap)?;
    let stderr = drain(child.stderr.take(), cap)?;

    let (status, killed) = wait_or_kill(&mut child, timeout)?;
    if killed {
        // Descendants of the killed child may still hold the pipes open;
        // the I/O threads are detached and end when the last writer exits.
        debug!("abandoning collaborator output after deadline");
        return Ok(Finished {
            status,
            stdout: Captured::default(),
            stderr: Captured::default(),
            killed,
        });
    }

    // A child that exits without reading its stdin breaks the pipe; that is
    // the child's business, its exit status says whether it succeeded.
    if let Err(err) = join(feeder)? {
        debug!(error = %err, "stdin not fully consumed");
    }
    let stdout = join(stdout)?.context("read stdout")?;
    let stderr = join(stderr)?.context("read stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "collaborator output over limit"
        );
    }
    debug!(exit_code = ?status.code(), killed, "collaborator process finished");

    Ok(Finished {
        status,
        stdout,
        stderr,
        killed,
    })
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for command")? {
        return Ok((status, false));
    }
    warn!(timeout_secs = timeout.as_secs(), "collaborator over deadline, killing");
    child.kill().context("kill command")?;
    let status = child.wait().context("reap killed command")?;
    Ok((status, true))
}

fn feed(mut stdin: ChildStdin, payload: &[u8]) -> std::io::Result<()> {
    stdin.write_all(payload)?;
    // Dropping stdin closes the pipe so the child sees EOF.
    Ok(())
}

fn drain<R>(pipe: Option<R>, cap: usize) -> Result<JoinHandle<std::io::Result<Captured>>>
where
    R: Read + Send + 'static,
{
    let mut pipe = pipe.ok_or_else(|| anyhow!("output was not piped"))?;
    Ok(thread::spawn(move || {
        let mut captured = Captured::default();
        let mut chunk = [0u8; 8192];
        loop {
            let n = pipe.read(&mut chunk)?;
            if n == 0 {
                return Ok(captured);
            }
            let keep = n.min(cap.saturating_sub(captured.bytes.len()));
            captured.bytes.extend_from_slice(&chunk[..keep]);
            captured.dropped += n - keep;
        }
    }))
}

fn join<T>(handle: JoinHandle<T>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("collaborator I/O thread panicked"))
}
