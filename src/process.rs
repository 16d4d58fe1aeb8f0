//! Child process execution with a wall-clock timeout and bounded capture.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured output of a finished (or killed) child process.
#[derive(Debug)]
pub struct Capture {
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// True when the process hit the timeout and was killed.
    pub timed_out: bool,
    /// Bytes dropped from stdout/stderr beyond the capture limit.
    pub truncated_bytes: usize,
}

impl Capture {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Spawn `cmd`, optionally feed `stdin`, and wait at most `timeout`.
///
/// Output pipes are drained on dedicated threads while the child runs, so a
/// chatty process cannot deadlock on a full pipe. A child that outlives the
/// timeout is killed and reported with `timed_out = true` rather than an `Err`;
/// errors are reserved for spawn/IO failures.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), limit_bytes))]
pub fn run_captured(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    limit_bytes: usize,
) -> Result<Capture> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn child");
            return Err(err).context("spawn child process");
        }
    };

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Written on its own thread so a child that floods stdout before
        // reading stdin cannot wedge both pipes. The child may also exit
        // without reading at all; a broken pipe here is not an error.
        // Dropping the pipe closes it so the child sees EOF.
        thread::spawn(move || {
            let _ = pipe.write_all(&input);
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let out_reader = thread::spawn(move || drain_limited(stdout, limit_bytes));
    let err_reader = thread::spawn(move || drain_limited(stderr, limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "child timed out, killing");
            timed_out = true;
            child.kill().context("kill child")?;
            child.wait().context("reap child after kill")?
        }
    };

    let (stdout, out_dropped) = join_reader(out_reader).context("join stdout reader")?;
    let (stderr, err_dropped) = join_reader(err_reader).context("join stderr reader")?;
    let truncated_bytes = out_dropped + err_dropped;
    if truncated_bytes > 0 {
        warn!(truncated_bytes, "child output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(Capture {
        exit_code: status.code(),
        stdout,
        stderr,
        timed_out,
        truncated_bytes,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes and counting the rest.
fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        let take = n.min(room);
        kept.extend_from_slice(&chunk[..take]);
        dropped += n - take;
    }
    Ok((kept, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_stderr_and_exit_code() {
        let capture = run_captured(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(5),
            10_000,
        )
        .expect("run");

        assert_eq!(capture.exit_code, Some(3));
        assert!(!capture.success());
        assert_eq!(capture.stdout_lossy(), "out\n");
        assert_eq!(capture.stderr_lossy(), "err\n");
    }

    #[test]
    fn zero_exit_is_success() {
        let capture = run_captured(sh("true"), None, Duration::from_secs(5), 10_000).expect("run");
        assert!(capture.success());
        assert!(!capture.timed_out);
    }

    #[test]
    fn kills_child_on_timeout() {
        let capture = run_captured(
            sh("sleep 30"),
            None,
            Duration::from_millis(200),
            10_000,
        )
        .expect("run");

        assert!(capture.timed_out);
        assert!(!capture.success());
    }

    #[test]
    fn large_streams_in_both_directions_do_not_deadlock() {
        // The child floods stdout past the pipe buffer before it consumes
        // any stdin, while the parent feeds more stdin than fits in the
        // child's pipe buffer.
        let input = vec![b'a'; 256 * 1024];
        let capture = run_captured(
            sh("head -c 262144 /dev/zero; cat > /dev/null"),
            Some(&input),
            Duration::from_secs(10),
            4096,
        )
        .expect("run");

        assert!(capture.success());
        assert_eq!(capture.stdout.len(), 4096);
        assert_eq!(capture.truncated_bytes, 262144 - 4096);
    }

    #[test]
    fn feeds_stdin_and_bounds_output() {
        let capture = run_captured(
            sh("cat"),
            Some(b"0123456789"),
            Duration::from_secs(5),
            4,
        )
        .expect("run");

        assert_eq!(capture.stdout, b"0123".to_vec());
        assert_eq!(capture.truncated_bytes, 6);
    }
}
