// src/solver/process.rs

//! Running external solver executables with a deadline

use crate::check::CancelToken;
use crate::check::cancel::POLL_INTERVAL;
use crate::solver::BackendFailure;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use wait_timeout::ChildExt;

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub(crate) struct ProcessOutput {
    pub status: i32,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

fn drain(mut stream: impl Read + Send + 'static) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Run `command` until it exits, the timeout passes or `cancel` fires
///
/// Stdin is closed and both output streams are drained on helper threads so
/// a chatty solver cannot block on a full pipe.
pub(crate) fn run(
    mut command: Command,
    program: &Path,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<ProcessOutput, BackendFailure> {
    let program_name = program.display().to_string();
    debug!("Executing {:?}", command);

    let started = Instant::now();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BackendFailure::Launch {
            program: program_name.clone(),
            message: e.to_string(),
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = loop {
        if cancel.is_cancelled() {
            kill(&mut child);
            return Err(BackendFailure::Cancelled);
        }
        if let Some(limit) = timeout
            && started.elapsed() >= limit
        {
            kill(&mut child);
            return Err(BackendFailure::Timeout {
                seconds: limit.as_secs(),
            });
        }

        match child.wait_timeout(POLL_INTERVAL) {
            Ok(Some(status)) => break status,
            Ok(None) => continue,
            Err(e) => {
                kill(&mut child);
                return Err(BackendFailure::Launch {
                    program: program_name,
                    message: format!("failed to wait for process: {}", e),
                });
            }
        }
    };

    let output = ProcessOutput {
        status: status.code().unwrap_or(-1),
        success: status.success(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    };
    trace!(
        program = %program_name,
        status = output.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Process finished"
    );
    Ok(output)
}

/// Whether `program` can be launched: an existing path, or found on `PATH`
pub(crate) fn is_available(program: &Path) -> bool {
    if program.components().count() > 1 {
        return program.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
