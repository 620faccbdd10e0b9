//! Bounded child-process runner shared by the executor and fingerprint tests.
//!
//! The child is started in its own process group so a timeout or cancellation
//! can kill everything it spawned, not just the direct child.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::consts::OUTPUT_DRAIN_TIMEOUT_MS;

/// How a bounded run ended.
#[derive(Debug)]
pub(crate) enum RunOutcome {
  Exited {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
  },
  TimedOut {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
  },
  Cancelled,
}

#[derive(Clone, Copy)]
enum Ending {
  Exited(ExitStatus),
  TimedOut,
  Cancelled,
}

/// Spawn `command` with piped output and wait for it under `timeout` and `cancel`.
///
/// Stdin is closed. The timeout covers both the child and any descendant still
/// holding its output pipes. On timeout or cancellation the process group is
/// killed and whatever output arrives within the drain window is kept; after a
/// normal exit the group is killed as well.
pub(crate) async fn run_bounded(
  mut command: Command,
  timeout: Duration,
  cancel: &CancellationToken,
) -> std::io::Result<RunOutcome> {
  command
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  #[cfg(unix)]
  command.process_group(0);

  let mut child = command.spawn()?;
  let pid = child.id();
  let mut stdout_task = tokio::spawn(read_all(child.stdout.take()));
  let mut stderr_task = tokio::spawn(read_all(child.stderr.take()));
  let deadline = tokio::time::Instant::now() + timeout;

  let mut ending = tokio::select! {
    status = child.wait() => Ending::Exited(status?),
    _ = tokio::time::sleep_until(deadline) => Ending::TimedOut,
    _ = cancel.cancelled() => Ending::Cancelled,
  };

  // Background descendants may still hold the pipes after the child exits.
  let mut streams = None;
  if let Ending::Exited(status) = ending {
    ending = tokio::select! {
      (stdout, stderr) = async { tokio::join!(&mut stdout_task, &mut stderr_task) } => {
        streams = Some((stdout.unwrap_or_default(), stderr.unwrap_or_default()));
        Ending::Exited(status)
      }
      _ = tokio::time::sleep_until(deadline) => Ending::TimedOut,
      _ = cancel.cancelled() => Ending::Cancelled,
    };
  }

  match ending {
    Ending::Exited(status) => {
      // Whatever the child left running with its pipes closed goes too.
      #[cfg(unix)]
      kill_process_group(pid);
      let (stdout, stderr) = streams.unwrap_or_default();
      Ok(RunOutcome::Exited { status, stdout, stderr })
    }
    Ending::TimedOut => {
      debug!(pid = ?pid, timeout_secs = timeout.as_secs(), "process timed out, killing process group");
      kill_tree(&mut child, pid).await;
      let stdout = drain(stdout_task).await;
      let stderr = drain(stderr_task).await;
      Ok(RunOutcome::TimedOut { stdout, stderr })
    }
    Ending::Cancelled => {
      debug!(pid = ?pid, "process cancelled, killing process group");
      kill_tree(&mut child, pid).await;
      stdout_task.abort();
      stderr_task.abort();
      Ok(RunOutcome::Cancelled)
    }
  }
}

/// Exit code of a finished process; signal deaths map to `128 + signal`.
pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
  if let Some(code) = status.code() {
    return code;
  }
  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
      return 128 + signal;
    }
  }
  -1
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
  let mut buf = Vec::new();
  if let Some(mut reader) = reader {
    // A read error after partial output still leaves what was read.
    let _ = reader.read_to_end(&mut buf).await;
  }
  buf
}

async fn drain(task: JoinHandle<Vec<u8>>) -> Vec<u8> {
  let abort = task.abort_handle();
  match tokio::time::timeout(Duration::from_millis(OUTPUT_DRAIN_TIMEOUT_MS), task).await {
    Ok(Ok(buf)) => buf,
    Ok(Err(_)) => Vec::new(),
    Err(_) => {
      // A surviving grandchild still holds the pipe open.
      abort.abort();
      Vec::new()
    }
  }
}

async fn kill_tree(child: &mut tokio::process::Child, pid: Option<u32>) {
  #[cfg(unix)]
  kill_process_group(pid);
  #[cfg(not(unix))]
  let _ = pid;

  if let Err(e) = child.kill().await {
    debug!(error = %e, "failed to kill child process");
  }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
  use rustix::process::{Pid, Signal, kill_process_group};

  let Some(raw) = pid.and_then(|raw| i32::try_from(raw).ok()) else {
    return;
  };
  let Some(pgid) = Pid::from_raw(raw) else {
    return;
  };
  match kill_process_group(pgid, Signal::KILL) {
    Ok(()) | Err(rustix::io::Errno::SRCH) => {}
    Err(e) => warn!(pid = raw, error = %e, "failed to kill process group"),
  }
}
