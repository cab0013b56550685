use std::io;
use std::process::ExitStatus;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;

use super::state::{BackendState, SharedState};

// Set to false to silence forwarded backend output
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// How long a stopped backend gets between SIGTERM and SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(10);
/// Upper bound on reading leftover output once the process is gone.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

enum MonitorExit {
    Exited(io::Result<ExitStatus>),
    StopRequested,
}

/// Owns the child for its whole life: forwards both output streams line by
/// line to `lines`, notices when the process exits on its own, and on
/// cancellation terminates it and waits for the exit status.
pub(super) async fn monitor_process(
    mut child: Child,
    lines: mpsc::Sender<OutputLine>,
    state: SharedState,
    cancel_token: CancellationToken,
) -> io::Result<ExitStatus> {
    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

    let exit = loop {
        tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => {
                if !forward(line, StreamKind::Stdout, &lines).await {
                    stdout = None;
                }
            }
            line = next_line(&mut stderr), if stderr.is_some() => {
                if !forward(line, StreamKind::Stderr, &lines).await {
                    stderr = None;
                }
            }
            status = child.wait() => break MonitorExit::Exited(status),
            _ = cancel_token.cancelled() => break MonitorExit::StopRequested,
        }
    };

    let status = match exit {
        MonitorExit::Exited(status) => {
            match &status {
                Ok(status) => log_error!("backend exited on its own with {status}"),
                Err(err) => log_error!("failed to wait on backend: {err}"),
            }
            if let Ok(status) = &status {
                state.set(BackendState::Terminated(status.code()));
            }
            status
        }
        MonitorExit::StopRequested => terminate(&mut child).await,
    };

    flush(&mut stdout, StreamKind::Stdout, &lines).await;
    flush(&mut stderr, StreamKind::Stderr, &lines).await;

    status
}

/// Forwards raw output lines to the operational log until every sender is gone.
pub(super) async fn log_sink(label: String, mut lines: mpsc::Receiver<OutputLine>) {
    while let Some(line) = lines.recv().await {
        log_info!("{}", log_line(&label, &line));
    }
}

/// `[label] text` for stdout, `[label:stderr] text` for stderr.
fn log_line(label: &str, line: &OutputLine) -> String {
    let text = line.text.trim_end();
    match line.stream {
        StreamKind::Stdout => format!("[{label}] {text}"),
        StreamKind::Stderr => format!("[{label}:stderr] {text}"),
    }
}

async fn next_line<R>(lines: &mut Option<Lines<R>>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

/// Returns false once the stream is exhausted.
async fn forward(
    line: io::Result<Option<String>>,
    stream: StreamKind,
    lines: &mpsc::Sender<OutputLine>,
) -> bool {
    match line {
        Ok(Some(text)) => {
            // A closed sink only loses log lines; keep draining so the pipe never fills up.
            let _ = lines.send(OutputLine { stream, text }).await;
            true
        }
        Ok(None) => false,
        Err(err) => {
            log_warn!("failed to read backend {stream:?}: {err}");
            false
        }
    }
}

async fn flush<R>(
    reader: &mut Option<Lines<R>>,
    stream: StreamKind,
    lines: &mpsc::Sender<OutputLine>,
) where
    R: AsyncBufRead + Unpin,
{
    let drain = async {
        while reader.is_some() {
            let line = next_line(reader).await;
            if !forward(line, stream, lines).await {
                *reader = None;
            }
        }
    };
    let _ = time::timeout(FLUSH_TIMEOUT, drain).await;
}

async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    if let Err(err) = send_terminate(child) {
        log_warn!("failed to signal backend, killing it: {err}");
        child.start_kill()?;
    }

    match time::timeout(STOP_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            log_warn!(
                "backend still running {}s after termination signal, killing it",
                STOP_GRACE.as_secs()
            );
            child.start_kill()?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // No pid means the process has already been reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
