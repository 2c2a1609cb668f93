//! Supervision of a running transcoder process.
//!
//! Output from stdout and stderr is split into records on `\n` or `\r` (stats
//! lines are rewritten in place with carriage returns) and forwarded over a
//! channel by one reader task per stream. A separate waiter task owns the
//! child and races its exit against cancellation.

use super::ffmpeg::TranscodeError;
use std::io;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const LINE_BUFFER: usize = 256;

/// How a transcoder run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Completed,
    Killed,
}

/// Cloneable handle that can force-kill a running transcoder.
#[derive(Debug, Clone)]
pub struct ProcessKiller {
    cancel: CancellationToken,
    exited: watch::Receiver<bool>,
}

impl ProcessKiller {
    pub fn is_alive(&self) -> bool {
        !*self.exited.borrow()
    }

    /// Kill the process and wait until it is reaped.
    ///
    /// Returns true once the process is confirmed dead, including when it had
    /// already exited.
    pub async fn kill(&self) -> bool {
        self.cancel.cancel();
        let mut exited = self.exited.clone();
        // The sender lives in the waiter task, which always reports before exiting.
        exited.wait_for(|done| *done).await.is_ok() || !self.is_alive()
    }
}

/// A spawned transcoder and the tasks watching it.
#[derive(Debug)]
pub struct TranscodeProcess {
    pid: Option<u32>,
    lines: mpsc::Receiver<String>,
    readers: Vec<JoinHandle<io::Result<()>>>,
    waiter: JoinHandle<Result<ProcessExit, TranscodeError>>,
    killer: ProcessKiller,
}

impl TranscodeProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn killer(&self) -> ProcessKiller {
        self.killer.clone()
    }

    /// Next output record, or None once every output stream has closed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Wait for the process to end and join the output readers.
    ///
    /// A killed process may leave grandchildren holding its pipes open, so
    /// readers are aborted rather than awaited in that case.
    pub async fn finish(self) -> Result<ProcessExit, TranscodeError> {
        let outcome = match self.waiter.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(TranscodeError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("transcoder waiter task failed: {}", join_err),
            ))),
        };

        if !matches!(outcome, Ok(ProcessExit::Completed)) {
            for reader in &self.readers {
                reader.abort();
            }
            return outcome;
        }

        for reader in self.readers {
            match reader.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(TranscodeError::Io(e)),
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    return Err(TranscodeError::Io(io::Error::new(
                        io::ErrorKind::Other,
                        format!("transcoder output reader failed: {}", join_err),
                    )))
                }
            }
        }
        outcome
    }
}

/// Spawn `cmd` with piped output and start its reader and waiter tasks.
pub(crate) fn spawn_transcoder(
    mut cmd: Command,
    cancel: CancellationToken,
) -> Result<TranscodeProcess, TranscodeError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(TranscodeError::Spawn)?;
    let pid = child.id();
    debug!(pid = ?pid, "Transcoder spawned");

    let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
    let mut readers = Vec::with_capacity(2);
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_records(stderr, line_tx.clone())));
    }
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_records(stdout, line_tx.clone())));
    }
    drop(line_tx);

    let (exited_tx, exited_rx) = watch::channel(false);
    let waiter_cancel = cancel.clone();
    let waiter = tokio::spawn(async move {
        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => exit_outcome(status),
                Err(e) => Err(TranscodeError::Io(e)),
            },
            _ = waiter_cancel.cancelled() => match child.kill().await {
                Ok(()) => Ok(ProcessExit::Killed),
                Err(e) => {
                    warn!(pid = ?pid, error = %e, "Failed to kill transcoder");
                    Err(TranscodeError::Io(e))
                }
            },
        };
        let _ = exited_tx.send(true);
        outcome
    });

    Ok(TranscodeProcess {
        pid,
        lines: line_rx,
        readers,
        waiter,
        killer: ProcessKiller {
            cancel,
            exited: exited_rx,
        },
    })
}

fn exit_outcome(status: ExitStatus) -> Result<ProcessExit, TranscodeError> {
    if status.success() {
        Ok(ProcessExit::Completed)
    } else {
        match status.code() {
            Some(code) => Err(TranscodeError::Failed(code)),
            None => Err(TranscodeError::Terminated),
        }
    }
}

/// Forward `\n`/`\r` delimited, trimmed, non-empty records to `tx`.
async fn forward_records<R>(reader: R, tx: mpsc::Sender<String>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..n]);

        while let Some(idx) = pending.iter().position(|&b| b == b'\n' || b == b'\r') {
            let record: Vec<u8> = pending.drain(..=idx).collect();
            if let Some(line) = decode_record(&record) {
                if tx.send(line).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    if let Some(line) = decode_record(&pending) {
        let _ = tx.send(line).await;
    }
    Ok(())
}

fn decode_record(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
