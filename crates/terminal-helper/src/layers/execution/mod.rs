mod stream;

use std::io;

use anyhow::Context;
use protocol::{OutputChunk, StreamKind};
use system_utils::process::{shell_command, terminate_child};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ShellConfig;

use self::stream::forward_lines;

const CHUNK_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunExit {
    Completed { exit_code: Option<i32> },
    Cancelled,
}

/// Live output of one spawned command.
///
/// Chunks from stdout and stderr arrive through one channel fed by two reader
/// tasks, so order is preserved within a stream but not across them. A
/// supervisor task owns the child: it reaps it once both pipes close, or
/// tears down the whole process group when the token is cancelled.
pub(crate) struct CommandStream {
    chunks: mpsc::Receiver<OutputChunk>,
    supervisor: JoinHandle<RunExit>,
    cancel: CancellationToken,
    pid: Option<u32>,
}

pub(crate) fn spawn_command(
    command: &str,
    shell: &ShellConfig,
    cancel: CancellationToken,
) -> anyhow::Result<CommandStream> {
    let mut child = shell_command(&shell.program, &shell.args, command)
        .spawn()
        .with_context(|| format!("spawn {} {}", shell.program, shell.args.join(" ")))?;
    let pid = child.id();
    let stdout = child.stdout.take().context("missing stdout")?;
    let stderr = child.stderr.take().context("missing stderr")?;

    let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
    let stdout_task = tokio::spawn(forward_lines(stdout, StreamKind::Stdout, tx.clone()));
    let stderr_task = tokio::spawn(forward_lines(stderr, StreamKind::Stderr, tx));
    let supervisor = tokio::spawn(supervise(child, stdout_task, stderr_task, cancel.clone()));

    tracing::debug!(pid = ?pid, "command spawned");
    Ok(CommandStream {
        chunks: rx,
        supervisor,
        cancel,
        pid,
    })
}

impl CommandStream {
    /// Next chunk from either pipe. `None` once both pipes are closed, or as
    /// soon as the run is cancelled, whichever happens first.
    pub(crate) async fn next_chunk(&mut self) -> Option<OutputChunk> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            chunk = self.chunks.recv() => chunk,
        }
    }

    /// Waits for the supervisor to reap the child.
    pub(crate) async fn finish(self) -> RunExit {
        let exit = match self.supervisor.await {
            Ok(exit) => exit,
            Err(err) => {
                tracing::warn!(error = %err, "process supervisor failed");
                RunExit::Completed { exit_code: None }
            }
        };
        tracing::debug!(pid = ?self.pid, exit = ?exit, "command finished");
        exit
    }
}

#[cfg(test)]
impl CommandStream {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

async fn supervise(
    mut child: Child,
    mut stdout_task: JoinHandle<io::Result<()>>,
    mut stderr_task: JoinHandle<io::Result<()>>,
    cancel: CancellationToken,
) -> RunExit {
    let finished = tokio::select! {
        status = async {
            note_reader_exit(StreamKind::Stdout, (&mut stdout_task).await);
            note_reader_exit(StreamKind::Stderr, (&mut stderr_task).await);
            child.wait().await
        } => Some(status),
        _ = cancel.cancelled() => None,
    };

    match finished {
        Some(Ok(status)) => RunExit::Completed {
            exit_code: status.code(),
        },
        Some(Err(err)) => {
            tracing::warn!(error = %err, "wait on child failed");
            RunExit::Completed { exit_code: None }
        }
        None => {
            let status = terminate_child(&mut child).await;
            stdout_task.abort();
            stderr_task.abort();
            tracing::info!(
                event = "process_terminated",
                exit_code = ?status.and_then(|status| status.code()),
            );
            RunExit::Cancelled
        }
    }
}

fn note_reader_exit(
    stream: StreamKind,
    result: Result<io::Result<()>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(stream = stream.as_str(), error = %err, "pipe read failed"),
        Err(err) => tracing::warn!(stream = stream.as_str(), error = %err, "pipe reader task failed"),
    }
}
