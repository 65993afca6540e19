use crate::error::{RenderError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Renderer stderr prefix announcing the chunk being rendered.
pub const START_PREFIX: &str = "START:";
/// Renderer stderr prefix announcing a finished chunk.
pub const DONE_PREFIX: &str = "DONE:";

/// What the supervisor reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    Started(i64),
    Done(i64),
    Log(String),
    /// The process is gone. `code` is `None` when it was killed or crashed.
    Exited { code: Option<i32>, aborted: bool },
}

/// Classify one stderr line of the renderer.
///
/// `START:<frame>` and `DONE:<frame>` carry a chunk start frame; anything
/// else, including malformed frame numbers, is plain log output.
pub fn parse_render_line(line: &str) -> RenderEvent {
    let line = line.trim_end();
    let frame = |prefix: &str| {
        line.strip_prefix(prefix)
            .and_then(|rest| rest.trim().parse::<i64>().ok())
    };
    if let Some(f) = frame(START_PREFIX) {
        RenderEvent::Started(f)
    } else if let Some(f) = frame(DONE_PREFIX) {
        RenderEvent::Done(f)
    } else {
        RenderEvent::Log(line.to_string())
    }
}

/// Program and arguments of one render run.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// A running renderer, owned by a tokio task that forwards its stderr as
/// [`RenderEvent`]s and always finishes with `Exited`.
pub struct RenderProcess {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RenderProcess {
    /// Spawn the renderer. Must be called from within a tokio runtime.
    pub fn spawn(job: RenderJob, events: mpsc::UnboundedSender<RenderEvent>) -> Result<Self> {
        let mut child = Command::new(&job.program)
            .args(&job.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RenderError::RendererNotFound(job.program.clone())
                } else {
                    RenderError::Io(e)
                }
            })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RenderError::ProcessFailed("renderer stderr unavailable".into()))?;
        info!(program = %job.program.display(), args = job.args.len(), "renderer started");

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut aborted = false;
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let _ = events.send(parse_render_line(&line));
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "renderer stderr read failed");
                            break;
                        }
                    },
                    _ = &mut cancel_rx => {
                        aborted = true;
                        if let Err(e) = child.start_kill() {
                            warn!(error = %e, "could not kill renderer");
                        }
                        break;
                    }
                }
            }
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(error = %e, "renderer wait failed");
                    None
                }
            };
            debug!(?code, aborted, "renderer exited");
            let _ = events.send(RenderEvent::Exited { code, aborted });
        });

        Ok(Self {
            cancel: Some(cancel_tx),
            task,
        })
    }

    /// Ask the process to stop. The `Exited` event follows.
    pub fn abort(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the supervising task to end.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "render supervisor panicked");
        }
    }

    /// Kill the process and wait until it is reaped.
    pub async fn abort_and_wait(mut self) {
        self.abort();
        self.wait().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_render_line_recognizes_protocol() {
        assert_eq!(parse_render_line("START:25"), RenderEvent::Started(25));
        assert_eq!(parse_render_line("DONE:50\n"), RenderEvent::Done(50));
        assert_eq!(
            parse_render_line("START:abc"),
            RenderEvent::Log("START:abc".to_string())
        );
        assert_eq!(
            parse_render_line("[consumer] opening"),
            RenderEvent::Log("[consumer] opening".to_string())
        );
    }

    #[cfg(unix)]
    fn script(dir: &tempfile::TempDir, body: &str) -> RenderJob {
        let path = dir.path().join("render.sh");
        std::fs::write(&path, body).unwrap();
        RenderJob {
            program: PathBuf::from("sh"),
            args: vec![path.to_string_lossy().into_owned()],
        }
    }

    #[cfg(unix)]
    async fn collect(mut rx: mpsc::UnboundedReceiver<RenderEvent>) -> Vec<RenderEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = matches!(event, RenderEvent::Exited { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forwards_progress_and_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let job = script(
            &dir,
            "echo 'START:0' >&2\necho 'DONE:0' >&2\necho 'warning: slow' >&2\nexit 3\n",
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let process = RenderProcess::spawn(job, tx).unwrap();
        let events = collect(rx).await;
        process.wait().await;
        assert_eq!(
            events,
            vec![
                RenderEvent::Started(0),
                RenderEvent::Done(0),
                RenderEvent::Log("warning: slow".to_string()),
                RenderEvent::Exited {
                    code: Some(3),
                    aborted: false
                },
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abort_kills_process() {
        let dir = tempfile::TempDir::new().unwrap();
        let job = script(&dir, "echo 'START:0' >&2\nexec sleep 30\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut process = RenderProcess::spawn(job, tx).unwrap();
        assert_eq!(rx.recv().await, Some(RenderEvent::Started(0)));
        process.abort();
        let events = collect(rx).await;
        assert!(matches!(
            events.last(),
            Some(RenderEvent::Exited { aborted: true, .. })
        ));
        process.wait().await;
    }

    #[tokio::test]
    async fn missing_renderer_is_reported() {
        let job = RenderJob {
            program: PathBuf::from("/nonexistent/cutline-renderer"),
            args: vec![],
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            RenderProcess::spawn(job, tx),
            Err(RenderError::RendererNotFound(_))
        ));
    }
}
