//! Background render worker.
//!
//! Requests are posted to a tokio task that runs them one at a time and
//! answers with [`WorkerMessage`]s. Terminating the worker aborts the task;
//! a render in progress may leave a partially written file behind.

use std::path::PathBuf;
use std::sync::Arc;

use subforge_common::error::{SubforgeError, SubforgeResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::pipeline::{
    PipelineStats, ProgressCallback, ProgressKind, RenderPipeline, RenderProgress, RenderRequest,
    ValidationReport,
};
use crate::target::Target;

/// Work for the render worker.
#[derive(Debug)]
pub enum WorkerRequest {
    Render(RenderRequest),
    /// Report codec support for a source without rendering it.
    Validate { source: PathBuf },
}

/// Messages from the render worker.
#[derive(Debug)]
pub enum WorkerMessage {
    RenderProgress { progress: RenderProgress },
    EncodeProgress { progress: RenderProgress },
    Done { target: Target, stats: PipelineStats },
    Validation(ValidationReport),
    Error { message: String, error: SubforgeError },
}

impl WorkerMessage {
    fn error(error: SubforgeError) -> Self {
        Self::Error {
            message: format!("{} failed: {error}", error.stage()),
            error,
        }
    }

    /// Whether this message ends the request that produced it.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Done { .. } | Self::Validation(_) | Self::Error { .. }
        )
    }
}

/// Handle to a spawned worker task.
pub struct RenderWorker {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    messages: mpsc::UnboundedReceiver<WorkerMessage>,
    task: JoinHandle<()>,
}

impl RenderWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(pipeline: Arc<RenderPipeline>) -> Self {
        let (requests, mut inbox) = mpsc::unbounded_channel::<WorkerRequest>();
        let (outbox, messages) = mpsc::unbounded_channel::<WorkerMessage>();

        let task = tokio::spawn(async move {
            while let Some(request) = inbox.recv().await {
                let reply = handle(&pipeline, request, &outbox).await;
                if outbox.send(reply).is_err() {
                    tracing::debug!("Worker receiver dropped, stopping");
                    break;
                }
            }
            tracing::debug!("Render worker stopped");
        });
        tracing::info!("Render worker started");

        Self {
            requests,
            messages,
            task,
        }
    }

    pub fn post(&self, request: WorkerRequest) -> SubforgeResult<()> {
        self.requests
            .send(request)
            .map_err(|_| SubforgeError::render("render worker is no longer running"))
    }

    /// Next message, or `None` once the worker has stopped.
    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        self.messages.recv().await
    }

    /// Abort the worker immediately.
    pub fn terminate(self) {
        tracing::warn!("Terminating render worker");
        self.task.abort();
    }

    /// Stop accepting requests and wait for queued work to finish.
    pub async fn shutdown(self) {
        let Self { requests, task, .. } = self;
        drop(requests);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Render worker ended abnormally");
        }
    }
}

async fn handle(
    pipeline: &RenderPipeline,
    request: WorkerRequest,
    outbox: &mpsc::UnboundedSender<WorkerMessage>,
) -> WorkerMessage {
    match request {
        WorkerRequest::Validate { source } => match pipeline.validate(&source).await {
            Ok(report) => WorkerMessage::Validation(report),
            Err(e) => WorkerMessage::error(e),
        },
        WorkerRequest::Render(request) => {
            let progress_tx = outbox.clone();
            let progress: ProgressCallback = Box::new(move |progress: RenderProgress| {
                let message = match progress.kind {
                    ProgressKind::Render => WorkerMessage::RenderProgress { progress },
                    ProgressKind::Encode => WorkerMessage::EncodeProgress { progress },
                };
                let _ = progress_tx.send(message);
            });
            match pipeline.render(request, Some(progress)).await {
                Ok(output) => WorkerMessage::Done {
                    target: output.target,
                    stats: output.stats,
                },
                Err(e) => WorkerMessage::error(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_names_stage() {
        let message = WorkerMessage::error(SubforgeError::finalize("moov write failed"));
        match message {
            WorkerMessage::Error { message, error } => {
                assert!(message.starts_with("finalize failed"));
                assert!(error.may_leave_partial_output());
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_final_messages() {
        let progress = RenderProgress {
            kind: ProgressKind::Render,
            processed: 1,
            total: 2,
            percent: 50.0,
        };
        assert!(!WorkerMessage::RenderProgress { progress }.is_final());
        assert!(WorkerMessage::error(SubforgeError::demux("x")).is_final());
    }
}
