//! Run control — cancellation and progress reporting threaded through a run

use crate::error::OrchestratorError;
use crate::status::{notify, Phase, StatusEvent, StatusSink};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Optional cancellation token and status sink shared by every stage of one run.
/// The default has neither: no deadline, no events.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub cancel: Option<CancellationToken>,
    pub status: Option<StatusSink>,
}

impl RunControl {
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_status(mut self, sink: StatusSink) -> Self {
        self.status = Some(sink);
        self
    }

    pub fn notify(&self, event: StatusEvent) {
        notify(self.status.as_ref(), event);
    }

    /// Await `fut` unless the run is cancelled first.
    ///
    /// A token that is already cancelled wins before `fut` is polled.
    pub async fn guard<T, E, F>(&self, stage: Phase, fut: F) -> Result<T, OrchestratorError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<OrchestratorError>,
    {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(OrchestratorError::Cancelled { stage }),
                result = fut => result.map_err(Into::into),
            },
            None => fut.await.map_err(Into::into),
        }
    }
}
