use thiserror::Error;

use crate::backend::RenderBackend;
use crate::protocol::RenderResult;
use crate::session::DocumentSession;

/// Render-program failure, carrying the formatted multi-line trace exactly
/// as the backend captured it.
#[derive(Debug, Error)]
#[error("{summary}")]
pub struct RenderFailure {
    summary: String,
    trace: String,
}

impl RenderFailure {
    pub fn new(trace: impl Into<String>) -> Self {
        let trace = trace.into();
        Self {
            summary: trace_summary(&trace),
            trace,
        }
    }

    pub fn trace(&self) -> &str {
        &self.trace
    }

    /// The line surfaced to the host. Formatted traces put the
    /// human-readable error on the second-to-last line (the last one is
    /// typically a prompt or blank), so that is what gets reported.
    pub fn status_line(&self) -> &str {
        &self.summary
    }
}

fn trace_summary(trace: &str) -> String {
    let lines: Vec<&str> = trace.split('\n').collect();
    let line = match lines.len() {
        0 | 1 => trace,
        n => lines[n - 2],
    };
    line.trim_end_matches('\r').to_string()
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render program already executed")]
    AlreadyExecuted,
    #[error(transparent)]
    Failed(#[from] RenderFailure),
}

impl RenderError {
    pub fn status_line(&self) -> String {
        match self {
            Self::Failed(failure) => failure.status_line().to_string(),
            other => other.to_string(),
        }
    }
}

/// Runs the render program at most once per worker lifetime. The attempt is
/// consumed even on failure; there is no retry path.
#[derive(Debug, Default)]
pub struct RenderExecutor {
    executed: bool,
}

impl RenderExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_executed(&self) -> bool {
        self.executed
    }

    pub async fn execute<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        session: &mut DocumentSession,
    ) -> Result<RenderResult, RenderError> {
        if self.executed {
            return Err(RenderError::AlreadyExecuted);
        }
        self.executed = true;
        backend
            .execute_program(session)
            .await
            .map_err(RenderError::from)
    }
}
