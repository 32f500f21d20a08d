use crate::activity::ActivityEngine;
use crate::sync_conflicts::ConflictResolver;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The CRM engines a job works with, plus its cancellation token.
#[derive(Clone)]
pub struct JobContext {
    /// Cancelled on shutdown, or when the scheduler cancels this one run.
    pub cancellation_token: CancellationToken,

    pub activity: Arc<ActivityEngine>,

    pub conflict_resolver: Arc<ConflictResolver>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        activity: Arc<ActivityEngine>,
        conflict_resolver: Arc<ConflictResolver>,
    ) -> Self {
        Self {
            cancellation_token,
            activity,
            conflict_resolver,
        }
    }

    /// Same engines, different token.
    pub fn with_cancellation_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
