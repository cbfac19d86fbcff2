// crates/pipeline/src/cancel.rs
//! Per-job cancellation signals.
//!
//! A token is registered when a job is admitted and released when its
//! execution unit ends. The same token is handed to every stage executor, so
//! stages can cooperate without the orchestrator knowing anything about them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::types::JobId;

#[derive(Clone, Default)]
pub struct CancellationCoordinator {
    tokens: Arc<DashMap<JobId, CancellationToken>>,
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or return the existing) token for a job.
    pub fn register(&self, id: &str) -> CancellationToken {
        self.tokens
            .entry(id.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    pub fn token(&self, id: &str) -> Option<CancellationToken> {
        self.tokens.get(id).map(|t| t.clone())
    }

    /// Signal cancellation for a job.
    ///
    /// Returns `true` only for the call that actually delivered the signal.
    /// Repeated calls, unknown ids and released (finished) jobs return
    /// `false`. Never panics; safe to race with the job's own checks.
    pub fn request_cancel(&self, id: &str) -> bool {
        // get_mut holds the shard write lock, so check-and-cancel is atomic
        // across concurrent callers.
        match self.tokens.get_mut(id) {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_cancel_requested(&self, id: &str) -> bool {
        self.tokens.get(id).is_some_and(|t| t.is_cancelled())
    }

    /// Remove a job's token before it commits a successful result.
    ///
    /// Returns whether cancellation was requested first. The removal and
    /// `request_cancel` take the same shard lock, so a later request sees no
    /// token and reports `false` instead of being silently dropped.
    pub fn seal(&self, id: &str) -> bool {
        self.tokens
            .remove(id)
            .is_some_and(|(_, token)| token.is_cancelled())
    }

    /// Forget a job's token once it has reached a terminal state.
    pub fn release(&self, id: &str) {
        self.tokens.remove(id);
    }

    /// Signal every live job. Returns how many signals were delivered.
    pub fn cancel_all(&self) -> usize {
        let mut delivered = 0;
        for token in self.tokens.iter() {
            if !token.is_cancelled() {
                token.cancel();
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of jobs currently holding a token.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
