//! In-memory session registry.
//!
//! Maps `SessionId` to the [`SessionHandle`] of its coordinator task and holds
//! the collaborators every new coordinator is spawned with.

use std::sync::Arc;
use std::time::Duration;

use arrows_core::{Session, SessionId, SessionStatus};
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinator::{CoordinatorDeps, SessionCoordinator, SessionHandle};

/// Registered sessions grouped by lifecycle status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    /// Waiting for both subjects.
    pub pending: usize,
    /// Trials in progress.
    pub running: usize,
    /// Complete or aborted, not yet evicted.
    pub terminal: usize,
}

impl SessionCounts {
    /// All registered sessions.
    pub fn total(&self) -> usize {
        self.pending + self.running + self.terminal
    }

    /// Sessions not yet complete or aborted.
    pub fn active(&self) -> usize {
        self.pending + self.running
    }
}

/// Live sessions keyed by id.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
    deps: CoordinatorDeps,
}

impl SessionRegistry {
    /// Empty registry spawning coordinators with `deps`.
    pub fn new(deps: CoordinatorDeps) -> Self {
        Self {
            sessions: DashMap::new(),
            deps,
        }
    }

    /// Start a coordinator for `session` and register it.
    ///
    /// A session already registered under the same id is shut down and replaced.
    pub fn persist(&self, session: Session) -> SessionHandle {
        let id = session.id();
        let trials = session.scenario().len();
        let handle = SessionCoordinator::spawn(session, &self.deps);
        if let Some(previous) = self.sessions.insert(id, handle.clone()) {
            info!(session_id = %id, "replacing registered session");
            let _shutdown = tokio::spawn(async move { previous.shutdown("session replaced").await });
        }
        info!(session_id = %id, trials, "session registered");
        handle
    }

    /// Handle for `id`, if registered.
    pub fn find(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registered ids, in no particular order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Per-status tally of the registered sessions.
    pub fn counts(&self) -> SessionCounts {
        let mut counts = SessionCounts::default();
        for entry in &self.sessions {
            match entry.value().status() {
                SessionStatus::Pending => counts.pending += 1,
                SessionStatus::Running => counts.running += 1,
                SessionStatus::Complete | SessionStatus::Aborted => counts.terminal += 1,
            }
        }
        counts
    }

    /// Sessions not yet complete or aborted.
    pub fn active_count(&self) -> usize {
        self.counts().active()
    }

    /// Drop sessions that have been terminal for at least `ttl`. Returns how many.
    pub fn sweep_terminal(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|id, handle| {
            let expired = handle
                .terminal_since()
                .is_some_and(|since| now.saturating_duration_since(since) >= ttl);
            if expired {
                debug!(session_id = %id, "evicting terminal session");
            }
            !expired
        });
        before.saturating_sub(self.sessions.len())
    }

    /// Abort every session that is not already terminal.
    pub async fn shutdown_all(&self, reason: &str) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in handles {
            if !handle.status().is_terminal() {
                handle.shutdown(reason).await;
            }
        }
    }

    /// Periodically evict terminal sessions until `cancel` fires.
    pub fn start_sweeper(
        self: Arc<Self>,
        interval: Duration,
        ttl: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep_terminal(ttl);
                        if removed > 0 {
                            info!(removed, "terminal session sweep");
                        }
                    }
                }
            }
        })
    }
}
