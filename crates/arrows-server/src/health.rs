//! Liveness report served at `/health`.
//!
//! The report is a point-in-time read of the connection hub and the session
//! registry; it never goes through a coordinator mailbox, so a stuck session
//! cannot stall it.

use std::time::Instant;

use serde::Serialize;

use crate::registry::{SessionCounts, SessionRegistry};
use crate::transport::ConnectionHub;

/// Body of `GET /health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `"ok"` whenever the listener answers.
    pub status: &'static str,
    /// Whole seconds since the server was assembled.
    pub uptime_secs: u64,
    /// Open WebSocket connections, attached or not.
    pub connections: usize,
    /// Registered sessions by lifecycle status.
    pub sessions: SessionCounts,
}

impl HealthReport {
    /// Read the live counters.
    pub fn collect(started: Instant, hub: &ConnectionHub, registry: &SessionRegistry) -> Self {
        Self {
            status: "ok",
            uptime_secs: started.elapsed().as_secs(),
            connections: hub.count(),
            sessions: registry.counts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CoordinatorDeps, CoordinatorOptions};
    use arrows_core::{
        Orientation, Position, ResearcherId, Scenario, Session, SessionId, SubjectId,
        SubjectsCouple, SystemClock, Trial, TrialList,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn parts() -> (Arc<ConnectionHub>, SessionRegistry) {
        let hub = Arc::new(ConnectionHub::new(4));
        let registry = SessionRegistry::new(CoordinatorDeps {
            transport: hub.clone(),
            clock: Arc::new(SystemClock),
            options: CoordinatorOptions::default(),
        });
        (hub, registry)
    }

    #[tokio::test]
    async fn idle_server_reports_zeroes() {
        let (hub, registry) = parts();
        let report = HealthReport::collect(Instant::now(), &hub, &registry);
        assert_eq!(report.status, "ok");
        assert_eq!(report.connections, 0);
        assert_eq!(report.sessions.total(), 0);
    }

    #[tokio::test]
    async fn counts_connections_and_pending_sessions() {
        let (hub, registry) = parts();
        let _conn = hub.register();
        let trial = Trial::new(Position::Top, vec![Orientation::Left]).unwrap();
        let _ = registry.persist(Session::new(
            SessionId::new(),
            Scenario::new(TrialList::new(vec![trial]).unwrap()),
            SubjectsCouple::new(SubjectId::new(), SubjectId::new()),
            ResearcherId::new(),
        ));

        let report = HealthReport::collect(Instant::now(), &hub, &registry);
        assert_eq!(report.connections, 1);
        assert_eq!(report.sessions.pending, 1);
        assert_eq!(report.sessions.active(), 1);
    }

    #[tokio::test]
    async fn uptime_and_wire_shape() {
        let (hub, registry) = parts();
        let Some(started) = Instant::now().checked_sub(Duration::from_secs(90)) else {
            return;
        };
        let json = serde_json::to_value(HealthReport::collect(started, &hub, &registry)).unwrap();
        assert!(json["uptime_secs"].as_u64().unwrap() >= 89);
        assert_eq!(
            json["sessions"],
            serde_json::json!({"pending": 0, "running": 0, "terminal": 0})
        );
    }
}
