//! Per-session coordinator actor.
//!
//! One tokio task per session owns the [`Session`] aggregate and processes
//! [`SessionEvent`]s from a bounded mailbox, one at a time. Connection tasks
//! only hold a [`SessionHandle`]. Replies racing for the same trial are
//! therefore resolved in mailbox order and the first one wins.
//!
//! Status changes are published on a `watch` channel so the registry and tests
//! can observe the lifecycle without a round trip through the mailbox.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arrows_core::{
    AttachOutcome, Clock, ConnectionId, MillisecondTimestamp, ProtocolError, ResearcherId, Role,
    Session, SessionId, SessionStatus, SubjectRole, TrialResult,
};
use metrics::{counter, histogram};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::codec::{Envelope, TrialAnswer, TrialPresentation};
use crate::metrics::{
    SESSIONS_ABORTED_TOTAL, SESSIONS_COMPLETED_TOTAL, SESSIONS_STARTED_TOTAL, TRIAL_ANSWERS_TOTAL,
    TRIAL_RESPONSE_MS,
};
use crate::transport::{CloseReason, MessageTransport};

const SUBJECTS: [Role; 2] = [
    Role::Subject(SubjectRole::One),
    Role::Subject(SubjectRole::Two),
];

/// Abort reason used when the server stops.
pub const SHUTDOWN_REASON: &str = "server shutting down";

/// Abort reason used when a trial times out.
pub const TIMEOUT_REASON: &str = "trial timed out";

/// Tunables for coordinator tasks.
#[derive(Clone, Debug)]
pub struct CoordinatorOptions {
    /// Mailbox size.
    pub mailbox_capacity: usize,
    /// Abort when a trial stays unanswered this long. Off when `None`.
    pub trial_timeout: Option<Duration>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            trial_timeout: None,
        }
    }
}

/// Collaborators injected into every coordinator.
#[derive(Clone)]
pub struct CoordinatorDeps {
    /// Outbound side of the connection layer.
    pub transport: Arc<dyn MessageTransport>,
    /// Timestamp source.
    pub clock: Arc<dyn Clock>,
    /// Tunables.
    pub options: CoordinatorOptions,
}

/// Mailbox item.
#[derive(Debug)]
pub enum SessionEvent {
    /// Bind a connection to a role slot.
    Attach {
        /// Connection taking the slot.
        connection: ConnectionId,
        /// Requested slot.
        role: Role,
        /// Outcome of the attach.
        reply: oneshot::Sender<Result<AttachOutcome, ProtocolError>>,
    },
    /// A subject's reply.
    Answer {
        /// Sending connection.
        connection: ConnectionId,
        /// Role the connection holds.
        role: Role,
        /// Decoded reply.
        answer: TrialAnswer,
    },
    /// A connection went away.
    Disconnect {
        /// Connection that closed.
        connection: ConnectionId,
        /// Role it held.
        role: Role,
    },
    /// Timer for the trial at `index` fired.
    TrialTimeout {
        /// Trial the timer was armed for.
        index: usize,
        /// Presentation generation the timer was armed in.
        generation: u64,
    },
    /// Abort because the server is stopping.
    Shutdown {
        /// Abort reason.
        reason: String,
    },
    /// Read-only view of the session.
    Snapshot {
        /// Where to send the view.
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Read-only view of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session id.
    pub id: SessionId,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Current trial index while running.
    pub current_index: Option<usize>,
    /// Whether the scenario cursor is live.
    pub scenario_running: bool,
    /// Number of trials.
    pub trial_count: usize,
    /// Occupied roles, in slot order.
    pub attached: Vec<Role>,
}

/// Value published on the status channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusChange {
    /// New status.
    pub status: SessionStatus,
    /// When it was entered.
    pub since: Instant,
}

/// Cloneable client of one coordinator task.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    researcher: ResearcherId,
    mailbox: mpsc::Sender<SessionEvent>,
    status: watch::Receiver<StatusChange>,
}

impl SessionHandle {
    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Researcher allowed to observe.
    pub fn researcher(&self) -> ResearcherId {
        self.researcher
    }

    /// Latest published status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().status
    }

    /// When the session became terminal, if it has.
    pub fn terminal_since(&self) -> Option<Instant> {
        let change = *self.status.borrow();
        change.status.is_terminal().then_some(change.since)
    }

    /// Resolve once the session reaches `target`. False if the coordinator
    /// stopped first.
    pub async fn wait_for_status(&self, target: SessionStatus) -> bool {
        let mut rx = self.status.clone();
        rx.wait_for(|change| change.status == target).await.is_ok()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<StatusChange> {
        self.status.clone()
    }

    /// Ask the coordinator to bind `connection` to `role`.
    pub async fn attach(
        &self,
        connection: ConnectionId,
        role: Role,
    ) -> Result<AttachOutcome, ProtocolError> {
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(SessionEvent::Attach {
                connection,
                role,
                reply,
            })
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Forward a subject reply.
    pub async fn answer(&self, connection: ConnectionId, role: Role, answer: TrialAnswer) {
        self.deliver(SessionEvent::Answer {
            connection,
            role,
            answer,
        })
        .await;
    }

    /// Report that `connection` is gone.
    pub async fn disconnect(&self, connection: ConnectionId, role: Role) {
        self.deliver(SessionEvent::Disconnect { connection, role })
            .await;
    }

    /// Abort the session if it is not already terminal.
    pub async fn shutdown(&self, reason: impl Into<String>) {
        self.deliver(SessionEvent::Shutdown {
            reason: reason.into(),
        })
        .await;
    }

    /// Current view of the session, or `None` if the coordinator stopped.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(SessionEvent::Snapshot { reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    async fn deliver(&self, event: SessionEvent) {
        if self.mailbox.send(event).await.is_err() {
            debug!(session_id = %self.id, "coordinator stopped, event dropped");
        }
    }

    fn closed(&self) -> ProtocolError {
        ProtocolError::State(format!("session {} is closed", self.id))
    }
}

/// The actor. Constructed and driven only through [`SessionCoordinator::spawn`].
pub struct SessionCoordinator {
    session: Session,
    transport: Arc<dyn MessageTransport>,
    clock: Arc<dyn Clock>,
    trial_timeout: Option<Duration>,
    status_tx: watch::Sender<StatusChange>,
    mailbox: mpsc::WeakSender<SessionEvent>,
    trial_started_at: Option<MillisecondTimestamp>,
    generation: u64,
}

impl SessionCoordinator {
    /// Start the coordinator task for `session`.
    ///
    /// The task runs until every [`SessionHandle`] is dropped.
    pub fn spawn(session: Session, deps: &CoordinatorDeps) -> SessionHandle {
        let (tx, rx) = mpsc::channel(deps.options.mailbox_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(StatusChange {
            status: session.status(),
            since: Instant::now(),
        });

        let handle = SessionHandle {
            id: session.id(),
            researcher: session.researcher(),
            mailbox: tx.clone(),
            status: status_rx,
        };

        let span = info_span!("session", session_id = %session.id());
        let coordinator = Self {
            session,
            transport: Arc::clone(&deps.transport),
            clock: Arc::clone(&deps.clock),
            trial_timeout: deps.options.trial_timeout,
            status_tx,
            mailbox: tx.downgrade(),
            trial_started_at: None,
            generation: 0,
        };
        let _task = tokio::spawn(coordinator.run(rx).instrument(span));
        handle
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SessionEvent>) {
        debug!("coordinator started");
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        debug!(status = %self.session.status(), "coordinator stopped");
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Attach {
                connection,
                role,
                reply,
            } => self.on_attach(connection, role, reply),
            SessionEvent::Answer {
                connection,
                role,
                answer,
            } => self.on_answer(connection, role, answer),
            SessionEvent::Disconnect { connection, role } => self.on_disconnect(connection, role),
            SessionEvent::TrialTimeout { index, generation } => self.on_timeout(index, generation),
            SessionEvent::Shutdown { reason } => self.abort(&reason),
            SessionEvent::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn on_attach(
        &mut self,
        connection: ConnectionId,
        role: Role,
        reply: oneshot::Sender<Result<AttachOutcome, ProtocolError>>,
    ) {
        let result = self.session.attach(role, connection);
        match &result {
            Ok(_) => info!(role = %role, connection_id = %connection, "role attached"),
            Err(err) => {
                warn!(role = %role, connection_id = %connection, error = %err, "attach refused");
            }
        }
        let ready = matches!(result, Ok(AttachOutcome::Ready));
        if reply.send(result).is_err() {
            // The connection gave up waiting; free the slot again.
            let _ = self.session.detach(role, connection);
            return;
        }
        if ready {
            self.start();
        }
    }

    fn start(&mut self) {
        let first = match self.session.start() {
            Ok(trial) => TrialPresentation::new(0, trial),
            Err(err) => {
                error!(error = %err, "failed to start session");
                return;
            }
        };
        self.publish_status();
        counter!(SESSIONS_STARTED_TOTAL).increment(1);
        info!(trials = self.session.scenario().len(), "session started");

        self.broadcast(&Envelope::SessionReady);
        self.present(first);
    }

    fn present(&mut self, presentation: TrialPresentation) {
        self.trial_started_at = Some(self.clock.now());
        self.generation += 1;
        let index = presentation.index;
        let envelope = Envelope::TrialPresent(presentation);
        for role in SUBJECTS {
            self.send_to(role, &envelope);
        }
        debug!(index, "trial presented");
        self.arm_timeout(index);
    }

    fn arm_timeout(&self, index: usize) {
        let Some(timeout) = self.trial_timeout else {
            return;
        };
        let generation = self.generation;
        let mailbox = self.mailbox.clone();
        let _timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(SessionEvent::TrialTimeout { index, generation }).await;
            }
        });
    }

    fn on_answer(&mut self, connection: ConnectionId, role: Role, answer: TrialAnswer) {
        if self.session.slot(role).connection() != Some(connection) {
            debug!(role = %role, connection_id = %connection, "answer from non-occupant ignored");
            return;
        }
        if !role.is_subject() {
            self.reject(connection, &ProtocolError::State("observers cannot answer".into()));
            return;
        }
        let current = match (self.session.status(), self.session.scenario().current_index()) {
            (SessionStatus::Running, Some(current)) => current,
            (status, _) => {
                self.reject(
                    connection,
                    &ProtocolError::State(format!("cannot answer while session is {status}")),
                );
                return;
            }
        };

        let index = answer.index;
        match index.cmp(&current) {
            Ordering::Less => {
                debug!(role = %role, index, current, "stale answer discarded");
                return;
            }
            Ordering::Greater => {
                let err = ProtocolError::Validation(format!(
                    "answer for trial {index} but trial {current} is current"
                ));
                let _ = self.transport.send(connection, &Envelope::error(&err));
                return;
            }
            Ordering::Equal => {}
        }

        let ending_time = self.clock.now();
        let result = TrialResult {
            orientation: answer.orientation,
            starting_time: self.trial_started_at.unwrap_or(ending_time),
            ending_time,
        };
        let response_ms = result.duration().num_milliseconds();
        info!(
            role = %role,
            index = current,
            orientation = %answer.orientation,
            response_ms,
            client_timestamp = answer.client_timestamp,
            "trial answered"
        );
        counter!(TRIAL_ANSWERS_TOTAL).increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!(TRIAL_RESPONSE_MS).record(response_ms as f64);

        self.send_to(Role::Observer, &Envelope::SessionResult(result));

        if self.session.scenario().has_next() {
            let next = match self.session.advance() {
                Ok(trial) => TrialPresentation::new(current + 1, trial),
                Err(err) => {
                    error!(error = %err, "failed to advance scenario");
                    return;
                }
            };
            self.present(next);
        } else {
            self.complete();
        }
    }

    fn complete(&mut self) {
        if let Err(err) = self.session.complete() {
            error!(error = %err, "failed to complete session");
            return;
        }
        self.trial_started_at = None;
        self.publish_status();
        counter!(SESSIONS_COMPLETED_TOTAL).increment(1);
        info!("session complete");

        self.broadcast(&Envelope::SessionComplete);
        self.close_all(&CloseReason::complete());
    }

    fn abort(&mut self, reason: &str) {
        if !self.session.abort() {
            debug!(reason, "abort ignored, session already terminal");
            return;
        }
        self.trial_started_at = None;
        self.publish_status();
        counter!(SESSIONS_ABORTED_TOTAL).increment(1);
        warn!(reason, "session aborted");

        self.broadcast(&Envelope::aborted(reason));
        self.close_all(&CloseReason::aborted(reason));
    }

    fn on_disconnect(&mut self, connection: ConnectionId, role: Role) {
        if !self.session.detach(role, connection) {
            debug!(role = %role, connection_id = %connection, "disconnect from non-occupant ignored");
            return;
        }
        info!(role = %role, connection_id = %connection, "role detached");
        if role.is_subject() && !self.session.status().is_terminal() {
            self.abort(&format!("subject {role} disconnected"));
        }
    }

    fn on_timeout(&mut self, index: usize, generation: u64) {
        let current = self.session.scenario().current_index();
        if generation != self.generation
            || self.session.status() != SessionStatus::Running
            || current != Some(index)
        {
            return;
        }
        self.abort(TIMEOUT_REASON);
    }

    fn reject(&self, connection: ConnectionId, err: &ProtocolError) {
        warn!(connection_id = %connection, code = err.code(), error = %err, "closing connection");
        self.transport.close(connection, CloseReason::from_error(err));
    }

    fn send_to(&self, role: Role, envelope: &Envelope) {
        if let Some(connection) = self.session.slot(role).connection() {
            let _ = self.transport.send(connection, envelope);
        }
    }

    fn broadcast(&self, envelope: &Envelope) {
        for (_, connection) in self.session.connections() {
            let _ = self.transport.send(connection, envelope);
        }
    }

    fn close_all(&self, reason: &CloseReason) {
        for (_, connection) in self.session.connections() {
            self.transport.close(connection, reason.clone());
        }
    }

    fn publish_status(&self) {
        let _ = self.status_tx.send_replace(StatusChange {
            status: self.session.status(),
            since: Instant::now(),
        });
    }

    fn snapshot(&self) -> SessionSnapshot {
        let scenario = self.session.scenario();
        SessionSnapshot {
            id: self.session.id(),
            status: self.session.status(),
            current_index: scenario.current_index(),
            scenario_running: scenario.is_running(),
            trial_count: scenario.len(),
            attached: self.session.attached_roles(),
        }
    }
}
