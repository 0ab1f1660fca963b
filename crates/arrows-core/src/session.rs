//! Session aggregate: one scenario, two subjects, one researcher, three role slots.
//!
//! The aggregate enforces slot occupancy and status transitions. It does not
//! know about transports or timing; the coordinator drives it and performs the
//! broadcasts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::clock::MillisecondTimestamp;
use crate::errors::ProtocolError;
use crate::ids::{ConnectionId, ResearcherId, SessionId, SubjectId};
use crate::scenario::Scenario;
use crate::trial::{Orientation, Trial};

/// Which of the two paired subjects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectRole {
    /// First subject.
    One,
    /// Second subject.
    Two,
}

/// A connection's role within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// One of the two answering subjects.
    Subject(SubjectRole),
    /// The researcher watching results.
    Observer,
}

impl Role {
    /// Every role, in slot order.
    pub const ALL: [Role; 3] = [
        Role::Subject(SubjectRole::One),
        Role::Subject(SubjectRole::Two),
        Role::Observer,
    ];

    /// Textual form used in routes and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject(SubjectRole::One) => "one",
            Self::Subject(SubjectRole::Two) => "two",
            Self::Observer => "observer",
        }
    }

    /// True for either subject.
    pub fn is_subject(self) -> bool {
        matches!(self, Self::Subject(_))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one" => Ok(Self::Subject(SubjectRole::One)),
            "two" => Ok(Self::Subject(SubjectRole::Two)),
            "observer" => Ok(Self::Observer),
            other => Err(ProtocolError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

/// The two subjects bound to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectsCouple {
    one: SubjectId,
    two: SubjectId,
}

impl SubjectsCouple {
    /// Bind subject `one` and subject `two`.
    pub fn new(one: SubjectId, two: SubjectId) -> Self {
        Self { one, two }
    }

    /// Subject in the given slot.
    pub fn get(&self, role: SubjectRole) -> SubjectId {
        match role {
            SubjectRole::One => self.one,
            SubjectRole::Two => self.two,
        }
    }
}

/// Occupancy of one role slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nobody holds the slot.
    #[default]
    Unattached,
    /// Held by this connection.
    Attached(ConnectionId),
}

impl ConnectionState {
    /// The occupying connection, if any.
    pub fn connection(self) -> Option<ConnectionId> {
        match self {
            Self::Attached(id) => Some(id),
            Self::Unattached => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct RoleSlots {
    one: ConnectionState,
    two: ConnectionState,
    observer: ConnectionState,
}

impl RoleSlots {
    fn get(&self, role: Role) -> ConnectionState {
        match role {
            Role::Subject(SubjectRole::One) => self.one,
            Role::Subject(SubjectRole::Two) => self.two,
            Role::Observer => self.observer,
        }
    }

    fn get_mut(&mut self, role: Role) -> &mut ConnectionState {
        match role {
            Role::Subject(SubjectRole::One) => &mut self.one,
            Role::Subject(SubjectRole::Two) => &mut self.two,
            Role::Observer => &mut self.observer,
        }
    }
}

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Waiting for both subjects.
    Pending,
    /// Trials in progress.
    Running,
    /// Every trial answered.
    Complete,
    /// Ended early.
    Aborted,
}

impl SessionStatus {
    /// Complete and Aborted admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        })
    }
}

/// What an attach changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Slot taken; nothing else changed.
    Attached,
    /// Slot taken and both subjects are now present on a pending session.
    Ready,
}

/// One answered trial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResult {
    /// Direction the subject answered.
    pub orientation: Orientation,
    /// When the trial was presented.
    pub starting_time: MillisecondTimestamp,
    /// When the answer was received.
    pub ending_time: MillisecondTimestamp,
}

impl TrialResult {
    /// Response time, `ending_time - starting_time`.
    pub fn duration(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::milliseconds(self.ending_time.as_millis() - self.starting_time.as_millis())
    }
}

/// The aggregate root.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    scenario: Scenario,
    subjects: SubjectsCouple,
    researcher: ResearcherId,
    slots: RoleSlots,
    status: SessionStatus,
}

impl Session {
    /// A pending session with every slot free.
    pub fn new(
        id: SessionId,
        scenario: Scenario,
        subjects: SubjectsCouple,
        researcher: ResearcherId,
    ) -> Self {
        Self {
            id,
            scenario,
            subjects,
            researcher,
            slots: RoleSlots::default(),
            status: SessionStatus::Pending,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Owning researcher.
    pub fn researcher(&self) -> ResearcherId {
        self.researcher
    }

    /// The paired subjects.
    pub fn subjects(&self) -> SubjectsCouple {
        self.subjects
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Read access to the scenario cursor.
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Slot occupancy for `role`.
    pub fn slot(&self, role: Role) -> ConnectionState {
        self.slots.get(role)
    }

    /// Roles currently held, in slot order.
    pub fn attached_roles(&self) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|role| self.slots.get(*role).connection().is_some())
            .collect()
    }

    /// Every occupied slot with its connection.
    pub fn connections(&self) -> Vec<(Role, ConnectionId)> {
        Role::ALL
            .into_iter()
            .filter_map(|role| self.slots.get(role).connection().map(|c| (role, c)))
            .collect()
    }

    fn subjects_attached(&self) -> bool {
        self.slots.one.connection().is_some() && self.slots.two.connection().is_some()
    }

    /// Bind `connection` to `role`.
    ///
    /// Fails with `State` on a terminal session and `Conflict` when the slot is
    /// already held; the occupant is left untouched either way.
    pub fn attach(
        &mut self,
        role: Role,
        connection: ConnectionId,
    ) -> Result<AttachOutcome, ProtocolError> {
        if self.status.is_terminal() {
            return Err(ProtocolError::State(format!(
                "session {} is {}",
                self.id, self.status
            )));
        }
        let slot = self.slots.get_mut(role);
        if let ConnectionState::Attached(_) = slot {
            return Err(ProtocolError::Conflict(format!("role {role} is already attached")));
        }
        *slot = ConnectionState::Attached(connection);

        if self.status == SessionStatus::Pending && self.subjects_attached() {
            Ok(AttachOutcome::Ready)
        } else {
            Ok(AttachOutcome::Attached)
        }
    }

    /// Free `role` if `connection` holds it. Returns whether anything changed.
    pub fn detach(&mut self, role: Role, connection: ConnectionId) -> bool {
        let slot = self.slots.get_mut(role);
        if *slot == ConnectionState::Attached(connection) {
            *slot = ConnectionState::Unattached;
            true
        } else {
            false
        }
    }

    /// Pending → Running; returns the first trial.
    pub fn start(&mut self) -> Result<&Trial, ProtocolError> {
        if self.status != SessionStatus::Pending {
            return Err(ProtocolError::State(format!(
                "cannot start a {} session",
                self.status
            )));
        }
        let first = self.scenario.run()?;
        self.status = SessionStatus::Running;
        Ok(first)
    }

    /// Move to the next trial while running.
    pub fn advance(&mut self) -> Result<&Trial, ProtocolError> {
        self.ensure_running()?;
        Ok(self.scenario.next()?)
    }

    /// Running → Complete; stops the scenario.
    pub fn complete(&mut self) -> Result<(), ProtocolError> {
        self.ensure_running()?;
        self.scenario.stop();
        self.status = SessionStatus::Complete;
        Ok(())
    }

    /// Any non-terminal status → Aborted. Returns false if already terminal.
    pub fn abort(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.scenario.stop();
        self.status = SessionStatus::Aborted;
        true
    }

    fn ensure_running(&self) -> Result<(), ProtocolError> {
        if self.status == SessionStatus::Running {
            Ok(())
        } else {
            Err(ProtocolError::State(format!("session is {}", self.status)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::trial::{Position, TrialList};
    use assert_matches::assert_matches;

    const ONE: Role = Role::Subject(SubjectRole::One);
    const TWO: Role = Role::Subject(SubjectRole::Two);

    fn session(trials: usize) -> Session {
        let list = (0..trials)
            .map(|_| Trial::new(Position::Top, vec![Orientation::Left]).unwrap())
            .collect();
        Session::new(
            SessionId::new(),
            Scenario::new(TrialList::new(list).unwrap()),
            SubjectsCouple::new(SubjectId::new(), SubjectId::new()),
            ResearcherId::new(),
        )
    }

    #[test]
    fn role_text_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        let err = "three".parse::<Role>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!("One".parse::<Role>().is_err());
    }

    #[test]
    fn second_subject_makes_session_ready() {
        let mut s = session(2);
        assert_eq!(s.attach(Role::Observer, ConnectionId::new()).unwrap(), AttachOutcome::Attached);
        assert_eq!(s.attach(ONE, ConnectionId::new()).unwrap(), AttachOutcome::Attached);
        assert_eq!(s.attach(TWO, ConnectionId::new()).unwrap(), AttachOutcome::Ready);
        assert_eq!(s.attached_roles(), Role::ALL.to_vec());
    }

    #[test]
    fn occupied_slot_is_conflict() {
        let mut s = session(1);
        let first = ConnectionId::new();
        let _ = s.attach(ONE, first).unwrap();
        assert_matches!(s.attach(ONE, ConnectionId::new()), Err(ProtocolError::Conflict(_)));
        assert_eq!(s.slot(ONE), ConnectionState::Attached(first));
    }

    #[test]
    fn terminal_session_rejects_attach() {
        let mut s = session(1);
        assert!(s.abort());
        assert_matches!(s.attach(Role::Observer, ConnectionId::new()), Err(ProtocolError::State(_)));
    }

    #[test]
    fn detach_requires_matching_occupant() {
        let mut s = session(1);
        let held = ConnectionId::new();
        let _ = s.attach(Role::Observer, held).unwrap();
        assert!(!s.detach(Role::Observer, ConnectionId::new()));
        assert!(s.detach(Role::Observer, held));
        assert_eq!(s.slot(Role::Observer), ConnectionState::Unattached);
        assert!(!s.detach(Role::Observer, held));
    }

    #[test]
    fn start_advance_complete() {
        let mut s = session(2);
        let _ = s.start().unwrap();
        assert_eq!(s.status(), SessionStatus::Running);
        assert_matches!(s.start(), Err(ProtocolError::State(_)));
        let _ = s.advance().unwrap();
        assert_matches!(s.advance(), Err(ProtocolError::State(_)));
        s.complete().unwrap();
        assert_eq!(s.status(), SessionStatus::Complete);
        assert!(!s.scenario().is_running());
        assert!(!s.abort());
    }

    #[test]
    fn ready_is_not_repeated_once_running() {
        let mut s = session(2);
        let one = ConnectionId::new();
        let _ = s.attach(ONE, one).unwrap();
        let _ = s.attach(TWO, ConnectionId::new()).unwrap();
        let _ = s.start().unwrap();
        assert!(s.detach(ONE, one));
        assert_eq!(s.attach(ONE, ConnectionId::new()).unwrap(), AttachOutcome::Attached);
    }

    #[test]
    fn abort_stops_scenario() {
        let mut s = session(3);
        let _ = s.start().unwrap();
        assert!(s.abort());
        assert_eq!(s.status(), SessionStatus::Aborted);
        assert!(!s.scenario().is_running());
        assert_matches!(s.complete(), Err(ProtocolError::State(_)));
    }

    #[test]
    fn trial_result_duration_and_wire_form() {
        let result = TrialResult {
            orientation: Orientation::Right,
            starting_time: MillisecondTimestamp::from_millis(1_000),
            ending_time: MillisecondTimestamp::from_millis(1_420),
        };
        assert_eq!(result.duration().num_milliseconds(), 420);
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"orientation": "right", "startingTime": 1000, "endingTime": 1420})
        );
    }

    #[test]
    fn status_terminality() {
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Complete.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
    }
}
