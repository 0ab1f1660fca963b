//! # arrows-core
//!
//! Domain vocabulary for the arrows experiment. Everything here is pure: no I/O,
//! no async, no clocks other than the [`clock::Clock`] seam.
//!
//! - **Branded IDs**: `SessionId`, `SubjectId`, `ResearcherId`, ... as UUID newtypes
//! - **Trials**: [`trial::Position`], [`trial::Orientation`], [`trial::Trial`], [`trial::TrialList`]
//! - **Scenario**: the run cursor over a trial list ([`scenario::Scenario`])
//! - **Templates**: authored, reusable trial lists ([`template::ScenarioTemplate`])
//! - **Session**: the aggregate root bound to two subjects and a researcher
//! - **Errors**: the protocol error taxonomy shared by router and coordinator

#![deny(unsafe_code)]

pub mod clock;
pub mod errors;
pub mod ids;
pub mod scenario;
pub mod session;
pub mod template;
pub mod trial;

pub use clock::{Clock, ManualClock, MillisecondTimestamp, SystemClock};
pub use errors::{ErrorKind, ProtocolError, ScenarioError, TemplateError, TrialError};
pub use ids::{ConnectionId, ResearcherId, ScenarioTemplateId, SessionId, SubjectId};
pub use scenario::{RunState, Scenario};
pub use session::{
    AttachOutcome, ConnectionState, Role, Session, SessionStatus, SubjectRole, SubjectsCouple,
    TrialResult,
};
pub use template::ScenarioTemplate;
pub use trial::{Orientation, Position, Trial, TrialList};
