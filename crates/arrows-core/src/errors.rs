//! Error taxonomy.
//!
//! Domain operations fail with small, specific enums ([`TrialError`],
//! [`ScenarioError`], [`TemplateError`]). Anything that reaches a connection is
//! a [`ProtocolError`], which carries a machine code for the `error` envelope
//! and a WebSocket close code for terminating the offending connection.

use std::fmt;

/// Failures constructing trials and trial lists.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TrialError {
    /// A trial needs at least one orientation cue.
    #[error("trial must carry at least one cue")]
    NoCues,
    /// A trial list needs at least one trial.
    #[error("trial list must not be empty")]
    EmptyList,
}

/// Failures driving the scenario cursor.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScenarioError {
    /// `run()` on a scenario that is already running.
    #[error("scenario is already running")]
    AlreadyRunning,
    /// Cursor access on a scenario that is not running.
    #[error("scenario is not running")]
    NotRunning,
    /// `next()` while positioned on the last trial.
    #[error("no trial after index {0}")]
    NoNextTrial(usize),
}

/// Failures editing a scenario template.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// The template already holds `capacity` trials.
    #[error("template is full ({capacity} trials)")]
    CapacityExceeded {
        /// Maximum number of trials.
        capacity: usize,
    },
    /// No trial exists at the given index.
    #[error("no trial at index {index} (template holds {len})")]
    OutOfRange {
        /// Requested index.
        index: usize,
        /// Current number of trials.
        len: usize,
    },
    /// A scenario cannot be minted from an empty template.
    #[error("template has no trials")]
    Empty,
}

/// Classification of a [`ProtocolError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed path, payload or message.
    Validation,
    /// Missing, invalid or expired credentials.
    Authentication,
    /// Valid credentials lacking the privilege for the role.
    Authorization,
    /// Unknown session.
    NotFound,
    /// Role slot already occupied.
    Conflict,
    /// Operation not valid in the current session or scenario state.
    State,
}

impl ErrorKind {
    /// Machine-readable code sent in `error` envelopes and metric labels.
    pub fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::Authorization => "AUTHORIZATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::State => "STATE_ERROR",
        }
    }

    /// WebSocket close code (private-use range, HTTP status + 4000).
    pub fn close_code(self) -> u16 {
        match self {
            Self::Validation => 4400,
            Self::Authentication => 4401,
            Self::Authorization => 4403,
            Self::NotFound => 4404,
            Self::Conflict => 4409,
            Self::State => 4412,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error surfaced to a connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Malformed path, payload or message.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Missing, invalid or expired credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Credentials lack the privilege for the requested role.
    #[error("not authorized: {0}")]
    Authorization(String),
    /// Unknown session.
    #[error("not found: {0}")]
    NotFound(String),
    /// Role slot already occupied.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Operation not valid in the current state.
    #[error("invalid state: {0}")]
    State(String),
}

impl ProtocolError {
    /// Build an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Validation => Self::Validation(message),
            ErrorKind::Authentication => Self::Authentication(message),
            ErrorKind::Authorization => Self::Authorization(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Conflict => Self::Conflict(message),
            ErrorKind::State => Self::State(message),
        }
    }

    /// The error's classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::State(_) => ErrorKind::State,
        }
    }

    /// Human-readable detail without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::Authentication(m)
            | Self::Authorization(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::State(m) => m,
        }
    }

    /// Shorthand for `self.kind().code()`.
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Shorthand for `self.kind().close_code()`.
    pub fn close_code(&self) -> u16 {
        self.kind().close_code()
    }
}

impl From<ScenarioError> for ProtocolError {
    fn from(err: ScenarioError) -> Self {
        Self::State(err.to_string())
    }
}

impl From<TrialError> for ProtocolError {
    fn from(err: TrialError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<TemplateError> for ProtocolError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::CapacityExceeded { .. } | TemplateError::OutOfRange { .. } => {
                Self::Validation(err.to_string())
            }
            TemplateError::Empty => Self::State(err.to_string()),
        }
    }
}
