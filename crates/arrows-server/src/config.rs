//! Server configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. Merge the JSON file given on the command line, or `arrows.json` if present
//! 3. Merge `ARROWS_`-prefixed environment variables (`__` separates nesting,
//!    e.g. `ARROWS_SERVER__PORT=9000`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use arrows_core::{
    ResearcherId, Scenario, Session, SessionId, SubjectId, SubjectsCouple, TrialList,
};
use arrows_telemetry::TelemetryConfig;
use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// File merged when no `--config` path is given and it exists in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "arrows.json";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ARROWS_";

/// Errors that can occur when loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// An explicitly requested config file does not exist.
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// Merging or extracting the layered configuration failed.
    #[error("failed to load settings: {0}")]
    Figment(#[from] Box<figment::Error>),
    /// A value parsed but is unusable.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Listener and per-connection limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Outbound messages buffered per connection before sends are dropped.
    pub send_queue_capacity: usize,
    /// Ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Consecutive undecodable messages tolerated before the connection is closed.
    pub max_consecutive_malformed: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            send_queue_capacity: 64,
            heartbeat_interval_secs: 30,
            max_message_size: 64 * 1024,
            max_consecutive_malformed: 5,
        }
    }
}

impl ServerConfig {
    /// Heartbeat interval as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Token verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 shared secret. Must be set.
    pub jwt_secret: String,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            leeway_secs: 30,
        }
    }
}

/// Session lifecycle hardening. Both limits are off unless configured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Abort a running session whose current trial stays unanswered this long.
    pub trial_timeout_secs: Option<u64>,
    /// Evict terminal sessions after this long.
    pub ttl_secs: Option<u64>,
    /// How often the eviction sweep runs.
    pub sweep_interval_secs: u64,
    /// Coordinator mailbox size.
    pub mailbox_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            trial_timeout_secs: None,
            ttl_secs: None,
            sweep_interval_secs: 60,
            mailbox_capacity: 64,
        }
    }
}

impl SessionConfig {
    /// Configured trial timeout.
    pub fn trial_timeout(&self) -> Option<Duration> {
        self.trial_timeout_secs.map(Duration::from_secs)
    }

    /// Configured terminal-session TTL.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

/// The two subjects of a scheduled session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledSubjects {
    /// Subject in slot `one`.
    pub one: SubjectId,
    /// Subject in slot `two`.
    pub two: SubjectId,
}

/// A session created at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledSession {
    /// Session id used in the socket route.
    pub id: SessionId,
    /// Paired subjects.
    pub subjects: ScheduledSubjects,
    /// Researcher allowed to observe.
    pub researcher: ResearcherId,
    /// Trials, in presentation order.
    pub trials: TrialList,
}

impl ScheduledSession {
    /// Build the pending aggregate.
    pub fn into_session(self) -> Session {
        Session::new(
            self.id,
            Scenario::new(self.trials),
            SubjectsCouple::new(self.subjects.one, self.subjects.two),
            self.researcher,
        )
    }
}

/// Complete application settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Listener settings.
    pub server: ServerConfig,
    /// Token verification.
    pub auth: AuthConfig,
    /// Session hardening.
    pub session: SessionConfig,
    /// Logging.
    pub telemetry: TelemetryConfig,
    /// Sessions to create at startup.
    pub schedule: Vec<ScheduledSession>,
}

impl Settings {
    /// The layered figment without environment overrides.
    pub fn figment(path: Option<&Path>) -> Result<Figment, SettingsError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        match path {
            Some(path) if !path.exists() => return Err(SettingsError::NotFound(path.to_path_buf())),
            Some(path) => {
                debug!(?path, "loading settings file");
                figment = figment.merge(Json::file(path));
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                debug!(path = DEFAULT_CONFIG_FILE, "loading default settings file");
                figment = figment.merge(Json::file(DEFAULT_CONFIG_FILE));
            }
            None => debug!("no settings file, using defaults"),
        }
        Ok(figment)
    }

    /// Extract and validate.
    pub fn from_figment(figment: &Figment) -> Result<Self, SettingsError> {
        let settings: Settings = figment.extract().map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults, then file, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let figment = Self::figment(path)?.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(&figment)
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.jwt_secret must be set".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.send_queue_capacity must be positive".into(),
            ));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeat_interval_secs must be positive".into(),
            ));
        }
        if self.server.max_consecutive_malformed == 0 {
            return Err(SettingsError::InvalidValue(
                "server.max_consecutive_malformed must be positive".into(),
            ));
        }
        if self.session.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "session.mailbox_capacity must be positive".into(),
            ));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "session.sweep_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}
