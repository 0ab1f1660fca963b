//! Branded ID newtypes for type safety.
//!
//! Every identifier is a distinct newtype over [`Uuid`], so a subject id can
//! never be passed where a session id is expected. New ids are UUID v7
//! (time-ordered); parsing accepts any valid UUID and rejects everything else.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

branded_id! {
    /// Unique identifier for an experiment session.
    SessionId
}

branded_id! {
    /// Unique identifier for one of the two paired subjects.
    SubjectId
}

branded_id! {
    /// Unique identifier for the researcher owning a session.
    ResearcherId
}

branded_id! {
    /// Unique identifier for an authored scenario template.
    ScenarioTemplateId
}

branded_id! {
    /// Unique identifier for a live transport connection.
    ConnectionId
}
