//! Trial value types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

use crate::errors::TrialError;

/// Vertical placement of a trial's arrow row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// Upper half of the screen.
    Top,
    /// Lower half of the screen.
    Bottom,
}

/// Direction an arrow points, and the direction a subject answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Pointing left.
    Left,
    /// Pointing right.
    Right,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "left",
            Self::Right => "right",
        })
    }
}

/// One stimulus: a position and its ordered, non-empty cue row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTrial")]
pub struct Trial {
    position: Position,
    cues: Vec<Orientation>,
}

#[derive(Deserialize)]
struct RawTrial {
    position: Position,
    cues: Vec<Orientation>,
}

impl TryFrom<RawTrial> for Trial {
    type Error = TrialError;

    fn try_from(raw: RawTrial) -> Result<Self, Self::Error> {
        Self::new(raw.position, raw.cues)
    }
}

impl Trial {
    /// Build a trial. Fails with [`TrialError::NoCues`] when `cues` is empty.
    pub fn new(position: Position, cues: Vec<Orientation>) -> Result<Self, TrialError> {
        if cues.is_empty() {
            return Err(TrialError::NoCues);
        }
        Ok(Self { position, cues })
    }

    /// Where the row is drawn.
    pub fn position(&self) -> Position {
        self.position
    }

    /// The cue row, in display order.
    pub fn cues(&self) -> &[Orientation] {
        &self.cues
    }
}

/// Ordered, non-empty list of trials.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Trial>", into = "Vec<Trial>")]
pub struct TrialList(Vec<Trial>);

impl TrialList {
    /// Wrap a list. Fails with [`TrialError::EmptyList`] when `trials` is empty.
    pub fn new(trials: Vec<Trial>) -> Result<Self, TrialError> {
        if trials.is_empty() {
            return Err(TrialError::EmptyList);
        }
        Ok(Self(trials))
    }

    /// Number of trials; always at least one.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Required next to `len` by clippy's `len_without_is_empty`. A list built
    /// through [`TrialList::new`] is never empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Trial at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Trial> {
        self.0.get(index)
    }

    /// Iterate in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Trial> {
        self.0.iter()
    }
}

impl Index<usize> for TrialList {
    type Output = Trial;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl TryFrom<Vec<Trial>> for TrialList {
    type Error = TrialError;

    fn try_from(trials: Vec<Trial>) -> Result<Self, Self::Error> {
        Self::new(trials)
    }
}

impl From<TrialList> for Vec<Trial> {
    fn from(list: TrialList) -> Self {
        list.0
    }
}

impl<'a> IntoIterator for &'a TrialList {
    type Item = &'a Trial;
    type IntoIter = std::slice::Iter<'a, Trial>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
