//! Authored, reusable trial lists.

use serde::{Deserialize, Serialize};

use crate::errors::TemplateError;
use crate::ids::{ResearcherId, ScenarioTemplateId};
use crate::scenario::Scenario;
use crate::trial::{Trial, TrialList};

/// A named, bounded list of trials owned by a researcher.
///
/// Templates are only read at run time: [`ScenarioTemplate::to_scenario`]
/// mints an independent [`Scenario`] with its own cursor on every call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioTemplate {
    id: ScenarioTemplateId,
    author: ResearcherId,
    name: String,
    capacity: usize,
    sequences: Vec<Trial>,
}

impl ScenarioTemplate {
    /// Empty template holding at most `capacity` trials.
    pub fn new(
        id: ScenarioTemplateId,
        author: ResearcherId,
        name: impl Into<String>,
        capacity: usize,
    ) -> Self {
        Self {
            id,
            author,
            name: name.into(),
            capacity,
            sequences: Vec::new(),
        }
    }

    /// Template identifier.
    pub fn id(&self) -> ScenarioTemplateId {
        self.id
    }

    /// Researcher who authored the template.
    pub fn author(&self) -> ResearcherId {
        self.author
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of trials.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of trials authored so far.
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// True before the first trial is added.
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Append a trial.
    pub fn add_sequence(&mut self, trial: Trial) -> Result<(), TemplateError> {
        if self.sequences.len() >= self.capacity {
            return Err(TemplateError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.sequences.push(trial);
        Ok(())
    }

    /// Overwrite the trial at `index`; the slot must already be filled.
    pub fn replace_sequence(&mut self, index: usize, trial: Trial) -> Result<(), TemplateError> {
        let len = self.sequences.len();
        let slot = self
            .sequences
            .get_mut(index)
            .ok_or(TemplateError::OutOfRange { index, len })?;
        *slot = trial;
        Ok(())
    }

    /// Trial at `index`, if authored.
    pub fn sequence(&self, index: usize) -> Option<&Trial> {
        self.sequences.get(index)
    }

    /// Mint a fresh, not-yet-running scenario.
    pub fn to_scenario(&self) -> Result<Scenario, TemplateError> {
        let trials = TrialList::new(self.sequences.clone()).map_err(|_| TemplateError::Empty)?;
        Ok(Scenario::new(trials))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::{Orientation, Position};
    use assert_matches::assert_matches;

    fn template(capacity: usize) -> ScenarioTemplate {
        ScenarioTemplate::new(
            ScenarioTemplateId::new(),
            ResearcherId::new(),
            "flankers",
            capacity,
        )
    }

    fn trial(position: Position, cue: Orientation) -> Trial {
        Trial::new(position, vec![cue, cue, cue]).unwrap()
    }

    #[test]
    fn add_respects_capacity() {
        let mut t = template(2);
        t.add_sequence(trial(Position::Top, Orientation::Left)).unwrap();
        t.add_sequence(trial(Position::Top, Orientation::Right)).unwrap();
        assert_matches!(
            t.add_sequence(trial(Position::Bottom, Orientation::Left)),
            Err(TemplateError::CapacityExceeded { capacity: 2 })
        );
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn replace_on_empty_template_fails() {
        let mut t = template(4);
        assert_matches!(
            t.replace_sequence(0, trial(Position::Top, Orientation::Left)),
            Err(TemplateError::OutOfRange { index: 0, len: 0 })
        );
    }

    #[test]
    fn replace_overwrites_existing_slot() {
        let mut t = template(4);
        t.add_sequence(trial(Position::Top, Orientation::Left)).unwrap();
        let replacement = trial(Position::Bottom, Orientation::Right);
        t.replace_sequence(0, replacement.clone()).unwrap();
        assert_eq!(t.sequence(0), Some(&replacement));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn empty_template_cannot_mint_scenario() {
        assert_matches!(template(1).to_scenario(), Err(TemplateError::Empty));
    }

    #[test]
    fn each_scenario_has_its_own_cursor() {
        let mut t = template(4);
        t.add_sequence(trial(Position::Top, Orientation::Left)).unwrap();
        t.add_sequence(trial(Position::Bottom, Orientation::Right)).unwrap();

        let mut first = t.to_scenario().unwrap();
        let _ = first.run().unwrap();
        let _ = first.next().unwrap();

        let second = t.to_scenario().unwrap();
        assert!(!second.is_running());
        assert_eq!(second.len(), 2);
        assert_eq!(first.current_index(), Some(1));
    }

    #[test]
    fn accessors() {
        let t = template(3);
        assert_eq!(t.name(), "flankers");
        assert_eq!(t.capacity(), 3);
        assert!(t.is_empty());
    }
}
