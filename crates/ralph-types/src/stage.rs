// Run Stage State Machine
// The transition table is defined once here and consulted by the repository
// on every stage mutation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TaskRequested,
    SpecGenerated,
    SubtasksDispatched,
    PrReviewed,
    MergeDecision,
    DeadLetter,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::TaskRequested => "task_requested",
            Stage::SpecGenerated => "spec_generated",
            Stage::SubtasksDispatched => "subtasks_dispatched",
            Stage::PrReviewed => "pr_reviewed",
            Stage::MergeDecision => "merge_decision",
            Stage::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(value: &str) -> Option<Stage> {
        match value {
            "task_requested" => Some(Stage::TaskRequested),
            "spec_generated" => Some(Stage::SpecGenerated),
            "subtasks_dispatched" => Some(Stage::SubtasksDispatched),
            "pr_reviewed" => Some(Stage::PrReviewed),
            "merge_decision" => Some(Stage::MergeDecision),
            "dead_letter" => Some(Stage::DeadLetter),
            _ => None,
        }
    }

    /// Stages this stage may transition into. DeadLetter is absorbing.
    pub fn permitted_next(self) -> &'static [Stage] {
        match self {
            Stage::TaskRequested => &[Stage::SpecGenerated, Stage::DeadLetter],
            Stage::SpecGenerated => &[Stage::SubtasksDispatched, Stage::DeadLetter],
            Stage::SubtasksDispatched => &[Stage::PrReviewed, Stage::DeadLetter],
            Stage::PrReviewed => &[Stage::MergeDecision, Stage::DeadLetter],
            Stage::MergeDecision => &[Stage::DeadLetter],
            Stage::DeadLetter => &[],
        }
    }

    pub fn allows(self, to: Stage) -> bool {
        self.permitted_next().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::DeadLetter
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_permitted() {
        assert!(Stage::TaskRequested.allows(Stage::SpecGenerated));
        assert!(Stage::SpecGenerated.allows(Stage::SubtasksDispatched));
        assert!(Stage::SubtasksDispatched.allows(Stage::PrReviewed));
        assert!(Stage::PrReviewed.allows(Stage::MergeDecision));
    }

    #[test]
    fn dead_letter_is_reachable_from_every_non_terminal_stage() {
        for stage in [
            Stage::TaskRequested,
            Stage::SpecGenerated,
            Stage::SubtasksDispatched,
            Stage::PrReviewed,
            Stage::MergeDecision,
        ] {
            assert!(stage.allows(Stage::DeadLetter), "{stage} -> dead_letter");
        }
    }

    #[test]
    fn dead_letter_is_absorbing() {
        assert!(Stage::DeadLetter.permitted_next().is_empty());
        assert!(Stage::DeadLetter.is_terminal());
    }

    #[test]
    fn backwards_and_skip_transitions_are_rejected() {
        assert!(!Stage::MergeDecision.allows(Stage::TaskRequested));
        assert!(!Stage::TaskRequested.allows(Stage::SubtasksDispatched));
        assert!(!Stage::SpecGenerated.allows(Stage::SpecGenerated));
    }

    #[test]
    fn parse_round_trips_as_str() {
        for stage in [
            Stage::TaskRequested,
            Stage::SpecGenerated,
            Stage::SubtasksDispatched,
            Stage::PrReviewed,
            Stage::MergeDecision,
            Stage::DeadLetter,
        ] {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("bogus"), None);
    }
}
