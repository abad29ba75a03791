//! Improvement action lifecycle: `open -> in_progress -> closed`.
//!
//! Closing records a verdict. `SI` closes and archives the action; `NO`
//! closes it but keeps it visible with a follow-up note and an email to the
//! responsible user.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CODE_PREFIX: &str = "AM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Open,
    InProgress,
    Closed,
}

impl ActionStatus {
    pub const ALL: [ActionStatus; 3] = [
        ActionStatus::Open,
        ActionStatus::InProgress,
        ActionStatus::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Open => "open",
            ActionStatus::InProgress => "in_progress",
            ActionStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value.trim())
    }

    pub fn is_editable(self) -> bool {
        self != ActionStatus::Closed
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClosureVerdict {
    #[serde(rename = "SI")]
    Si,
    #[serde(rename = "NO")]
    No,
}

impl ClosureVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            ClosureVerdict::Si => "SI",
            ClosureVerdict::No => "NO",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ImprovementError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SI" => Ok(ClosureVerdict::Si),
            "NO" => Ok(ClosureVerdict::No),
            _ => Err(ImprovementError::InvalidVerdict(value.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Start,
    Close(ClosureVerdict),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Start => f.write_str("start"),
            Step::Close(verdict) => write!(f, "close ({})", verdict.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTransition {
    pub from: ActionStatus,
    pub step: Step,
    pub to: ActionStatus,
    pub archive: bool,
    pub follow_up: bool,
}

pub const STEPS: &[StepTransition] = &[
    StepTransition {
        from: ActionStatus::Open,
        step: Step::Start,
        to: ActionStatus::InProgress,
        archive: false,
        follow_up: false,
    },
    StepTransition {
        from: ActionStatus::InProgress,
        step: Step::Close(ClosureVerdict::Si),
        to: ActionStatus::Closed,
        archive: true,
        follow_up: false,
    },
    StepTransition {
        from: ActionStatus::InProgress,
        step: Step::Close(ClosureVerdict::No),
        to: ActionStatus::Closed,
        archive: false,
        follow_up: true,
    },
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImprovementError {
    #[error("cannot {step} an improvement action in status {from}")]
    IllegalStep { from: ActionStatus, step: Step },
    #[error("improvement action is no longer {expected}; reload and try again")]
    StaleStatus { expected: ActionStatus },
    #[error("closed improvement actions cannot be edited")]
    Closed,
    #[error("closure verdict must be SI or NO, got '{0}'")]
    InvalidVerdict(String),
    #[error("closure notes are required when the action was not effective")]
    MissingNotes,
}

pub fn plan_step(from: ActionStatus, step: Step) -> Result<&'static StepTransition, ImprovementError> {
    STEPS
        .iter()
        .find(|transition| transition.from == from && transition.step == step)
        .ok_or(ImprovementError::IllegalStep { from, step })
}

/// An ineffective closure must say what is still pending.
pub fn closure_notes(
    verdict: ClosureVerdict,
    notes: Option<&str>,
) -> Result<Option<String>, ImprovementError> {
    let notes = notes
        .map(str::trim)
        .filter(|notes| !notes.is_empty())
        .map(str::to_string);
    match (verdict, notes) {
        (ClosureVerdict::No, None) => Err(ImprovementError::MissingNotes),
        (_, notes) => Ok(notes),
    }
}

/// Appends `[YYYY-MM-DD] notes` as a new line of the follow-up log.
pub fn append_follow_up(existing: Option<&str>, on: NaiveDate, notes: &str) -> String {
    let entry = format!("[{}] {}", on.format("%Y-%m-%d"), notes.trim());
    match existing.map(str::trim_end).filter(|log| !log.is_empty()) {
        Some(log) => format!("{log}\n{entry}"),
        None => entry,
    }
}

/// `AM-0001`, `AM-0002`, ... following the highest existing code.
pub fn next_action_code<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let highest = existing
        .into_iter()
        .filter_map(|code| code.strip_prefix(CODE_PREFIX)?.strip_prefix('-')?.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("{CODE_PREFIX}-{:04}", highest + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_actions_can_only_be_started() {
        let step = plan_step(ActionStatus::Open, Step::Start).expect("start");
        assert_eq!(step.to, ActionStatus::InProgress);
        assert!(plan_step(ActionStatus::Open, Step::Close(ClosureVerdict::Si)).is_err());
    }

    #[test]
    fn effective_closure_archives() {
        let step = plan_step(ActionStatus::InProgress, Step::Close(ClosureVerdict::Si))
            .expect("close");
        assert_eq!(step.to, ActionStatus::Closed);
        assert!(step.archive);
        assert!(!step.follow_up);
    }

    #[test]
    fn ineffective_closure_stays_visible_with_follow_up() {
        let step = plan_step(ActionStatus::InProgress, Step::Close(ClosureVerdict::No))
            .expect("close");
        assert_eq!(step.to, ActionStatus::Closed);
        assert!(!step.archive);
        assert!(step.follow_up);
    }

    #[test]
    fn closed_is_terminal() {
        for step in [
            Step::Start,
            Step::Close(ClosureVerdict::Si),
            Step::Close(ClosureVerdict::No),
        ] {
            assert_eq!(
                plan_step(ActionStatus::Closed, step),
                Err(ImprovementError::IllegalStep {
                    from: ActionStatus::Closed,
                    step
                })
            );
        }
        assert!(!ActionStatus::Closed.is_editable());
    }

    #[test]
    fn verdicts_parse_case_insensitively() {
        assert_eq!(ClosureVerdict::parse("si"), Ok(ClosureVerdict::Si));
        assert_eq!(ClosureVerdict::parse(" NO "), Ok(ClosureVerdict::No));
        assert_eq!(
            ClosureVerdict::parse("maybe"),
            Err(ImprovementError::InvalidVerdict("maybe".into()))
        );
    }

    #[test]
    fn ineffective_closure_needs_notes() {
        assert_eq!(
            closure_notes(ClosureVerdict::No, Some("  ")),
            Err(ImprovementError::MissingNotes)
        );
        assert_eq!(closure_notes(ClosureVerdict::Si, None), Ok(None));
        assert_eq!(
            closure_notes(ClosureVerdict::No, Some(" retrain staff ")),
            Ok(Some("retrain staff".into()))
        );
    }

    #[test]
    fn follow_up_log_grows_line_by_line() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 2).expect("date");
        let first = append_follow_up(None, day, "retrain staff");
        assert_eq!(first, "[2024-05-02] retrain staff");
        let second = append_follow_up(Some(&first), day, "audit again");
        assert_eq!(second, "[2024-05-02] retrain staff\n[2024-05-02] audit again");
    }

    #[test]
    fn codes_continue_from_the_highest() {
        assert_eq!(next_action_code([]), "AM-0001");
        assert_eq!(next_action_code(["AM-0002", "AM-0010", "XX-9999"]), "AM-0011");
    }
}
