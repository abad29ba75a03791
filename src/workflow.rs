//! Document approval lifecycle.
//!
//! Every legal `(status, action, lineage)` combination is declared once in
//! [`TRANSITIONS`] together with the side effects it triggers. Route handlers
//! look up a [`Transition`] with [`plan`] and then carry out its outcome and
//! effects; nothing else decides which status follows which.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::email::EmailKind;
use crate::models::Document;
use crate::notifications::NotificationKind;
use crate::permissions::Role;

pub const REJECTION_PREFIX: &str = "RECHAZADO";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    PendingApproval,
    Published,
    Archived,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 4] = [
        DocumentStatus::Draft,
        DocumentStatus::PendingApproval,
        DocumentStatus::Published,
        DocumentStatus::Archived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::PendingApproval => "pending_approval",
            DocumentStatus::Published => "published",
            DocumentStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value.trim())
    }

    /// Metadata and files may only change while no review is outstanding
    /// and the row has not been superseded.
    pub fn is_editable(self) -> bool {
        matches!(self, DocumentStatus::Draft | DocumentStatus::Published)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Submit,
    Approve,
    Reject,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Submit => "submit",
            Action::Approve => "approve",
            Action::Reject => "reject",
        }
    }

    pub fn requires_reviewer(self) -> bool {
        matches!(self, Action::Approve | Action::Reject)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a row starts a version chain or supersedes an earlier version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lineage {
    FirstVersion,
    Revision,
}

impl Lineage {
    pub fn of(parent_document_id: Option<Uuid>) -> Self {
        match parent_document_id {
            Some(_) => Lineage::Revision,
            None => Lineage::FirstVersion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Status(DocumentStatus),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    ArchiveParent,
    StampChangeDate,
    PrefixChangeReason,
    NotifyReviewers,
    EmailReviewers,
    NotifyCreator(NotificationKind),
    EmailCreator(EmailKind),
}

impl SideEffect {
    /// Effects that belong to the primary write and run inside its transaction.
    pub fn is_primary(self) -> bool {
        matches!(
            self,
            SideEffect::ArchiveParent
                | SideEffect::StampChangeDate
                | SideEffect::PrefixChangeReason
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DocumentStatus,
    pub action: Action,
    /// `None` matches both lineages.
    pub lineage: Option<Lineage>,
    pub outcome: Outcome,
    pub effects: &'static [SideEffect],
}

impl Transition {
    pub fn has_effect(&self, effect: SideEffect) -> bool {
        self.effects.contains(&effect)
    }

    pub fn primary_effects(&self) -> impl Iterator<Item = SideEffect> + '_ {
        self.effects.iter().copied().filter(|effect| effect.is_primary())
    }

    pub fn best_effort_effects(&self) -> impl Iterator<Item = SideEffect> + '_ {
        self.effects
            .iter()
            .copied()
            .filter(|effect| !effect.is_primary())
    }
}

const SUBMIT_EFFECTS: &[SideEffect] = &[SideEffect::NotifyReviewers, SideEffect::EmailReviewers];

pub const TRANSITIONS: &[Transition] = &[
    Transition {
        from: DocumentStatus::Draft,
        action: Action::Submit,
        lineage: None,
        outcome: Outcome::Status(DocumentStatus::PendingApproval),
        effects: SUBMIT_EFFECTS,
    },
    Transition {
        from: DocumentStatus::PendingApproval,
        action: Action::Approve,
        lineage: Some(Lineage::Revision),
        outcome: Outcome::Status(DocumentStatus::Published),
        effects: &[
            SideEffect::ArchiveParent,
            SideEffect::StampChangeDate,
            SideEffect::NotifyCreator(NotificationKind::Approved),
            SideEffect::EmailCreator(EmailKind::DocumentApproved),
        ],
    },
    Transition {
        from: DocumentStatus::PendingApproval,
        action: Action::Approve,
        lineage: Some(Lineage::FirstVersion),
        outcome: Outcome::Status(DocumentStatus::Published),
        effects: &[
            SideEffect::StampChangeDate,
            SideEffect::NotifyCreator(NotificationKind::Approved),
            SideEffect::EmailCreator(EmailKind::DocumentApproved),
        ],
    },
    Transition {
        from: DocumentStatus::PendingApproval,
        action: Action::Reject,
        lineage: Some(Lineage::FirstVersion),
        outcome: Outcome::Status(DocumentStatus::Draft),
        effects: &[
            SideEffect::PrefixChangeReason,
            SideEffect::NotifyCreator(NotificationKind::Rejected),
            SideEffect::EmailCreator(EmailKind::DocumentRejected),
        ],
    },
    Transition {
        from: DocumentStatus::PendingApproval,
        action: Action::Reject,
        lineage: Some(Lineage::Revision),
        outcome: Outcome::Delete,
        effects: &[
            SideEffect::NotifyCreator(NotificationKind::Rejected),
            SideEffect::EmailCreator(EmailKind::DocumentRejected),
        ],
    },
];

/// Side effects of a brand-new submission: creating a document directly in
/// review or filing a new revision behaves like `draft -> pending_approval`.
pub fn submission_effects() -> &'static [SideEffect] {
    SUBMIT_EFFECTS
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("cannot {action} a document in status {from}")]
    IllegalTransition {
        from: DocumentStatus,
        action: Action,
    },
    #[error("document is no longer {expected}; reload and try again")]
    StaleStatus { expected: DocumentStatus },
    #[error("only gerencia or admin users may review documents")]
    ReviewerRequired,
    #[error("a rejection reason is required")]
    MissingReason,
}

pub fn plan(
    from: DocumentStatus,
    action: Action,
    lineage: Lineage,
) -> Result<&'static Transition, WorkflowError> {
    TRANSITIONS
        .iter()
        .find(|transition| {
            transition.from == from
                && transition.action == action
                && transition.lineage.map_or(true, |expected| expected == lineage)
        })
        .ok_or(WorkflowError::IllegalTransition { from, action })
}

pub fn authorize(action: Action, role: Role) -> Result<(), WorkflowError> {
    if action.requires_reviewer() && !role.is_reviewer() {
        return Err(WorkflowError::ReviewerRequired);
    }
    Ok(())
}

pub fn rejection_reason(reason: Option<&str>) -> Result<String, WorkflowError> {
    reason
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(str::to_string)
        .ok_or(WorkflowError::MissingReason)
}

pub fn prefix_rejection(reason: &str, previous: Option<&str>) -> String {
    match previous.map(str::trim).filter(|value| !value.is_empty()) {
        Some(previous) => format!("{REJECTION_PREFIX}: {reason} | {previous}"),
        None => format!("{REJECTION_PREFIX}: {reason}"),
    }
}

/// Metadata compared when deciding whether an edit changes anything.
/// `name` is fixed once the chain exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackedFields {
    pub objective: Option<String>,
    pub scope: Option<String>,
    pub responsible: Option<String>,
    pub storage_location: Option<String>,
    pub retention_period: Option<String>,
    pub final_disposition: Option<String>,
}

impl TrackedFields {
    pub fn from_document(document: &Document) -> Self {
        Self {
            objective: document.objective.clone(),
            scope: document.scope.clone(),
            responsible: document.responsible.clone(),
            storage_location: document.storage_location.clone(),
            retention_period: document.retention_period.clone(),
            final_disposition: document.final_disposition.clone(),
        }
    }

    pub fn changed_fields(&self, other: &TrackedFields) -> Vec<&'static str> {
        let pairs = [
            ("objective", &self.objective, &other.objective),
            ("scope", &self.scope, &other.scope),
            ("responsible", &self.responsible, &other.responsible),
            (
                "storage_location",
                &self.storage_location,
                &other.storage_location,
            ),
            (
                "retention_period",
                &self.retention_period,
                &other.retention_period,
            ),
            (
                "final_disposition",
                &self.final_disposition,
                &other.final_disposition,
            ),
        ];
        pairs
            .into_iter()
            .filter(|(_, left, right)| left != right)
            .map(|(field, _, _)| field)
            .collect()
    }
}

/// Submitted values. `None` means the field was not sent and keeps its
/// current value; an empty string clears it.
#[derive(Debug, Clone, Default)]
pub struct FieldEdits {
    pub objective: Option<String>,
    pub scope: Option<String>,
    pub responsible: Option<String>,
    pub storage_location: Option<String>,
    pub retention_period: Option<String>,
    pub final_disposition: Option<String>,
}

impl FieldEdits {
    pub fn apply(&self, current: &TrackedFields) -> TrackedFields {
        fn merge(edit: &Option<String>, current: &Option<String>) -> Option<String> {
            match edit {
                None => current.clone(),
                Some(value) => {
                    let trimmed = value.trim();
                    (!trimmed.is_empty()).then(|| trimmed.to_string())
                }
            }
        }

        TrackedFields {
            objective: merge(&self.objective, &current.objective),
            scope: merge(&self.scope, &current.scope),
            responsible: merge(&self.responsible, &current.responsible),
            storage_location: merge(&self.storage_location, &current.storage_location),
            retention_period: merge(&self.retention_period, &current.retention_period),
            final_disposition: merge(&self.final_disposition, &current.final_disposition),
        }
    }

    pub fn into_fields(self) -> TrackedFields {
        self.apply(&TrackedFields::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditKind {
    /// Nothing differs and no file was attached.
    Unchanged,
    /// Metadata differs, no file: applied in place without a status change.
    DirectUpdate { changed: Vec<&'static str> },
    /// A replacement file always goes through review.
    RequiresReview,
}

pub fn classify_edit(current: &TrackedFields, edited: &TrackedFields, has_new_file: bool) -> EditKind {
    if has_new_file {
        return EditKind::RequiresReview;
    }
    let changed = current.changed_fields(edited);
    if changed.is_empty() {
        EditKind::Unchanged
    } else {
        EditKind::DirectUpdate { changed }
    }
}
