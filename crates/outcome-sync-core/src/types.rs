//! Core types for Outcome Sync
//!
//! Defines the fundamental records flowing through a reconciliation pass:
//! - Remote identifiers (course, user, enrollment, submission, outcome)
//! - Outcome rollups and the outcome catalog
//! - Decisions, update requests and verification mismatches
//! - The per-pass report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow as string slice
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Course identifier
    CourseId
);
string_id!(
    /// Student user identifier
    UserId
);
string_id!(
    /// Course enrollment identifier
    EnrollmentId
);
string_id!(
    /// Assignment submission identifier
    SubmissionId
);
string_id!(
    /// Learning outcome identifier
    OutcomeId
);
string_id!(
    /// Assignment identifier
    AssignmentId
);

/// Round to exactly two decimal places, half away from zero
#[inline]
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Strict tolerance check on the absolute difference of two values
///
/// The difference is snapped to 1e-9 first so that `a = b + tolerance` sits
/// exactly on the boundary instead of drifting above it.
#[inline]
#[must_use]
pub fn exceeds_tolerance(actual: f64, expected: f64, tolerance: f64) -> bool {
    let diff = ((actual - expected).abs() * 1e9).round() / 1e9;
    diff > tolerance
}

/// A single outcome score inside a rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeScore {
    /// Outcome this score belongs to
    pub outcome_id: OutcomeId,
    /// Score value; `None` when the remote reported a non-numeric score
    pub score: Option<f64>,
}

impl OutcomeScore {
    /// Create numeric score
    #[inline]
    #[must_use]
    pub fn new(outcome_id: impl Into<OutcomeId>, score: f64) -> Self {
        Self {
            outcome_id: outcome_id.into(),
            score: Some(score),
        }
    }

    /// Score the remote left empty
    #[inline]
    #[must_use]
    pub fn missing(outcome_id: impl Into<OutcomeId>) -> Self {
        Self {
            outcome_id: outcome_id.into(),
            score: None,
        }
    }

    /// Numeric value, if finite
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        self.score.filter(|s| s.is_finite())
    }
}

/// Per-student aggregated outcome scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRollup {
    /// Student; absent when the remote omitted the user link
    pub user_id: Option<UserId>,
    /// Scores in remote order
    pub scores: Vec<OutcomeScore>,
}

impl OutcomeRollup {
    /// Create rollup for a student
    #[inline]
    #[must_use]
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            scores: Vec::new(),
        }
    }

    /// With an additional numeric score
    #[inline]
    #[must_use]
    pub fn with_score(mut self, outcome_id: impl Into<OutcomeId>, score: f64) -> Self {
        self.scores.push(OutcomeScore::new(outcome_id, score));
        self
    }

    /// Score recorded under a given outcome
    #[must_use]
    pub fn score_for(&self, outcome_id: &OutcomeId) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| &s.outcome_id == outcome_id)
            .and_then(OutcomeScore::value)
    }
}

/// Outcome id to display title
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutcomeCatalog(pub HashMap<OutcomeId, String>);

impl OutcomeCatalog {
    /// Create empty catalog
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With an outcome title
    #[inline]
    #[must_use]
    pub fn with_title(mut self, outcome_id: impl Into<OutcomeId>, title: impl Into<String>) -> Self {
        self.0.insert(outcome_id.into(), title.into());
        self
    }

    /// Title for an outcome
    #[inline]
    #[must_use]
    pub fn title(&self, outcome_id: &OutcomeId) -> Option<&str> {
        self.0.get(outcome_id).map(String::as_str)
    }
}

/// Rollups plus catalog, as read once per pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupData {
    /// One rollup per student
    pub rollups: Vec<OutcomeRollup>,
    /// Outcome titles
    pub catalog: OutcomeCatalog,
}

/// A student whose grade needs correcting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Student
    pub user_id: UserId,
    /// Target outcome average, two decimals
    pub average: f64,
}

/// Currently recorded override percentages keyed by user id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideGradeSnapshot(pub HashMap<UserId, f64>);

impl OverrideGradeSnapshot {
    /// Empty snapshot
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Recorded percentage for a student
    #[inline]
    #[must_use]
    pub fn get(&self, user_id: &UserId) -> Option<f64> {
        self.0.get(user_id).copied()
    }

    /// Number of recorded overrides
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no overrides are recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Mutation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GradeAction {
    /// Insufficient evidence: clear the rubric points
    #[serde(rename = "IE")]
    InsufficientEvidence,
    /// Record the rubric points
    Score,
}

/// Unit of work for the unified grade mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeUpdateRequest {
    /// Enrollment whose override is set
    pub enrollment_id: EnrollmentId,
    /// Submission that receives the assessment and comment
    pub submission_id: SubmissionId,
    /// Rubric association of the assignment
    pub rubric_association_id: String,
    /// Rubric criterion holding the average
    pub rubric_criterion_id: String,
    /// IE or SCORE
    pub action: GradeAction,
    /// Override percentage
    pub override_score: Option<f64>,
    /// Raw rubric points (ignored in IE mode)
    pub rubric_points: Option<f64>,
    /// Submission comment text
    pub comment: String,
}

/// Why verification flagged a student
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchReason {
    /// No override recorded at all
    Missing,
}

/// One student whose remote override did not converge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Student
    pub user_id: UserId,
    /// Enrollment, if the resolver knew it
    pub enrollment_id: Option<EnrollmentId>,
    /// Expected override percentage
    pub expected: f64,
    /// Recorded override percentage
    pub actual: Option<f64>,
    /// `actual - expected`
    pub diff: Option<f64>,
    /// Set when the override is absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<MismatchReason>,
}

/// Identifiers needed to mutate one student's grade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentHandles {
    /// Course enrollment
    pub enrollment_id: EnrollmentId,
    /// Submission for the target assignment
    pub submission_id: SubmissionId,
}

/// Assignment-level rubric coordinates used to build update requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricTarget {
    /// Rubric association of the assignment
    pub rubric_association_id: String,
    /// Criterion receiving the average
    pub rubric_criterion_id: String,
}

impl RubricTarget {
    /// Create rubric target
    #[inline]
    #[must_use]
    pub fn new(rubric_association_id: impl Into<String>, rubric_criterion_id: impl Into<String>) -> Self {
        Self {
            rubric_association_id: rubric_association_id.into(),
            rubric_criterion_id: rubric_criterion_id.into(),
        }
    }
}

/// A decision that could not be applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedUpdate {
    /// Student
    pub user_id: UserId,
    /// Rendered error
    pub error: String,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    /// Course reconciled
    pub course_id: CourseId,
    /// When the report was produced
    pub generated_at: DateTime<Utc>,
    /// Decisions computed by the analyzer
    pub decisions: Vec<Decision>,
    /// Users whose mutation was sent without error
    pub applied: Vec<UserId>,
    /// Users whose mutation failed
    pub failed: Vec<FailedUpdate>,
    /// Verification result; empty means converged
    pub mismatches: Vec<Mismatch>,
}

impl PassReport {
    /// True when every decision applied and verification found no drift
    #[inline]
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.failed.is_empty() && self.mismatches.is_empty()
    }
}
