//! Unified grade mutator
//!
//! Sends one combined GraphQL mutation per student. The aliased
//! sub-operations are:
//! - `a`: set the override score
//! - `b`: set the override status
//! - `c`: set the submission grade status
//! - `d`: save the rubric assessment
//! - `e`: post a submission comment
//!
//! `a` is only sent when the request carries an override score, `b` and `c`
//! only when custom grade statuses are enabled, and `d` only when outcome
//! updates are enabled. Only `d` reports structured errors; silent failures in
//! the other aliases surface in verification. `e` always appends, so resending
//! a request duplicates the comment.

use crate::client::RemoteClient;
use crate::config::SyncConfig;
use crate::error::{ConfigError, SyncError, SyncResult};
use crate::types::{GradeAction, GradeUpdateRequest};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// GraphQL operation name
pub const OPERATION_NAME: &str = "UnifiedGradeUpdate";

const OVERRIDE_SCORE: &str = "
  a: setOverrideScore(input: { enrollmentId: $enrollmentId, overrideScore: $overrideScore }) {
    grades { overrideScore }
  }";

const OVERRIDE_STATUS: &str = "
  b: setOverrideStatus(input: { enrollmentId: $enrollmentId, customGradeStatusId: $overrideCustomStatusId }) {
    grades { customGradeStatusId }
  }";

const SUBMISSION_STATUS: &str = "
  c: updateSubmissionGradeStatus(input: { submissionId: $submissionId, customGradeStatusId: $assignmentCustomStatusId }) {
    submission { gradingStatus }
  }";

const RUBRIC_ASSESSMENT: &str = "
  d: saveRubricAssessment(input: { rubricAssociationId: $rubricAssociationId, submissionId: $submissionId, assessmentDetails: $assessmentDetails }) {
    errors { message }
  }";

const SUBMISSION_COMMENT: &str = "
  e: createSubmissionComment(input: { submissionId: $submissionId, comment: $commentText }) {
    submissionComment { _id }
  }";

/// Unified grade mutator
#[derive(Debug, Clone)]
pub struct UnifiedGradeMutator {
    config: Arc<SyncConfig>,
}

impl UnifiedGradeMutator {
    /// Create mutator
    #[inline]
    #[must_use]
    pub fn new(config: impl Into<Arc<SyncConfig>>) -> Self {
        Self {
            config: config.into(),
        }
    }

    /// Apply one student's correction
    ///
    /// Single shot: no retry. Fails on transport or GraphQL errors and on
    /// rubric assessment errors.
    pub async fn apply_update(
        &self,
        request: &GradeUpdateRequest,
        client: &dyn RemoteClient,
    ) -> SyncResult<()> {
        let document = self.document(request);
        let variables = self.variables(request)?;

        let data = client
            .graphql(&document, variables, OPERATION_NAME)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Grade update failed for enrollment {} / submission {}: {}",
                    request.enrollment_id,
                    request.submission_id,
                    e
                );
                SyncError::from(e)
            })?;

        let errors = rubric_errors(&data);
        if !errors.is_empty() {
            tracing::error!(
                "Rubric assessment rejected for submission {}: {:?}",
                request.submission_id,
                errors
            );
            return Err(SyncError::RubricAssessment(errors));
        }

        tracing::debug!(
            "Applied {:?} update to enrollment {}",
            request.action,
            request.enrollment_id
        );
        Ok(())
    }

    /// Mutation document for a request under the current configuration
    #[must_use]
    pub fn document(&self, request: &GradeUpdateRequest) -> String {
        let mut params = vec!["$enrollmentId: ID!", "$submissionId: ID!"];
        let mut fields = Vec::with_capacity(5);

        if request.override_score.is_some() {
            params.push("$overrideScore: Float!");
            fields.push(OVERRIDE_SCORE);
        }

        if self.config.custom_grade_status {
            params.push("$overrideCustomStatusId: ID");
            params.push("$assignmentCustomStatusId: ID");
            fields.push(OVERRIDE_STATUS);
            fields.push(SUBMISSION_STATUS);
        }

        if self.config.update_outcomes {
            params.push("$rubricAssociationId: ID!");
            params.push("$assessmentDetails: JSON!");
            fields.push(RUBRIC_ASSESSMENT);
        }

        params.push("$commentText: String!");
        fields.push(SUBMISSION_COMMENT);

        format!(
            "mutation {OPERATION_NAME}({}) {{{}\n}}",
            params.join(", "),
            fields.concat()
        )
    }

    /// Variables for a request
    ///
    /// Rejects a SCORE request without rubric points while outcome updates are
    /// enabled, and an IE request when custom grade statuses are enabled
    /// without an IE status id.
    pub fn variables(&self, request: &GradeUpdateRequest) -> SyncResult<Value> {
        if self.config.update_outcomes
            && request.action == GradeAction::Score
            && request.rubric_points.is_none()
        {
            return Err(SyncError::MissingRubricPoints(request.submission_id.clone()));
        }

        let mut vars = Map::new();
        vars.insert("enrollmentId".into(), json!(request.enrollment_id));
        vars.insert("submissionId".into(), json!(request.submission_id));
        if let Some(score) = request.override_score {
            vars.insert("overrideScore".into(), json!(score));
        }

        if self.config.custom_grade_status {
            let status = match request.action {
                GradeAction::InsufficientEvidence => {
                    let id = self.config.ie_status_id.as_deref().ok_or_else(|| {
                        ConfigError::Invalid(
                            "ie_status_id is required when custom_grade_status is enabled".into(),
                        )
                    })?;
                    json!(id)
                }
                GradeAction::Score => Value::Null,
            };
            vars.insert("overrideCustomStatusId".into(), status.clone());
            vars.insert("assignmentCustomStatusId".into(), status);
        }

        if self.config.update_outcomes {
            vars.insert(
                "rubricAssociationId".into(),
                json!(request.rubric_association_id),
            );
            vars.insert(
                "assessmentDetails".into(),
                Value::String(serde_json::to_string(&assessment_details(request))?),
            );
        }
        vars.insert("commentText".into(), json!(request.comment));

        Ok(Value::Object(vars))
    }
}

/// Rubric assessment payload keyed by `criterion_<id>`
///
/// IE omits `points` entirely, which clears any prior score rather than
/// recording zero.
#[must_use]
pub fn assessment_details(request: &GradeUpdateRequest) -> Value {
    let mut criterion = Map::new();
    if request.action == GradeAction::Score {
        criterion.insert("points".into(), json!(request.rubric_points));
    }
    criterion.insert("save_comment".into(), json!("0"));

    let mut details = Map::new();
    details.insert(
        format!("criterion_{}", request.rubric_criterion_id),
        Value::Object(criterion),
    );
    Value::Object(details)
}

fn rubric_errors(data: &Value) -> Vec<String> {
    data.get("d")
        .and_then(|d| d.get("errors"))
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .map_or_else(|| e.to_string(), str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}
