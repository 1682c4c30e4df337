//! Remote client seam
//!
//! The core never speaks HTTP itself. Authentication, base URL resolution and
//! transport-level timeouts belong to the [`RemoteClient`] implementation.

use crate::error::ClientError;
use crate::types::{AssignmentId, CourseId};
use async_trait::async_trait;
use serde_json::Value;

/// Remote LMS client
///
/// Every call carries an operation name used only for logging.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// GET a REST path with ordered query pairs (keys may repeat)
    async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
        operation: &str,
    ) -> Result<Value, ClientError>;

    /// PUT a JSON body to a REST path, returning the decoded JSON body
    async fn put(&self, path: &str, body: Value, operation: &str) -> Result<Value, ClientError>;

    /// Run a GraphQL document, returning its `data` member
    ///
    /// Request-level GraphQL errors are reported as [`ClientError::GraphQl`].
    async fn graphql(
        &self,
        query: &str,
        variables: Value,
        operation: &str,
    ) -> Result<Value, ClientError>;
}

/// REST paths used by the pipeline
pub mod paths {
    use super::{AssignmentId, CourseId};

    /// Course settings
    #[must_use]
    pub fn course_settings(course_id: &CourseId) -> String {
        format!("/api/v1/courses/{course_id}/settings")
    }

    /// Final grade override rollup
    #[must_use]
    pub fn final_grade_overrides(course_id: &CourseId) -> String {
        format!("/api/v1/courses/{course_id}/gradebook/final_grade_overrides")
    }

    /// Outcome rollups
    #[must_use]
    pub fn outcome_rollups(course_id: &CourseId) -> String {
        format!("/api/v1/courses/{course_id}/outcome_rollups")
    }

    /// Course enrollments
    #[must_use]
    pub fn enrollments(course_id: &CourseId) -> String {
        format!("/api/v1/courses/{course_id}/enrollments")
    }

    /// Assignment submissions
    #[must_use]
    pub fn submissions(course_id: &CourseId, assignment_id: &AssignmentId) -> String {
        format!("/api/v1/courses/{course_id}/assignments/{assignment_id}/submissions")
    }
}

/// Build query params from string pairs
#[must_use]
pub fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Read a JSON id that may arrive as a string or a number
#[must_use]
pub(crate) fn json_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
