//! Student roster
//!
//! Maps user ids to the enrollment and submission ids a grade mutation needs.

use crate::client::{json_id, paths, query, RemoteClient};
use crate::error::{SyncError, SyncResult};
use crate::overrides::IdResolver;
use crate::types::{AssignmentId, CourseId, EnrollmentId, StudentHandles, SubmissionId, UserId};
use serde_json::Value;
use std::collections::HashMap;

/// Enrollment and submission ids per student
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    enrollments: HashMap<UserId, EnrollmentId>,
    submissions: HashMap<UserId, SubmissionId>,
}

impl Roster {
    /// Create empty roster
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a fully resolved student
    #[inline]
    #[must_use]
    pub fn with_student(
        mut self,
        user_id: impl Into<UserId>,
        enrollment_id: impl Into<EnrollmentId>,
        submission_id: impl Into<SubmissionId>,
    ) -> Self {
        let user_id = user_id.into();
        self.enrollments.insert(user_id.clone(), enrollment_id.into());
        self.submissions.insert(user_id, submission_id.into());
        self
    }

    /// Handles for a student; `None` unless both ids are known
    #[must_use]
    pub fn handles(&self, user_id: &UserId) -> Option<StudentHandles> {
        Some(StudentHandles {
            enrollment_id: self.enrollments.get(user_id)?.clone(),
            submission_id: self.submissions.get(user_id)?.clone(),
        })
    }

    /// Number of students with an enrollment
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.enrollments.len()
    }

    /// True if no enrollments are known
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.enrollments.is_empty()
    }

    /// Read student enrollments and the target assignment's submissions
    pub async fn fetch(
        course_id: &CourseId,
        assignment_id: &AssignmentId,
        client: &dyn RemoteClient,
    ) -> SyncResult<Self> {
        let enrollments = client
            .get(
                &paths::enrollments(course_id),
                &query(&[("type[]", "StudentEnrollment")]),
                "fetch_student_enrollments",
            )
            .await?;
        let submissions = client
            .get(
                &paths::submissions(course_id, assignment_id),
                &[],
                "fetch_assignment_submissions",
            )
            .await?;

        let roster = Self {
            enrollments: user_keyed(&enrollments, "enrollments")?
                .map(|(user, id)| (user, EnrollmentId(id)))
                .collect(),
            submissions: user_keyed(&submissions, "submissions")?
                .map(|(user, id)| (user, SubmissionId(id)))
                .collect(),
        };

        tracing::info!(
            "Course {}: roster of {} enrollments, {} submissions for assignment {}",
            course_id,
            roster.enrollments.len(),
            roster.submissions.len(),
            assignment_id
        );
        Ok(roster)
    }
}

impl IdResolver for Roster {
    fn enrollment_id(&self, user_id: &UserId) -> Option<EnrollmentId> {
        self.enrollments.get(user_id).cloned()
    }
}

/// `[{ id, user_id }]` pairs; entries missing either id are dropped
fn user_keyed<'a>(
    body: &'a Value,
    what: &str,
) -> SyncResult<impl Iterator<Item = (UserId, String)> + 'a> {
    let items = body
        .as_array()
        .ok_or_else(|| SyncError::MalformedResponse(format!("{what} response is not an array")))?;
    Ok(items.iter().filter_map(|item| {
        let id = item.get("id").and_then(json_id)?;
        let user = item.get("user_id").and_then(json_id)?;
        Some((UserId(user), id))
    }))
}
