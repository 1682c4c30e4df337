//! Final grade override service
//!
//! Enables the override feature on a course, reads the currently recorded
//! override percentages and checks them against expected values.
//!
//! Snapshots are keyed by user id on both the fetch and verify side. The
//! [`IdResolver`] only labels mismatches with an enrollment id; it is never
//! used for lookups.

use crate::client::{paths, RemoteClient};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::types::{
    exceeds_tolerance, CourseId, Decision, EnrollmentId, Mismatch, MismatchReason,
    OverrideGradeSnapshot, UserId,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps a student to the enrollment reported on mismatches
pub trait IdResolver: Send + Sync {
    /// Enrollment for a user, if known
    fn enrollment_id(&self, user_id: &UserId) -> Option<EnrollmentId>;
}

impl IdResolver for HashMap<UserId, EnrollmentId> {
    fn enrollment_id(&self, user_id: &UserId) -> Option<EnrollmentId> {
        self.get(user_id).cloned()
    }
}

/// Override grade service
#[derive(Debug, Clone)]
pub struct OverrideGradeService {
    config: Arc<SyncConfig>,
}

impl OverrideGradeService {
    /// Create service
    #[inline]
    #[must_use]
    pub fn new(config: impl Into<Arc<SyncConfig>>) -> Self {
        Self {
            config: config.into(),
        }
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Turn on final grade overrides for a course
    ///
    /// Returns `false` without touching the remote when overrides are disabled
    /// in configuration. Any remote failure is returned as an error.
    pub async fn enable_override(
        &self,
        course_id: &CourseId,
        client: &dyn RemoteClient,
    ) -> SyncResult<bool> {
        if !self.config.update_overrides {
            tracing::debug!("Override updates disabled; not enabling overrides on course {}", course_id);
            return Ok(false);
        }

        client
            .put(
                &paths::course_settings(course_id),
                json!({ "allow_final_grade_override": true }),
                "enable_final_grade_override",
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to enable overrides on course {}: {}", course_id, e);
                SyncError::from(e)
            })?;

        tracing::info!("Final grade overrides enabled on course {}", course_id);
        Ok(true)
    }

    /// Read the current override percentages for a course
    ///
    /// Always a fresh round trip. Empty when overrides are disabled.
    pub async fn fetch_override_grades(
        &self,
        course_id: &CourseId,
        client: &dyn RemoteClient,
    ) -> SyncResult<OverrideGradeSnapshot> {
        if !self.config.update_overrides {
            return Ok(OverrideGradeSnapshot::empty());
        }

        let body = client
            .get(
                &paths::final_grade_overrides(course_id),
                &[],
                "fetch_final_grade_overrides",
            )
            .await?;

        let snapshot = parse_override_rollup(&body)?;
        tracing::debug!(
            "Fetched {} override grades for course {}",
            snapshot.len(),
            course_id
        );
        Ok(snapshot)
    }

    /// Verify overrides converged using the configured tolerance
    pub async fn verify_convergence(
        &self,
        course_id: &CourseId,
        decisions: &[Decision],
        resolver: &dyn IdResolver,
        client: &dyn RemoteClient,
    ) -> SyncResult<Vec<Mismatch>> {
        self.verify_convergence_with(course_id, decisions, resolver, client, self.config.tolerance)
            .await
    }

    /// Verify overrides converged within `tolerance` percentage points
    ///
    /// An empty result means every decision's override is in place.
    pub async fn verify_convergence_with(
        &self,
        course_id: &CourseId,
        decisions: &[Decision],
        resolver: &dyn IdResolver,
        client: &dyn RemoteClient,
        tolerance: f64,
    ) -> SyncResult<Vec<Mismatch>> {
        if !self.config.update_overrides {
            tracing::debug!(
                "Override updates disabled, skipping verification for course {}",
                course_id
            );
            return Ok(Vec::new());
        }

        let snapshot = self.fetch_override_grades(course_id, client).await?;

        let mismatches: Vec<Mismatch> = decisions
            .iter()
            .filter_map(|decision| {
                let expected = self.config.scale(decision.average);
                let enrollment_id = resolver.enrollment_id(&decision.user_id);
                match snapshot.get(&decision.user_id) {
                    None => Some(Mismatch {
                        user_id: decision.user_id.clone(),
                        enrollment_id,
                        expected,
                        actual: None,
                        diff: None,
                        reason: Some(MismatchReason::Missing),
                    }),
                    Some(actual) if exceeds_tolerance(actual, expected, tolerance) => {
                        Some(Mismatch {
                            user_id: decision.user_id.clone(),
                            enrollment_id,
                            expected,
                            actual: Some(actual),
                            diff: Some(actual - expected),
                            reason: None,
                        })
                    }
                    Some(_) => None,
                }
            })
            .collect();

        if mismatches.is_empty() {
            tracing::info!(
                "Course {}: all {} override grades converged",
                course_id,
                decisions.len()
            );
        } else {
            tracing::warn!(
                "Course {}: {} of {} override grades did not converge",
                course_id,
                mismatches.len(),
                decisions.len()
            );
        }

        Ok(mismatches)
    }
}

/// Parse `{ [id]: { course_grade: { percentage } } }`, optionally wrapped in
/// `final_grade_overrides`
fn parse_override_rollup(body: &Value) -> SyncResult<OverrideGradeSnapshot> {
    let root = body.get("final_grade_overrides").unwrap_or(body);
    let entries = root.as_object().ok_or_else(|| {
        SyncError::MalformedResponse("final grade override rollup is not an object".into())
    })?;

    let grades = entries
        .iter()
        .filter_map(|(id, entry)| {
            let percentage = entry.get("course_grade")?.get("percentage")?;
            let value = match percentage {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }?;
            if id.is_empty() {
                return None;
            }
            Some((UserId(id.clone()), value))
        })
        .collect();

    Ok(OverrideGradeSnapshot(grades))
}
