//! Reconciliation pass
//!
//! Drives one full cycle over a course:
//! 1. Enable final grade overrides
//! 2. Compute decisions from outcome rollups
//! 3. Apply one unified grade mutation per decision
//! 4. Verify the overrides converged
//!
//! A failed mutation is recorded and the pass continues; verification then
//! reports that student as well. Repeating a pass after convergence yields no
//! decisions.

use crate::analyzer::OutcomeAverageAnalyzer;
use crate::client::RemoteClient;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::mutator::UnifiedGradeMutator;
use crate::overrides::OverrideGradeService;
use crate::roster::Roster;
use crate::types::{
    CourseId, Decision, FailedUpdate, GradeAction, GradeUpdateRequest, PassReport, RollupData,
    RubricTarget, StudentHandles, UserId,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

/// Reconciliation driver
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: Arc<SyncConfig>,
    analyzer: OutcomeAverageAnalyzer,
    overrides: OverrideGradeService,
    mutator: UnifiedGradeMutator,
}

impl Reconciler {
    /// Create reconciler sharing one configuration across all components
    #[must_use]
    pub fn new(config: impl Into<Arc<SyncConfig>>) -> Self {
        let config = config.into();
        Self {
            analyzer: OutcomeAverageAnalyzer::new(Arc::clone(&config)),
            overrides: OverrideGradeService::new(Arc::clone(&config)),
            mutator: UnifiedGradeMutator::new(Arc::clone(&config)),
            config,
        }
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get analyzer
    #[inline]
    #[must_use]
    pub fn analyzer(&self) -> &OutcomeAverageAnalyzer {
        &self.analyzer
    }

    /// Get override service
    #[inline]
    #[must_use]
    pub fn overrides(&self) -> &OverrideGradeService {
        &self.overrides
    }

    /// Get mutator
    #[inline]
    #[must_use]
    pub fn mutator(&self) -> &UnifiedGradeMutator {
        &self.mutator
    }

    /// SCORE-mode request for a decision
    #[must_use]
    pub fn build_request(
        &self,
        decision: &Decision,
        handles: StudentHandles,
        target: &RubricTarget,
    ) -> GradeUpdateRequest {
        GradeUpdateRequest {
            enrollment_id: handles.enrollment_id,
            submission_id: handles.submission_id,
            rubric_association_id: target.rubric_association_id.clone(),
            rubric_criterion_id: target.rubric_criterion_id.clone(),
            action: GradeAction::Score,
            override_score: self
                .config
                .update_overrides
                .then(|| self.config.scale(decision.average)),
            rubric_points: self.config.update_outcomes.then_some(decision.average),
            comment: self.config.render_comment(decision.average),
        }
    }

    /// Run one full pass
    ///
    /// Only enabling overrides and verification abort the pass; individual
    /// mutation failures are collected in the report.
    pub async fn run_pass(
        &self,
        course_id: &CourseId,
        data: &RollupData,
        roster: &Roster,
        target: &RubricTarget,
        client: &dyn RemoteClient,
    ) -> SyncResult<PassReport> {
        tracing::info!("Starting reconciliation pass for course {}", course_id);

        self.overrides.enable_override(course_id, client).await?;

        let decisions = self.analyzer.analyze(data, course_id, client).await?;
        let (applied, failed) = self
            .apply_decisions(course_id, &decisions, roster, target, client)
            .await;

        let mismatches = if self.config.update_overrides && !decisions.is_empty() {
            self.overrides
                .verify_convergence(course_id, &decisions, roster, client)
                .await?
        } else {
            Vec::new()
        };

        let report = PassReport {
            course_id: course_id.clone(),
            generated_at: Utc::now(),
            decisions,
            applied,
            failed,
            mismatches,
        };

        tracing::info!(
            "Pass for course {} finished: {} decisions, {} applied, {} failed, {} mismatches",
            course_id,
            report.decisions.len(),
            report.applied.len(),
            report.failed.len(),
            report.mismatches.len()
        );
        Ok(report)
    }

    /// Apply every decision, at most `max_concurrent_updates` at a time
    ///
    /// Results keep decision order.
    pub async fn apply_decisions(
        &self,
        course_id: &CourseId,
        decisions: &[Decision],
        roster: &Roster,
        target: &RubricTarget,
        client: &dyn RemoteClient,
    ) -> (Vec<UserId>, Vec<FailedUpdate>) {
        let results: Vec<(UserId, SyncResult<()>)> = stream::iter(decisions)
            .map(|decision| async move {
                let result = match roster.handles(&decision.user_id) {
                    Some(handles) => {
                        let request = self.build_request(decision, handles, target);
                        self.mutator.apply_update(&request, client).await
                    }
                    None => Err(SyncError::UnresolvedStudent(decision.user_id.clone())),
                };
                (decision.user_id.clone(), result)
            })
            .buffered(self.config.max_concurrent_updates.max(1))
            .collect()
            .await;

        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for (user_id, result) in results {
            match result {
                Ok(()) => applied.push(user_id),
                Err(e) => {
                    tracing::warn!(
                        "Course {}: update for user {} failed: {}",
                        course_id,
                        user_id,
                        e
                    );
                    failed.push(FailedUpdate {
                        user_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        (applied, failed)
    }
}
