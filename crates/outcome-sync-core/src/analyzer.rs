//! Outcome average analyzer
//!
//! Turns outcome rollups into per-student decisions:
//! - Averages every eligible outcome score (two decimals)
//! - Compares it to the score recorded on the reference outcome
//! - Optionally compares the scaled average to the recorded override grade
//!
//! Students with no eligible scores are skipped silently.

use crate::client::{json_id, paths, query, RemoteClient};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::overrides::OverrideGradeService;
use crate::types::{
    exceeds_tolerance, round2, CourseId, Decision, OutcomeCatalog, OutcomeId, OutcomeRollup,
    OutcomeScore, OverrideGradeSnapshot, RollupData, UserId,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Which channels a student needs corrected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelDrift {
    /// Reference outcome score differs from the new average
    pub outcome: bool,
    /// Override grade missing or outside tolerance
    pub override_grade: bool,
}

impl ChannelDrift {
    /// At least one channel needs an update
    #[inline]
    #[must_use]
    pub fn any(self) -> bool {
        self.outcome || self.override_grade
    }
}

/// Outcome average analyzer
#[derive(Debug, Clone)]
pub struct OutcomeAverageAnalyzer {
    config: Arc<SyncConfig>,
    overrides: OverrideGradeService,
}

impl OutcomeAverageAnalyzer {
    /// Create analyzer
    #[inline]
    #[must_use]
    pub fn new(config: impl Into<Arc<SyncConfig>>) -> Self {
        let config = config.into();
        Self {
            overrides: OverrideGradeService::new(Arc::clone(&config)),
            config,
        }
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Read outcome rollups and titles for a course
    ///
    /// Reads a single page. Malformed entries degrade instead of failing.
    pub async fn fetch_rollups(
        &self,
        course_id: &CourseId,
        client: &dyn RemoteClient,
    ) -> SyncResult<RollupData> {
        let body = client
            .get(
                &paths::outcome_rollups(course_id),
                &query(&[("include[]", "outcomes")]),
                "fetch_outcome_rollups",
            )
            .await?;

        let data = parse_rollups(&body)?;
        tracing::info!(
            "Fetched {} outcome rollups ({} outcomes) for course {}",
            data.rollups.len(),
            data.catalog.0.len(),
            course_id
        );
        Ok(data)
    }

    /// Compute decisions using the configured reference outcome
    pub async fn analyze(
        &self,
        data: &RollupData,
        course_id: &CourseId,
        client: &dyn RemoteClient,
    ) -> SyncResult<Vec<Decision>> {
        let reference = OutcomeId::from(self.config.reference_outcome_id.as_str());
        self.compute_decisions(data, &reference, course_id, client)
            .await
    }

    /// Compute the students whose outcome score or override grade drifted
    ///
    /// When the override channel is on, the current overrides are fetched
    /// first. A failed fetch is not fatal: the pass continues with an empty
    /// snapshot, so every student reads as a missing override.
    /// Output order follows input order.
    pub async fn compute_decisions(
        &self,
        data: &RollupData,
        reference_outcome_id: &OutcomeId,
        course_id: &CourseId,
        client: &dyn RemoteClient,
    ) -> SyncResult<Vec<Decision>> {
        let snapshot = if self.config.update_overrides {
            match self.overrides.fetch_override_grades(course_id, client).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(
                        "Course {}: override pre-check failed, continuing with an empty snapshot: {}",
                        course_id,
                        e
                    );
                    OverrideGradeSnapshot::empty()
                }
            }
        } else {
            OverrideGradeSnapshot::empty()
        };

        let decisions = self.decide_all(data, reference_outcome_id, &snapshot);
        tracing::info!(
            "Course {}: {} of {} students need correction",
            course_id,
            decisions.len(),
            data.rollups.len()
        );
        Ok(decisions)
    }

    /// Decide every rollup against a known snapshot
    #[must_use]
    pub fn decide_all(
        &self,
        data: &RollupData,
        reference_outcome_id: &OutcomeId,
        snapshot: &OverrideGradeSnapshot,
    ) -> Vec<Decision> {
        let excluded_ids: HashSet<&OutcomeId> = HashSet::from([reference_outcome_id]);
        let keywords = self.config.normalized_keywords();

        data.rollups
            .iter()
            .filter_map(|rollup| {
                self.decide(
                    rollup,
                    reference_outcome_id,
                    &excluded_ids,
                    &keywords,
                    &data.catalog,
                    snapshot,
                )
            })
            .collect()
    }

    fn decide(
        &self,
        rollup: &OutcomeRollup,
        reference_outcome_id: &OutcomeId,
        excluded_ids: &HashSet<&OutcomeId>,
        keywords: &[String],
        catalog: &OutcomeCatalog,
        snapshot: &OverrideGradeSnapshot,
    ) -> Option<Decision> {
        let Some(user_id) = rollup.user_id.as_ref() else {
            tracing::debug!("Skipping rollup without a user id");
            return None;
        };

        let old_average = rollup.score_for(reference_outcome_id);
        let relevant: Vec<f64> = rollup
            .scores
            .iter()
            .filter(|s| !excluded_ids.contains(&s.outcome_id))
            .filter(|s| !is_keyword_excluded(catalog, &s.outcome_id, keywords))
            .filter_map(OutcomeScore::value)
            .collect();

        let new_average = mean(&relevant).map(round2)?;
        let drift = self.drift(user_id, old_average, new_average, snapshot);

        if drift.any() {
            tracing::debug!(
                "User {}: average {:.2} (outcome drift: {}, override drift: {})",
                user_id,
                new_average,
                drift.outcome,
                drift.override_grade
            );
            Some(Decision {
                user_id: user_id.clone(),
                average: new_average,
            })
        } else {
            None
        }
    }

    /// Per-channel drift for one student
    #[must_use]
    pub fn drift(
        &self,
        user_id: &UserId,
        old_average: Option<f64>,
        new_average: f64,
        snapshot: &OverrideGradeSnapshot,
    ) -> ChannelDrift {
        #[allow(clippy::float_cmp)]
        let outcome = self.config.update_outcomes && old_average != Some(new_average);

        let override_grade = self.config.update_overrides
            && snapshot.get(user_id).map_or(true, |actual| {
                exceeds_tolerance(actual, self.config.scale(new_average), self.config.tolerance)
            });

        ChannelDrift {
            outcome,
            override_grade,
        }
    }
}

/// Arithmetic mean, `None` for an empty slice
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn is_keyword_excluded(catalog: &OutcomeCatalog, outcome_id: &OutcomeId, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return false;
    }
    catalog.title(outcome_id).is_some_and(|title| {
        let title = title.to_lowercase();
        keywords.iter().any(|k| title.contains(k.as_str()))
    })
}

/// Parse the outcome rollup response
///
/// `{ rollups: [{ links: { user }, scores: [{ score, links: { outcome } }] }],
///    linked: { outcomes: [{ id, title }] } }`
fn parse_rollups(body: &Value) -> SyncResult<RollupData> {
    let rollups = body
        .get("rollups")
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::MalformedResponse("outcome rollups missing `rollups` array".into()))?;

    let rollups = rollups
        .iter()
        .map(|rollup| {
            let user_id = rollup
                .get("links")
                .and_then(|l| l.get("user"))
                .and_then(json_id)
                .map(UserId);
            let scores = rollup
                .get("scores")
                .and_then(Value::as_array)
                .map(|scores| {
                    scores
                        .iter()
                        .filter_map(|s| {
                            let outcome_id = s.get("links")?.get("outcome").and_then(json_id)?;
                            Some(OutcomeScore {
                                outcome_id: OutcomeId(outcome_id),
                                score: s.get("score").and_then(Value::as_f64),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            OutcomeRollup { user_id, scores }
        })
        .collect();

    let catalog: HashMap<OutcomeId, String> = body
        .get("linked")
        .and_then(|l| l.get("outcomes"))
        .and_then(Value::as_array)
        .map(|outcomes| {
            outcomes
                .iter()
                .filter_map(|o| {
                    let id = o.get("id").and_then(json_id)?;
                    let title = o.get("title").and_then(Value::as_str)?;
                    Some((OutcomeId(id), title.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(RollupData {
        rollups,
        catalog: OutcomeCatalog(catalog),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockRemoteClient;
    use crate::error::ClientError;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn outcome_only() -> SyncConfig {
        SyncConfig::new()
            .with_reference_outcome("ref")
            .with_override_updates(false)
    }

    fn data(rollups: Vec<OutcomeRollup>) -> RollupData {
        RollupData {
            rollups,
            catalog: OutcomeCatalog::new(),
        }
    }

    fn snapshot(entries: &[(&str, f64)]) -> OverrideGradeSnapshot {
        OverrideGradeSnapshot(
            entries
                .iter()
                .map(|(id, pct)| (UserId::from(*id), *pct))
                .collect(),
        )
    }

    fn reference() -> OutcomeId {
        OutcomeId::from("ref")
    }

    #[test]
    fn mean_of_scores() {
        assert_eq!(mean(&[3.0, 4.0, 2.0]).map(round2), Some(3.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn reference_outcome_excluded_from_its_own_average() {
        let analyzer = OutcomeAverageAnalyzer::new(outcome_only());
        let rollup = OutcomeRollup::new("1")
            .with_score("a", 2.0)
            .with_score("ref", 100.0);

        let decisions = analyzer.decide_all(&data(vec![rollup]), &reference(), &OverrideGradeSnapshot::empty());
        assert_eq!(
            decisions,
            vec![Decision {
                user_id: UserId::from("1"),
                average: 2.0
            }]
        );
    }

    #[test]
    fn keyword_exclusion_is_case_insensitive() {
        let analyzer = OutcomeAverageAnalyzer::new(
            outcome_only().with_excluded_keywords(["homework completion"]),
        );
        let mut input = data(vec![OutcomeRollup::new("1")
            .with_score("hw", 0.0)
            .with_score("a", 4.0)]);
        input.catalog = OutcomeCatalog::new()
            .with_title("hw", "Homework COMPLETION")
            .with_title("a", "Argument Writing");

        let decisions = analyzer.decide_all(&input, &reference(), &OverrideGradeSnapshot::empty());
        assert_eq!(decisions[0].average, 4.0);
    }

    #[test]
    fn missing_catalog_entry_is_not_keyword_excluded() {
        let analyzer =
            OutcomeAverageAnalyzer::new(outcome_only().with_excluded_keywords(["participation"]));
        let input = data(vec![OutcomeRollup::new("1").with_score("x", 3.0)]);

        let decisions = analyzer.decide_all(&input, &reference(), &OverrideGradeSnapshot::empty());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].average, 3.0);
    }

    #[test]
    fn skip_when_only_excluded_scores() {
        let analyzer =
            OutcomeAverageAnalyzer::new(outcome_only().with_excluded_keywords(["completion"]));
        let mut input = data(vec![OutcomeRollup::new("1")
            .with_score("ref", 99.0)
            .with_score("hw", 1.0)]);
        input.catalog = OutcomeCatalog::new().with_title("hw", "Homework completion");

        assert!(analyzer
            .decide_all(&input, &reference(), &OverrideGradeSnapshot::empty())
            .is_empty());
    }

    #[test]
    fn skip_rollup_without_user() {
        let analyzer = OutcomeAverageAnalyzer::new(outcome_only());
        let rollup = OutcomeRollup {
            user_id: None,
            scores: vec![OutcomeScore::new("a", 3.0)],
        };
        let input = data(vec![rollup, OutcomeRollup::new("2").with_score("a", 1.0)]);

        let decisions = analyzer.decide_all(&input, &reference(), &OverrideGradeSnapshot::empty());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].user_id, UserId::from("2"));
    }

    #[test]
    fn matching_reference_score_produces_no_decision() {
        let analyzer = OutcomeAverageAnalyzer::new(outcome_only());
        let rollup = OutcomeRollup::new("7")
            .with_score("A", 5.0)
            .with_score("B", 7.0)
            .with_score("ref", 6.0);

        assert!(analyzer
            .decide_all(&data(vec![rollup]), &reference(), &OverrideGradeSnapshot::empty())
            .is_empty());
    }

    #[test]
    fn non_numeric_scores_ignored() {
        let analyzer = OutcomeAverageAnalyzer::new(outcome_only());
        let mut rollup = OutcomeRollup::new("1").with_score("a", 3.0);
        rollup.scores.push(OutcomeScore::missing("b"));

        let decisions = analyzer.decide_all(&data(vec![rollup]), &reference(), &OverrideGradeSnapshot::empty());
        assert_eq!(decisions[0].average, 3.0);
    }

    #[test]
    fn override_drift_detected_when_outcome_matches() {
        let analyzer = OutcomeAverageAnalyzer::new(SyncConfig::new().with_reference_outcome("ref"));
        let rollup = OutcomeRollup::new("1")
            .with_score("a", 3.0)
            .with_score("ref", 3.0);

        let stale = analyzer.decide_all(&data(vec![rollup.clone()]), &reference(), &snapshot(&[("1", 50.0)]));
        assert_eq!(stale.len(), 1);

        let missing = analyzer.decide_all(&data(vec![rollup.clone()]), &reference(), &snapshot(&[]));
        assert_eq!(missing.len(), 1);

        let converged = analyzer.decide_all(&data(vec![rollup]), &reference(), &snapshot(&[("1", 75.0)]));
        assert!(converged.is_empty());
    }

    #[test]
    fn outcome_drift_detected_when_override_matches() {
        let analyzer = OutcomeAverageAnalyzer::new(SyncConfig::new().with_reference_outcome("ref"));
        let rollup = OutcomeRollup::new("1")
            .with_score("a", 3.0)
            .with_score("ref", 2.5);

        let decisions = analyzer.decide_all(&data(vec![rollup]), &reference(), &snapshot(&[("1", 75.0)]));
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].average, 3.0);
    }

    #[test]
    fn outcome_channel_disabled_ignores_outcome_drift() {
        let analyzer = OutcomeAverageAnalyzer::new(
            SyncConfig::new()
                .with_reference_outcome("ref")
                .with_outcome_updates(false),
        );
        let rollup = OutcomeRollup::new("1").with_score("a", 3.0);

        let drift = analyzer.drift(&UserId::from("1"), None, 3.0, &snapshot(&[("1", 75.0)]));
        assert_eq!(drift, ChannelDrift::default());
        assert!(analyzer
            .decide_all(&data(vec![rollup]), &reference(), &snapshot(&[("1", 75.0)]))
            .is_empty());
    }

    #[test]
    fn absent_reference_score_is_outcome_drift() {
        let analyzer = OutcomeAverageAnalyzer::new(outcome_only());
        let drift = analyzer.drift(&UserId::from("1"), None, 0.0, &OverrideGradeSnapshot::empty());
        assert!(drift.outcome);
        assert!(!drift.override_grade);
    }

    #[tokio::test]
    async fn failed_precheck_is_not_fatal() {
        let mut client = MockRemoteClient::new();
        client
            .expect_get()
            .times(1)
            .returning(|_, _, _| Err(ClientError::Transport("timeout".into())));

        let analyzer = OutcomeAverageAnalyzer::new(SyncConfig::new().with_reference_outcome("ref"));
        let input = data(vec![
            OutcomeRollup::new("1").with_score("a", 3.0).with_score("ref", 3.0),
            OutcomeRollup::new("2").with_score("a", 3.0).with_score("ref", 1.0),
        ]);

        let decisions = analyzer
            .compute_decisions(&input, &reference(), &CourseId::from("9"), &client)
            .await
            .unwrap();

        // With an empty snapshot both students look like missing overrides
        assert_eq!(decisions.len(), 2);
    }

    #[tokio::test]
    async fn override_disabled_skips_precheck() {
        let mut client = MockRemoteClient::new();
        client.expect_get().times(0);

        let analyzer = OutcomeAverageAnalyzer::new(outcome_only());
        let input = data(vec![OutcomeRollup::new("7")
            .with_score("A", 5.0)
            .with_score("B", 7.0)
            .with_score("ref", 6.0)]);

        let decisions = analyzer
            .analyze(&input, &CourseId::from("9"), &client)
            .await
            .unwrap();
        assert!(decisions.is_empty());
    }

    #[tokio::test]
    async fn fetch_rollups_parses_links_and_catalog() {
        let mut client = MockRemoteClient::new();
        client
            .expect_get()
            .withf(|path, params, _| {
                path == "/api/v1/courses/9/outcome_rollups"
                    && params == [("include[]".to_string(), "outcomes".to_string())]
            })
            .returning(|_, _, _| {
                Ok(json!({
                    "rollups": [
                        {
                            "links": { "user": "5" },
                            "scores": [
                                { "score": 3.5, "links": { "outcome": "10" } },
                                { "score": null, "links": { "outcome": 11 } },
                                { "score": 2.0 }
                            ]
                        },
                        { "scores": [] }
                    ],
                    "linked": {
                        "outcomes": [
                            { "id": 10, "title": "Claims" },
                            { "id": 11 }
                        ]
                    }
                }))
            });

        let analyzer = OutcomeAverageAnalyzer::new(outcome_only());
        let data = analyzer
            .fetch_rollups(&CourseId::from("9"), &client)
            .await
            .unwrap();

        assert_eq!(data.rollups.len(), 2);
        assert_eq!(data.rollups[0].user_id, Some(UserId::from("5")));
        assert_eq!(
            data.rollups[0].scores,
            vec![OutcomeScore::new("10", 3.5), OutcomeScore::missing("11")]
        );
        assert_eq!(data.rollups[1].user_id, None);
        assert_eq!(data.catalog.title(&OutcomeId::from("10")), Some("Claims"));
        assert_eq!(data.catalog.title(&OutcomeId::from("11")), None);
    }

    #[tokio::test]
    async fn fetch_rollups_rejects_missing_array() {
        let mut client = MockRemoteClient::new();
        client
            .expect_get()
            .returning(|_, _, _| Ok(json!({ "errors": "nope" })));

        let analyzer = OutcomeAverageAnalyzer::new(outcome_only());
        let result = analyzer.fetch_rollups(&CourseId::from("9"), &client).await;
        assert!(matches!(result, Err(SyncError::MalformedResponse(_))));
    }
}
