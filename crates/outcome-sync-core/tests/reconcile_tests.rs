//! Full reconciliation passes against the in-memory LMS

use outcome_sync_core::prelude::*;
use outcome_sync_core::{EnrollmentId, MismatchReason, PassReport, SubmissionId, UserId};
use outcome_sync_test_utils::{course, rubric_target, test_config, FakeRemote, REFERENCE_OUTCOME};
use pretty_assertions::assert_eq;

async fn pass(reconciler: &Reconciler, remote: &FakeRemote) -> PassReport {
    let data = reconciler
        .analyzer()
        .fetch_rollups(&course(), remote)
        .await
        .unwrap();
    let roster = Roster::fetch(&course(), &AssignmentId::from("7"), remote)
        .await
        .unwrap();
    reconciler
        .run_pass(&course(), &data, &roster, &rubric_target(), remote)
        .await
        .unwrap()
}

/// Two students averaging 3.5 and 2.0 over outcomes o1 and o2
fn two_students() -> FakeRemote {
    FakeRemote::new()
        .with_student("1", "e1", "s1")
        .with_student("2", "e2", "s2")
        .with_outcome(REFERENCE_OUTCOME, "Course average")
        .with_outcome("o1", "Reading")
        .with_outcome("o2", "Writing")
        .with_score("1", "o1", 3.0)
        .with_score("1", "o2", 4.0)
        .with_score("2", "o1", 2.0)
        .with_score("2", "o2", 2.0)
}

fn users(ids: &[&str]) -> Vec<UserId> {
    ids.iter().map(|id| UserId::from(*id)).collect()
}

#[tokio::test]
async fn pass_converges_and_repeat_is_a_noop() {
    let remote = two_students();
    let reconciler = Reconciler::new(test_config());

    let first = pass(&reconciler, &remote).await;
    assert!(first.is_converged());
    assert_eq!(first.applied, users(&["1", "2"]));
    assert!(remote.override_enabled());
    assert_eq!(remote.override_for("1"), Some(87.5));
    assert_eq!(remote.override_for("2"), Some(50.0));
    assert_eq!(remote.score_for("1", REFERENCE_OUTCOME), Some(3.5));
    assert_eq!(remote.comments().len(), 2);

    let mutations = remote.count_operation("UnifiedGradeUpdate");
    let second = pass(&reconciler, &remote).await;
    assert!(second.decisions.is_empty());
    assert!(second.is_converged());
    assert_eq!(remote.count_operation("UnifiedGradeUpdate"), mutations);
}

#[tokio::test]
async fn override_drift_alone_triggers_update() {
    let remote = two_students()
        .with_score("1", REFERENCE_OUTCOME, 3.5)
        .with_score("2", REFERENCE_OUTCOME, 2.0)
        .with_override("1", 87.5)
        .with_override("2", 40.0);
    let reconciler = Reconciler::new(test_config());

    let report = pass(&reconciler, &remote).await;
    assert_eq!(report.applied, users(&["2"]));
    assert_eq!(remote.override_for("2"), Some(50.0));
}

#[tokio::test]
async fn outcome_drift_alone_triggers_update() {
    let remote = two_students()
        .with_score("1", REFERENCE_OUTCOME, 3.0)
        .with_score("2", REFERENCE_OUTCOME, 2.0)
        .with_override("1", 87.5)
        .with_override("2", 50.0);
    let reconciler = Reconciler::new(test_config());

    let report = pass(&reconciler, &remote).await;
    assert_eq!(report.applied, users(&["1"]));
    assert_eq!(remote.score_for("1", REFERENCE_OUTCOME), Some(3.5));
}

#[tokio::test]
async fn disabled_override_channel_ignores_override_drift() {
    let remote = two_students()
        .with_score("1", REFERENCE_OUTCOME, 3.5)
        .with_score("2", REFERENCE_OUTCOME, 2.0);
    let reconciler = Reconciler::new(test_config().with_override_updates(false));

    let report = pass(&reconciler, &remote).await;
    assert!(report.decisions.is_empty());
    assert!(!remote.override_enabled());
    assert_eq!(remote.count_operation("fetch_final_grade_overrides"), 0);
}

#[tokio::test]
async fn disabled_outcome_channel_leaves_reference_score() {
    let remote = two_students().with_score("1", REFERENCE_OUTCOME, 1.0);
    let reconciler = Reconciler::new(test_config().with_outcome_updates(false));

    let first = pass(&reconciler, &remote).await;
    assert!(first.is_converged());
    assert_eq!(first.applied, users(&["1", "2"]));
    assert_eq!(remote.override_for("1"), Some(87.5));
    assert_eq!(remote.override_for("2"), Some(50.0));
    assert_eq!(remote.score_for("1", REFERENCE_OUTCOME), Some(1.0));
    assert_eq!(remote.score_for("2", REFERENCE_OUTCOME), None);

    let second = pass(&reconciler, &remote).await;
    assert!(second.decisions.is_empty());
}

#[tokio::test]
async fn failed_precheck_continues_with_empty_snapshot() {
    let remote = two_students()
        .with_score("1", REFERENCE_OUTCOME, 3.5)
        .with_score("2", REFERENCE_OUTCOME, 1.0)
        .with_override("1", 87.5);
    remote.fail_override_fetch(true);
    let reconciler = Reconciler::new(test_config());

    let data = reconciler
        .analyzer()
        .fetch_rollups(&course(), &remote)
        .await
        .unwrap();
    let decisions = reconciler
        .analyzer()
        .analyze(&data, &course(), &remote)
        .await
        .unwrap();

    assert_eq!(remote.count_operation("fetch_final_grade_overrides"), 1);
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[1].user_id, UserId::from("2"));
    assert_eq!(decisions[1].average, 2.0);
}

#[tokio::test]
async fn failed_verification_aborts_pass() {
    let remote = two_students();
    remote.fail_override_fetch(true);
    let reconciler = Reconciler::new(test_config());

    let data = reconciler
        .analyzer()
        .fetch_rollups(&course(), &remote)
        .await
        .unwrap();
    let result = reconciler
        .run_pass(&course(), &data, &remote.roster(), &rubric_target(), &remote)
        .await;

    assert!(matches!(result, Err(SyncError::Client(_))));
    assert_eq!(remote.count_operation("UnifiedGradeUpdate"), 2);
}

#[tokio::test]
async fn rejected_rubric_is_recorded_and_pass_continues() {
    let remote = two_students();
    remote.reject_rubric_for("s1");
    let reconciler = Reconciler::new(test_config());

    let report = pass(&reconciler, &remote).await;

    assert_eq!(report.applied, users(&["2"]));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].user_id, UserId::from("1"));
    assert!(report.failed[0].error.contains("rubric assessment rejected"));
    assert!(!report.is_converged());
}

#[tokio::test]
async fn silently_dropped_override_surfaces_as_mismatch() {
    let remote = two_students();
    remote.drop_override_writes_for("e1");
    let reconciler = Reconciler::new(test_config());

    let report = pass(&reconciler, &remote).await;

    assert!(report.failed.is_empty());
    assert_eq!(report.mismatches.len(), 1);
    let mismatch = &report.mismatches[0];
    assert_eq!(mismatch.user_id, UserId::from("1"));
    assert_eq!(mismatch.enrollment_id, Some(EnrollmentId::from("e1")));
    assert_eq!(mismatch.expected, 87.5);
    assert_eq!(mismatch.reason, Some(MismatchReason::Missing));
}

#[tokio::test]
async fn transport_failures_leave_missing_overrides() {
    let remote = two_students();
    remote.fail_mutations(true);
    let reconciler = Reconciler::new(test_config());

    let report = pass(&reconciler, &remote).await;

    assert!(report.applied.is_empty());
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.mismatches.len(), 2);
}

#[tokio::test]
async fn student_missing_from_roster_is_unresolved() {
    let remote = two_students().with_score("9", "o1", 1.0);
    let reconciler = Reconciler::new(test_config());

    let report = pass(&reconciler, &remote).await;

    assert_eq!(report.applied, users(&["1", "2"]));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].user_id, UserId::from("9"));
    let unresolved = report
        .mismatches
        .iter()
        .find(|m| m.user_id == UserId::from("9"))
        .unwrap();
    assert_eq!(unresolved.enrollment_id, None);
}

#[tokio::test]
async fn concurrent_updates_keep_decision_order() {
    let mut remote = FakeRemote::new().with_outcome("o1", "Reading");
    for i in 1..=6 {
        let user = i.to_string();
        remote = remote
            .with_student(&user, &format!("e{i}"), &format!("s{i}"))
            .with_score(&user, "o1", f64::from(i) / 2.0);
    }
    let reconciler = Reconciler::new(test_config().with_max_concurrent_updates(4));

    let report = pass(&reconciler, &remote).await;

    assert!(report.is_converged());
    assert_eq!(report.applied, users(&["1", "2", "3", "4", "5", "6"]));
    assert_eq!(remote.override_for("6"), Some(75.0));
}

#[tokio::test]
async fn insufficient_evidence_sets_statuses_without_override() {
    let remote = two_students();
    let config = test_config().with_custom_grade_status("ie-status");
    let mutator = UnifiedGradeMutator::new(config);

    let request = GradeUpdateRequest {
        enrollment_id: EnrollmentId::from("e1"),
        submission_id: SubmissionId::from("s1"),
        rubric_association_id: "ra_1".into(),
        rubric_criterion_id: "_1".into(),
        action: GradeAction::InsufficientEvidence,
        override_score: None,
        rubric_points: None,
        comment: "Insufficient evidence".into(),
    };
    mutator.apply_update(&request, &remote).await.unwrap();

    assert_eq!(remote.override_status("e1").as_deref(), Some("ie-status"));
    assert_eq!(remote.submission_status("s1").as_deref(), Some("ie-status"));
    assert_eq!(remote.override_for("1"), None);
    assert_eq!(remote.score_for("1", REFERENCE_OUTCOME), None);
}

#[tokio::test]
async fn score_update_clears_custom_statuses() {
    let remote = two_students();
    let config = test_config().with_custom_grade_status("ie-status");
    let reconciler = Reconciler::new(config);

    let report = pass(&reconciler, &remote).await;

    assert!(report.is_converged());
    assert_eq!(remote.override_status("e1"), None);
    assert_eq!(remote.submission_status("s2"), None);
}

#[tokio::test]
async fn excluded_keyword_outcomes_do_not_count() {
    let remote = two_students()
        .with_outcome("o3", "Practice quiz")
        .with_score("1", "o3", 0.0);
    let reconciler = Reconciler::new(test_config().with_excluded_keywords(["PRACTICE"]));

    let report = pass(&reconciler, &remote).await;

    let first = report
        .decisions
        .iter()
        .find(|d| d.user_id == UserId::from("1"))
        .unwrap();
    assert_eq!(first.average, 3.5);
}
