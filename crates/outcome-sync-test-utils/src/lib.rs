//! Testing utilities for Outcome Sync workspace
//!
//! Shared fixtures and an in-memory LMS that implements [`RemoteClient`].

#![allow(missing_docs)]

use async_trait::async_trait;
use outcome_sync_core::{
    ClientError, CourseId, OutcomeCatalog, OutcomeRollup, RemoteClient, RollupData, Roster,
    RubricTarget, SyncConfig,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};

pub const REFERENCE_OUTCOME: &str = "ref";
pub const CRITERION_ID: &str = "_1";

pub fn course() -> CourseId {
    CourseId::from("101")
}

pub fn rubric_target() -> RubricTarget {
    RubricTarget::new("ra_1", CRITERION_ID)
}

/// Both channels on, reference outcome `ref`, 0-4 onto 0-100
pub fn test_config() -> SyncConfig {
    SyncConfig::new().with_reference_outcome(REFERENCE_OUTCOME)
}

pub fn rollup_data(rollups: Vec<OutcomeRollup>) -> RollupData {
    RollupData {
        rollups,
        catalog: OutcomeCatalog::new(),
    }
}

#[derive(Debug, Clone)]
struct Student {
    enrollment_id: String,
    submission_id: String,
}

#[derive(Debug, Default)]
struct State {
    override_enabled: bool,
    students: HashMap<String, Student>,
    outcomes: Vec<(String, String)>,
    scores: Vec<(String, Vec<(String, Option<f64>)>)>,
    overrides: HashMap<String, f64>,
    override_status: HashMap<String, Option<String>>,
    submission_status: HashMap<String, Option<String>>,
    comments: Vec<(String, String)>,
    operations: Vec<String>,
    fail_override_fetch: bool,
    fail_mutations: bool,
    rubric_rejections: HashSet<String>,
    dropped_override_writes: HashSet<String>,
}

/// In-memory LMS for one course
///
/// Saving a rubric assessment on [`CRITERION_ID`] writes the points to the
/// student's [`REFERENCE_OUTCOME`] score, the way an aligned rubric does.
#[derive(Debug, Default)]
pub struct FakeRemote {
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_student(self, user_id: &str, enrollment_id: &str, submission_id: &str) -> Self {
        {
            let mut state = self.state.lock();
            state.students.insert(
                user_id.to_string(),
                Student {
                    enrollment_id: enrollment_id.to_string(),
                    submission_id: submission_id.to_string(),
                },
            );
            if !state.scores.iter().any(|(u, _)| u == user_id) {
                state.scores.push((user_id.to_string(), Vec::new()));
            }
        }
        self
    }

    #[must_use]
    pub fn with_outcome(self, outcome_id: &str, title: &str) -> Self {
        self.state
            .lock()
            .outcomes
            .push((outcome_id.to_string(), title.to_string()));
        self
    }

    #[must_use]
    pub fn with_score(self, user_id: &str, outcome_id: &str, score: f64) -> Self {
        self.set_score(user_id, outcome_id, score);
        self
    }

    #[must_use]
    pub fn with_override(self, user_id: &str, percentage: f64) -> Self {
        self.state
            .lock()
            .overrides
            .insert(user_id.to_string(), percentage);
        self
    }

    /// Roster matching the registered students
    pub fn roster(&self) -> Roster {
        self.state
            .lock()
            .students
            .iter()
            .fold(Roster::new(), |roster, (user, s)| {
                roster.with_student(user.as_str(), s.enrollment_id.as_str(), s.submission_id.as_str())
            })
    }

    pub fn set_score(&self, user_id: &str, outcome_id: &str, score: f64) {
        Self::write_score(&mut self.state.lock(), user_id, outcome_id, score);
    }

    fn write_score(state: &mut State, user_id: &str, outcome_id: &str, score: f64) {
        let pos = match state.scores.iter().position(|(u, _)| u == user_id) {
            Some(pos) => pos,
            None => {
                state.scores.push((user_id.to_string(), Vec::new()));
                state.scores.len() - 1
            }
        };
        let scores = &mut state.scores[pos].1;
        match scores.iter_mut().find(|(o, _)| o == outcome_id) {
            Some(entry) => entry.1 = Some(score),
            None => scores.push((outcome_id.to_string(), Some(score))),
        }
    }

    pub fn set_override(&self, user_id: &str, percentage: f64) {
        self.state
            .lock()
            .overrides
            .insert(user_id.to_string(), percentage);
    }

    pub fn fail_override_fetch(&self, fail: bool) {
        self.state.lock().fail_override_fetch = fail;
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.state.lock().fail_mutations = fail;
    }

    /// Rubric assessment for this submission returns an error entry
    pub fn reject_rubric_for(&self, submission_id: &str) {
        self.state
            .lock()
            .rubric_rejections
            .insert(submission_id.to_string());
    }

    /// Override writes for this enrollment are silently ignored
    pub fn drop_override_writes_for(&self, enrollment_id: &str) {
        self.state
            .lock()
            .dropped_override_writes
            .insert(enrollment_id.to_string());
    }

    pub fn override_enabled(&self) -> bool {
        self.state.lock().override_enabled
    }

    pub fn override_for(&self, user_id: &str) -> Option<f64> {
        self.state.lock().overrides.get(user_id).copied()
    }

    pub fn score_for(&self, user_id: &str, outcome_id: &str) -> Option<f64> {
        self.state
            .lock()
            .scores
            .iter()
            .find(|(u, _)| u == user_id)
            .and_then(|(_, scores)| scores.iter().find(|(o, _)| o == outcome_id))
            .and_then(|(_, s)| *s)
    }

    pub fn override_status(&self, enrollment_id: &str) -> Option<String> {
        self.state
            .lock()
            .override_status
            .get(enrollment_id)
            .cloned()
            .flatten()
    }

    pub fn submission_status(&self, submission_id: &str) -> Option<String> {
        self.state
            .lock()
            .submission_status
            .get(submission_id)
            .cloned()
            .flatten()
    }

    /// `(submission_id, text)` in posting order
    pub fn comments(&self) -> Vec<(String, String)> {
        self.state.lock().comments.clone()
    }

    /// Operation names in call order
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().operations.clone()
    }

    pub fn count_operation(&self, operation: &str) -> usize {
        self.state
            .lock()
            .operations
            .iter()
            .filter(|o| o.as_str() == operation)
            .count()
    }

    fn rollups_body(state: &State) -> Value {
        let rollups: Vec<Value> = state
            .scores
            .iter()
            .map(|(user, scores)| {
                let scores: Vec<Value> = scores
                    .iter()
                    .map(|(outcome, score)| json!({ "score": score, "links": { "outcome": outcome } }))
                    .collect();
                json!({ "links": { "user": user }, "scores": scores })
            })
            .collect();
        let outcomes: Vec<Value> = state
            .outcomes
            .iter()
            .map(|(id, title)| json!({ "id": id, "title": title }))
            .collect();
        json!({ "rollups": rollups, "linked": { "outcomes": outcomes } })
    }

    fn user_for(state: &State, pick: impl Fn(&Student) -> &str, id: &str) -> Option<String> {
        state
            .students
            .iter()
            .find(|(_, s)| pick(s) == id)
            .map(|(u, _)| u.clone())
    }
}

fn var_str(variables: &Value, key: &str) -> Option<String> {
    match variables.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn get(
        &self,
        path: &str,
        _params: &[(String, String)],
        operation: &str,
    ) -> Result<Value, ClientError> {
        let mut state = self.state.lock();
        state.operations.push(operation.to_string());

        if path.ends_with("/gradebook/final_grade_overrides") {
            if state.fail_override_fetch {
                return Err(ClientError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            let entries: Map<String, Value> = state
                .overrides
                .iter()
                .map(|(user, pct)| (user.clone(), json!({ "course_grade": { "percentage": pct } })))
                .collect();
            return Ok(json!({ "final_grade_overrides": entries }));
        }
        if path.ends_with("/outcome_rollups") {
            return Ok(Self::rollups_body(&state));
        }
        if path.ends_with("/enrollments") {
            let items: Vec<Value> = state
                .students
                .iter()
                .map(|(user, s)| json!({ "id": s.enrollment_id, "user_id": user }))
                .collect();
            return Ok(Value::Array(items));
        }
        if path.ends_with("/submissions") {
            let items: Vec<Value> = state
                .students
                .iter()
                .map(|(user, s)| json!({ "id": s.submission_id, "user_id": user }))
                .collect();
            return Ok(Value::Array(items));
        }

        Err(ClientError::Status {
            status: 404,
            body: format!("no route for {path}"),
        })
    }

    async fn put(&self, path: &str, body: Value, operation: &str) -> Result<Value, ClientError> {
        let mut state = self.state.lock();
        state.operations.push(operation.to_string());

        if path.ends_with("/settings") {
            if let Some(enabled) = body.get("allow_final_grade_override").and_then(Value::as_bool) {
                state.override_enabled = enabled;
            }
            return Ok(json!({ "allow_final_grade_override": state.override_enabled }));
        }

        Err(ClientError::Status {
            status: 404,
            body: format!("no route for {path}"),
        })
    }

    async fn graphql(
        &self,
        query: &str,
        variables: Value,
        operation: &str,
    ) -> Result<Value, ClientError> {
        let mut state = self.state.lock();
        state.operations.push(operation.to_string());

        if state.fail_mutations {
            return Err(ClientError::Transport("connection reset".into()));
        }

        let enrollment = var_str(&variables, "enrollmentId").unwrap_or_default();
        let submission = var_str(&variables, "submissionId").unwrap_or_default();
        let mut data = Map::new();

        if query.contains("setOverrideScore") {
            if !state.dropped_override_writes.contains(&enrollment) {
                let user = Self::user_for(&state, |s| s.enrollment_id.as_str(), &enrollment);
                if let (Some(user), Some(score)) =
                    (user, variables.get("overrideScore").and_then(Value::as_f64))
                {
                    state.overrides.insert(user, score);
                }
            }
            data.insert("a".into(), json!({ "grades": {} }));
        }
        if query.contains("setOverrideStatus") {
            let status = var_str(&variables, "overrideCustomStatusId");
            state.override_status.insert(enrollment.clone(), status);
            data.insert("b".into(), json!({ "grades": {} }));
        }
        if query.contains("updateSubmissionGradeStatus") {
            let status = var_str(&variables, "assignmentCustomStatusId");
            state.submission_status.insert(submission.clone(), status);
            data.insert("c".into(), json!({ "submission": {} }));
        }
        if query.contains("saveRubricAssessment") {
            if state.rubric_rejections.contains(&submission) {
                data.insert(
                    "d".into(),
                    json!({ "errors": [{ "message": "assessment rejected" }] }),
                );
            } else {
                let details: Value = variables
                    .get("assessmentDetails")
                    .and_then(Value::as_str)
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or(Value::Null);
                let points = details
                    .get(format!("criterion_{CRITERION_ID}"))
                    .and_then(|c| c.get("points"))
                    .and_then(Value::as_f64);
                let user = Self::user_for(&state, |s| s.submission_id.as_str(), &submission);
                if let (Some(user), Some(points)) = (user, points) {
                    Self::write_score(&mut state, &user, REFERENCE_OUTCOME, points);
                }
                data.insert("d".into(), json!({ "errors": [] }));
            }
        }
        if query.contains("createSubmissionComment") {
            let text = var_str(&variables, "commentText").unwrap_or_default();
            state.comments.push((submission, text));
            data.insert("e".into(), json!({ "submissionComment": { "_id": "c" } }));
        }

        Ok(Value::Object(data))
    }
}
