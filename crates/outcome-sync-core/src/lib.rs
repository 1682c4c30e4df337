//! Outcome Sync Core - grade reconciliation pipeline
//!
//! Keeps a course's outcome averages and final grade overrides in step:
//! - Computes each student's target average from outcome rollups
//! - Decides which students drifted on the outcome and/or override channel
//! - Applies corrections through one combined GraphQL mutation per student
//! - Verifies the remote overrides converged within tolerance
//!
//! # Example
//!
//! ```rust,ignore
//! use outcome_sync_core::prelude::*;
//!
//! # async fn example(client: &dyn RemoteClient) -> Result<(), SyncError> {
//! let config = SyncConfig::new().with_reference_outcome("42");
//! let reconciler = Reconciler::new(config);
//!
//! let course = CourseId::from("101");
//! let data = reconciler.analyzer().fetch_rollups(&course, client).await?;
//! let roster = Roster::fetch(&course, &AssignmentId::from("7"), client).await?;
//! let target = RubricTarget::new("ra_1", "_9");
//!
//! let report = reconciler.run_pass(&course, &data, &roster, &target, client).await?;
//! println!("{} mismatches", report.mismatches.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod analyzer;
pub mod client;
pub mod config;
pub mod error;
pub mod mutator;
pub mod overrides;
pub mod reconciler;
pub mod roster;
pub mod types;

// Re-exports for convenience
pub use analyzer::{ChannelDrift, OutcomeAverageAnalyzer};
pub use client::RemoteClient;
pub use config::{GradeScale, SyncConfig, DEFAULT_TOLERANCE};
pub use error::{ClientError, ConfigError, SyncError, SyncResult};
pub use mutator::UnifiedGradeMutator;
pub use overrides::{IdResolver, OverrideGradeService};
pub use reconciler::Reconciler;
pub use roster::Roster;
pub use types::{
    AssignmentId, CourseId, Decision, EnrollmentId, FailedUpdate, GradeAction,
    GradeUpdateRequest, Mismatch, MismatchReason, OutcomeCatalog, OutcomeId, OutcomeRollup,
    OutcomeScore, OverrideGradeSnapshot, PassReport, RollupData, RubricTarget, StudentHandles,
    SubmissionId, UserId,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Outcome Sync Core
    pub use crate::{
        AssignmentId, CourseId, Decision, GradeAction, GradeUpdateRequest, OutcomeAverageAnalyzer,
        OverrideGradeService, Reconciler, RemoteClient, Roster, RubricTarget, SyncConfig,
        SyncError, UnifiedGradeMutator,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
