//! Core types for the stallkeep marketplace control plane.
//!
//! This crate provides the entity and result types shared by the stallkeep
//! lifecycle engine and by clients that talk to its API.
//!
//! # Overview
//!
//! The main types are:
//!
//! - [`Listing`] - A catalog entry for one installable extension
//! - [`Version`] - An immutable, published artifact of a listing
//! - [`Submission`] - A developer's proposal to publish a version
//! - [`Installation`] - The binding between one listing and one tenant
//! - [`ReviewResult`] - Output of one automated review run
//!
//! Every status and name that drives behavior is a closed enum with a
//! stable `snake_case` wire form, so adding a stage or a rejection reason is
//! a compile-checked change.
//!
//! # Example
//!
//! ```
//! use stallkeep_core::{RejectionReason, Stage};
//!
//! let stage: Stage = "code_quality".parse().unwrap();
//! assert_eq!(stage.next(), Some(Stage::FunctionalityTest));
//!
//! let reason: RejectionReason = "malicious_code".parse().unwrap();
//! assert!(!reason.allows_resubmission());
//! ```

use std::fmt;
use std::str::FromStr;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a wire string does not name a known enum member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    /// What was being parsed (e.g. `"stage"`).
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Declares a closed, string-backed enum with `as_str`, `ALL`, `Display`
/// and `FromStr` implementations that agree with its serde form.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every member, in declaration order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant ),+ ];

            /// The `snake_case` wire name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $wire ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $wire => Ok($name::$variant), )+
                    _ => Err(ParseEnumError { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

wire_enum! {
    /// How a listing is paid for.
    PricingModel, "pricing model" {
        Free => "free",
        OneTime => "one_time",
        Subscription => "subscription",
    }
}

wire_enum! {
    /// Catalog lifecycle of a listing.
    ListingStatus, "listing status" {
        Draft => "draft",
        Published => "published",
        Suspended => "suspended",
        Delisted => "delisted",
    }
}

/// A catalog entry for one installable extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    /// Unique slug (e.g. `"order-export"`).
    pub slug: String,
    /// Human-readable name.
    pub name: String,
    /// Owning developer.
    pub developer_id: String,
    pub category: String,
    pub pricing_model: PricingModel,
    /// Price in the smallest currency unit.
    #[serde(default)]
    pub price_cents: u64,
    /// Trial length offered to new installs of a paid listing.
    #[serde(default)]
    pub trial_days: Option<u32>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: u32,
    pub status: ListingStatus,
    pub created_at: Timestamp,
}

impl Listing {
    /// Trial length granted on install, if the listing offers one.
    pub fn trial_period(&self) -> Option<u32> {
        match self.pricing_model {
            PricingModel::Free => None,
            PricingModel::OneTime | PricingModel::Subscription => {
                self.trial_days.filter(|days| *days > 0)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

wire_enum! {
    /// Release track a version is published to and a tenant subscribes to.
    Channel, "channel" {
        Stable => "stable",
        Beta => "beta",
        Alpha => "alpha",
    }
}

impl Default for Channel {
    fn default() -> Self {
        Channel::Stable
    }
}

wire_enum! {
    /// Visibility of a published version.
    VersionStatus, "version status" {
        Published => "published",
        Yanked => "yanked",
    }
}

/// Host-runtime and platform bounds a version declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityBounds {
    /// Lowest supported host runtime version (inclusive).
    #[serde(default)]
    pub host_min: Option<String>,
    /// Highest supported host runtime version (inclusive).
    #[serde(default)]
    pub host_max: Option<String>,
    /// Lowest supported platform version (inclusive).
    #[serde(default)]
    pub platform_min: Option<String>,
}

/// An immutable, published artifact of a listing.
///
/// Only `status`, `yanked_at` and `yank_reason` change after publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: Uuid,
    /// Slug of the owning listing.
    pub listing: String,
    /// Semantic version string (e.g. `"1.4.0-beta.2"`).
    pub version: String,
    pub channel: Channel,
    pub status: VersionStatus,
    #[serde(default)]
    pub changelog: String,
    #[serde(default)]
    pub compatibility: CompatibilityBounds,
    /// Submission this version was created from.
    #[serde(default)]
    pub submission_id: Option<Uuid>,
    pub published_at: Timestamp,
    #[serde(default)]
    pub yanked_at: Option<Timestamp>,
    #[serde(default)]
    pub yank_reason: Option<String>,
}

impl Version {
    pub fn is_published(&self) -> bool {
        self.status == VersionStatus::Published
    }
}

/// Result of checking a version against a runtime/platform pair.
///
/// A failed check is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compatibility {
    pub compatible: bool,
    /// One human-readable line per violated bound.
    pub issues: Vec<String>,
}

// ---------------------------------------------------------------------------
// Submissions
// ---------------------------------------------------------------------------

wire_enum! {
    /// Review state of a submission.
    SubmissionStatus, "submission status" {
        Draft => "draft",
        Pending => "pending",
        InReview => "in_review",
        ChangesRequested => "changes_requested",
        Approved => "approved",
        Rejected => "rejected",
    }
}

impl SubmissionStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Draft, Pending)
                | (Pending, InReview)
                | (Pending, ChangesRequested)
                | (Pending, Rejected)
                | (InReview, ChangesRequested)
                | (InReview, Approved)
                | (InReview, Rejected)
                | (ChangesRequested, Pending)
                | (ChangesRequested, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Approved | SubmissionStatus::Rejected)
    }
}

wire_enum! {
    /// The six ordered review stages between submission and approval.
    Stage, "stage" {
        AutomatedScan => "automated_scan",
        SecurityReview => "security_review",
        CodeQuality => "code_quality",
        FunctionalityTest => "functionality_test",
        DocumentationReview => "documentation_review",
        FinalReview => "final_review",
    }
}

impl Stage {
    /// The stage after this one, or `None` for the last stage.
    pub fn next(self) -> Option<Stage> {
        let idx = Stage::ALL.iter().position(|s| *s == self)?;
        Stage::ALL.get(idx + 1).copied()
    }

    /// Whether the stage is performed by a human reviewer.
    pub fn is_human(self) -> bool {
        self != Stage::AutomatedScan
    }
}

wire_enum! {
    /// Why a submission was rejected.
    RejectionReason, "rejection reason" {
        SecurityVulnerability => "security_vulnerability",
        MaliciousCode => "malicious_code",
        PoorCodeQuality => "poor_code_quality",
        FunctionalityIssues => "functionality_issues",
        InsufficientDocumentation => "insufficient_documentation",
        PolicyViolation => "policy_violation",
        DuplicateListing => "duplicate_listing",
        Other => "other",
    }
}

impl RejectionReason {
    /// Malicious code permanently bars resubmission; everything else may
    /// come back.
    pub fn allows_resubmission(self) -> bool {
        self != RejectionReason::MaliciousCode
    }
}

/// Recorded outcome of one review stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub passed: bool,
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub reviewer_id: Option<String>,
    pub completed_at: Timestamp,
}

/// A rejection decision attached to a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub reviewer_id: String,
    #[serde(default)]
    pub note: Option<String>,
    pub can_resubmit: bool,
    #[serde(default)]
    pub guidance: Vec<String>,
    pub rejected_at: Timestamp,
}

/// Changes a reviewer asked for before review can continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub reviewer_id: String,
    pub changes: Vec<String>,
    pub deadline: Timestamp,
    pub requested_at: Timestamp,
}

/// One reviewable proposal to publish a version of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    /// Slug of the target listing.
    pub listing: String,
    pub name: String,
    /// Target version string, normalized at submit time.
    pub version: String,
    pub developer_id: String,
    pub developer_email: String,
    pub status: SubmissionStatus,
    /// Stage records in completion order.
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    #[serde(default)]
    pub current_stage: Option<Stage>,
    #[serde(default)]
    pub reviewer_id: Option<String>,
    #[serde(default)]
    pub changelog: String,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub compatibility: CompatibilityBounds,
    /// Latest automated review output.
    #[serde(default)]
    pub review: Option<ReviewResult>,
    #[serde(default)]
    pub change_request: Option<ChangeRequest>,
    #[serde(default)]
    pub rejection: Option<Rejection>,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub approval_note: Option<String>,
    /// Review round, incremented on every resubmission.
    #[serde(default = "default_round")]
    pub round: u32,
    /// Optimistic-concurrency counter maintained by the store.
    #[serde(default)]
    pub revision: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

fn default_round() -> u32 {
    1
}

impl Submission {
    /// The record for `stage`, if one exists in the current round.
    pub fn stage_record(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().rev().find(|r| r.stage == stage)
    }

    pub fn stage_passed(&self, stage: Stage) -> bool {
        self.stage_record(stage).is_some_and(|r| r.passed)
    }

    /// Stages that have not passed yet, in review order.
    pub fn outstanding_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .iter()
            .copied()
            .filter(|s| !self.stage_passed(*s))
            .collect()
    }
}

/// One row of a submission's stage list in [`SubmissionProgress`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProgress {
    pub stage: Stage,
    pub completed: bool,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

/// Progress report for a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionProgress {
    pub id: Uuid,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub current_stage: Option<Stage>,
    /// Number of stages that have passed.
    pub completed: usize,
    pub total: usize,
    pub stages: Vec<StageProgress>,
}

impl SubmissionProgress {
    pub fn of(submission: &Submission) -> Self {
        let stages: Vec<StageProgress> = Stage::ALL
            .iter()
            .map(|stage| {
                let record = submission.stage_record(*stage);
                StageProgress {
                    stage: *stage,
                    completed: record.is_some(),
                    passed: record.map(|r| r.passed),
                    completed_at: record.map(|r| r.completed_at),
                }
            })
            .collect();
        Self {
            id: submission.id,
            status: submission.status,
            current_stage: submission.current_stage,
            completed: stages.iter().filter(|s| s.passed == Some(true)).count(),
            total: Stage::ALL.len(),
            stages,
        }
    }
}

// ---------------------------------------------------------------------------
// Review results
// ---------------------------------------------------------------------------

wire_enum! {
    /// Grouping of automated review checks.
    CheckCategory, "check category" {
        Security => "security",
        Quality => "quality",
        Structure => "structure",
    }
}

/// Outcome of one automated check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub category: CheckCategory,
    pub name: String,
    pub passed: bool,
    /// Whether a failure of this check blocks approval.
    pub blocking: bool,
    pub message: String,
}

/// Output of one automated review run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    /// True only when no blocking issue exists.
    pub passed: bool,
    /// Weighted score, 0 to 100.
    pub score: u8,
    pub checks: Vec<CheckResult>,
    /// Blocking problems.
    pub issues: Vec<String>,
    /// Non-blocking problems.
    pub warnings: Vec<String>,
    /// SHA-256 over the scanned files' relative paths and contents.
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub reviewed_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Installations
// ---------------------------------------------------------------------------

wire_enum! {
    /// Per-tenant state of an installation.
    InstallationStatus, "installation status" {
        Active => "active",
        Inactive => "inactive",
        Suspended => "suspended",
        Uninstalled => "uninstalled",
    }
}

/// The binding between one listing and one tenant.
///
/// At most one row exists per (listing, tenant); uninstalling keeps the row
/// and reinstalling reactivates it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installation {
    pub id: Uuid,
    /// Slug of the installed listing.
    pub listing: String,
    pub tenant_id: String,
    pub version_id: Uuid,
    /// Denormalized version string of `version_id`.
    pub installed_version: String,
    pub status: InstallationStatus,
    /// Update channel the tenant follows.
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub is_trial: bool,
    #[serde(default)]
    pub trial_expires_at: Option<Timestamp>,
    /// Set once a trial has ever been granted on this row.
    #[serde(default)]
    pub trial_consumed: bool,
    /// Set by the trial sweep; cleared by an explicit purchase.
    #[serde(default)]
    pub awaiting_purchase: bool,
    #[serde(default)]
    pub suspension_reason: Option<String>,
    pub installed_at: Timestamp,
    #[serde(default)]
    pub uninstalled_at: Option<Timestamp>,
    pub updated_at: Timestamp,
    /// Optimistic-concurrency counter maintained by the store.
    #[serde(default)]
    pub revision: u64,
}

impl Installation {
    /// Whether the row currently counts as installed.
    pub fn is_live(&self) -> bool {
        self.status != InstallationStatus::Uninstalled
    }
}

/// Installation counts for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationStats {
    /// Installations that are not uninstalled.
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub suspended: usize,
    pub uninstalled: usize,
    pub trials: usize,
}
