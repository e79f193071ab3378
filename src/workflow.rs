//! Submission review state machine.
//!
//! Every mutation reads the submission, validates the transition against
//! [`SubmissionStatus::can_transition_to`], and writes it back with a
//! compare-and-swap on the record's revision. Two reviewers racing on the
//! same submission cannot both win: the loser gets [`Error::Conflict`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use stallkeep_core::{
    ChangeRequest, Channel, CompatibilityBounds, Rejection, RejectionReason, ReviewResult,
    Stage, StageRecord, Submission, SubmissionProgress, SubmissionStatus,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::review::ReviewPipeline;
use crate::store::Store;
use crate::version;

/// Workflow tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Days a developer has to address requested changes (default: 14).
    #[serde(default = "default_changes_deadline_days")]
    pub changes_deadline_days: u32,
}

fn default_changes_deadline_days() -> u32 {
    14
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            changes_deadline_days: default_changes_deadline_days(),
        }
    }
}

/// Developer-supplied fields of a new submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSubmission {
    pub listing: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub developer_id: String,
    #[serde(default)]
    pub developer_email: String,
    #[serde(default)]
    pub changelog: String,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub compatibility: CompatibilityBounds,
}

/// A reviewer's verdict on one stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageOutcome {
    pub passed: bool,
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub reviewer_id: Option<String>,
    /// When non-empty on a failed stage, the submission moves to
    /// `changes_requested` with these items.
    #[serde(default)]
    pub changes: Vec<String>,
}

/// Result of an approval.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub submission: Submission,
    pub next_steps: Vec<String>,
}

/// Drives submissions from draft to approved or rejected.
pub struct SubmissionWorkflow {
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    pipeline: ReviewPipeline,
    settings: WorkflowSettings,
}

impl SubmissionWorkflow {
    pub fn new(
        store: Arc<dyn Store>,
        events: Arc<EventBus>,
        pipeline: ReviewPipeline,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            events,
            pipeline,
            settings,
        }
    }

    /// Validate and queue a new submission for automated review.
    ///
    /// Fields are checked in the order name, version, developer id,
    /// developer email; the error names the first one that is invalid.
    pub async fn submit(&self, fields: NewSubmission) -> Result<Submission> {
        let name = required("name", &fields.name)?;
        required("version", &fields.version)?;
        let version = version::require("version", &fields.version)?.to_string();
        let developer_id = required("developer_id", &fields.developer_id)?;
        let developer_email = required("developer_email", &fields.developer_email)?;
        if !is_email(developer_email) {
            return Err(Error::validation(
                "developer_email",
                format!("'{developer_email}' is not an email address"),
            ));
        }
        self.store.get_listing(&fields.listing).await?;

        let now = Timestamp::now();
        let mut submission = Submission {
            id: Uuid::new_v4(),
            listing: fields.listing,
            name: name.to_string(),
            version,
            developer_id: developer_id.to_string(),
            developer_email: developer_email.to_string(),
            status: SubmissionStatus::Draft,
            stages: Vec::new(),
            current_stage: None,
            reviewer_id: None,
            changelog: fields.changelog,
            channel: fields.channel,
            compatibility: fields.compatibility,
            review: None,
            change_request: None,
            rejection: None,
            approved_by: None,
            approval_note: None,
            round: 1,
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        transition(&mut submission, SubmissionStatus::Pending, "submit")?;
        submission.current_stage = Some(Stage::AutomatedScan);

        let submission = self.store.insert_submission(submission).await?;
        info!(
            submission = %submission.id,
            listing = %submission.listing,
            version = %submission.version,
            "Submission queued for automated review"
        );
        self.events.publish(LifecycleEvent::SubmissionSubmitted {
            submission_id: submission.id,
            listing: submission.listing.clone(),
            version: submission.version.clone(),
        });
        Ok(submission)
    }

    pub async fn get_submission(&self, id: Uuid) -> Result<Submission> {
        debug!(submission = %id, "Loading submission");
        self.store.get_submission(id).await
    }

    /// Stage-by-stage progress of a submission.
    pub async fn get_status(&self, id: Uuid) -> Result<SubmissionProgress> {
        let submission = self.store.get_submission(id).await?;
        Ok(SubmissionProgress::of(&submission))
    }

    /// Run the review pipeline against an extracted package and record the
    /// result as the `automated_scan` stage.
    ///
    /// A failing scan is recorded, not raised.
    pub async fn run_automated_scan(&self, id: Uuid, package_path: &Path) -> Result<ReviewResult> {
        let submission = self.store.get_submission(id).await?;
        ensure_scannable(&submission)?;

        let pipeline = self.pipeline.clone();
        let path: PathBuf = package_path.to_path_buf();
        let scanned = submission.clone();
        let result = tokio::task::spawn_blocking(move || pipeline.run(&scanned, &path))
            .await
            .map_err(|e| Error::Internal(format!("review task failed: {e}")))?;

        let mut submission = self.store.get_submission(id).await?;
        ensure_scannable(&submission)?;
        submission.stages.push(StageRecord {
            stage: Stage::AutomatedScan,
            passed: result.passed,
            score: Some(result.score),
            notes: Some(scan_summary(&result)),
            reviewer_id: None,
            completed_at: Timestamp::now(),
        });
        if result.passed && submission.current_stage == Some(Stage::AutomatedScan) {
            submission.current_stage = Stage::AutomatedScan.next();
        }
        submission.review = Some(result.clone());
        let submission = self.commit(submission).await?;

        info!(
            submission = %submission.id,
            passed = result.passed,
            score = result.score,
            "Automated scan recorded"
        );
        Ok(result)
    }

    /// Move a pending submission into human review.
    pub async fn assign_reviewer(&self, id: Uuid, reviewer_id: &str) -> Result<Submission> {
        let reviewer_id = required("reviewer_id", reviewer_id)?;
        let mut submission = self.store.get_submission(id).await?;
        transition(&mut submission, SubmissionStatus::InReview, "assign a reviewer to")?;
        submission.reviewer_id = Some(reviewer_id.to_string());
        submission.current_stage = Some(Stage::SecurityReview);
        let submission = self.commit(submission).await?;

        info!(submission = %submission.id, reviewer = %reviewer_id, "Reviewer assigned");
        Ok(submission)
    }

    /// Record the outcome of one human review stage.
    ///
    /// A passing stage advances the stage pointer. A failing stage with
    /// requested changes moves the submission to `changes_requested`; a
    /// failing stage without changes leaves the pointer where it is. The
    /// `automated_scan` stage is only ever recorded by
    /// [`run_automated_scan`](Self::run_automated_scan).
    pub async fn complete_stage(
        &self,
        id: Uuid,
        stage_name: &str,
        outcome: StageOutcome,
    ) -> Result<Submission> {
        let stage: Stage = stage_name
            .parse()
            .map_err(|_| Error::InvalidStage(stage_name.to_string()))?;
        if !stage.is_human() {
            return Err(Error::InvalidStage(format!(
                "{stage} is recorded by the automated scan"
            )));
        }
        let mut submission = self.store.get_submission(id).await?;

        if submission.status != SubmissionStatus::InReview {
            return Err(Error::transition(
                "submission",
                submission.status,
                format!("complete stage {stage} of"),
            ));
        }
        if submission.current_stage != Some(stage) {
            let current = submission
                .current_stage
                .map_or("none", |s| s.as_str());
            return Err(Error::InvalidStage(format!(
                "{stage} is not the current stage ({current})"
            )));
        }

        let now = Timestamp::now();
        let reviewer_id = outcome
            .reviewer_id
            .clone()
            .or_else(|| submission.reviewer_id.clone());
        submission.stages.push(StageRecord {
            stage,
            passed: outcome.passed,
            score: outcome.score.map(|s| s.min(100)),
            notes: outcome.notes,
            reviewer_id: reviewer_id.clone(),
            completed_at: now,
        });

        let changes = clean_changes(outcome.changes);
        let mut requested = None;
        if outcome.passed {
            submission.current_stage = stage.next();
        } else if !changes.is_empty() {
            transition(
                &mut submission,
                SubmissionStatus::ChangesRequested,
                "request changes on",
            )?;
            let deadline = self.deadline(now)?;
            requested = Some((changes.len(), deadline));
            submission.change_request = Some(ChangeRequest {
                reviewer_id: reviewer_id.unwrap_or_default(),
                changes,
                deadline,
                requested_at: now,
            });
        }

        let submission = self.commit(submission).await?;
        info!(
            submission = %submission.id,
            stage = %stage,
            passed = outcome.passed,
            status = %submission.status,
            "Stage completed"
        );
        if let Some((changes, deadline)) = requested {
            self.events.publish(LifecycleEvent::ChangesRequested {
                submission_id: submission.id,
                listing: submission.listing.clone(),
                changes,
                deadline,
            });
        }
        Ok(submission)
    }

    /// Approve a submission whose six stages have all passed.
    pub async fn approve(
        &self,
        id: Uuid,
        approver_id: &str,
        note: Option<String>,
    ) -> Result<ApprovalOutcome> {
        let approver_id = required("approver_id", approver_id)?;
        let mut submission = self.store.get_submission(id).await?;
        if !submission.status.can_transition_to(SubmissionStatus::Approved) {
            return Err(Error::transition("submission", submission.status, "approve"));
        }
        let outstanding = submission.outstanding_stages();
        if !outstanding.is_empty() {
            return Err(Error::StagesIncomplete {
                id,
                outstanding: outstanding
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        transition(&mut submission, SubmissionStatus::Approved, "approve")?;
        submission.approved_by = Some(approver_id.to_string());
        submission.approval_note = note;
        submission.current_stage = None;
        let submission = self.commit(submission).await?;

        info!(
            submission = %submission.id,
            listing = %submission.listing,
            version = %submission.version,
            approver = %approver_id,
            "Submission approved"
        );
        self.events.publish(LifecycleEvent::SubmissionApproved {
            submission_id: submission.id,
            listing: submission.listing.clone(),
            version: submission.version.clone(),
            approver_id: approver_id.to_string(),
        });

        let next_steps = vec![
            format!(
                "Publish version {} of {} to the {} channel",
                submission.version, submission.listing, submission.channel
            ),
            "Tenants on that channel will be offered the update once it is published".to_string(),
        ];
        Ok(ApprovalOutcome {
            submission,
            next_steps,
        })
    }

    /// Reject a submission for one of the enumerated reasons.
    pub async fn reject(
        &self,
        id: Uuid,
        reviewer_id: &str,
        reason: &str,
        note: Option<String>,
    ) -> Result<Submission> {
        let reason: RejectionReason = reason
            .parse()
            .map_err(|_| Error::UnknownRejectionReason(reason.to_string()))?;
        let reviewer_id = required("reviewer_id", reviewer_id)?;
        let mut submission = self.store.get_submission(id).await?;
        transition(&mut submission, SubmissionStatus::Rejected, "reject")?;

        let can_resubmit = reason.allows_resubmission();
        submission.rejection = Some(Rejection {
            reason,
            reviewer_id: reviewer_id.to_string(),
            note,
            can_resubmit,
            guidance: if can_resubmit {
                resubmission_guidance(reason)
            } else {
                Vec::new()
            },
            rejected_at: Timestamp::now(),
        });
        submission.current_stage = None;
        let submission = self.commit(submission).await?;

        info!(
            submission = %submission.id,
            reason = %reason,
            can_resubmit,
            "Submission rejected"
        );
        self.events.publish(LifecycleEvent::SubmissionRejected {
            submission_id: submission.id,
            listing: submission.listing.clone(),
            reason,
            can_resubmit,
        });
        Ok(submission)
    }

    /// Send a submission back to its developer with a list of changes.
    pub async fn request_changes(
        &self,
        id: Uuid,
        reviewer_id: &str,
        changes: Vec<String>,
    ) -> Result<Submission> {
        let reviewer_id = required("reviewer_id", reviewer_id)?;
        let changes = clean_changes(changes);
        if changes.is_empty() {
            return Err(Error::validation("changes", "at least one change is required"));
        }
        let mut submission = self.store.get_submission(id).await?;
        transition(&mut submission, SubmissionStatus::ChangesRequested, "request changes on")?;

        let now = Timestamp::now();
        let deadline = self.deadline(now)?;
        let count = changes.len();
        submission.change_request = Some(ChangeRequest {
            reviewer_id: reviewer_id.to_string(),
            changes,
            deadline,
            requested_at: now,
        });
        let submission = self.commit(submission).await?;

        info!(submission = %submission.id, changes = count, %deadline, "Changes requested");
        self.events.publish(LifecycleEvent::ChangesRequested {
            submission_id: submission.id,
            listing: submission.listing.clone(),
            changes: count,
            deadline,
        });
        Ok(submission)
    }

    /// Return a submission with addressed changes to the review queue.
    ///
    /// Starts a new review round: stage records and the previous scan are
    /// discarded and review restarts at `automated_scan`.
    pub async fn resubmit(&self, id: Uuid, developer_id: &str) -> Result<Submission> {
        let mut submission = self.store.get_submission(id).await?;
        if submission.developer_id != developer_id {
            return Err(Error::validation(
                "developer_id",
                format!("submission {id} belongs to another developer"),
            ));
        }
        transition(&mut submission, SubmissionStatus::Pending, "resubmit")?;
        submission.change_request = None;
        submission.stages.clear();
        submission.review = None;
        submission.reviewer_id = None;
        submission.current_stage = Some(Stage::AutomatedScan);
        submission.round += 1;
        let submission = self.commit(submission).await?;

        info!(submission = %submission.id, round = submission.round, "Submission resubmitted");
        self.events.publish(LifecycleEvent::SubmissionSubmitted {
            submission_id: submission.id,
            listing: submission.listing.clone(),
            version: submission.version.clone(),
        });
        Ok(submission)
    }

    async fn commit(&self, mut submission: Submission) -> Result<Submission> {
        submission.updated_at = Timestamp::now();
        self.store.swap_submission(submission).await
    }

    fn deadline(&self, from: Timestamp) -> Result<Timestamp> {
        let hours = i64::from(self.settings.changes_deadline_days) * 24;
        from.checked_add(SignedDuration::from_hours(hours))
            .map_err(|e| Error::Internal(format!("deadline out of range: {e}")))
    }
}

fn transition(submission: &mut Submission, next: SubmissionStatus, action: &str) -> Result<()> {
    if !submission.status.can_transition_to(next) {
        return Err(Error::transition("submission", submission.status, action));
    }
    submission.status = next;
    Ok(())
}

fn ensure_scannable(submission: &Submission) -> Result<()> {
    match submission.status {
        SubmissionStatus::Pending | SubmissionStatus::InReview => Ok(()),
        other => Err(Error::transition("submission", other, "scan")),
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation(field, "is required"))
    } else {
        Ok(trimmed)
    }
}

/// Structural email check: one `@`, a non-empty local part, and a dotted
/// domain without empty labels.
fn is_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

fn clean_changes(changes: Vec<String>) -> Vec<String> {
    changes
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn scan_summary(result: &ReviewResult) -> String {
    format!(
        "score {}; {} issue(s), {} warning(s)",
        result.score,
        result.issues.len(),
        result.warnings.len()
    )
}

fn resubmission_guidance(reason: RejectionReason) -> Vec<String> {
    let specific = match reason {
        RejectionReason::SecurityVulnerability => {
            "Fix the reported vulnerabilities and describe the fixes in the changelog"
        }
        RejectionReason::PoorCodeQuality => "Address the code quality findings from the review",
        RejectionReason::FunctionalityIssues => {
            "Make sure every advertised feature works on a clean install"
        }
        RejectionReason::InsufficientDocumentation => {
            "Document installation, configuration and every required permission"
        }
        RejectionReason::PolicyViolation => "Review the marketplace policies and remove violating behavior",
        RejectionReason::DuplicateListing => {
            "Explain how the extension differs from existing listings"
        }
        RejectionReason::Other => "Address the reviewer's notes",
        RejectionReason::MaliciousCode => return Vec::new(),
    };
    vec![
        specific.to_string(),
        "Submit a new version once the issues are resolved".to_string(),
    ]
}
