use std::path::PathBuf;

use hyper::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use super::{json, ApiResponse};
use crate::workflow::{NewSubmission, StageOutcome};
use crate::Marketplace;

#[derive(Deserialize)]
pub struct ScanBody {
    /// Extracted package directory, as left by package intake.
    pub package_path: PathBuf,
}

#[derive(Deserialize)]
pub struct AssignBody {
    pub reviewer_id: String,
}

#[derive(Deserialize)]
pub struct ApproveBody {
    pub approver_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct RejectBody {
    pub reviewer_id: String,
    pub reason: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct ChangesBody {
    pub reviewer_id: String,
    pub changes: Vec<String>,
}

#[derive(Deserialize)]
pub struct ResubmitBody {
    pub developer_id: String,
}

/// Handle POST /api/v1/submissions
pub async fn submit(market: &Marketplace, body: NewSubmission) -> ApiResponse {
    let submission = market.workflow().submit(body).await?;
    json(StatusCode::CREATED, &submission)
}

/// Handle GET /api/v1/submissions/{id}
pub async fn get(market: &Marketplace, id: Uuid) -> ApiResponse {
    let submission = market.workflow().get_submission(id).await?;
    json(StatusCode::OK, &submission)
}

/// Handle GET /api/v1/submissions/{id}/status
pub async fn status(market: &Marketplace, id: Uuid) -> ApiResponse {
    let progress = market.workflow().get_status(id).await?;
    json(StatusCode::OK, &progress)
}

/// Handle POST /api/v1/submissions/{id}/scan
pub async fn scan(market: &Marketplace, id: Uuid, body: ScanBody) -> ApiResponse {
    let result = market
        .workflow()
        .run_automated_scan(id, &body.package_path)
        .await?;
    json(StatusCode::OK, &result)
}

/// Handle POST /api/v1/submissions/{id}/assign
pub async fn assign(market: &Marketplace, id: Uuid, body: AssignBody) -> ApiResponse {
    let submission = market
        .workflow()
        .assign_reviewer(id, &body.reviewer_id)
        .await?;
    json(StatusCode::OK, &submission)
}

/// Handle POST /api/v1/submissions/{id}/stages/{stage}
pub async fn complete_stage(
    market: &Marketplace,
    id: Uuid,
    stage: &str,
    body: StageOutcome,
) -> ApiResponse {
    let submission = market.workflow().complete_stage(id, stage, body).await?;
    json(StatusCode::OK, &submission)
}

/// Handle POST /api/v1/submissions/{id}/approve
pub async fn approve(market: &Marketplace, id: Uuid, body: ApproveBody) -> ApiResponse {
    let outcome = market
        .workflow()
        .approve(id, &body.approver_id, body.note)
        .await?;
    json(StatusCode::OK, &outcome)
}

/// Handle POST /api/v1/submissions/{id}/reject
pub async fn reject(market: &Marketplace, id: Uuid, body: RejectBody) -> ApiResponse {
    let submission = market
        .workflow()
        .reject(id, &body.reviewer_id, &body.reason, body.note)
        .await?;
    json(StatusCode::OK, &submission)
}

/// Handle POST /api/v1/submissions/{id}/changes
pub async fn request_changes(market: &Marketplace, id: Uuid, body: ChangesBody) -> ApiResponse {
    let submission = market
        .workflow()
        .request_changes(id, &body.reviewer_id, body.changes)
        .await?;
    json(StatusCode::OK, &submission)
}

/// Handle POST /api/v1/submissions/{id}/resubmit
pub async fn resubmit(market: &Marketplace, id: Uuid, body: ResubmitBody) -> ApiResponse {
    let submission = market
        .workflow()
        .resubmit(id, &body.developer_id)
        .await?;
    json(StatusCode::OK, &submission)
}
