use hyper::StatusCode;
use serde::Deserialize;
use stallkeep_core::Channel;
use uuid::Uuid;

use super::{json, ApiResponse};
use crate::Marketplace;

#[derive(Deserialize)]
pub struct InstallBody {
    pub listing: String,
}

#[derive(Deserialize)]
pub struct RollbackBody {
    pub version: String,
}

#[derive(Deserialize)]
pub struct ChannelBody {
    pub channel: Channel,
}

/// Handle GET /api/v1/tenants/{tenant}/installations
pub async fn list(market: &Marketplace, tenant: &str) -> ApiResponse {
    let rows = market.installations().list_installations(tenant).await?;
    json(StatusCode::OK, &rows)
}

/// Handle POST /api/v1/tenants/{tenant}/installations
pub async fn install(market: &Marketplace, tenant: &str, body: InstallBody) -> ApiResponse {
    let row = market.installations().install(&body.listing, tenant).await?;
    json(StatusCode::CREATED, &row)
}

/// Handle GET /api/v1/tenants/{tenant}/stats
pub async fn stats(market: &Marketplace, tenant: &str) -> ApiResponse {
    let stats = market.installations().get_stats(tenant).await?;
    json(StatusCode::OK, &stats)
}

/// Handle GET /api/v1/tenants/{tenant}/updates
pub async fn needing_update(market: &Marketplace, tenant: &str) -> ApiResponse {
    let rows = market
        .installations()
        .get_installations_needing_update(tenant)
        .await?;
    json(StatusCode::OK, &rows)
}

/// Handle POST /api/v1/tenants/{tenant}/update-all
pub async fn update_all(market: &Marketplace, tenant: &str) -> ApiResponse {
    let results = market.installations().update_all(tenant).await?;
    json(StatusCode::OK, &results)
}

/// Handle GET /api/v1/installations/{id}
pub async fn get(market: &Marketplace, id: Uuid) -> ApiResponse {
    let row = market.installations().get_installation(id).await?;
    json(StatusCode::OK, &row)
}

/// Handle POST /api/v1/installations/{id}/activate
pub async fn activate(market: &Marketplace, id: Uuid) -> ApiResponse {
    let row = market.installations().activate(id).await?;
    json(StatusCode::OK, &row)
}

/// Handle POST /api/v1/installations/{id}/deactivate
pub async fn deactivate(market: &Marketplace, id: Uuid) -> ApiResponse {
    let row = market.installations().deactivate(id).await?;
    json(StatusCode::OK, &row)
}

/// Handle POST /api/v1/installations/{id}/update
pub async fn update(market: &Marketplace, id: Uuid) -> ApiResponse {
    let outcome = market.installations().update(id).await?;
    json(StatusCode::OK, &outcome)
}

/// Handle POST /api/v1/installations/{id}/rollback
pub async fn rollback(market: &Marketplace, id: Uuid, body: RollbackBody) -> ApiResponse {
    let row = market.installations().rollback(id, &body.version).await?;
    json(StatusCode::OK, &row)
}

/// Handle POST /api/v1/installations/{id}/uninstall
pub async fn uninstall(market: &Marketplace, id: Uuid) -> ApiResponse {
    let row = market.installations().uninstall(id).await?;
    json(StatusCode::OK, &row)
}

/// Handle POST /api/v1/installations/{id}/purchase
pub async fn purchase(market: &Marketplace, id: Uuid) -> ApiResponse {
    let row = market.installations().mark_purchased(id).await?;
    json(StatusCode::OK, &row)
}

/// Handle PUT /api/v1/installations/{id}/channel
pub async fn channel(market: &Marketplace, id: Uuid, body: ChannelBody) -> ApiResponse {
    let row = market
        .installations()
        .subscribe_channel(id, body.channel)
        .await?;
    json(StatusCode::OK, &row)
}

/// Handle POST /api/v1/scheduler/trials
pub async fn expire_trials(market: &Marketplace) -> ApiResponse {
    let expired = market.installations().process_expired_trials().await?;
    json(StatusCode::OK, &serde_json::json!({ "expired": expired }))
}
