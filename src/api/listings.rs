use hyper::StatusCode;
use serde::Deserialize;
use stallkeep_core::{Channel, PricingModel};
use uuid::Uuid;

use super::{json, ApiResponse};
use crate::error::Error;
use crate::{Marketplace, NewListing};

/// Body of PUT /api/v1/listings/{slug}
#[derive(Deserialize)]
pub struct ListingBody {
    pub name: String,
    pub developer_id: String,
    #[serde(default)]
    pub category: String,
    pub pricing_model: PricingModel,
    #[serde(default)]
    pub price_cents: u64,
    #[serde(default)]
    pub trial_days: Option<u32>,
}

#[derive(Deserialize)]
pub struct ReasonBody {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct PublishBody {
    pub submission_id: Uuid,
}

/// Handle GET /api/v1/listings/{slug}
pub async fn get(market: &Marketplace, slug: &str) -> ApiResponse {
    let listing = market.get_listing(slug).await?;
    json(StatusCode::OK, &listing)
}

/// Handle PUT /api/v1/listings/{slug}
pub async fn put(market: &Marketplace, slug: &str, body: ListingBody) -> ApiResponse {
    let listing = market
        .register_listing(NewListing {
            slug: slug.to_string(),
            name: body.name,
            developer_id: body.developer_id,
            category: body.category,
            pricing_model: body.pricing_model,
            price_cents: body.price_cents,
            trial_days: body.trial_days,
        })
        .await?;
    json(StatusCode::OK, &listing)
}

/// Handle POST /api/v1/listings/{slug}/suspend
pub async fn suspend(market: &Marketplace, slug: &str, body: ReasonBody) -> ApiResponse {
    let suspended = market
        .installations()
        .suspend_all_installations(slug, &body.reason)
        .await?;
    json(StatusCode::OK, &serde_json::json!({ "suspended": suspended }))
}

/// Handle GET /api/v1/listings/{slug}/versions
pub async fn history(market: &Marketplace, slug: &str) -> ApiResponse {
    let versions = market.versions().get_version_history(slug).await?;
    json(StatusCode::OK, &versions)
}

/// Handle POST /api/v1/listings/{slug}/versions
pub async fn publish(market: &Marketplace, slug: &str, body: PublishBody) -> ApiResponse {
    let version = market
        .versions()
        .create_version(slug, body.submission_id)
        .await?;
    json(StatusCode::CREATED, &version)
}

/// Handle GET /api/v1/listings/{slug}/latest?channel=
pub async fn latest(market: &Marketplace, slug: &str, channel: Option<&String>) -> ApiResponse {
    let channel = match channel {
        Some(raw) => raw
            .parse::<Channel>()
            .map_err(|e| Error::validation("channel", e.to_string()))?,
        None => Channel::Stable,
    };
    let latest = market
        .versions()
        .get_latest_version(slug, channel)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{channel} version of {slug}")))?;
    json(StatusCode::OK, &latest)
}

/// Handle POST /api/v1/listings/{slug}/versions/{version}/yank
pub async fn yank(market: &Marketplace, slug: &str, version: &str, body: ReasonBody) -> ApiResponse {
    let yanked = market
        .versions()
        .yank_version(slug, version, &body.reason)
        .await?;
    json(StatusCode::OK, &yanked)
}
