//! Distribution and lifecycle control plane for the marketplace.
//!
//! Developers submit versions of their listings, the [`SubmissionWorkflow`]
//! walks each submission through automated and human review, approved
//! submissions become immutable [`Version`]s through the [`VersionManager`],
//! and tenants install, update and roll back those versions through the
//! [`InstallationManager`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stallkeep::store::memory::MemoryStore;
//! use stallkeep::{Marketplace, MarketplaceSettings, NewListing, NewSubmission, PricingModel};
//!
//! # async fn run() -> stallkeep::Result<()> {
//! let market = Marketplace::new(Arc::new(MemoryStore::new()), MarketplaceSettings::default());
//! market
//!     .register_listing(NewListing {
//!         slug: "order-export".into(),
//!         name: "Order Export".into(),
//!         developer_id: "dev-1".into(),
//!         category: "reporting".into(),
//!         pricing_model: PricingModel::Free,
//!         price_cents: 0,
//!         trial_days: None,
//!     })
//!     .await?;
//!
//! let submission = market
//!     .workflow()
//!     .submit(NewSubmission {
//!         listing: "order-export".into(),
//!         name: "Order Export".into(),
//!         version: "1.0.0".into(),
//!         developer_id: "dev-1".into(),
//!         developer_email: "dev@example.com".into(),
//!         ..NewSubmission::default()
//!     })
//!     .await?;
//! let review = market
//!     .workflow()
//!     .run_automated_scan(submission.id, "/srv/packages/order-export-1.0.0".as_ref())
//!     .await?;
//! println!("scan passed: {} (score {})", review.passed, review.score);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod compat;
pub mod config;
pub mod error;
pub mod events;
pub mod installations;
pub mod review;
pub mod store;
pub mod version;
pub mod versions;
pub mod workflow;

#[cfg(test)]
mod fixtures;

use std::sync::Arc;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

pub use error::{Error, Result};
pub use events::{EventBus, LifecycleEvent};
pub use installations::{BulkUpdateEntry, InstallationManager, UpdateOutcome};
pub use review::{ReviewLimits, ReviewPipeline};
pub use stallkeep_core::{
    Channel, Installation, InstallationStats, Listing, ListingStatus, PricingModel, ReviewResult,
    Submission, SubmissionProgress, Version,
};
pub use store::Store;
pub use versions::{RuntimeEnv, VersionManager};
pub use workflow::{ApprovalOutcome, NewSubmission, StageOutcome, SubmissionWorkflow, WorkflowSettings};

/// Catalog fields of a listing, as the catalog layer supplies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewListing {
    pub slug: String,
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

/// Settings for the components [`Marketplace`] builds.
#[derive(Debug, Clone)]
pub struct MarketplaceSettings {
    pub runtime: RuntimeEnv,
    pub review: ReviewLimits,
    pub workflow: WorkflowSettings,
    /// Buffered lifecycle events per subscriber.
    pub event_capacity: usize,
}

impl Default for MarketplaceSettings {
    fn default() -> Self {
        Self {
            runtime: RuntimeEnv::default(),
            review: ReviewLimits::default(),
            workflow: WorkflowSettings::default(),
            event_capacity: 256,
        }
    }
}

/// The lifecycle engine, wired over one store and one event bus.
pub struct Marketplace {
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    pipeline: ReviewPipeline,
    workflow: SubmissionWorkflow,
    versions: Arc<VersionManager>,
    installations: InstallationManager,
}

impl Marketplace {
    pub fn new(store: Arc<dyn Store>, settings: MarketplaceSettings) -> Self {
        let events = Arc::new(EventBus::new(settings.event_capacity));
        let pipeline = ReviewPipeline::new(settings.review);
        let workflow = SubmissionWorkflow::new(
            store.clone(),
            events.clone(),
            pipeline.clone(),
            settings.workflow,
        );
        let versions = Arc::new(VersionManager::new(
            store.clone(),
            events.clone(),
            settings.runtime,
        ));
        let installations = InstallationManager::new(store.clone(), events.clone(), versions.clone());
        Self {
            store,
            events,
            pipeline,
            workflow,
            versions,
            installations,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn pipeline(&self) -> &ReviewPipeline {
        &self.pipeline
    }

    pub fn workflow(&self) -> &SubmissionWorkflow {
        &self.workflow
    }

    pub fn versions(&self) -> &VersionManager {
        &self.versions
    }

    pub fn installations(&self) -> &InstallationManager {
        &self.installations
    }

    /// Create a listing, or update the catalog fields of an existing one.
    ///
    /// Status, rating and creation time of an existing listing are kept.
    pub async fn register_listing(&self, fields: NewListing) -> Result<Listing> {
        store::validate_slug(&fields.slug)?;
        if fields.name.trim().is_empty() {
            return Err(Error::validation("name", "is required"));
        }
        if fields.developer_id.trim().is_empty() {
            return Err(Error::validation("developer_id", "is required"));
        }

        let listing = match self.store.get_listing(&fields.slug).await {
            Ok(existing) => Listing {
                name: fields.name,
                developer_id: fields.developer_id,
                category: fields.category,
                pricing_model: fields.pricing_model,
                price_cents: fields.price_cents,
                trial_days: fields.trial_days,
                ..existing
            },
            Err(Error::NotFound(_)) => Listing {
                slug: fields.slug,
                name: fields.name,
                developer_id: fields.developer_id,
                category: fields.category,
                pricing_model: fields.pricing_model,
                price_cents: fields.price_cents,
                trial_days: fields.trial_days,
                rating: 0.0,
                review_count: 0,
                status: ListingStatus::Draft,
                created_at: Timestamp::now(),
            },
            Err(e) => return Err(e),
        };
        self.store.put_listing(listing.clone()).await?;
        info!(listing = %listing.slug, status = %listing.status, "Listing registered");
        Ok(listing)
    }

    pub async fn get_listing(&self, slug: &str) -> Result<Listing> {
        self.store.get_listing(slug).await
    }
}
