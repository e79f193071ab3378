//! Shared test setup.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use stallkeep_core::{
    Channel, CompatibilityBounds, Installation, Listing, PricingModel, Submission, Version,
};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::review::tests::{clean_package, write, GOOD_MANIFEST};
use crate::store::memory::MemoryStore;
use crate::store::{InstallationFilter, Store};
use crate::workflow::{NewSubmission, StageOutcome};
use crate::{Marketplace, MarketplaceSettings, NewListing};

pub(crate) fn listing(slug: &str, pricing_model: PricingModel, trial_days: Option<u32>) -> NewListing {
    NewListing {
        slug: slug.to_string(),
        name: slug.replace('-', " "),
        developer_id: "dev-1".to_string(),
        category: "reporting".to_string(),
        pricing_model,
        price_cents: if pricing_model == PricingModel::Free { 0 } else { 1900 },
        trial_days,
    }
}

/// A memory-backed marketplace with a free listing `order-export` and a
/// subscription listing `report-pro` offering a 14 day trial.
pub(crate) async fn marketplace() -> Marketplace {
    marketplace_on(Arc::new(MemoryStore::new())).await
}

/// [`marketplace`] over a caller-supplied store.
pub(crate) async fn marketplace_on(store: Arc<dyn Store>) -> Marketplace {
    let market = Marketplace::new(store, MarketplaceSettings::default());
    market
        .register_listing(listing("order-export", PricingModel::Free, None))
        .await
        .unwrap();
    market
        .register_listing(listing("report-pro", PricingModel::Subscription, Some(14)))
        .await
        .unwrap();
    market
}

pub(crate) fn submission(listing: &str, version: &str) -> NewSubmission {
    NewSubmission {
        listing: listing.to_string(),
        name: "Order Export".to_string(),
        version: version.to_string(),
        developer_id: "dev-1".to_string(),
        developer_email: "dev@example.com".to_string(),
        changelog: format!("Release {version}"),
        ..NewSubmission::default()
    }
}

pub(crate) fn pass() -> StageOutcome {
    StageOutcome {
        passed: true,
        score: Some(90),
        ..StageOutcome::default()
    }
}

/// A clean package whose manifest declares `version`.
pub(crate) fn package(version: &str) -> tempfile::TempDir {
    let dir = clean_package();
    let manifest = GOOD_MANIFEST.replace("\"1.2.0\"", &format!("\"{version}\""));
    write(dir.path(), "manifest.json", manifest.as_bytes());
    dir
}

/// Drive a submission through every stage and approval, then publish it.
pub(crate) async fn try_publish(
    market: &Marketplace,
    listing: &str,
    version: &str,
    channel: Channel,
    compatibility: CompatibilityBounds,
) -> Result<Version> {
    let workflow = market.workflow();
    let fields = NewSubmission {
        channel,
        compatibility,
        ..submission(listing, version)
    };
    let submission = workflow.submit(fields).await?;
    let id = submission.id;
    let dir = package(&submission.version);
    let review = workflow.run_automated_scan(id, dir.path()).await?;
    if !review.passed {
        return Err(Error::Internal(format!("fixture package failed review: {:?}", review.issues)));
    }
    workflow.assign_reviewer(id, "rev-1").await?;
    for stage in ["security_review", "code_quality", "functionality_test", "documentation_review", "final_review"] {
        workflow.complete_stage(id, stage, pass()).await?;
    }
    workflow.approve(id, "admin", None).await?;
    market.versions().create_version(listing, id).await
}

pub(crate) async fn publish(market: &Marketplace, listing: &str, version: &str, channel: Channel) -> Version {
    try_publish(market, listing, version, channel, CompatibilityBounds::default())
        .await
        .unwrap()
}

/// A memory store where another writer can slip in ahead of a swap.
///
/// While races are armed, each `swap_*` call first rewrites the stored
/// record unchanged, bumping its revision, so the caller's swap carries a
/// stale revision and fails with [`Error::Conflict`].
#[derive(Default)]
pub(crate) struct RacingStore {
    inner: MemoryStore,
    races: AtomicUsize,
}

impl RacingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arm the next `n` swaps to lose to a concurrent write.
    pub(crate) fn race_next(&self, n: usize) {
        self.races.store(n, Ordering::SeqCst);
    }

    pub(crate) fn races_left(&self) -> usize {
        self.races.load(Ordering::SeqCst)
    }

    fn take_race(&self) -> bool {
        self.races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Store for RacingStore {
    async fn put_listing(&self, listing: Listing) -> Result<()> {
        self.inner.put_listing(listing).await
    }

    async fn get_listing(&self, slug: &str) -> Result<Listing> {
        self.inner.get_listing(slug).await
    }

    async fn insert_version(&self, version: Version) -> Result<()> {
        self.inner.insert_version(version).await
    }

    async fn update_version(&self, version: Version) -> Result<()> {
        self.inner.update_version(version).await
    }

    async fn list_versions(&self, listing: &str) -> Result<Vec<Version>> {
        self.inner.list_versions(listing).await
    }

    async fn insert_submission(&self, submission: Submission) -> Result<Submission> {
        self.inner.insert_submission(submission).await
    }

    async fn get_submission(&self, id: Uuid) -> Result<Submission> {
        self.inner.get_submission(id).await
    }

    async fn swap_submission(&self, submission: Submission) -> Result<Submission> {
        if self.take_race() {
            let current = self.inner.get_submission(submission.id).await?;
            self.inner.swap_submission(current).await?;
        }
        self.inner.swap_submission(submission).await
    }

    async fn insert_installation(&self, installation: Installation) -> Result<Installation> {
        self.inner.insert_installation(installation).await
    }

    async fn get_installation(&self, id: Uuid) -> Result<Installation> {
        self.inner.get_installation(id).await
    }

    async fn find_installation(
        &self,
        listing: &str,
        tenant_id: &str,
    ) -> Result<Option<Installation>> {
        self.inner.find_installation(listing, tenant_id).await
    }

    async fn swap_installation(&self, installation: Installation) -> Result<Installation> {
        if self.take_race() {
            let current = self.inner.get_installation(installation.id).await?;
            self.inner.swap_installation(current).await?;
        }
        self.inner.swap_installation(installation).await
    }

    async fn list_installations(&self, filter: &InstallationFilter) -> Result<Vec<Installation>> {
        self.inner.list_installations(filter).await
    }
}
