use std::collections::HashMap;

use async_trait::async_trait;
use stallkeep_core::{Installation, Listing, Submission, Version};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{
    check_installation_key, check_installation_slot, check_revision, check_version_identity,
    InstallationFilter, Store,
};

#[derive(Default)]
struct State {
    listings: HashMap<String, Listing>,
    versions: HashMap<String, Vec<Version>>,
    submissions: HashMap<Uuid, Submission>,
    installations: HashMap<Uuid, Installation>,
}

/// In-process store.
///
/// Every operation takes the single state lock, so each check-then-write is
/// atomic with respect to all other callers.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_listing(&self, listing: Listing) -> Result<()> {
        let mut state = self.state.write().await;
        state.listings.insert(listing.slug.clone(), listing);
        Ok(())
    }

    async fn get_listing(&self, slug: &str) -> Result<Listing> {
        let state = self.state.read().await;
        state
            .listings
            .get(slug)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("listing {slug}")))
    }

    async fn insert_version(&self, version: Version) -> Result<()> {
        let mut state = self.state.write().await;
        let versions = state.versions.entry(version.listing.clone()).or_default();
        if versions.iter().any(|v| v.version == version.version) {
            return Err(Error::DuplicateVersion {
                listing: version.listing,
                version: version.version,
            });
        }
        versions.push(version);
        Ok(())
    }

    async fn update_version(&self, version: Version) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .versions
            .get_mut(&version.listing)
            .and_then(|vs| vs.iter_mut().find(|v| v.id == version.id))
            .ok_or_else(|| Error::VersionNotFound {
                listing: version.listing.clone(),
                version: version.version.clone(),
            })?;
        check_version_identity(stored, &version)?;
        *stored = version;
        Ok(())
    }

    async fn list_versions(&self, listing: &str) -> Result<Vec<Version>> {
        let state = self.state.read().await;
        Ok(state.versions.get(listing).cloned().unwrap_or_default())
    }

    async fn insert_submission(&self, mut submission: Submission) -> Result<Submission> {
        let mut state = self.state.write().await;
        if state.submissions.contains_key(&submission.id) {
            return Err(Error::Conflict(format!("submission {}", submission.id)));
        }
        submission.revision = 0;
        state.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, id: Uuid) -> Result<Submission> {
        let state = self.state.read().await;
        state
            .submissions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("submission {id}")))
    }

    async fn swap_submission(&self, mut submission: Submission) -> Result<Submission> {
        let mut state = self.state.write().await;
        let stored = state
            .submissions
            .get_mut(&submission.id)
            .ok_or_else(|| Error::NotFound(format!("submission {}", submission.id)))?;
        check_revision("submission", submission.id, stored.revision, submission.revision)?;
        submission.revision += 1;
        *stored = submission.clone();
        Ok(submission)
    }

    async fn insert_installation(&self, mut installation: Installation) -> Result<Installation> {
        let mut state = self.state.write().await;
        let existing = state
            .installations
            .values()
            .find(|i| i.listing == installation.listing && i.tenant_id == installation.tenant_id);
        check_installation_slot(existing)?;
        installation.revision = 0;
        state
            .installations
            .insert(installation.id, installation.clone());
        Ok(installation)
    }

    async fn get_installation(&self, id: Uuid) -> Result<Installation> {
        let state = self.state.read().await;
        state
            .installations
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("installation {id}")))
    }

    async fn find_installation(
        &self,
        listing: &str,
        tenant_id: &str,
    ) -> Result<Option<Installation>> {
        let state = self.state.read().await;
        Ok(state
            .installations
            .values()
            .find(|i| i.listing == listing && i.tenant_id == tenant_id)
            .cloned())
    }

    async fn swap_installation(&self, mut installation: Installation) -> Result<Installation> {
        let mut state = self.state.write().await;
        let stored = state
            .installations
            .get_mut(&installation.id)
            .ok_or_else(|| Error::NotFound(format!("installation {}", installation.id)))?;
        check_installation_key(stored, &installation)?;
        check_revision(
            "installation",
            installation.id,
            stored.revision,
            installation.revision,
        )?;
        installation.revision += 1;
        *stored = installation.clone();
        Ok(installation)
    }

    async fn list_installations(&self, filter: &InstallationFilter) -> Result<Vec<Installation>> {
        let state = self.state.read().await;
        let mut rows: Vec<Installation> = state
            .installations
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.listing
                .cmp(&b.listing)
                .then_with(|| a.tenant_id.cmp(&b.tenant_id))
        });
        Ok(rows)
    }
}
