//! Per-tenant installations of listings.
//!
//! All writes to an existing row go through [`Store::swap_installation`], so
//! two concurrent operations on the same (listing, tenant) cannot both apply.

use std::collections::BTreeMap;
use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use stallkeep_core::{
    Channel, Installation, InstallationStats, InstallationStatus, Listing, ListingStatus, Version,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::store::{InstallationFilter, Store};
use crate::versions::VersionManager;

/// Result of [`InstallationManager::update`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Updated {
        installation: Installation,
        from: String,
        to: String,
    },
    AlreadyCurrent { installation: Installation },
}

impl UpdateOutcome {
    pub fn installation(&self) -> &Installation {
        match self {
            UpdateOutcome::Updated { installation, .. }
            | UpdateOutcome::AlreadyCurrent { installation } => installation,
        }
    }
}

/// Per-listing result of [`InstallationManager::update_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkUpdateEntry {
    pub success: bool,
    /// Version installed after the attempt.
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct InstallationManager {
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    versions: Arc<VersionManager>,
}

impl InstallationManager {
    pub fn new(store: Arc<dyn Store>, events: Arc<EventBus>, versions: Arc<VersionManager>) -> Self {
        Self {
            store,
            events,
            versions,
        }
    }

    /// Install the latest compatible stable version of a listing for a
    /// tenant.
    ///
    /// A previously uninstalled row is reactivated in place and keeps its
    /// id. Paid listings with a trial period start a trial, once per row.
    pub async fn install(&self, listing: &str, tenant_id: &str) -> Result<Installation> {
        let tenant_id = tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(Error::validation("tenant_id", "is required"));
        }
        let record = self.store.get_listing(listing).await?;
        if matches!(record.status, ListingStatus::Suspended | ListingStatus::Delisted) {
            return Err(Error::transition("listing", record.status, "install"));
        }

        let existing = self.store.find_installation(listing, tenant_id).await?;
        if let Some(row) = &existing {
            if row.is_live() {
                return Err(Error::AlreadyInstalled {
                    listing: listing.to_string(),
                    tenant: tenant_id.to_string(),
                });
            }
        }

        let version = self
            .versions
            .get_latest_installable(listing, Channel::Stable)
            .await?
            .ok_or_else(|| Error::NoInstallableVersion {
                listing: listing.to_string(),
                channel: Channel::Stable.to_string(),
            })?;

        let now = Timestamp::now();
        let installation = match existing {
            Some(mut row) => {
                apply_install(&mut row, &record, &version, now)?;
                self.store
                    .swap_installation(row)
                    .await
                    .map_err(|e| match e {
                        Error::Conflict(_) => Error::AlreadyInstalled {
                            listing: listing.to_string(),
                            tenant: tenant_id.to_string(),
                        },
                        other => other,
                    })?
            }
            None => {
                let mut row = Installation {
                    id: Uuid::new_v4(),
                    listing: listing.to_string(),
                    tenant_id: tenant_id.to_string(),
                    version_id: version.id,
                    installed_version: version.version.clone(),
                    status: InstallationStatus::Active,
                    channel: Channel::Stable,
                    is_trial: false,
                    trial_expires_at: None,
                    trial_consumed: false,
                    awaiting_purchase: false,
                    suspension_reason: None,
                    installed_at: now,
                    uninstalled_at: None,
                    updated_at: now,
                    revision: 0,
                };
                apply_install(&mut row, &record, &version, now)?;
                self.store.insert_installation(row).await?
            }
        };

        info!(
            installation = %installation.id,
            listing,
            tenant = tenant_id,
            version = %installation.installed_version,
            trial = installation.is_trial,
            "Installed"
        );
        self.events.publish(LifecycleEvent::Installed {
            installation_id: installation.id,
            listing: installation.listing.clone(),
            tenant_id: installation.tenant_id.clone(),
            version: installation.installed_version.clone(),
            trial: installation.is_trial,
        });
        Ok(installation)
    }

    /// Mark an installation uninstalled. The row and its history stay.
    pub async fn uninstall(&self, id: Uuid) -> Result<Installation> {
        let mut row = self.store.get_installation(id).await?;
        if !row.is_live() {
            return Err(Error::transition("installation", row.status, "uninstall"));
        }
        let now = Timestamp::now();
        row.status = InstallationStatus::Uninstalled;
        row.uninstalled_at = Some(now);
        row.is_trial = false;
        row.trial_expires_at = None;
        let row = self.commit(row, now).await?;

        info!(installation = %row.id, listing = %row.listing, tenant = %row.tenant_id, "Uninstalled");
        self.events.publish(LifecycleEvent::Uninstalled {
            installation_id: row.id,
            listing: row.listing.clone(),
            tenant_id: row.tenant_id.clone(),
        });
        Ok(row)
    }

    /// Inactive to active. Already active is a no-op.
    pub async fn activate(&self, id: Uuid) -> Result<Installation> {
        let mut row = self.store.get_installation(id).await?;
        match row.status {
            InstallationStatus::Active => return Ok(row),
            InstallationStatus::Inactive if row.awaiting_purchase => {
                return Err(Error::PurchaseRequired(id));
            }
            InstallationStatus::Inactive => {}
            other => return Err(Error::transition("installation", other, "activate")),
        }
        row.status = InstallationStatus::Active;
        let row = self.commit(row, Timestamp::now()).await?;
        info!(installation = %row.id, "Activated");
        Ok(row)
    }

    /// Active to inactive. Already inactive is a no-op.
    pub async fn deactivate(&self, id: Uuid) -> Result<Installation> {
        let mut row = self.store.get_installation(id).await?;
        match row.status {
            InstallationStatus::Inactive => return Ok(row),
            InstallationStatus::Active => {}
            other => return Err(Error::transition("installation", other, "deactivate")),
        }
        row.status = InstallationStatus::Inactive;
        let row = self.commit(row, Timestamp::now()).await?;
        info!(installation = %row.id, "Deactivated");
        Ok(row)
    }

    /// Move to the available update, if any. Being current is not an error.
    pub async fn update(&self, id: Uuid) -> Result<UpdateOutcome> {
        let mut row = self.store.get_installation(id).await?;
        ensure_running(&row, "update")?;

        let Some(target) = self.versions.get_available_update(&row).await? else {
            debug!(installation = %row.id, version = %row.installed_version, "Already current");
            return Ok(UpdateOutcome::AlreadyCurrent { installation: row });
        };

        let from = std::mem::replace(&mut row.installed_version, target.version.clone());
        row.version_id = target.id;
        let row = self.commit(row, Timestamp::now()).await?;
        self.announce_move(&row, &from);
        Ok(UpdateOutcome::Updated {
            to: row.installed_version.clone(),
            installation: row,
            from,
        })
    }

    /// Pin an installation to a version from the listing's history,
    /// including yanked versions.
    pub async fn rollback(&self, id: Uuid, target_version: &str) -> Result<Installation> {
        let mut row = self.store.get_installation(id).await?;
        ensure_running(&row, "roll back")?;
        let target = self.versions.find_version(&row.listing, target_version).await?;

        let from = std::mem::replace(&mut row.installed_version, target.version.clone());
        row.version_id = target.id;
        let row = self.commit(row, Timestamp::now()).await?;
        self.announce_move(&row, &from);
        Ok(row)
    }

    /// Change the update channel an installation follows.
    pub async fn subscribe_channel(&self, id: Uuid, channel: Channel) -> Result<Installation> {
        let mut row = self.store.get_installation(id).await?;
        if !row.is_live() {
            return Err(Error::transition("installation", row.status, "change the channel of"));
        }
        if row.channel == channel {
            return Ok(row);
        }
        row.channel = channel;
        let row = self.commit(row, Timestamp::now()).await?;
        info!(installation = %row.id, %channel, "Channel changed");
        Ok(row)
    }

    /// Record a paid conversion, ending any trial and clearing the
    /// purchase hold placed by the trial sweep.
    pub async fn mark_purchased(&self, id: Uuid) -> Result<Installation> {
        let mut row = self.store.get_installation(id).await?;
        if !row.is_live() {
            return Err(Error::transition("installation", row.status, "purchase"));
        }
        row.awaiting_purchase = false;
        row.is_trial = false;
        row.trial_expires_at = None;
        let row = self.commit(row, Timestamp::now()).await?;
        info!(installation = %row.id, listing = %row.listing, tenant = %row.tenant_id, "Purchase recorded");
        Ok(row)
    }

    /// Suspend every live installation of a listing and the listing itself.
    ///
    /// Returns the number of installations that changed. A row that loses
    /// its compare-and-swap to a concurrent write is reloaded and suspended
    /// again; a row that fails to update for any other reason is logged and
    /// skipped.
    pub async fn suspend_all_installations(&self, listing: &str, reason: &str) -> Result<usize> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("reason", "is required"));
        }
        let mut record = self.store.get_listing(listing).await?;
        let rows = self
            .store
            .list_installations(&InstallationFilter::listing(listing))
            .await?;

        let mut count = 0;
        for row in rows {
            let id = row.id;
            match self.suspend_row(row, reason).await {
                Ok(None) => {}
                Ok(Some(row)) => {
                    count += 1;
                    self.events.publish(LifecycleEvent::InstallationSuspended {
                        installation_id: row.id,
                        listing: row.listing.clone(),
                        tenant_id: row.tenant_id.clone(),
                        reason: reason.to_string(),
                    });
                }
                Err(e) => warn!(installation = %id, error = %e, "Failed to suspend installation"),
            }
        }

        if record.status != ListingStatus::Suspended {
            record.status = ListingStatus::Suspended;
            self.store.put_listing(record).await?;
        }
        info!(listing, count, reason, "Listing suspended");
        Ok(count)
    }

    /// Suspend one row, reloading it after every lost compare-and-swap.
    ///
    /// Returns `None` when the row is not live or already suspended.
    async fn suspend_row(&self, mut row: Installation, reason: &str) -> Result<Option<Installation>> {
        loop {
            if !row.is_live() || row.status == InstallationStatus::Suspended {
                return Ok(None);
            }
            let id = row.id;
            row.status = InstallationStatus::Suspended;
            row.suspension_reason = Some(reason.to_string());
            match self.commit(row, Timestamp::now()).await {
                Ok(row) => return Ok(Some(row)),
                Err(Error::Conflict(detail)) => {
                    debug!(installation = %id, %detail, "Retrying suspension after concurrent write");
                    row = self.store.get_installation(id).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Scheduler entry point: expire every trial that has run out.
    pub async fn process_expired_trials(&self) -> Result<usize> {
        self.process_expired_trials_at(Timestamp::now()).await
    }

    /// Expire trials whose end is at or before `now`.
    ///
    /// Expired installations are deactivated and held for purchase; they are
    /// never activated here. Rows another sweep already handled are skipped,
    /// so overlapping runs count each expiry once.
    pub async fn process_expired_trials_at(&self, now: Timestamp) -> Result<usize> {
        let rows = self
            .store
            .list_installations(&InstallationFilter::default())
            .await?;

        let mut count = 0;
        for mut row in rows {
            let expired = row.is_trial && row.trial_expires_at.is_some_and(|at| at <= now);
            if !expired {
                continue;
            }
            let id = row.id;
            row.is_trial = false;
            row.awaiting_purchase = true;
            if row.status == InstallationStatus::Active {
                row.status = InstallationStatus::Inactive;
            }
            match self.commit(row, now).await {
                Ok(row) => {
                    count += 1;
                    self.events.publish(LifecycleEvent::TrialExpired {
                        installation_id: row.id,
                        listing: row.listing.clone(),
                        tenant_id: row.tenant_id.clone(),
                    });
                }
                Err(Error::Conflict(_)) => {
                    debug!(installation = %id, "Trial changed concurrently; skipping");
                }
                Err(e) => warn!(installation = %id, error = %e, "Failed to expire trial"),
            }
        }

        if count > 0 {
            info!(count, "Expired trials");
        }
        Ok(count)
    }

    /// Update every installation of a tenant that has an update available.
    /// Each listing's outcome is reported independently.
    pub async fn update_all(&self, tenant_id: &str) -> Result<BTreeMap<String, BulkUpdateEntry>> {
        let pending = self.get_installations_needing_update(tenant_id).await?;

        let mut results = BTreeMap::new();
        for row in pending {
            let entry = match self.update(row.id).await {
                Ok(outcome) => BulkUpdateEntry {
                    success: true,
                    version: outcome.installation().installed_version.clone(),
                    error: None,
                },
                Err(e) => {
                    warn!(
                        installation = %row.id,
                        listing = %row.listing,
                        error = %e,
                        "Bulk update failed for installation"
                    );
                    BulkUpdateEntry {
                        success: false,
                        version: row.installed_version.clone(),
                        error: Some(e.to_string()),
                    }
                }
            };
            results.insert(row.listing, entry);
        }
        info!(tenant = tenant_id, count = results.len(), "Bulk update finished");
        Ok(results)
    }

    /// Active or inactive installations of a tenant with an update available.
    pub async fn get_installations_needing_update(&self, tenant_id: &str) -> Result<Vec<Installation>> {
        let rows = self
            .store
            .list_installations(&InstallationFilter::tenant(tenant_id))
            .await?;
        let mut needing = Vec::new();
        for row in rows {
            if ensure_running(&row, "update").is_ok() && self.versions.has_update(&row).await? {
                needing.push(row);
            }
        }
        Ok(needing)
    }

    pub async fn get_stats(&self, tenant_id: &str) -> Result<InstallationStats> {
        let rows = self
            .store
            .list_installations(&InstallationFilter::tenant(tenant_id))
            .await?;
        let mut stats = InstallationStats::default();
        for row in &rows {
            match row.status {
                InstallationStatus::Active => stats.active += 1,
                InstallationStatus::Inactive => stats.inactive += 1,
                InstallationStatus::Suspended => stats.suspended += 1,
                InstallationStatus::Uninstalled => stats.uninstalled += 1,
            }
            if row.is_live() {
                stats.total += 1;
                if row.is_trial {
                    stats.trials += 1;
                }
            }
        }
        Ok(stats)
    }

    pub async fn get_installation(&self, id: Uuid) -> Result<Installation> {
        self.store.get_installation(id).await
    }

    /// Every installation row of a tenant, uninstalled ones included.
    pub async fn list_installations(&self, tenant_id: &str) -> Result<Vec<Installation>> {
        self.store
            .list_installations(&InstallationFilter::tenant(tenant_id))
            .await
    }

    async fn commit(&self, mut row: Installation, now: Timestamp) -> Result<Installation> {
        row.updated_at = now;
        self.store.swap_installation(row).await
    }

    fn announce_move(&self, row: &Installation, from: &str) {
        info!(
            installation = %row.id,
            listing = %row.listing,
            tenant = %row.tenant_id,
            from,
            to = %row.installed_version,
            "Installed version changed"
        );
        self.events.publish(LifecycleEvent::Updated {
            installation_id: row.id,
            listing: row.listing.clone(),
            tenant_id: row.tenant_id.clone(),
            from: from.to_string(),
            to: row.installed_version.clone(),
        });
    }
}

/// Point a new or reactivated row at `version` and start a trial if the
/// listing offers one and the row never had one.
fn apply_install(row: &mut Installation, listing: &Listing, version: &Version, now: Timestamp) -> Result<()> {
    row.version_id = version.id;
    row.installed_version = version.version.clone();
    row.channel = Channel::Stable;
    row.installed_at = now;
    row.uninstalled_at = None;
    row.suspension_reason = None;
    row.status = if row.awaiting_purchase {
        InstallationStatus::Inactive
    } else {
        InstallationStatus::Active
    };

    if let Some(days) = listing.trial_period() {
        if !row.trial_consumed {
            let length = SignedDuration::from_hours(i64::from(days) * 24);
            let expires = now
                .checked_add(length)
                .map_err(|e| Error::Internal(format!("trial end out of range: {e}")))?;
            row.is_trial = true;
            row.trial_expires_at = Some(expires);
            row.trial_consumed = true;
        }
    }
    Ok(())
}

fn ensure_running(row: &Installation, action: &str) -> Result<()> {
    match row.status {
        InstallationStatus::Active | InstallationStatus::Inactive => Ok(()),
        other => Err(Error::transition("installation", other, action)),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use stallkeep_core::CompatibilityBounds;

    use super::*;
    use crate::fixtures::{self, publish, RacingStore};

    #[tokio::test]
    async fn install_uninstall_reinstall_keeps_the_id() {
        let market = fixtures::marketplace().await;
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        let installs = market.installations();

        let first = installs.install("order-export", "tenant-a").await.unwrap();
        assert_eq!(first.status, InstallationStatus::Active);
        assert!(!first.is_trial);

        let removed = installs.uninstall(first.id).await.unwrap();
        assert_eq!(removed.status, InstallationStatus::Uninstalled);
        assert!(removed.uninstalled_at.is_some());

        let again = installs.install("order-export", "tenant-a").await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.status, InstallationStatus::Active);
        assert!(again.uninstalled_at.is_none());
        assert_eq!(installs.list_installations("tenant-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_install_fails() {
        let market = fixtures::marketplace().await;
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        let installs = market.installations();

        installs.install("order-export", "tenant-a").await.unwrap();
        let err = installs.install("order-export", "tenant-a").await.unwrap_err();
        assert_matches!(err, Error::AlreadyInstalled { .. });
        assert_eq!(installs.list_installations("tenant-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_installs_create_one_row() {
        let market = fixtures::marketplace().await;
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        let installs = market.installations();

        let (a, b) = tokio::join!(
            installs.install("order-export", "tenant-a"),
            installs.install("order-export", "tenant-a"),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(installs.list_installations("tenant-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn install_needs_a_compatible_stable_version() {
        let market = fixtures::marketplace().await;
        let installs = market.installations();
        publish(&market, "order-export", "2.0.0-beta.1", Channel::Beta).await;
        let err = installs.install("order-export", "tenant-a").await.unwrap_err();
        assert_matches!(err, Error::NoInstallableVersion { .. });

        fixtures::try_publish(
            &market,
            "order-export",
            "1.1.0",
            Channel::Stable,
            CompatibilityBounds {
                host_max: Some("7.4".into()),
                ..CompatibilityBounds::default()
            },
        )
        .await
        .unwrap();
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        let row = installs.install("order-export", "tenant-a").await.unwrap();
        assert_eq!(row.installed_version, "1.0.0");
    }

    #[tokio::test]
    async fn activation_rules() {
        let market = fixtures::marketplace().await;
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        let installs = market.installations();
        let id = installs.install("order-export", "tenant-a").await.unwrap().id;

        assert_eq!(installs.deactivate(id).await.unwrap().status, InstallationStatus::Inactive);
        assert_eq!(installs.deactivate(id).await.unwrap().status, InstallationStatus::Inactive);
        assert_eq!(installs.activate(id).await.unwrap().status, InstallationStatus::Active);
        assert_eq!(installs.activate(id).await.unwrap().status, InstallationStatus::Active);

        installs.uninstall(id).await.unwrap();
        assert_matches!(installs.activate(id).await, Err(Error::InvalidTransition { .. }));
        assert_matches!(installs.deactivate(id).await, Err(Error::InvalidTransition { .. }));
        assert_matches!(installs.uninstall(id).await, Err(Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn update_then_rollback_to_a_yanked_version() {
        let market = fixtures::marketplace().await;
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        let installs = market.installations();
        let id = installs.install("order-export", "tenant-a").await.unwrap().id;

        let outcome = installs.update(id).await.unwrap();
        assert_matches!(outcome, UpdateOutcome::AlreadyCurrent { .. });

        publish(&market, "order-export", "1.1.0", Channel::Stable).await;
        let outcome = installs.update(id).await.unwrap();
        assert_matches!(outcome, UpdateOutcome::Updated { ref from, ref to, .. }
            if from == "1.0.0" && to == "1.1.0");

        market
            .versions()
            .yank_version("order-export", "1.0.0", "data loss")
            .await
            .unwrap();
        let row = installs.rollback(id, "1.0.0").await.unwrap();
        assert_eq!(row.installed_version, "1.0.0");

        let err = installs.rollback(id, "9.9.9").await.unwrap_err();
        assert_matches!(err, Error::VersionNotFound { .. });
    }

    #[tokio::test]
    async fn channel_subscription_changes_updates() {
        let market = fixtures::marketplace().await;
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        publish(&market, "order-export", "1.1.0-beta.1", Channel::Beta).await;
        let installs = market.installations();
        let id = installs.install("order-export", "tenant-a").await.unwrap().id;
        assert_matches!(installs.update(id).await.unwrap(), UpdateOutcome::AlreadyCurrent { .. });

        installs.subscribe_channel(id, Channel::Beta).await.unwrap();
        let outcome = installs.update(id).await.unwrap();
        assert_eq!(outcome.installation().installed_version, "1.1.0-beta.1");
    }

    #[tokio::test]
    async fn trials_expire_once_and_require_purchase() {
        let market = fixtures::marketplace().await;
        publish(&market, "report-pro", "1.0.0", Channel::Stable).await;
        let installs = market.installations();

        let row = installs.install("report-pro", "tenant-a").await.unwrap();
        assert!(row.is_trial);
        let expires = row.trial_expires_at.unwrap();
        assert_eq!(expires.duration_since(row.installed_at), SignedDuration::from_hours(14 * 24));

        assert_eq!(installs.process_expired_trials().await.unwrap(), 0);
        let later = expires.checked_add(SignedDuration::from_secs(1)).unwrap();
        assert_eq!(installs.process_expired_trials_at(later).await.unwrap(), 1);
        assert_eq!(installs.process_expired_trials_at(later).await.unwrap(), 0);

        let row = installs.get_installation(row.id).await.unwrap();
        assert!(!row.is_trial);
        assert_eq!(row.status, InstallationStatus::Inactive);
        assert_matches!(installs.activate(row.id).await, Err(Error::PurchaseRequired(_)));

        installs.mark_purchased(row.id).await.unwrap();
        assert_eq!(installs.activate(row.id).await.unwrap().status, InstallationStatus::Active);
    }

    #[tokio::test]
    async fn reinstall_does_not_restart_a_trial() {
        let market = fixtures::marketplace().await;
        publish(&market, "report-pro", "1.0.0", Channel::Stable).await;
        let installs = market.installations();

        let row = installs.install("report-pro", "tenant-a").await.unwrap();
        installs.uninstall(row.id).await.unwrap();
        let again = installs.install("report-pro", "tenant-a").await.unwrap();
        assert!(!again.is_trial);
        assert!(again.trial_consumed);
    }

    #[tokio::test]
    async fn suspend_all_retries_rows_that_lose_a_race() {
        let store = Arc::new(RacingStore::new());
        let market = fixtures::marketplace_on(store.clone()).await;
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        let installs = market.installations();
        let a = installs.install("order-export", "tenant-a").await.unwrap();
        let b = installs.install("order-export", "tenant-b").await.unwrap();

        store.race_next(3);
        let count = installs
            .suspend_all_installations("order-export", "exfiltrates data")
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.races_left(), 0);
        for id in [a.id, b.id] {
            let row = installs.get_installation(id).await.unwrap();
            assert_eq!(row.status, InstallationStatus::Suspended);
            assert_eq!(row.suspension_reason.as_deref(), Some("exfiltrates data"));
        }
    }

    #[tokio::test]
    async fn suspend_all_hits_live_rows_and_the_listing() {
        let market = fixtures::marketplace().await;
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        let installs = market.installations();
        for tenant in ["tenant-a", "tenant-b", "tenant-c"] {
            installs.install("order-export", tenant).await.unwrap();
        }
        let gone = installs.install("order-export", "tenant-d").await.unwrap();
        installs.uninstall(gone.id).await.unwrap();

        let count = installs
            .suspend_all_installations("order-export", "exfiltrates data")
            .await
            .unwrap();
        assert_eq!(count, 3);
        let listing = market.get_listing("order-export").await.unwrap();
        assert_eq!(listing.status, ListingStatus::Suspended);

        let stats = installs.get_stats("tenant-a").await.unwrap();
        assert_eq!(stats.suspended, 1);
        assert_eq!(installs.get_installation(gone.id).await.unwrap().status, InstallationStatus::Uninstalled);

        assert_matches!(
            installs.install("order-export", "tenant-e").await,
            Err(Error::InvalidTransition { .. })
        );
        assert_eq!(
            installs
                .suspend_all_installations("order-export", "again")
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn update_all_reports_per_listing() {
        let market = fixtures::marketplace().await;
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        publish(&market, "report-pro", "2.0.0", Channel::Stable).await;
        let installs = market.installations();
        installs.install("order-export", "tenant-a").await.unwrap();
        installs.install("report-pro", "tenant-a").await.unwrap();

        publish(&market, "order-export", "1.3.0", Channel::Stable).await;
        let needing = installs.get_installations_needing_update("tenant-a").await.unwrap();
        assert_eq!(needing.len(), 1);

        let results = installs.update_all("tenant-a").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results["order-export"],
            BulkUpdateEntry {
                success: true,
                version: "1.3.0".into(),
                error: None,
            }
        );
        assert!(installs
            .get_installations_needing_update("tenant-a")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let market = fixtures::marketplace().await;
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        publish(&market, "report-pro", "1.0.0", Channel::Stable).await;
        let installs = market.installations();
        let a = installs.install("order-export", "tenant-a").await.unwrap();
        installs.install("report-pro", "tenant-a").await.unwrap();
        installs.deactivate(a.id).await.unwrap();

        let stats = installs.get_stats("tenant-a").await.unwrap();
        assert_eq!(
            stats,
            InstallationStats {
                total: 2,
                active: 1,
                inactive: 1,
                suspended: 0,
                uninstalled: 0,
                trials: 1,
            }
        );
    }
}
