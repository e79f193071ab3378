//! Published versions of listings.

use std::cmp::Ordering;
use std::sync::Arc;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use stallkeep_core::{
    Channel, Compatibility, Installation, ListingStatus, SubmissionStatus, Version, VersionStatus,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::compat;
use crate::error::{Error, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::store::Store;
use crate::version;

/// The host runtime and platform this deployment runs, used to gate
/// installs and updates on compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEnv {
    #[serde(default = "default_host_version")]
    pub host_version: String,
    #[serde(default = "default_platform_version")]
    pub platform_version: String,
}

fn default_host_version() -> String {
    "8.3.0".to_string()
}

fn default_platform_version() -> String {
    "1.0.0".to_string()
}

impl Default for RuntimeEnv {
    fn default() -> Self {
        Self {
            host_version: default_host_version(),
            platform_version: default_platform_version(),
        }
    }
}

/// Newest first by version precedence, then by publish time.
fn newest_first(a: &Version, b: &Version) -> Ordering {
    version::compare(&b.version, &a.version).then_with(|| b.published_at.cmp(&a.published_at))
}

pub struct VersionManager {
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    runtime: RuntimeEnv,
}

impl VersionManager {
    pub fn new(store: Arc<dyn Store>, events: Arc<EventBus>, runtime: RuntimeEnv) -> Self {
        Self {
            store,
            events,
            runtime,
        }
    }

    pub fn runtime(&self) -> &RuntimeEnv {
        &self.runtime
    }

    /// Publish the version an approved submission proposed.
    ///
    /// The first published version moves a draft listing to published.
    pub async fn create_version(&self, listing: &str, submission_id: Uuid) -> Result<Version> {
        let submission = self.store.get_submission(submission_id).await?;
        if submission.status != SubmissionStatus::Approved {
            return Err(Error::transition(
                "submission",
                submission.status,
                "publish a version from",
            ));
        }
        if submission.listing != listing {
            return Err(Error::validation(
                "listing",
                format!(
                    "submission {submission_id} targets {}, not {listing}",
                    submission.listing
                ),
            ));
        }
        let mut record = self.store.get_listing(listing).await?;

        let created = Version {
            id: Uuid::new_v4(),
            listing: listing.to_string(),
            version: submission.version,
            channel: submission.channel,
            status: VersionStatus::Published,
            changelog: submission.changelog,
            compatibility: submission.compatibility,
            submission_id: Some(submission_id),
            published_at: Timestamp::now(),
            yanked_at: None,
            yank_reason: None,
        };
        self.store.insert_version(created.clone()).await?;

        if record.status == ListingStatus::Draft {
            record.status = ListingStatus::Published;
            self.store.put_listing(record).await?;
        }

        info!(
            listing = %created.listing,
            version = %created.version,
            channel = %created.channel,
            "Version published"
        );
        self.events.publish(LifecycleEvent::VersionPublished {
            listing: created.listing.clone(),
            version: created.version.clone(),
            channel: created.channel,
        });
        Ok(created)
    }

    /// The greatest published version on `channel`.
    pub async fn get_latest_version(&self, listing: &str, channel: Channel) -> Result<Option<Version>> {
        let versions = self.store.list_versions(listing).await?;
        Ok(versions
            .into_iter()
            .filter(|v| v.is_published() && v.channel == channel)
            .min_by(newest_first))
    }

    /// The greatest published version on `channel` that this deployment's
    /// runtime can run.
    pub async fn get_latest_installable(
        &self,
        listing: &str,
        channel: Channel,
    ) -> Result<Option<Version>> {
        let versions = self.store.list_versions(listing).await?;
        Ok(versions
            .into_iter()
            .filter(|v| v.is_published() && v.channel == channel && self.runs_here(v))
            .min_by(newest_first))
    }

    pub async fn has_update(&self, installation: &Installation) -> Result<bool> {
        Ok(self.get_available_update(installation).await?.is_some())
    }

    /// The greatest published, compatible version on the installation's
    /// channel that is strictly newer than what it runs.
    pub async fn get_available_update(&self, installation: &Installation) -> Result<Option<Version>> {
        let versions = self.store.list_versions(&installation.listing).await?;
        let update = versions
            .into_iter()
            .filter(|v| {
                v.is_published()
                    && v.channel == installation.channel
                    && version::compare(&v.version, &installation.installed_version)
                        == Ordering::Greater
                    && self.runs_here(v)
            })
            .min_by(newest_first);
        debug!(
            installation = %installation.id,
            current = %installation.installed_version,
            update = update.as_ref().map(|v| v.version.as_str()).unwrap_or("none"),
            "Checked for update"
        );
        Ok(update)
    }

    pub fn is_compatible(&self, version: &Version, host_version: &str, platform_version: &str) -> Compatibility {
        compat::check(version, host_version, platform_version)
    }

    pub fn compare_versions(&self, a: &str, b: &str) -> i8 {
        version::compare_sign(a, b)
    }

    /// Retire a version from latest and update queries. It stays resolvable
    /// for rollback and history.
    pub async fn yank_version(&self, listing: &str, version: &str, reason: &str) -> Result<Version> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("reason", "is required"));
        }
        let mut target = self.find_version(listing, version).await?;
        if target.status == VersionStatus::Yanked {
            return Err(Error::transition("version", target.status, "yank"));
        }
        target.status = VersionStatus::Yanked;
        target.yanked_at = Some(Timestamp::now());
        target.yank_reason = Some(reason.to_string());
        self.store.update_version(target.clone()).await?;

        info!(listing = %target.listing, version = %target.version, reason, "Version yanked");
        self.events.publish(LifecycleEvent::VersionYanked {
            listing: target.listing.clone(),
            version: target.version.clone(),
            reason: reason.to_string(),
        });
        Ok(target)
    }

    /// Every version of a listing, yanked ones included, newest first.
    pub async fn get_version_history(&self, listing: &str) -> Result<Vec<Version>> {
        self.store.get_listing(listing).await?;
        let mut versions = self.store.list_versions(listing).await?;
        versions.sort_by(newest_first);
        Ok(versions)
    }

    /// Resolve a version by its string, yanked or not. `v1.2` finds `1.2.0`.
    pub async fn find_version(&self, listing: &str, version: &str) -> Result<Version> {
        let versions = self.store.list_versions(listing).await?;
        let normalized = version::normalize(version);
        let found = versions
            .iter()
            .find(|v| v.version == version)
            .or_else(|| {
                let normalized = normalized.as_deref()?;
                versions.iter().find(|v| v.version == normalized)
            })
            .cloned();
        found.ok_or_else(|| Error::VersionNotFound {
            listing: listing.to_string(),
            version: version.to_string(),
        })
    }

    fn runs_here(&self, version: &Version) -> bool {
        compat::check(
            version,
            &self.runtime.host_version,
            &self.runtime.platform_version,
        )
        .compatible
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use stallkeep_core::{CompatibilityBounds, InstallationStatus};

    use super::*;
    use crate::fixtures::{self, publish};

    fn installation_at(listing: &str, version: &str, channel: Channel) -> Installation {
        let now = Timestamp::now();
        Installation {
            id: Uuid::new_v4(),
            listing: listing.into(),
            tenant_id: "tenant-a".into(),
            version_id: Uuid::new_v4(),
            installed_version: version.into(),
            status: InstallationStatus::Active,
            channel,
            is_trial: false,
            trial_expires_at: None,
            trial_consumed: false,
            awaiting_purchase: false,
            suspension_reason: None,
            installed_at: now,
            uninstalled_at: None,
            updated_at: now,
            revision: 0,
        }
    }

    #[tokio::test]
    async fn only_approved_submissions_publish() {
        let market = fixtures::marketplace().await;
        let submission = market
            .workflow()
            .submit(fixtures::submission("order-export", "1.0.0"))
            .await
            .unwrap();
        let err = market
            .versions()
            .create_version("order-export", submission.id)
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidTransition { .. });
    }

    #[tokio::test]
    async fn publishing_moves_draft_listing_and_rejects_duplicates() {
        let market = fixtures::marketplace().await;
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        let listing = market.get_listing("order-export").await.unwrap();
        assert_eq!(listing.status, ListingStatus::Published);

        let err = fixtures::try_publish(&market, "order-export", "1.0.0", Channel::Stable, CompatibilityBounds::default())
            .await
            .unwrap_err();
        assert_matches!(err, Error::DuplicateVersion { .. });
    }

    #[tokio::test]
    async fn latest_is_per_channel_and_skips_yanked() {
        let market = fixtures::marketplace().await;
        let versions = market.versions();
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        publish(&market, "order-export", "1.1.0", Channel::Stable).await;
        publish(&market, "order-export", "2.0.0-beta.1", Channel::Beta).await;

        let latest = versions.get_latest_version("order-export", Channel::Stable).await.unwrap();
        assert_eq!(latest.unwrap().version, "1.1.0");
        let beta = versions.get_latest_version("order-export", Channel::Beta).await.unwrap();
        assert_eq!(beta.unwrap().version, "2.0.0-beta.1");
        assert!(versions
            .get_latest_version("order-export", Channel::Alpha)
            .await
            .unwrap()
            .is_none());

        versions.yank_version("order-export", "1.1.0", "crashes on save").await.unwrap();
        let latest = versions.get_latest_version("order-export", Channel::Stable).await.unwrap();
        assert_eq!(latest.unwrap().version, "1.0.0");

        let err = versions.yank_version("order-export", "1.1.0", "again").await.unwrap_err();
        assert_matches!(err, Error::InvalidTransition { .. });
        let yanked = versions.find_version("order-export", "v1.1").await.unwrap();
        assert_eq!(yanked.status, VersionStatus::Yanked);
        assert_eq!(yanked.yank_reason.as_deref(), Some("crashes on save"));
    }

    #[tokio::test]
    async fn updates_must_be_newer_matching_and_compatible() {
        let market = fixtures::marketplace().await;
        let versions = market.versions();
        publish(&market, "order-export", "1.0.0", Channel::Stable).await;
        publish(&market, "order-export", "1.5.0-rc.1", Channel::Beta).await;
        fixtures::try_publish(
            &market,
            "order-export",
            "3.0.0",
            Channel::Stable,
            CompatibilityBounds {
                host_min: Some("99.0".into()),
                ..CompatibilityBounds::default()
            },
        )
        .await
        .unwrap();

        let current = installation_at("order-export", "1.0.0", Channel::Stable);
        assert!(!versions.has_update(&current).await.unwrap());

        publish(&market, "order-export", "1.2.0", Channel::Stable).await;
        let update = versions.get_available_update(&current).await.unwrap();
        assert_eq!(update.unwrap().version, "1.2.0");

        let beta = installation_at("order-export", "1.0.0", Channel::Beta);
        let update = versions.get_available_update(&beta).await.unwrap();
        assert_eq!(update.unwrap().version, "1.5.0-rc.1");
    }

    #[tokio::test]
    async fn history_is_newest_first_and_includes_yanked() {
        let market = fixtures::marketplace().await;
        let versions = market.versions();
        for v in ["1.0.0", "1.10.0", "1.2.0", "1.10.0-beta.1"] {
            publish(&market, "order-export", v, Channel::Stable).await;
        }
        versions.yank_version("order-export", "1.2.0", "bad build").await.unwrap();

        let history: Vec<String> = versions
            .get_version_history("order-export")
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(history, vec!["1.10.0", "1.10.0-beta.1", "1.2.0", "1.0.0"]);

        let err = versions.get_version_history("ghost").await.unwrap_err();
        assert_matches!(err, Error::NotFound(_));
    }

    #[tokio::test]
    async fn pass_throughs() {
        let market = fixtures::marketplace().await;
        let versions = market.versions();
        assert_eq!(versions.compare_versions("1.0.0", "1.0.0-beta.1"), 1);
        assert_eq!(versions.compare_versions("1.0.0", "1.0.1"), -1);

        let version = fixtures::try_publish(
            &market,
            "order-export",
            "1.0.0",
            Channel::Stable,
            CompatibilityBounds {
                host_min: Some("8.1".into()),
                host_max: Some("8.4".into()),
                platform_min: None,
            },
        )
        .await
        .unwrap();
        assert!(versions.is_compatible(&version, "8.2.0", "1.0.0").compatible);
        let report = versions.is_compatible(&version, "7.4.0", "1.0.0");
        assert!(!report.compatible);
        assert_eq!(report.issues, vec!["Requires host runtime >= 8.1, found 7.4.0"]);
    }
}
