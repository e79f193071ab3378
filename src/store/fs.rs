use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use stallkeep_core::{Installation, Listing, Submission, Version};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{
    check_installation_key, check_installation_slot, check_revision, check_version_identity,
    validate_slug, InstallationFilter, Store,
};

/// Filesystem-based store.
///
/// Directory structure:
/// ```text
/// {root}/listings/{slug}/listing.json
/// {root}/listings/{slug}/versions/{version}.json
/// {root}/submissions/{id}.json
/// {root}/installations/{id}.json
/// ```
///
/// Documents are written to a uniquely named temporary sibling and moved
/// into place, so readers never observe a partial file. Every
/// check-then-write holds an exclusive advisory lock on `{root}/.lock`, which
/// serializes writers across processes sharing the directory. Inserts link
/// the new document into place and fail if it already exists.
pub struct FilesystemStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

const LOCK_FILE: &str = ".lock";

/// Held for the duration of one check-then-write.
struct WriteGuard<'a> {
    _local: MutexGuard<'a, ()>,
    // Dropping the handle releases the advisory lock.
    _file: std::fs::File,
}

impl FilesystemStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn listings_dir(&self) -> PathBuf {
        self.path.join("listings")
    }

    fn listing_dir(&self, slug: &str) -> Result<PathBuf> {
        validate_slug(slug)?;
        Ok(self.listings_dir().join(slug))
    }

    fn listing_path(&self, slug: &str) -> Result<PathBuf> {
        Ok(self.listing_dir(slug)?.join("listing.json"))
    }

    fn versions_dir(&self, slug: &str) -> Result<PathBuf> {
        Ok(self.listing_dir(slug)?.join("versions"))
    }

    fn version_path(&self, slug: &str, version: &str) -> Result<PathBuf> {
        let safe = !version.is_empty()
            && !version.starts_with('.')
            && version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'));
        if !safe {
            return Err(Error::validation(
                "version",
                format!("'{version}' cannot be stored"),
            ));
        }
        Ok(self.versions_dir(slug)?.join(format!("{version}.json")))
    }

    fn submissions_dir(&self) -> PathBuf {
        self.path.join("submissions")
    }

    fn submission_path(&self, id: Uuid) -> PathBuf {
        self.submissions_dir().join(format!("{id}.json"))
    }

    fn installations_dir(&self) -> PathBuf {
        self.path.join("installations")
    }

    fn installation_path(&self, id: Uuid) -> PathBuf {
        self.installations_dir().join(format!("{id}.json"))
    }

    /// Take the write lock, first within this process and then across
    /// processes.
    async fn lock(&self) -> Result<WriteGuard<'_>> {
        let local = self.write_lock.lock().await;
        let root = self.path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            std::fs::create_dir_all(&root)?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(root.join(LOCK_FILE))?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(|e| Error::Internal(format!("store lock task failed: {e}")))??;
        Ok(WriteGuard {
            _local: local,
            _file: file,
        })
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `value` to a fresh temporary sibling of `path`.
    async fn write_temp<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, serde_json::to_string_pretty(value)?).await?;
        Ok(tmp)
    }

    /// Create or replace the document at `path`.
    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let tmp = Self::write_temp(path, value).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Create the document at `path`. Returns `false`, writing nothing, if
    /// it already exists.
    async fn create_json<T: Serialize>(path: &Path, value: &T) -> Result<bool> {
        let tmp = Self::write_temp(path, value).await?;
        let linked = fs::hard_link(&tmp, path).await;
        let _ = fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every `*.json` document in `dir`, skipping unreadable ones.
    async fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_json(&path).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable document {}: {}", path.display(), e),
            }
        }
        Ok(items)
    }

    async fn find_installation_unlocked(
        &self,
        listing: &str,
        tenant_id: &str,
    ) -> Result<Option<Installation>> {
        let rows: Vec<Installation> = Self::read_all(&self.installations_dir()).await?;
        Ok(rows
            .into_iter()
            .find(|i| i.listing == listing && i.tenant_id == tenant_id))
    }
}

#[async_trait]
impl Store for FilesystemStore {
    async fn put_listing(&self, listing: Listing) -> Result<()> {
        let path = self.listing_path(&listing.slug)?;
        let _guard = self.lock().await?;
        Self::write_json(&path, &listing).await?;
        debug!("Stored listing {}", listing.slug);
        Ok(())
    }

    async fn get_listing(&self, slug: &str) -> Result<Listing> {
        Self::read_json(&self.listing_path(slug)?)
            .await?
            .ok_or_else(|| Error::NotFound(format!("listing {slug}")))
    }

    async fn insert_version(&self, version: Version) -> Result<()> {
        let path = self.version_path(&version.listing, &version.version)?;
        let _guard = self.lock().await?;
        if !Self::create_json(&path, &version).await? {
            return Err(Error::DuplicateVersion {
                listing: version.listing,
                version: version.version,
            });
        }
        Ok(())
    }

    async fn update_version(&self, version: Version) -> Result<()> {
        let path = self.version_path(&version.listing, &version.version)?;
        let _guard = self.lock().await?;
        let stored: Version = Self::read_json(&path)
            .await?
            .ok_or_else(|| Error::VersionNotFound {
                listing: version.listing.clone(),
                version: version.version.clone(),
            })?;
        if stored.id != version.id {
            return Err(Error::Internal(format!(
                "version {}@{} has id {}, not {}",
                version.listing, version.version, stored.id, version.id
            )));
        }
        check_version_identity(&stored, &version)?;
        Self::write_json(&path, &version).await
    }

    async fn list_versions(&self, listing: &str) -> Result<Vec<Version>> {
        Self::read_all(&self.versions_dir(listing)?).await
    }

    async fn insert_submission(&self, mut submission: Submission) -> Result<Submission> {
        let path = self.submission_path(submission.id);
        let _guard = self.lock().await?;
        submission.revision = 0;
        if !Self::create_json(&path, &submission).await? {
            return Err(Error::Conflict(format!("submission {}", submission.id)));
        }
        Ok(submission)
    }

    async fn get_submission(&self, id: Uuid) -> Result<Submission> {
        Self::read_json(&self.submission_path(id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("submission {id}")))
    }

    async fn swap_submission(&self, mut submission: Submission) -> Result<Submission> {
        let path = self.submission_path(submission.id);
        let _guard = self.lock().await?;
        let stored: Submission = Self::read_json(&path)
            .await?
            .ok_or_else(|| Error::NotFound(format!("submission {}", submission.id)))?;
        check_revision("submission", submission.id, stored.revision, submission.revision)?;
        submission.revision += 1;
        Self::write_json(&path, &submission).await?;
        Ok(submission)
    }

    async fn insert_installation(&self, mut installation: Installation) -> Result<Installation> {
        let path = self.installation_path(installation.id);
        let _guard = self.lock().await?;
        let existing = self
            .find_installation_unlocked(&installation.listing, &installation.tenant_id)
            .await?;
        check_installation_slot(existing.as_ref())?;
        installation.revision = 0;
        if !Self::create_json(&path, &installation).await? {
            return Err(Error::Conflict(format!("installation {}", installation.id)));
        }
        Ok(installation)
    }

    async fn get_installation(&self, id: Uuid) -> Result<Installation> {
        Self::read_json(&self.installation_path(id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("installation {id}")))
    }

    async fn find_installation(
        &self,
        listing: &str,
        tenant_id: &str,
    ) -> Result<Option<Installation>> {
        self.find_installation_unlocked(listing, tenant_id).await
    }

    async fn swap_installation(&self, mut installation: Installation) -> Result<Installation> {
        let path = self.installation_path(installation.id);
        let _guard = self.lock().await?;
        let stored: Installation = Self::read_json(&path)
            .await?
            .ok_or_else(|| Error::NotFound(format!("installation {}", installation.id)))?;
        check_installation_key(&stored, &installation)?;
        check_revision(
            "installation",
            installation.id,
            stored.revision,
            installation.revision,
        )?;
        installation.revision += 1;
        Self::write_json(&path, &installation).await?;
        Ok(installation)
    }

    async fn list_installations(&self, filter: &InstallationFilter) -> Result<Vec<Installation>> {
        let rows: Vec<Installation> = Self::read_all(&self.installations_dir()).await?;
        let mut rows: Vec<Installation> = rows.into_iter().filter(|i| filter.matches(i)).collect();
        rows.sort_by(|a, b| {
            a.listing
                .cmp(&b.listing)
                .then_with(|| a.tenant_id.cmp(&b.tenant_id))
        });
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use jiff::Timestamp;
    use stallkeep_core::{
        Channel, CompatibilityBounds, InstallationStatus, ListingStatus, PricingModel,
        VersionStatus,
    };

    use std::sync::Arc;

    use super::*;

    fn listing(slug: &str) -> Listing {
        Listing {
            slug: slug.to_string(),
            name: "Order Export".into(),
            developer_id: "dev-1".into(),
            category: "reporting".into(),
            pricing_model: PricingModel::Free,
            price_cents: 0,
            trial_days: None,
            rating: 0.0,
            review_count: 0,
            status: ListingStatus::Draft,
            created_at: Timestamp::now(),
        }
    }

    fn version(listing: &str, v: &str) -> Version {
        Version {
            id: Uuid::new_v4(),
            listing: listing.to_string(),
            version: v.to_string(),
            channel: Channel::Stable,
            status: VersionStatus::Published,
            changelog: String::new(),
            compatibility: CompatibilityBounds::default(),
            submission_id: None,
            published_at: Timestamp::now(),
            yanked_at: None,
            yank_reason: None,
        }
    }

    fn installation(listing: &str, tenant: &str) -> Installation {
        let now = Timestamp::now();
        Installation {
            id: Uuid::new_v4(),
            listing: listing.to_string(),
            tenant_id: tenant.to_string(),
            version_id: Uuid::new_v4(),
            installed_version: "1.0.0".into(),
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
        }
    }

    #[tokio::test]
    async fn listings_and_versions_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().to_path_buf());
        store.put_listing(listing("order-export")).await.unwrap();
        store.insert_version(version("order-export", "1.0.0")).await.unwrap();

        let reopened = FilesystemStore::new(dir.path().to_path_buf());
        assert_eq!(reopened.get_listing("order-export").await.unwrap().name, "Order Export");
        assert_eq!(reopened.list_versions("order-export").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().to_path_buf());
        store.insert_version(version("order-export", "1.0.0")).await.unwrap();
        let err = store
            .insert_version(version("order-export", "1.0.0"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::DuplicateVersion { .. });
    }

    #[tokio::test]
    async fn hostile_path_segments_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().to_path_buf());
        assert_matches!(
            store.get_listing("../outside").await,
            Err(Error::Validation { field: "slug", .. })
        );
        assert_matches!(
            store.insert_version(version("order-export", "../1.0.0")).await,
            Err(Error::Validation { field: "version", .. })
        );
    }

    #[tokio::test]
    async fn stale_installation_swap_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().to_path_buf());
        let row = store
            .insert_installation(installation("order-export", "t-1"))
            .await
            .unwrap();

        let mut first = row.clone();
        first.status = InstallationStatus::Inactive;
        let stored = store.swap_installation(first).await.unwrap();
        assert_eq!(stored.revision, 1);

        let mut second = row;
        second.status = InstallationStatus::Uninstalled;
        assert_matches!(store.swap_installation(second).await, Err(Error::Conflict(_)));

        let current = store.get_installation(stored.id).await.unwrap();
        assert_eq!(current.status, InstallationStatus::Inactive);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stores_sharing_a_directory_apply_one_swap_per_revision() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(FilesystemStore::new(dir.path().to_path_buf()));
        let b = Arc::new(FilesystemStore::new(dir.path().to_path_buf()));

        for round in 0..25 {
            let row = a
                .insert_installation(installation("order-export", &format!("t-{round}")))
                .await
                .unwrap();
            let tasks: Vec<_> = [&a, &b, &a, &b]
                .into_iter()
                .enumerate()
                .map(|(n, store)| {
                    let store = Arc::clone(store);
                    let mut row = row.clone();
                    row.installed_version = format!("1.0.{n}");
                    tokio::spawn(async move { store.swap_installation(row).await })
                })
                .collect();

            let mut wins = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => wins += 1,
                    Err(Error::Conflict(_)) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            assert_eq!(wins, 1, "round {round}");
            assert_eq!(b.get_installation(row.id).await.unwrap().revision, 1);
        }

        let mut entries = std::fs::read_dir(dir.path().join("installations")).unwrap();
        assert!(entries.all(|e| e.unwrap().path().extension().unwrap() == "json"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stores_sharing_a_directory_insert_one_row_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(FilesystemStore::new(dir.path().to_path_buf()));
        let b = Arc::new(FilesystemStore::new(dir.path().to_path_buf()));

        let tasks: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(if n % 2 == 0 { &a } else { &b });
                tokio::spawn(async move {
                    store
                        .insert_installation(installation("order-export", "t-1"))
                        .await
                })
            })
            .collect();
        let mut inserted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => inserted += 1,
                Err(Error::AlreadyInstalled { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(
            a.list_installations(&InstallationFilter::tenant("t-1"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn insert_never_replaces_an_existing_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().to_path_buf());
        let first = version("order-export", "1.0.0");
        store.insert_version(first.clone()).await.unwrap();

        let mut second = version("order-export", "1.0.0");
        second.changelog = "replacement".into();
        assert_matches!(
            store.insert_version(second).await,
            Err(Error::DuplicateVersion { .. })
        );
        let stored = store.list_versions("order-export").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, first.id);
    }

    #[tokio::test]
    async fn second_row_for_key_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().to_path_buf());
        store
            .insert_installation(installation("order-export", "t-1"))
            .await
            .unwrap();
        assert_matches!(
            store.insert_installation(installation("order-export", "t-1")).await,
            Err(Error::AlreadyInstalled { .. })
        );
        assert!(store
            .insert_installation(installation("order-export", "t-2"))
            .await
            .is_ok());
        assert_eq!(
            store
                .list_installations(&InstallationFilter::listing("order-export"))
                .await
                .unwrap()
                .len(),
            2
        );
    }
}
