use async_trait::async_trait;
use stallkeep_core::{Installation, Listing, Submission, Version};
use uuid::Uuid;

use crate::error::{Error, Result};

pub mod fs;
pub mod memory;

/// Selects installations by listing and/or tenant.
#[derive(Debug, Clone, Default)]
pub struct InstallationFilter {
    pub listing: Option<String>,
    pub tenant_id: Option<String>,
}

impl InstallationFilter {
    pub fn listing(listing: &str) -> Self {
        Self {
            listing: Some(listing.to_string()),
            tenant_id: None,
        }
    }

    pub fn tenant(tenant_id: &str) -> Self {
        Self {
            listing: None,
            tenant_id: Some(tenant_id.to_string()),
        }
    }

    pub fn matches(&self, installation: &Installation) -> bool {
        self.listing
            .as_deref()
            .map_or(true, |l| installation.listing == l)
            && self
                .tenant_id
                .as_deref()
                .map_or(true, |t| installation.tenant_id == t)
    }
}

/// Persistence boundary for the lifecycle engine.
///
/// Implementations enforce the uniqueness and compare-and-swap rules below
/// themselves; callers rely on them for correctness under concurrency.
///
/// * `insert_version` fails with [`Error::DuplicateVersion`] when the
///   listing already has that exact version string.
/// * `insert_installation` fails with [`Error::AlreadyInstalled`] when a live
///   row exists for (listing, tenant), and with [`Error::Conflict`] when an
///   uninstalled row exists (it must be reactivated in place instead).
/// * `swap_*` writes only if the stored `revision` equals the record's
///   `revision`, stores it incremented, and returns the stored record.
///   Otherwise it fails with [`Error::Conflict`] and writes nothing.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create or replace a listing.
    async fn put_listing(&self, listing: Listing) -> Result<()>;

    async fn get_listing(&self, slug: &str) -> Result<Listing>;

    async fn insert_version(&self, version: Version) -> Result<()>;

    /// Replace a version's mutable fields. Its id, listing and version
    /// string must match the stored record.
    async fn update_version(&self, version: Version) -> Result<()>;

    /// All versions of a listing, in no particular order.
    async fn list_versions(&self, listing: &str) -> Result<Vec<Version>>;

    async fn insert_submission(&self, submission: Submission) -> Result<Submission>;

    async fn get_submission(&self, id: Uuid) -> Result<Submission>;

    async fn swap_submission(&self, submission: Submission) -> Result<Submission>;

    async fn insert_installation(&self, installation: Installation) -> Result<Installation>;

    async fn get_installation(&self, id: Uuid) -> Result<Installation>;

    /// The row for (listing, tenant), live or uninstalled.
    async fn find_installation(&self, listing: &str, tenant_id: &str)
        -> Result<Option<Installation>>;

    async fn swap_installation(&self, installation: Installation) -> Result<Installation>;

    async fn list_installations(&self, filter: &InstallationFilter) -> Result<Vec<Installation>>;
}

/// Validate a listing slug: 1 to 64 characters of `[a-z0-9-]`, not starting
/// or ending with `-`.
pub fn validate_slug(slug: &str) -> Result<()> {
    let well_formed = !slug.is_empty()
        && slug.len() <= 64
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(Error::validation(
            "slug",
            format!("'{slug}' must be lowercase letters, digits and dashes"),
        ))
    }
}

/// Reject a CAS write whose revision is stale.
pub(crate) fn check_revision(entity: &str, id: Uuid, stored: u64, expected: u64) -> Result<()> {
    if stored == expected {
        Ok(())
    } else {
        Err(Error::Conflict(format!(
            "{entity} {id} (expected revision {expected}, found {stored})"
        )))
    }
}

/// Reject a version write that would change a published identity.
pub(crate) fn check_version_identity(stored: &Version, update: &Version) -> Result<()> {
    if stored.listing == update.listing && stored.version == update.version {
        Ok(())
    } else {
        Err(Error::Internal(format!(
            "version {} identity is immutable",
            stored.id
        )))
    }
}

/// Reject an installation write that would move it to another key.
pub(crate) fn check_installation_key(stored: &Installation, update: &Installation) -> Result<()> {
    if stored.listing == update.listing && stored.tenant_id == update.tenant_id {
        Ok(())
    } else {
        Err(Error::Internal(format!(
            "installation {} key is immutable",
            stored.id
        )))
    }
}

/// Reject inserting a second row for (listing, tenant).
pub(crate) fn check_installation_slot(existing: Option<&Installation>) -> Result<()> {
    match existing {
        None => Ok(()),
        Some(row) if row.is_live() => Err(Error::AlreadyInstalled {
            listing: row.listing.clone(),
            tenant: row.tenant_id.clone(),
        }),
        Some(row) => Err(Error::Conflict(format!(
            "installation {} exists for {}/{}; reactivate it instead",
            row.id, row.listing, row.tenant_id
        ))),
    }
}
