// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Release catalog
//!
//! Indexes every update asset of a repository by OS, architecture and version,
//! and tracks the newest asset per platform. Readers work on an immutable
//! [`CatalogSnapshot`]; a refresh builds a complete new snapshot off to the
//! side and swaps it in under the write lock, so a slow release listing or
//! download never blocks a request and no reader sees a half-built index.

use crate::asset_cache::AssetStore;
use crate::error::{Result, ServerError};
use crate::release_source::{AssetMetadata, ReleaseMetadata, ReleaseSource};
use crate::signing::Signer;
use autoupdate_shared::{Arch, Os, Version};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, info};

static UPDATE_ASSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^update_(darwin|windows|linux|android)_(arm|386|amd64)\.?.*$")
        .unwrap_or_else(|e| panic!("update asset pattern is invalid: {e}"))
});

/// Extract the platform from an update asset name like `update_darwin_amd64.bz2`.
///
/// Returns `None` for files that are not update binaries.
pub fn parse_asset_name(name: &str) -> Option<(Os, Arch)> {
    let captures = UPDATE_ASSET_RE.captures(name)?;
    let os = captures.get(1)?.as_str().parse().ok()?;
    let arch = captures.get(2)?.as_str().parse().ok()?;
    Some((os, arch))
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A tagged release that passed the version filters.
#[derive(Debug, Clone)]
pub struct Release {
    pub id: i64,
    pub version: Version,
    pub archive_url: Option<String>,
    pub assets: Vec<AssetMetadata>,
}

impl Release {
    /// Accept a listed release if its tag is a semantic version with at least
    /// `min_major` as major component.
    pub fn from_metadata(metadata: ReleaseMetadata, min_major: u64) -> Option<Self> {
        let version = match Version::parse(&metadata.tag_name) {
            Ok(version) => version,
            Err(e) => {
                debug!(tag = %metadata.tag_name, "Release is not semantically versioned, skipping: {e}");
                return None;
            }
        };
        if version.major() < min_major {
            debug!(tag = %metadata.tag_name, "Ignoring release because it is too old");
            return None;
        }

        Some(Self {
            id: metadata.id,
            version,
            archive_url: metadata.zipball_url,
            assets: metadata.assets,
        })
    }
}

/// An update binary with its checksum and signature.
///
/// Built once at ingestion and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub source_url: String,
    pub local_file: PathBuf,
    pub version: Version,
    pub os: Os,
    pub arch: Arch,
    /// sha256 of the binary, hex
    pub checksum: String,
    /// Signature over the raw checksum, hex
    pub signature: String,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    #[error("no such OS")]
    NoSuchOs,
    #[error("no such arch")]
    NoSuchArch,
    #[error("no asset with a matching version")]
    NoMatchingVersion,
    #[error("no asset with a matching checksum")]
    NoMatchingChecksum,
    #[error("checksum matching is disabled for this OS")]
    ChecksumsDisabled,
}

/// Immutable view of the catalog at one point in time.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    by_version: HashMap<Os, HashMap<Arch, BTreeMap<Version, Arc<Asset>>>>,
    latest: HashMap<Os, HashMap<Arch, Arc<Asset>>>,
    /// Source URL, then version; one URL may be attached to several releases
    by_source: HashMap<String, BTreeMap<Version, Arc<Asset>>>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl CatalogSnapshot {
    /// Add an asset; a second asset for the same (os, arch, version) replaces the first.
    pub fn insert(&mut self, asset: Arc<Asset>) {
        let (os, arch) = (asset.os, asset.arch);

        let versions = self.by_version.entry(os).or_default().entry(arch).or_default();
        if let Some(replaced) = versions.insert(asset.version.clone(), Arc::clone(&asset))
            && let Some(releases) = self.by_source.get_mut(&replaced.source_url)
        {
            releases.remove(&replaced.version);
            if releases.is_empty() {
                self.by_source.remove(&replaced.source_url);
            }
        }
        self.by_source
            .entry(asset.source_url.clone())
            .or_default()
            .insert(asset.version.clone(), Arc::clone(&asset));

        // Ties replace the latest pointer too, so it always points into `by_version`
        let latest = self.latest.entry(os).or_default();
        let keep_current = latest
            .get(&arch)
            .is_some_and(|current| current.version > asset.version);
        if !keep_current {
            latest.insert(arch, asset);
        }
    }

    fn platform(&self, os: Os, arch: Arch) -> std::result::Result<&BTreeMap<Version, Arc<Asset>>, LookupError> {
        self.by_version
            .get(&os)
            .ok_or(LookupError::NoSuchOs)?
            .get(&arch)
            .ok_or(LookupError::NoSuchArch)
    }

    pub fn lookup_by_version(
        &self,
        os: Os,
        arch: Arch,
        version: &Version,
    ) -> std::result::Result<Arc<Asset>, LookupError> {
        self.platform(os, arch)?
            .get(version)
            .cloned()
            .ok_or(LookupError::NoMatchingVersion)
    }

    pub fn lookup_by_checksum(
        &self,
        os: Os,
        arch: Arch,
        checksum: &str,
    ) -> std::result::Result<Arc<Asset>, LookupError> {
        if !os.supports_patches() {
            return Err(LookupError::ChecksumsDisabled);
        }
        self.platform(os, arch)?
            .values()
            .find(|asset| asset.checksum.eq_ignore_ascii_case(checksum))
            .cloned()
            .ok_or(LookupError::NoMatchingChecksum)
    }

    pub fn latest_for(&self, os: Os, arch: Arch) -> std::result::Result<Arc<Asset>, LookupError> {
        self.latest
            .get(&os)
            .ok_or(LookupError::NoSuchOs)?
            .get(&arch)
            .cloned()
            .ok_or(LookupError::NoSuchArch)
    }

    /// All versions known for a platform, oldest first
    pub fn assets(&self, os: Os, arch: Arch) -> impl Iterator<Item = &Arc<Asset>> {
        self.by_version
            .get(&os)
            .and_then(|arches| arches.get(&arch))
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    pub fn platforms(&self) -> impl Iterator<Item = (Os, Arch)> + '_ {
        self.latest
            .iter()
            .flat_map(|(os, arches)| arches.keys().map(move |arch| (*os, *arch)))
    }

    /// Asset previously ingested from `url` for release `version`
    pub fn find_known(&self, url: &str, version: &Version) -> Option<&Arc<Asset>> {
        self.by_source.get(url)?.get(version)
    }

    pub fn asset_count(&self) -> usize {
        self.by_version
            .values()
            .flat_map(HashMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

/// Which repository a catalog tracks.
#[derive(Debug, Clone)]
pub struct CatalogSource {
    pub owner: String,
    pub repo: String,
    pub min_major_version: u64,
}

/// Counts reported by a successful refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub releases: usize,
    pub assets: usize,
    pub ingested: usize,
    pub reused: usize,
}

pub struct ReleaseCatalog {
    origin: CatalogSource,
    source: Arc<dyn ReleaseSource>,
    store: Arc<dyn AssetStore>,
    signer: Arc<Signer>,
    clock: Arc<dyn Clock>,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ReleaseCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseCatalog")
            .field("origin", &self.origin)
            .field("assets", &self.snapshot().asset_count())
            .finish_non_exhaustive()
    }
}

impl ReleaseCatalog {
    pub fn new(
        origin: CatalogSource,
        source: Arc<dyn ReleaseSource>,
        store: Arc<dyn AssetStore>,
        signer: Arc<Signer>,
    ) -> Self {
        Self {
            origin,
            source,
            store,
            signer,
            clock: Arc::new(SystemClock),
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn origin(&self) -> &CatalogSource {
        &self.origin
    }

    /// The current snapshot; stays consistent for as long as it is held.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn lookup_by_version(
        &self,
        os: Os,
        arch: Arch,
        version: &Version,
    ) -> std::result::Result<Arc<Asset>, LookupError> {
        self.snapshot().lookup_by_version(os, arch, version)
    }

    pub fn lookup_by_checksum(
        &self,
        os: Os,
        arch: Arch,
        checksum: &str,
    ) -> std::result::Result<Arc<Asset>, LookupError> {
        self.snapshot().lookup_by_checksum(os, arch, checksum)
    }

    pub fn latest_for(&self, os: Os, arch: Arch) -> std::result::Result<Arc<Asset>, LookupError> {
        self.snapshot().latest_for(os, arch)
    }

    /// Rebuild the catalog from the release source.
    ///
    /// Any failure leaves the current snapshot in place.
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let _guard = self.refresh_lock.lock().await;
        let CatalogSource {
            owner,
            repo,
            min_major_version,
        } = &self.origin;

        debug!(%owner, %repo, "Getting releases");
        let listed = self.source.list_releases(owner, repo).await?;
        let mut releases: Vec<Release> = listed
            .into_iter()
            .filter_map(|metadata| Release::from_metadata(metadata, *min_major_version))
            .collect();
        releases.sort_by(|a, b| b.id.cmp(&a.id));
        debug!(%owner, %repo, count = releases.len(), "Found releases");

        let previous = self.snapshot();
        let mut next = CatalogSnapshot::default();
        let mut summary = RefreshSummary {
            releases: releases.len(),
            ..RefreshSummary::default()
        };

        for release in &releases {
            debug!(
                version = %release.version,
                archive = release.archive_url.as_deref().unwrap_or("-"),
                "Indexing release"
            );
            for metadata in &release.assets {
                let Some((os, arch)) = parse_asset_name(&metadata.name) else {
                    debug!(name = %metadata.name, "Not an auto-update asset, skipping");
                    continue;
                };

                let asset = match previous.find_known(&metadata.browser_download_url, &release.version) {
                    Some(known) if known.os == os && known.arch == arch => {
                        summary.reused += 1;
                        Arc::clone(known)
                    }
                    _ => {
                        summary.ingested += 1;
                        self.ingest(release, metadata, os, arch).await?
                    }
                };
                next.insert(asset);
            }
        }

        summary.assets = next.asset_count();
        next.refreshed_at = Some(self.clock.now());
        *self.snapshot.write() = Arc::new(next);

        info!(
            %owner,
            %repo,
            releases = summary.releases,
            assets = summary.assets,
            ingested = summary.ingested,
            "Release catalog refreshed"
        );
        Ok(summary)
    }

    async fn ingest(&self, release: &Release, metadata: &AssetMetadata, os: Os, arch: Arch) -> Result<Arc<Asset>> {
        let failed = |reason: String| ServerError::Ingestion {
            asset: metadata.name.clone(),
            reason,
        };

        debug!(name = %metadata.name, version = %release.version, "Ingesting asset");
        let local_file = self
            .store
            .fetch(&metadata.browser_download_url)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let signer = Arc::clone(&self.signer);
        let path = local_file.clone();
        let signed = tokio::task::spawn_blocking(move || signer.signature_for_file(&path))
            .await
            .map_err(|e| failed(format!("signing task failed: {e}")))?
            .map_err(|e| failed(e.to_string()))?;

        Ok(Arc::new(Asset {
            name: metadata.name.clone(),
            source_url: metadata.browser_download_url.clone(),
            local_file,
            version: release.version.clone(),
            os,
            arch,
            checksum: signed.checksum,
            signature: signed.signature,
        }))
    }
}
