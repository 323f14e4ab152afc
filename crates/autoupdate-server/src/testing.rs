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

//! In-memory collaborators for unit tests

use crate::asset_cache::AssetStore;
use crate::catalog::{CatalogSource, ReleaseCatalog};
use crate::error::{Result, ServerError};
use crate::patch::{PATCHES_MOUNT, Patch, PatchGenerator, patch_file_name};
use crate::release_source::{AssetMetadata, ReleaseMetadata, ReleaseSource};
use crate::signing::Signer;
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::Notify;

pub(crate) fn release_meta(id: i64, tag: &str, assets: Vec<AssetMetadata>) -> ReleaseMetadata {
    ReleaseMetadata {
        id,
        tag_name: tag.to_owned(),
        zipball_url: None,
        assets,
    }
}

pub(crate) fn asset_meta(name: &str, url: &str) -> AssetMetadata {
    AssetMetadata {
        id: 0,
        name: name.to_owned(),
        browser_download_url: url.to_owned(),
    }
}

pub(crate) fn test_signer() -> Arc<Signer> {
    Arc::new(Signer::from_seed(&[7u8; 32]))
}

#[derive(Default)]
struct SourceState {
    releases: Mutex<Vec<ReleaseMetadata>>,
    fail: AtomicBool,
    hold: Mutex<Option<Arc<Notify>>>,
}

/// Release source answering from a list the test can swap at any time.
#[derive(Clone, Default)]
pub(crate) struct StaticSource {
    state: Arc<SourceState>,
}

impl StaticSource {
    pub(crate) fn new(releases: Vec<ReleaseMetadata>) -> Self {
        let source = Self::default();
        source.set_releases(releases);
        source
    }

    pub(crate) fn set_releases(&self, releases: Vec<ReleaseMetadata>) {
        *self.state.releases.lock() = releases;
    }

    pub(crate) fn fail_listing(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    /// Make the next listing wait until the returned handle is notified.
    pub(crate) fn hold_listing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.hold.lock() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl ReleaseSource for StaticSource {
    async fn list_releases(&self, _owner: &str, _repo: &str) -> Result<Vec<ReleaseMetadata>> {
        let hold = self.state.hold.lock().take();
        if let Some(gate) = hold {
            gate.notified().await;
        }
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(ServerError::ReleaseSource("listing failed".to_owned()));
        }
        Ok(self.state.releases.lock().clone())
    }
}

/// Asset store writing each URL as the file content; URLs containing
/// "broken" fail to download.
pub(crate) struct FakeStore {
    dir: PathBuf,
    fetches: AtomicUsize,
}

impl FakeStore {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetStore for FakeStore {
    async fn fetch(&self, url: &str) -> Result<PathBuf> {
        if url.contains("broken") {
            return Err(ServerError::Download(format!("Expected 200 OK for {url}, got 500")));
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let path = self
            .dir
            .join(format!("{:x}", Sha256::digest(url.as_bytes())));
        tokio::fs::write(&path, url.as_bytes()).await?;
        Ok(path)
    }
}

pub(crate) fn test_catalog(source: StaticSource) -> (ReleaseCatalog, Arc<FakeStore>, TempDir) {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let store = Arc::new(FakeStore::new(dir.path().to_path_buf()));
    let catalog = ReleaseCatalog::new(
        CatalogSource {
            owner: "getlantern".to_owned(),
            repo: "lantern".to_owned(),
            min_major_version: 4,
        },
        Arc::new(source),
        Arc::clone(&store) as Arc<dyn AssetStore>,
        test_signer(),
    );
    (catalog, store, dir)
}

/// Patch generator recording its calls instead of diffing anything.
#[derive(Default)]
pub(crate) struct RecordingPatcher {
    pub(crate) fail: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingPatcher {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PatchGenerator for RecordingPatcher {
    async fn generate(&self, old_url: &str, new_url: &str) -> Result<Patch> {
        self.calls
            .lock()
            .push((old_url.to_owned(), new_url.to_owned()));
        if self.fail {
            return Err(ServerError::PatchGeneration("bsdiff exited with 1".to_owned()));
        }
        Ok(Patch {
            file: format!("{PATCHES_MOUNT}/{}", patch_file_name(old_url, new_url)),
        })
    }
}
