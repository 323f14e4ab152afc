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

//! Binary patch generation between two released assets

use crate::asset_cache::AssetStore;
use crate::error::{Result, ServerError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// Public path under which generated patches are served
pub const PATCHES_MOUNT: &str = "/patches";

/// A generated patch, `file` being its public path under [`PATCHES_MOUNT`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub file: String,
}

#[async_trait]
pub trait PatchGenerator: Send + Sync {
    /// Build a patch turning the binary at `old_url` into the one at `new_url`.
    async fn generate(&self, old_url: &str, new_url: &str) -> Result<Patch>;
}

/// `{sha256(old_url + "\n" + new_url)}.bsdiff`
pub fn patch_file_name(old_url: &str, new_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(old_url.as_bytes());
    hasher.update(b"\n");
    hasher.update(new_url.as_bytes());
    format!("{:x}.bsdiff", hasher.finalize())
}

/// Sibling of the served directory where patches are built before being
/// renamed into place; same filesystem, never served.
fn staging_dir_for(patches_dir: &Path) -> PathBuf {
    let mut name = patches_dir
        .file_name()
        .map_or_else(|| OsString::from("patches"), OsString::from);
    name.push(".staging");
    patches_dir.with_file_name(name)
}

/// Runs an external bsdiff-compatible program on the cached binaries.
pub struct BsdiffCommand {
    program: String,
    patches_dir: PathBuf,
    staging_dir: PathBuf,
    store: Arc<dyn AssetStore>,
}

impl fmt::Debug for BsdiffCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BsdiffCommand")
            .field("program", &self.program)
            .field("patches_dir", &self.patches_dir)
            .field("staging_dir", &self.staging_dir)
            .finish_non_exhaustive()
    }
}

impl BsdiffCommand {
    pub fn new(program: impl Into<String>, patches_dir: impl Into<PathBuf>, store: Arc<dyn AssetStore>) -> Self {
        let patches_dir = patches_dir.into();
        Self {
            program: program.into(),
            staging_dir: staging_dir_for(&patches_dir),
            patches_dir,
            store,
        }
    }

    async fn run(&self, old: &Path, new: &Path, out: &Path) -> Result<()> {
        let output = Command::new(&self.program)
            .arg(old)
            .arg(new)
            .arg(out)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ServerError::PatchGeneration(format!("could not run {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(ServerError::PatchGeneration(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PatchGenerator for BsdiffCommand {
    async fn generate(&self, old_url: &str, new_url: &str) -> Result<Patch> {
        let name = patch_file_name(old_url, new_url);
        let patch = Patch {
            file: format!("{PATCHES_MOUNT}/{name}"),
        };
        let out = self.patches_dir.join(&name);

        if tokio::fs::try_exists(&out).await? {
            debug!(%name, "Reusing existing patch");
            return Ok(patch);
        }

        let old = self.store.fetch(old_url).await?;
        let new = self.store.fetch(new_url).await?;

        tokio::fs::create_dir_all(&self.patches_dir).await?;
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let temp_path = tempfile::Builder::new()
            .prefix(".patch-")
            .tempfile_in(&self.staging_dir)?
            .into_temp_path();

        self.run(&old, &new, &temp_path).await?;
        temp_path.persist(&out).map_err(|e| e.error)?;

        info!(%old_url, %new_url, %name, "Generated patch");
        Ok(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeStore;

    #[test]
    fn test_patch_file_name() {
        let name = patch_file_name("https://dl/a", "https://dl/b");
        assert!(name.ends_with(".bsdiff"));
        assert_eq!(name.len(), 64 + ".bsdiff".len());
        assert_eq!(name, patch_file_name("https://dl/a", "https://dl/b"));
        assert_ne!(name, patch_file_name("https://dl/b", "https://dl/a"));
        // The separator keeps ("ab", "c") and ("a", "bc") apart
        assert_ne!(patch_file_name("ab", "c"), patch_file_name("a", "bc"));
    }

    #[test]
    fn test_staging_dir_is_a_sibling() {
        assert_eq!(
            staging_dir_for(Path::new("/srv/update/patches")),
            Path::new("/srv/update/patches.staging")
        );
        assert_eq!(staging_dir_for(Path::new("patches")), Path::new("patches.staging"));
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-bsdiff.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    fn concat_script(dir: &Path) -> String {
        script(dir, "cat \"$1\" \"$2\" > \"$3\"")
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generates_patch_file() {
        let cache = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let patches = root.path().join("patches");
        let tools = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::new(cache.path().to_path_buf()));

        let generator = BsdiffCommand::new(concat_script(tools.path()), &patches, store.clone());
        let patch = generator.generate("https://dl/old", "https://dl/new").await.unwrap();

        let name = patch_file_name("https://dl/old", "https://dl/new");
        assert_eq!(patch.file, format!("/patches/{name}"));
        let content = std::fs::read_to_string(patches.join(&name)).unwrap();
        assert_eq!(content, "https://dl/oldhttps://dl/new");

        // Second call reuses the file without fetching again
        let again = generator.generate("https://dl/old", "https://dl/new").await.unwrap();
        assert_eq!(again, patch);
        assert_eq!(store.fetches(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_partial_patch_is_not_in_served_dir() {
        let cache = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let patches = root.path().join("patches");
        let tools = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::new(cache.path().to_path_buf()));

        // The "patch" is a listing of the served directory taken while it is being written
        let program = script(tools.path(), &format!("ls -A '{}' > \"$3\"", patches.display()));
        let generator = BsdiffCommand::new(program, &patches, store);
        let patch = generator.generate("https://dl/old", "https://dl/new").await.unwrap();

        let name = patch_file_name("https://dl/old", "https://dl/new");
        assert_eq!(patch.file, format!("/patches/{name}"));
        assert_eq!(std::fs::read_to_string(patches.join(&name)).unwrap(), "");

        let entries: Vec<_> = std::fs::read_dir(&patches)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![OsString::from(&name)]);
        assert_eq!(std::fs::read_dir(root.path().join("patches.staging")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failing_program_leaves_no_patch() {
        let cache = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let patches = root.path().join("patches");
        let store = Arc::new(FakeStore::new(cache.path().to_path_buf()));

        let generator = BsdiffCommand::new("definitely-not-an-installed-bsdiff", &patches, store);
        let err = generator.generate("https://dl/old", "https://dl/new").await.unwrap_err();

        assert!(matches!(err, ServerError::PatchGeneration(_)));
        assert_eq!(std::fs::read_dir(&patches).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(root.path().join("patches.staging")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_asset_fails() {
        let cache = tempfile::tempdir().unwrap();
        let patches = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::new(cache.path().to_path_buf()));

        let generator = BsdiffCommand::new("bsdiff", patches.path().join("patches"), store);
        let err = generator.generate("https://dl/broken", "https://dl/new").await.unwrap_err();
        assert!(matches!(err, ServerError::Download(_)));
    }
}
