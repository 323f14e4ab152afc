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

//! Local cache of downloaded release binaries
//!
//! Files are named `{basename}.{sha256(url)}` so the same URL always maps to
//! the same path and a cached file is never fetched twice. Assets published
//! as `.bz2` are decompressed on the way in, so the cached file is the binary
//! clients run and checksums, signatures and patches all refer to it.

use crate::error::{Result, ServerError};
use async_compression::tokio::write::BzDecoder;
use async_trait::async_trait;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub(crate) const USER_AGENT: &str = concat!("autoupdate-server/", env!("CARGO_PKG_VERSION"));

const MAX_BASENAME_CHARS: usize = 60;

const BZIP2_EXTENSION: &str = ".bz2";

/// Last path segment of `url`, without query or fragment
fn url_basename(url: &str) -> &str {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query.rsplit('/').next().unwrap_or_default()
}

fn is_bzip2(url: &str) -> bool {
    url_basename(url).ends_with(BZIP2_EXTENSION)
}

/// Where release binaries are fetched from and kept.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Return the local path of `url`'s content, downloading it if needed.
    async fn fetch(&self, url: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: PathBuf,
    client: reqwest::Client,
}

impl AssetCache {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ServerError::Download(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            dir: dir.into(),
            client,
        })
    }

    pub fn local_path_for(&self, url: &str) -> PathBuf {
        let basename: String = url_basename(url)
            .chars()
            .take(MAX_BASENAME_CHARS)
            .collect();
        let url_hash = Sha256::digest(url.as_bytes());

        self.dir.join(format!("{basename}.{url_hash:x}"))
    }

    async fn download(&self, url: &str, path: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServerError::Download(format!("Request for {url} failed: {e}")))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(ServerError::Download(format!(
                "Expected 200 OK for {url}, got {}",
                response.status()
            )));
        }

        // Stream into a private temp file and rename it into place, so a
        // concurrent fetch of the same URL never sees a partial file.
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.dir)?
            .into_parts();
        let file = tokio::fs::File::from_std(file);
        let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if is_bzip2(url) {
            Box::pin(BzDecoder::new(file))
        } else {
            Box::pin(file)
        };

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| ServerError::Download(format!("Failed to read {url}: {e}")))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| ServerError::Download(format!("Failed to store {url}: {e}")))?;
        }
        // Finishes decompression; a truncated archive fails here
        writer
            .shutdown()
            .await
            .map_err(|e| ServerError::Download(format!("Failed to store {url}: {e}")))?;
        drop(writer);

        temp_path.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl AssetStore for AssetCache {
    async fn fetch(&self, url: &str) -> Result<PathBuf> {
        let path = self.local_path_for(url);
        if tokio::fs::try_exists(&path).await? {
            debug!(%url, path = %path.display(), "Asset already cached");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        debug!(%url, path = %path.display(), "Downloading asset");
        self.download(url, &path).await?;
        Ok(path)
    }
}
