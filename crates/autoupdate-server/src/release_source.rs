// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! GitHub release listing

use crate::asset_cache::USER_AGENT;
use crate::error::{Result, ServerError};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Stop paginating after this many pages even if the API keeps answering.
const MAX_PAGES: u32 = 200;

/// One release as listed by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    /// Monotonic release id, newer releases have higher ids
    pub id: i64,
    /// Tag name (e.g., "v5.4.1")
    pub tag_name: String,
    /// Source archive URL
    #[serde(default)]
    pub zipball_url: Option<String>,
    #[serde(default)]
    pub assets: Vec<AssetMetadata>,
}

/// One file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub id: i64,
    /// Asset name (e.g., "update_darwin_amd64.bz2")
    pub name: String,
    pub browser_download_url: String,
}

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// List every release of `owner/repo`, across all pages.
    async fn list_releases(&self, owner: &str, repo: &str) -> Result<Vec<ReleaseMetadata>>;
}

/// Release source backed by the GitHub REST API
#[derive(Debug, Clone)]
pub struct GithubReleaseSource {
    client: reqwest::Client,
    api_base_url: String,
    token: Option<String>,
    per_page: u32,
}

impl GithubReleaseSource {
    pub fn new(api_base_url: impl Into<String>, token: Option<String>, per_page: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                ServerError::ReleaseSource(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_owned(),
            token,
            per_page,
        })
    }

    async fn list_page(&self, owner: &str, repo: &str, page: u32) -> Result<Vec<ReleaseMetadata>> {
        let url = format!("{}/repos/{owner}/{repo}/releases", self.api_base_url);

        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github.v3+json")
            .query(&[("page", page), ("per_page", self.per_page)]);

        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServerError::ReleaseSource(format!("Request failed: {e}")))?;

        if let Some(remaining) = response.headers().get("x-ratelimit-remaining")
            && let Ok(remaining_str) = remaining.to_str()
            && let Ok(remaining_int) = remaining_str.parse::<u32>()
            && remaining_int < 10
        {
            warn!("GitHub rate limit low: {remaining_int} remaining");
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_owned());
            return Err(ServerError::ReleaseSource(format!(
                "GitHub API error {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ServerError::ReleaseSource(format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl ReleaseSource for GithubReleaseSource {
    async fn list_releases(&self, owner: &str, repo: &str) -> Result<Vec<ReleaseMetadata>> {
        let mut releases = Vec::new();

        for page in 1..=MAX_PAGES {
            let batch = self.list_page(owner, repo, page).await?;
            if batch.is_empty() {
                break;
            }
            debug!(owner, repo, page, count = batch.len(), "Fetched release page");
            releases.extend(batch);

            if page == MAX_PAGES {
                warn!(owner, repo, "Stopped listing releases after {MAX_PAGES} pages");
            }
        }

        Ok(releases)
    }
}
