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

use anyhow::{Context, Result, bail};
use autoupdate_shared::{Os, Version};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `signing.private_key_path`.
pub const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// App served at the bare `/update` path
    #[serde(default = "default_app")]
    pub default_app: String,
    pub server: ServerSettings,
    #[serde(default)]
    pub github: GithubSettings,
    #[serde(default)]
    pub assets: AssetSettings,
    pub signing: SigningSettings,
    #[serde(default)]
    pub gate: GateSettings,
    #[serde(default)]
    pub patches: PatchSettings,
    pub apps: Vec<AppSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix prepended to patch paths handed out to clients
    pub public_address: String,
    #[serde(default = "default_patches_dir")]
    pub patches_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Bearer token, raises the API rate limit and unlocks private repos
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Releases with a lower major version are never ingested
    #[serde(default = "default_min_major_version")]
    pub min_major_version: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetSettings {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigningSettings {
    pub private_key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateSettings {
    /// Share of positive decisions actually served, 0.0..=1.0
    #[serde(default = "default_rollout_fraction")]
    pub rollout_fraction: f64,
    /// Served updates per second, 0 disables the limiter
    #[serde(default)]
    pub rate_limit_per_sec: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatchSettings {
    /// bsdiff-compatible program, invoked as `program <old> <new> <patch>`
    #[serde(default = "default_patch_program")]
    pub program: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub name: String,
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub os_overrides: Vec<OsOverrideSettings>,
    #[serde(default)]
    pub min_app_versions: Vec<MinAppVersionSettings>,
}

/// Hosts running an OS older than `below_os_version` are pinned to
/// `pin_version`, the last release that still supports them.
#[derive(Debug, Clone, Deserialize)]
pub struct OsOverrideSettings {
    pub os: Os,
    pub below_os_version: String,
    pub pin_version: String,
}

/// Builds older than `min_version` cannot apply updates on `os`.
#[derive(Debug, Clone, Deserialize)]
pub struct MinAppVersionSettings {
    pub os: Os,
    pub min_version: String,
}

fn default_app() -> String {
    "lantern".to_owned()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    9999
}

fn default_patches_dir() -> PathBuf {
    PathBuf::from("./patches")
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_owned()
}

fn default_refresh_interval_secs() -> u64 {
    1800
}

fn default_min_major_version() -> u64 {
    4
}

fn default_per_page() -> u32 {
    100
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./assets")
}

fn default_download_timeout_secs() -> u64 {
    30
}

fn default_rollout_fraction() -> f64 {
    1.0
}

fn default_patch_program() -> String {
    "bsdiff".to_owned()
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            token: None,
            refresh_interval_secs: default_refresh_interval_secs(),
            min_major_version: default_min_major_version(),
            per_page: default_per_page(),
        }
    }
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            rollout_fraction: default_rollout_fraction(),
            rate_limit_per_sec: 0,
        }
    }
}

impl Default for PatchSettings {
    fn default() -> Self {
        Self {
            program: default_patch_program(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)?;
        if let Ok(key_path) = std::env::var(PRIVATE_KEY_ENV)
            && !key_path.is_empty()
        {
            config.signing.private_key_path = PathBuf::from(key_path);
        }
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn app(&self, name: &str) -> Option<&AppSettings> {
        self.apps.iter().find(|app| app.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.server.public_address.is_empty() {
            bail!("server.public_address must be set");
        }
        if !(0.0..=1.0).contains(&self.gate.rollout_fraction) {
            bail!(
                "gate.rollout_fraction must be between 0.0 and 1.0, got {}",
                self.gate.rollout_fraction
            );
        }
        if self.github.refresh_interval_secs == 0 {
            bail!("github.refresh_interval_secs must be positive");
        }
        if self.apps.is_empty() {
            bail!("at least one [[apps]] entry is required");
        }

        let mut names = HashSet::new();
        for app in &self.apps {
            if app.name.is_empty() || app.owner.is_empty() || app.repo.is_empty() {
                bail!("apps entries need a name, owner and repo");
            }
            if !names.insert(app.name.as_str()) {
                bail!("duplicate app name: {}", app.name);
            }
            for rule in &app.os_overrides {
                check_version(&app.name, &rule.below_os_version)?;
                check_version(&app.name, &rule.pin_version)?;
            }
            for floor in &app.min_app_versions {
                check_version(&app.name, &floor.min_version)?;
            }
        }
        Ok(())
    }
}

fn check_version(app: &str, version: &str) -> Result<()> {
    Version::parse(version)
        .map(|_| ())
        .with_context(|| format!("app {app}: invalid version {version:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        public_address = "https://update.example.com"

        [signing]
        private_key_path = "/etc/autoupdate/private.pem"

        [[apps]]
        name = "lantern"
        owner = "getlantern"
        repo = "lantern"
    "#;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.default_app, "lantern");
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.github.refresh_interval_secs, 1800);
        assert_eq!(config.github.min_major_version, 4);
        assert_eq!(config.github.api_base_url, "https://api.github.com");
        assert!((config.gate.rollout_fraction - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.gate.rate_limit_per_sec, 0);
        assert_eq!(config.patches.program, "bsdiff");
        assert_eq!(config.assets.download_timeout_secs, 30);
        assert!(config.app("lantern").is_some());
        assert!(config.app("beam").is_none());
    }

    #[test]
    fn test_app_policies() {
        let content = format!(
            r#"{MINIMAL}
        [[apps.os_overrides]]
        os = "windows"
        below_os_version = "6.0.0"
        pin_version = "5.4.1"

        [[apps.min_app_versions]]
        os = "darwin"
        min_version = "3.6.0"
        "#
        );
        let config = ServerConfig::parse(&content).unwrap();
        let app = config.app("lantern").unwrap();
        assert_eq!(app.os_overrides.len(), 1);
        assert_eq!(app.os_overrides[0].os, Os::Windows);
        assert_eq!(app.os_overrides[0].pin_version, "5.4.1");
        assert_eq!(app.min_app_versions[0].os, Os::Darwin);
    }

    #[test]
    fn test_rejects_bad_rollout_fraction() {
        let content = format!("{MINIMAL}\n[gate]\nrollout_fraction = 1.5\n");
        let err = ServerConfig::parse(&content).unwrap_err();
        assert!(err.to_string().contains("rollout_fraction"));
    }

    #[test]
    fn test_rejects_duplicate_apps() {
        let content = format!(
            "{MINIMAL}\n[[apps]]\nname = \"lantern\"\nowner = \"a\"\nrepo = \"b\"\n"
        );
        assert!(ServerConfig::parse(&content).is_err());
    }

    #[test]
    fn test_rejects_invalid_pin_version() {
        let content = format!(
            "{MINIMAL}\n[[apps.os_overrides]]\nos = \"darwin\"\nbelow_os_version = \"15.0.0\"\npin_version = \"five\"\n"
        );
        assert!(ServerConfig::parse(&content).is_err());
    }

    #[test]
    fn test_rejects_missing_apps() {
        let content = r#"
            apps = []
            [server]
            public_address = "https://update.example.com"
            [signing]
            private_key_path = "key.pem"
        "#;
        let err = ServerConfig::parse(content).unwrap_err();
        assert!(err.to_string().contains("[[apps]]"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoupdate.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.apps[0].repo, "lantern");
        assert!(ServerConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
