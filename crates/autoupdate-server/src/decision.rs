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

//! Update decision engine
//!
//! Turns one client request into an outcome against a single catalog
//! snapshot. The engine holds no randomness and no clock: the same snapshot
//! and the same parameters always produce the same decision. Rollout and rate
//! limiting live in [`crate::gate`].

use crate::catalog::{Asset, CatalogSnapshot, LookupError};
use crate::config::AppSettings;
use crate::patch::{Patch, PatchGenerator};
use autoupdate_shared::{
    Arch, Initiative, Os, PatchType, UpdateRequest, UpdateResponse, Version, VersionError,
    VersionOrdering, compare,
};
use axum::http::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Request parameters once the HTTP layer has resolved `os` and `arch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pub os: String,
    pub arch: String,
    pub app_version: String,
    pub os_version: String,
    pub checksum: String,
    pub tags: HashMap<String, String>,
}

impl Params {
    pub fn from_request(request: UpdateRequest, os: Option<&str>, arch: Option<&str>) -> Self {
        Self {
            os: os.unwrap_or_default().to_owned(),
            arch: arch.unwrap_or_default().to_owned(),
            app_version: request.app_version,
            os_version: request.os_version,
            checksum: request.checksum,
            tags: request.tags.unwrap_or_default(),
        }
    }
}

/// Parameters after validation and normalization
#[derive(Debug, Clone, PartialEq, Eq)]
struct Normalized {
    os: Os,
    arch: Arch,
    app_version: Version,
    os_version: Option<Version>,
    checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoUpdate,
    FullUpdate { target: Arc<Asset> },
    DeltaUpdate { target: Arc<Asset>, patch: Patch },
}

impl Decision {
    /// The response body for a positive decision, patch path left relative.
    pub fn to_response(&self) -> Option<UpdateResponse> {
        let (target, patch_url, patch_type) = match self {
            Self::NoUpdate => return None,
            Self::FullUpdate { target } => (target, String::new(), PatchType::None),
            Self::DeltaUpdate { target, patch } => (target, patch.file.clone(), PatchType::Bsdiff),
        };

        Some(UpdateResponse {
            initiative: Initiative::Auto,
            url: target.source_url.clone(),
            patch_url,
            patch_type,
            version: target.version.to_string(),
            checksum: target.checksum.clone(),
            signature: target.signature.clone(),
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unsupported platform {os}/{arch}")]
    UnknownPlatform { os: String, arch: String },

    #[error("no compatible version {version} for {os}/{arch}: {source}")]
    NoCompatibleVersion {
        os: Os,
        arch: Arch,
        version: Version,
        source: LookupError,
    },

    #[error("could not look up updates for {os}/{arch}: {source}")]
    NoSuchPlatform {
        os: Os,
        arch: Arch,
        source: LookupError,
    },

    #[error("app version {app_version} on {os} is older than {min_version} and cannot be updated")]
    BelowMinimumVersion {
        os: Os,
        app_version: Version,
        min_version: Version,
    },

    #[error("unable to generate patch: {0}")]
    PatchGeneration(String),
}

impl Rejection {
    /// HTTP status the rejection is answered with
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::BelowMinimumVersion { .. } => StatusCode::NO_CONTENT,
            Self::UnknownPlatform { .. }
            | Self::NoCompatibleVersion { .. }
            | Self::NoSuchPlatform { .. }
            | Self::PatchGeneration(_) => StatusCode::EXPECTATION_FAILED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OsOverride {
    os: Os,
    below_os_version: Version,
    pin_version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MinAppVersion {
    os: Os,
    min_version: Version,
}

/// Per-app policy: legacy OS pins and minimum updatable app versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePolicy {
    os_overrides: Vec<OsOverride>,
    min_app_versions: Vec<MinAppVersion>,
}

impl UpdatePolicy {
    pub fn from_settings(app: &AppSettings) -> Result<Self, VersionError> {
        let os_overrides = app
            .os_overrides
            .iter()
            .map(|rule| {
                Ok(OsOverride {
                    os: rule.os,
                    below_os_version: Version::parse(&rule.below_os_version)?,
                    pin_version: Version::parse(&rule.pin_version)?,
                })
            })
            .collect::<Result<_, VersionError>>()?;
        let min_app_versions = app
            .min_app_versions
            .iter()
            .map(|floor| {
                Ok(MinAppVersion {
                    os: floor.os,
                    min_version: Version::parse(&floor.min_version)?,
                })
            })
            .collect::<Result<_, VersionError>>()?;

        Ok(Self {
            os_overrides,
            min_app_versions,
        })
    }

    #[must_use]
    pub fn with_os_override(mut self, os: Os, below_os_version: Version, pin_version: Version) -> Self {
        self.os_overrides.push(OsOverride {
            os,
            below_os_version,
            pin_version,
        });
        self
    }

    #[must_use]
    pub fn with_min_app_version(mut self, os: Os, min_version: Version) -> Self {
        self.min_app_versions.push(MinAppVersion { os, min_version });
        self
    }

    /// Release a host on an old OS is pinned to. Unparseable OS versions are never pinned.
    fn pinned_version(&self, os: Os, os_version: Option<&Version>) -> Option<&Version> {
        let os_version = os_version?;
        self.os_overrides
            .iter()
            .find(|rule| rule.os == os && *os_version < rule.below_os_version)
            .map(|rule| &rule.pin_version)
    }

    fn floor_for(&self, os: Os, app_version: &Version) -> Option<&Version> {
        self.min_app_versions
            .iter()
            .find(|floor| floor.os == os && *app_version < floor.min_version)
            .map(|floor| &floor.min_version)
    }
}

/// Decision engine for one application
pub struct DecisionEngine {
    policy: UpdatePolicy,
    patches: Arc<dyn PatchGenerator>,
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DecisionEngine {
    pub fn new(policy: UpdatePolicy, patches: Arc<dyn PatchGenerator>) -> Self {
        Self { policy, patches }
    }

    pub async fn check_for_update(
        &self,
        snapshot: &CatalogSnapshot,
        params: &Params,
    ) -> Result<Decision, Rejection> {
        let request = normalize(params)?;
        let (os, arch) = (request.os, request.arch);

        let target = match self.policy.pinned_version(os, request.os_version.as_ref()) {
            Some(pin) => {
                debug!(%os, %arch, version = %pin, "Pinning legacy OS to last compatible release");
                snapshot
                    .lookup_by_version(os, arch, pin)
                    .map_err(|source| Rejection::NoCompatibleVersion {
                        os,
                        arch,
                        version: pin.clone(),
                        source,
                    })?
            }
            None => snapshot
                .latest_for(os, arch)
                .map_err(|source| Rejection::NoSuchPlatform { os, arch, source })?,
        };

        if compare(request.app_version.as_str(), target.version.as_str()) != VersionOrdering::Higher {
            return Ok(Decision::NoUpdate);
        }

        if let Some(min_version) = self.policy.floor_for(os, &request.app_version) {
            return Err(Rejection::BelowMinimumVersion {
                os,
                app_version: request.app_version,
                min_version: min_version.clone(),
            });
        }

        match snapshot.lookup_by_checksum(os, arch, &request.checksum) {
            Ok(current) => {
                let patch = self
                    .patches
                    .generate(&current.source_url, &target.source_url)
                    .await
                    .map_err(|e| Rejection::PatchGeneration(e.to_string()))?;
                Ok(Decision::DeltaUpdate { target, patch })
            }
            Err(reason) => {
                debug!(%os, %arch, %reason, "No patch base, offering the full binary");
                Ok(Decision::FullUpdate { target })
            }
        }
    }
}

fn normalize(params: &Params) -> Result<Normalized, Rejection> {
    let tag = |key: &str| params.tags.get(key).filter(|value| !value.is_empty());
    let os = tag("os").unwrap_or(&params.os).as_str();
    let mut arch = tag("arch").unwrap_or(&params.arch).as_str();

    if os.is_empty() {
        return Err(Rejection::Validation("OS is required".to_owned()));
    }
    if os != Os::Android.as_str() && params.checksum.is_empty() {
        return Err(Rejection::Validation("checksum must not be empty".to_owned()));
    }
    if arch.is_empty() {
        return Err(Rejection::Validation("arch is required".to_owned()));
    }

    // One APK serves both ARM flavours
    if os == Os::Android.as_str() && arch == "arm64" {
        arch = Arch::Arm.as_str();
    }

    let app_version = Version::parse(&params.app_version).map_err(|e| {
        Rejection::Validation(format!("bad app version string {:?}: {e}", params.app_version))
    })?;

    let unknown = || Rejection::UnknownPlatform {
        os: os.to_owned(),
        arch: arch.to_owned(),
    };
    let os: Os = os.parse().map_err(|_| unknown())?;
    let arch: Arch = arch.parse().map_err(|_| unknown())?;

    Ok(Normalized {
        os,
        arch,
        app_version,
        os_version: Version::parse(&params.os_version).ok(),
        checksum: params.checksum.clone(),
    })
}
