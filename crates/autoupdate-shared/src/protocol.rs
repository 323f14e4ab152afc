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

//! JSON bodies and headers exchanged on the update endpoint

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decimal nonce chosen by the client; absent or unparsable means zero.
pub const NONCE_HEADER: &str = "X-Message-Nonce";
/// Hex signature over `sha256(body || nonce)`.
pub const SIGNATURE_HEADER: &str = "X-Message-Signature";
/// Operating system of the requesting client (current clients).
pub const OS_HEADER: &str = "X-Update-OS";
/// Architecture of the requesting client (current clients).
pub const ARCH_HEADER: &str = "X-Update-Arch";

/// Body posted by a client asking whether a newer build exists.
///
/// `os` and `arch` are not part of the body; legacy clients send them in
/// `tags`, current clients send them as headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Protocol version
    #[serde(default)]
    pub version: i64,
    /// Version of the application updating itself
    #[serde(default)]
    pub app_version: String,
    /// Semantic version of the host OS (optional)
    #[serde(default)]
    pub os_version: String,
    /// Hex checksum of the running binary, used to offer patches
    #[serde(default)]
    pub checksum: String,
    /// Legacy overrides for `os` / `arch`
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

/// Whether the client should apply the update on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Initiative {
    Never,
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchType {
    Bsdiff,
    None,
}

/// Body returned with `200 OK` when an update is available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub initiative: Initiative,
    /// Full binary download
    pub url: String,
    /// Delta download, empty unless `patch_type` is bsdiff
    #[serde(default)]
    pub patch_url: String,
    pub patch_type: PatchType,
    pub version: String,
    /// Expected sha256 of the new binary, hex
    pub checksum: String,
    /// Signature over the checksum, hex
    pub signature: String,
}
