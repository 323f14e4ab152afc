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

//! Error types for the update server

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("release source error: {0}")]
    ReleaseSource(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("ingestion of {asset} failed: {reason}")]
    Ingestion { asset: String, reason: String },

    #[error("patch generation failed: {0}")]
    PatchGeneration(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
