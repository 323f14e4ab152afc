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

//! Autoupdate server - distributes signed self-updates built from GitHub releases
//!
//! Each served application is backed by a [`catalog::ReleaseCatalog`] kept
//! fresh in the background. Clients POST their current version and checksum
//! and receive either 204 (nothing to do) or a signed description of the full
//! binary or binary patch to apply.

pub mod asset_cache;
pub mod catalog;
pub mod config;
pub mod decision;
pub mod error;
pub mod gate;
pub mod http;
pub mod patch;
pub mod release_source;
pub mod scheduler;
pub mod signing;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{Asset, CatalogSnapshot, LookupError, ReleaseCatalog};
pub use config::ServerConfig;
pub use decision::{Decision, DecisionEngine, Params, Rejection, UpdatePolicy};
pub use error::{Result, ServerError};
pub use gate::RequestGate;
pub use signing::Signer;
