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

//! HTTP surface: update checks, patch downloads and health

use crate::catalog::ReleaseCatalog;
use crate::decision::{Decision, DecisionEngine, Params};
use crate::gate::{Admission, RequestGate};
use crate::patch::PATCHES_MOUNT;
use crate::signing::Signer;
use autoupdate_shared::{ARCH_HEADER, NONCE_HEADER, OS_HEADER, SIGNATURE_HEADER, UpdateRequest};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// One served application
#[derive(Debug)]
pub struct AppEntry {
    pub catalog: Arc<ReleaseCatalog>,
    pub engine: DecisionEngine,
}

#[derive(Debug)]
struct Shared {
    apps: HashMap<String, AppEntry>,
    default_app: String,
    public_address: String,
    signer: Arc<Signer>,
    gate: RequestGate,
}

#[derive(Debug, Clone)]
pub struct AppState {
    shared: Arc<Shared>,
}

impl AppState {
    pub fn new(
        apps: HashMap<String, AppEntry>,
        default_app: impl Into<String>,
        public_address: impl Into<String>,
        signer: Arc<Signer>,
        gate: RequestGate,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                apps,
                default_app: default_app.into(),
                public_address: public_address.into(),
                signer,
                gate,
            }),
        }
    }
}

pub fn router(state: AppState, patches_dir: &std::path::Path) -> Router {
    Router::new()
        .route("/update", any(default_update_handler))
        .route("/update/{app}", any(app_update_handler))
        .route("/health", get(health_handler))
        .nest_service(PATCHES_MOUNT, ServeDir::new(patches_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn default_update_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let app = state.shared.default_app.clone();
    check_for_update(&state, &app, &method, &headers, &body).await
}

async fn app_update_handler(
    State(state): State<AppState>,
    Path(app): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    check_for_update(&state, &app, &method, &headers, &body).await
}

fn status_only(status: StatusCode) -> Response {
    if status == StatusCode::NO_CONTENT {
        return status.into_response();
    }
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Nonce echoed by the client; absent or invalid means 0 for older clients.
fn request_nonce(headers: &HeaderMap) -> i64 {
    header_str(headers, NONCE_HEADER)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

async fn check_for_update(
    state: &AppState,
    app: &str,
    method: &Method,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let Some(entry) = state.shared.apps.get(app) else {
        debug!(%app, "Update check for unknown app");
        return status_only(StatusCode::NOT_FOUND);
    };
    if method != Method::POST {
        warn!(%app, %method, "Invalid HTTP method");
        return status_only(StatusCode::NOT_FOUND);
    }

    let request: UpdateRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            warn!(%app, error = %e, "JSON decode error");
            return status_only(StatusCode::BAD_REQUEST);
        }
    };
    let params = Params::from_request(
        request,
        header_str(headers, OS_HEADER),
        header_str(headers, ARCH_HEADER),
    );

    let span = info_span!(
        "autoupdate_check",
        app,
        os = %params.os,
        arch = %params.arch,
        app_version = %params.app_version,
    );
    answer(state, entry, &params, request_nonce(headers))
        .instrument(span)
        .await
}

async fn answer(state: &AppState, entry: &AppEntry, params: &Params, nonce: i64) -> Response {
    let snapshot = entry.catalog.snapshot();
    let decision = match entry.engine.check_for_update(&snapshot, params).await {
        Ok(Decision::NoUpdate) => {
            debug!("No update available");
            return status_only(StatusCode::NO_CONTENT);
        }
        Ok(decision) => decision,
        Err(rejection) => {
            let status = rejection.status();
            if status == StatusCode::NO_CONTENT {
                info!(reason = %rejection, "Update skipped");
            } else {
                warn!(status = status.as_u16(), reason = %rejection, "CheckForUpdate failed");
            }
            return status_only(status);
        }
    };

    match state.shared.gate.admit() {
        Admission::Admit => {}
        suppressed @ (Admission::SuppressedByRollout | Admission::SuppressedByRateLimit) => {
            info!(admission = ?suppressed, "Update suppressed");
            return status_only(StatusCode::NO_CONTENT);
        }
    }

    let Some(mut response) = decision.to_response() else {
        return status_only(StatusCode::NO_CONTENT);
    };
    if !response.patch_url.is_empty() {
        response.patch_url = format!("{}{}", state.shared.public_address, response.patch_url);
    }

    let body = match serde_json::to_vec(&response) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "Failed to marshal response");
            return status_only(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let signature = state.shared.signer.sign_response(&body, nonce);

    info!(
        version = %response.version,
        patch_type = ?response.patch_type,
        "Resolved update"
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), "application/json".to_owned()),
            (SIGNATURE_HEADER, signature),
        ],
        body,
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub apps: Vec<AppHealth>,
}

#[derive(Debug, Serialize)]
pub struct AppHealth {
    pub name: String,
    pub owner: String,
    pub repo: String,
    pub assets: usize,
    pub platforms: usize,
    pub refreshed_at: Option<DateTime<Utc>>,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut apps: Vec<AppHealth> = state
        .shared
        .apps
        .iter()
        .map(|(name, entry)| {
            let snapshot = entry.catalog.snapshot();
            let origin = entry.catalog.origin();
            AppHealth {
                name: name.clone(),
                owner: origin.owner.clone(),
                repo: origin.repo.clone(),
                assets: snapshot.asset_count(),
                platforms: snapshot.platforms().count(),
                refreshed_at: snapshot.refreshed_at(),
            }
        })
        .collect();
    apps.sort_by(|a, b| a.name.cmp(&b.name));

    Json(HealthResponse { status: "ok", apps })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_nonce() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_nonce(&headers), 0);

        headers.insert(NONCE_HEADER, "12345".parse().unwrap());
        assert_eq!(request_nonce(&headers), 12345);

        headers.insert(NONCE_HEADER, "-7".parse().unwrap());
        assert_eq!(request_nonce(&headers), -7);

        headers.insert(NONCE_HEADER, "abc".parse().unwrap());
        assert_eq!(request_nonce(&headers), 0);
    }

    #[test]
    fn test_status_only_bodies() {
        assert_eq!(status_only(StatusCode::NO_CONTENT).status(), StatusCode::NO_CONTENT);
        assert_eq!(
            status_only(StatusCode::EXPECTATION_FAILED).status(),
            StatusCode::EXPECTATION_FAILED
        );
    }
}
