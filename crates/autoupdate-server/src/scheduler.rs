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

//! Periodic background work with cooperative shutdown

use crate::catalog::ReleaseCatalog;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

/// Sender side flips to `true` once the service is shutting down.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Run `job` every `period`, first one period from now, until `shutdown` fires.
///
/// A failing run is logged and the next one happens on schedule.
pub fn spawn_periodic<F, Fut, E>(
    name: String,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(task = %name, period_secs = period.as_secs(), "Periodic task started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(task = %name, "Periodic task stopped");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    debug!(task = %name, "Periodic task running");
                    if let Err(e) = job().await {
                        warn!(task = %name, error = %e, "Periodic run failed");
                    }
                }
            }
        }
    })
}

/// Keep `catalog` up to date; a failed refresh leaves the last good catalog serving.
pub fn spawn_catalog_refresh(
    catalog: Arc<ReleaseCatalog>,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let origin = catalog.origin();
    let name = format!("refresh {}/{}", origin.owner, origin.repo);
    spawn_periodic(name, period, shutdown, move || {
        let catalog = Arc::clone(&catalog);
        async move { catalog.refresh().await.map(|_| ()) }
    })
}
