//! Best-effort visit counting.
//!
//! Redirects push the resolved [`Alias`] onto a bounded queue and respond
//! immediately; [`run_visit_worker`] drains the queue in the background.
//! A visit may therefore become visible after the client has already
//! followed the redirect, and visits are dropped when the queue is full.
//! On shutdown, [`wait_for_visit_worker`] gives queued visits a bounded
//! amount of time to be applied.

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle, time};
use tracing::{error, info, instrument, warn};

use crate::{alias::Alias, url_repo::UrlRepository};

pub type VisitSender = mpsc::Sender<Alias>;
pub type VisitReceiver = mpsc::Receiver<Alias>;

/// Consumes visits until every [`VisitSender`] has been dropped.
#[instrument(skip_all)]
pub async fn run_visit_worker(mut visits: VisitReceiver, url_repo: Arc<dyn UrlRepository>) {
    info!("Visit worker started");
    while let Some(alias) = visits.recv().await {
        if let Err(err) = url_repo.increment_visits(&alias).await {
            warn!(%alias, ?err, "Failed to record visit");
        }
    }
    info!("Visit queue closed; visit worker stopped");
}

/// Waits for a spawned [`run_visit_worker`] to drain its queue.
/// Every [`VisitSender`] must be dropped first, or the worker never stops.
///
/// Returns `false` if the worker panicked or was still running after `grace`.
pub async fn wait_for_visit_worker(worker: JoinHandle<()>, grace: Duration) -> bool {
    match time::timeout(grace, worker).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!(?err, "Visit worker terminated abnormally");
            false
        }
        Err(_) => {
            warn!(?grace, "Visit worker did not drain in time; remaining visits are lost");
            false
        }
    }
}
