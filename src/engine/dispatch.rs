//! Match handler dispatch
//!
//! Formed groups are pushed onto an unbounded channel and picked up by a
//! dispatch worker, which runs each handler invocation on its own task. A slow
//! or failing handler therefore never holds up matching or other groups.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::types::MatchGroup;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Receives every group the engine forms
#[async_trait]
pub trait MatchHandler: Send + Sync {
    /// Called once per group, players in ascending arrival order
    async fn on_match(&self, group: MatchGroup) -> Result<()>;
}

/// Adapter turning an async closure into a [`MatchHandler`]
pub struct FnMatchHandler<F> {
    f: F,
}

impl<F> FnMatchHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> MatchHandler for FnMatchHandler<F>
where
    F: Fn(MatchGroup) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn on_match(&self, group: MatchGroup) -> Result<()> {
        (self.f)(group).await
    }
}

/// Sending side of the dispatch channel
#[derive(Clone)]
pub struct MatchDispatcher {
    sender: mpsc::UnboundedSender<MatchGroup>,
}

/// Handle on the running dispatch worker
pub struct DispatchWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MatchDispatcher {
    /// Spawn the dispatch worker and return the dispatcher feeding it
    pub fn start(
        handler: Arc<dyn MatchHandler>,
        metrics: Arc<MetricsCollector>,
    ) -> (Self, DispatchWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_worker(receiver, shutdown_rx, handler, metrics));

        (Self { sender }, DispatchWorker { shutdown, handle })
    }

    /// Queue a group for delivery. Never waits on the handler.
    pub fn dispatch(&self, group: MatchGroup) -> Result<()> {
        self.sender.send(group).map_err(|e| {
            MatchmakingError::DispatchFailed {
                group_id: e.0.group_id.to_string(),
                reason: "dispatch worker has stopped".to_string(),
            }
            .into()
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl DispatchWorker {
    /// Stop accepting groups, deliver what is already queued, and wait for
    /// in-flight handlers up to `grace`
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown.send(true);

        match tokio::time::timeout(grace, self.handle).await {
            Ok(Ok(())) => info!("Match dispatcher drained"),
            Ok(Err(e)) => error!("Match dispatcher task failed: {}", e),
            Err(_) => warn!(
                "Match dispatcher did not drain within {:?}, abandoning remaining handlers",
                grace
            ),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run_worker(
    receiver: mpsc::UnboundedReceiver<MatchGroup>,
    mut shutdown: watch::Receiver<bool>,
    handler: Arc<dyn MatchHandler>,
    metrics: Arc<MetricsCollector>,
) {
    let mut groups = UnboundedReceiverStream::new(receiver);
    let mut in_flight = JoinSet::new();
    let mut closing = false;

    info!("Match dispatcher started");

    loop {
        tokio::select! {
            _ = shutdown.changed(), if !closing => {
                closing = true;
                groups.close();
                debug!("Match dispatcher closing, draining queued groups");
            }
            next = groups.next() => match next {
                Some(group) => {
                    in_flight.spawn(deliver(handler.clone(), metrics.clone(), group));
                }
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!("Match handler task panicked: {}", e);
                }
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!("Match handler task panicked: {}", e);
        }
    }

    info!("Match dispatcher stopped");
}

async fn deliver(handler: Arc<dyn MatchHandler>, metrics: Arc<MetricsCollector>, group: MatchGroup) {
    let group_id = group.group_id;
    let players = group.len();
    let timer = metrics.start_timer();

    match handler.on_match(group).await {
        Ok(()) => {
            let duration = timer.stop();
            metrics.record_dispatch(true, duration);
            debug!(
                "Delivered group {} ({} players) in {:.2}ms",
                group_id,
                players,
                duration.as_secs_f64() * 1000.0
            );
        }
        Err(e) => {
            metrics.record_dispatch(false, timer.stop());
            let failure = MatchmakingError::DispatchFailed {
                group_id: group_id.to_string(),
                reason: e.to_string(),
            };
            error!("{}", failure);
        }
    }
}
