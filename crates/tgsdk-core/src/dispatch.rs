use std::{future::Future, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    errors::Error,
    transport::Transport,
    update::Update,
    Result,
};

/// The long-polling update-distribution engine.
///
/// Owns the polling loop, the offset bookkeeping, and the handler invocation
/// policy. With one worker the loop is sequential; with more, a single
/// feeder task pushes updates onto an unbounded channel drained by
/// `worker_count` workers. Either way every message-bearing update is handed
/// to the handler exactly once and acknowledged exactly once.
pub struct Dispatcher {
    cfg: Config,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(cfg: Config, transport: Arc<dyn Transport>) -> Self {
        Self { cfg, transport }
    }

    /// Run the engine until a fatal transport error.
    ///
    /// Removes any registered webhook first (polling and webhook delivery
    /// are mutually exclusive at the service). Handler failures are
    /// contained and logged per update; a failed poll is fatal and is
    /// returned to the caller. Does not return in normal operation.
    pub async fn run<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(Update) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.transport.remove_webhook().await?;
        info!(
            workers = self.cfg.worker_count,
            interval_ms = self.cfg.poll_interval.as_millis() as u64,
            "polling started"
        );

        let handler = Arc::new(handler);
        if self.cfg.worker_count <= 1 {
            self.run_single(handler).await
        } else {
            self.run_pool(handler).await
        }
    }

    async fn run_single<F, Fut>(&self, handler: Arc<F>) -> Result<()>
    where
        F: Fn(Update) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut offset = None;
        loop {
            let batch = self
                .transport
                .fetch(offset, self.cfg.poll_limit, self.cfg.poll_timeout)
                .await?;
            for raw in batch {
                let Some(update) =
                    consume(self.transport.as_ref(), &mut offset, raw).await?
                else {
                    continue;
                };
                let id = update.update_id;
                debug!(update_id = id, "dispatching inline");
                if let Err(e) = run_handler(handler.clone(), update).await {
                    error!(update_id = id, error = %e, "handler failed");
                }
            }
            pause(self.cfg.poll_interval).await;
        }
    }

    async fn run_pool<F, Fut>(&self, handler: Arc<F>) -> Result<()>
    where
        F: Fn(Update) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.cfg.worker_count);
        for n in 1..=self.cfg.worker_count {
            workers.push(tokio::spawn(worker_loop(n, handler.clone(), rx.clone())));
        }

        let feeder = tokio::spawn(feeder_loop(
            self.transport.clone(),
            self.cfg.clone(),
            tx,
        ));

        // The feeder only ever returns with an error; when it does, its
        // sender drops and the workers drain what is already queued before
        // exiting.
        let result = match feeder.await {
            Ok(res) => res,
            Err(e) => Err(Error::Transport(format!("feeder panicked: {e}"))),
        };
        if let Err(e) = &result {
            error!(error = %e, "feeder terminated; workers will drain and stop");
        }
        for worker in workers {
            let _ = worker.await;
        }
        result
    }
}

async fn feeder_loop(
    transport: Arc<dyn Transport>,
    cfg: Config,
    tx: UnboundedSender<Update>,
) -> Result<()> {
    debug!("feeder started");
    let mut offset = None;
    loop {
        let batch = transport
            .fetch(offset, cfg.poll_limit, cfg.poll_timeout)
            .await?;
        for raw in batch {
            if let Some(update) = consume(transport.as_ref(), &mut offset, raw).await? {
                debug!(update_id = update.update_id, "feeder: enqueue");
                // Unbounded channel: the feeder never blocks on a full queue.
                if tx.send(update).is_err() {
                    return Err(Error::Transport("all workers terminated".to_string()));
                }
            }
        }
        pause(cfg.poll_interval).await;
    }
}

async fn worker_loop<F, Fut>(n: usize, handler: Arc<F>, rx: Arc<Mutex<UnboundedReceiver<Update>>>)
where
    F: Fn(Update) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    debug!(worker = n, "worker started");
    loop {
        let update = { rx.lock().await.recv().await };
        let Some(update) = update else {
            break;
        };
        let id = update.update_id;
        debug!(worker = n, update_id = id, "worker: dequeue");
        if let Err(e) = run_handler(handler.clone(), update).await {
            error!(worker = n, update_id = id, error = %e, "handler failed");
        }
    }
    debug!(worker = n, "queue closed, worker exiting");
}

/// Consume one raw record: normalize it, acknowledge it, and decide whether
/// it is dispatched.
///
/// Acknowledgment happens here, at hand-off time, in both the single-worker
/// and pooled paths: the service will not redeliver once it has seen a
/// higher offset. A crash between acknowledgment and handler completion
/// loses the update; that is the accepted at-most-once trade-off.
async fn consume(
    transport: &dyn Transport,
    offset: &mut Option<i64>,
    raw: Value,
) -> Result<Option<Update>> {
    let id_hint = raw.get("update_id").and_then(Value::as_i64);
    let update = match Update::normalize(raw) {
        Ok(u) => u,
        Err(Error::MalformedUpdate(reason)) => {
            // One bad record must not halt the stream; advance past it when
            // it at least carries an id, otherwise it would be refetched.
            warn!(update_id = ?id_hint, %reason, "skipping malformed update");
            if let Some(id) = id_hint {
                advance(transport, offset, id).await?;
            }
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    advance(transport, offset, update.update_id).await?;
    Ok(if update.message.is_some() {
        Some(update)
    } else {
        None
    })
}

async fn advance(transport: &dyn Transport, offset: &mut Option<i64>, update_id: i64) -> Result<()> {
    transport.advance(update_id + 1).await?;
    *offset = Some(update_id + 1);
    Ok(())
}

/// The handler future runs in its own task, so a panic lands here as a
/// JoinError instead of taking the worker down.
async fn run_handler<F, Fut>(handler: Arc<F>, update: Update) -> anyhow::Result<()>
where
    F: Fn(Update) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    match tokio::spawn((handler)(update)).await {
        Ok(res) => res,
        Err(e) => Err(anyhow::anyhow!("handler panicked: {e}")),
    }
}

async fn pause(interval: Duration) {
    if !interval.is_zero() {
        tokio::time::sleep(interval).await;
    }
}
