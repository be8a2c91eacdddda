use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Subscription;
use crate::frame::Frame;
use crate::query::{QueryExecutor, QueryRequest};
use crate::stream::{Aggregator, Emission};

/// Subscription identifier used for variable lookup queries.
const VARIABLE_QUERY_ID: &str = "A";

/// Handle to one started request. Cancelling stops future timer firings and
/// suppresses publication of any fetch that resolves afterwards; it does not
/// abort an in-flight fetch.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
}

impl StreamHandle {
    /// Cancel this stream.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Whether the stream is still publishing.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }
}

/// Drives the per-request periodic fetch-aggregate-publish cycle.
///
/// Each request batch runs `Idle → Scheduled → (Executing → Scheduled)* →
/// Cancelled`: one repeating timer at the minimum interval across the batch's
/// streaming subscriptions, one underlying fetch per tick serving all of
/// them, results demultiplexed per subscription into that subscription's
/// aggregator and published on the emission channel.
pub struct StreamScheduler<E> {
    executor: Arc<E>,
    emission_tx: mpsc::UnboundedSender<Emission>,
    cancel: CancellationToken,
}

impl<E: QueryExecutor + 'static> StreamScheduler<E> {
    /// Create a scheduler and the emission channel its streams publish to.
    pub fn new(executor: Arc<E>) -> (Self, mpsc::UnboundedReceiver<Emission>) {
        let (emission_tx, emission_rx) = mpsc::unbounded_channel();

        (
            Self {
                executor,
                emission_tx,
                cancel: CancellationToken::new(),
            },
            emission_rx,
        )
    }

    /// Start serving a request batch.
    ///
    /// A batch with no streaming subscription executes once with no timer and
    /// emits `done` frames. Otherwise every subscription gets its aggregator
    /// (selected once, held for the subscription's lifetime) and the batch
    /// ticks until the returned handle is cancelled or the scheduler shuts
    /// down.
    pub fn start(&self, request: QueryRequest) -> Result<StreamHandle> {
        if request.subscriptions.is_empty() {
            bail!("request has no subscriptions");
        }

        for sub in &request.subscriptions {
            sub.validate()?;
        }

        let cancel = self.cancel.child_token();
        let active = Arc::new(AtomicBool::new(true));
        let handle = StreamHandle {
            cancel: cancel.clone(),
            active: Arc::clone(&active),
        };

        let executor = Arc::clone(&self.executor);
        let tx = self.emission_tx.clone();
        let request = Arc::new(request);

        if !request.is_streaming() {
            // Pass-through mode: a single one-shot execution, no timer.
            tokio::spawn(async move {
                let result = executor.execute(&request).await;

                if !active.load(Ordering::SeqCst) || cancel.is_cancelled() {
                    return;
                }

                match result {
                    Ok(results) => {
                        for sub in &request.subscriptions {
                            let Some(result) = results.get(&sub.id) else {
                                continue;
                            };
                            publish(
                                &tx,
                                Emission::done(&sub.id, Frame::from_columns(&result.fields)),
                            );
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "one-shot fetch failed");
                        for sub in &request.subscriptions {
                            publish(&tx, Emission::error(&sub.id, e.to_string()));
                        }
                    }
                }
            });

            return Ok(handle);
        }

        let mut aggregators = HashMap::with_capacity(request.subscriptions.len());
        for sub in &request.subscriptions {
            let aggregator = Aggregator::for_subscription(sub)?;
            info!(
                subscription = %sub.id,
                mode = aggregator.mode(),
                capacity = sub.capacity,
                "subscription streaming",
            );
            aggregators.insert(sub.id.clone(), Mutex::new(aggregator));
        }
        let aggregators = Arc::new(aggregators);

        let interval = batch_interval(&request.subscriptions);
        info!(interval = ?interval, subscriptions = request.subscriptions.len(), "stream started");

        tokio::spawn(async move {
            // First tick fires one full interval after start.
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("stream cancelled, stopping ticker");
                        return;
                    }
                    _ = ticker.tick() => {
                        // Each tick fetches independently: a slow fetch from
                        // tick N may still be in flight when tick N+1 fires,
                        // and emission order across overlapping ticks is not
                        // guaranteed.
                        tokio::spawn(run_tick(
                            Arc::clone(&executor),
                            Arc::clone(&request),
                            Arc::clone(&aggregators),
                            Arc::clone(&active),
                            cancel.clone(),
                            tx.clone(),
                        ));
                    }
                }
            }
        });

        Ok(handle)
    }

    /// Stop every stream started by this scheduler.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// One-shot variable lookup: runs a single query and flattens every
    /// field value into a list of label strings.
    pub async fn find_values(&self, query: &str) -> Result<Vec<String>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let request = QueryRequest::new(vec![Subscription::one_shot(VARIABLE_QUERY_ID, query)]);
        let mut results = self.executor.execute(&request).await?;

        let Some(result) = results.remove(VARIABLE_QUERY_ID) else {
            return Ok(Vec::new());
        };

        Ok(result
            .fields
            .iter()
            .flat_map(|f| f.values.iter().map(ToString::to_string))
            .collect())
    }
}

/// One fetch-aggregate-publish pass over the batch.
async fn run_tick<E: QueryExecutor>(
    executor: Arc<E>,
    request: Arc<QueryRequest>,
    aggregators: Arc<HashMap<String, Mutex<Aggregator>>>,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<Emission>,
) {
    let result = executor.execute(&request).await;

    // A fetch that resolves after cancellation must not be published.
    if !active.load(Ordering::SeqCst) || cancel.is_cancelled() {
        debug!("dropping fetch result after cancellation");
        return;
    }

    match result {
        Ok(results) => {
            for sub in &request.subscriptions {
                let Some(result) = results.get(&sub.id) else {
                    debug!(subscription = %sub.id, "no result this tick");
                    continue;
                };

                let Some(aggregator) = aggregators.get(&sub.id) else {
                    continue;
                };

                // Lock held only for the synchronous update, never across
                // an await.
                let frame = aggregator.lock().update(result);
                publish(&tx, Emission::streaming(&sub.id, frame));
            }
        }
        Err(e) => {
            // A single failed tick does not stop the stream.
            warn!(error = %e, "tick fetch failed");
            for sub in &request.subscriptions {
                publish(&tx, Emission::error(&sub.id, e.to_string()));
            }
        }
    }
}

fn publish(tx: &mpsc::UnboundedSender<Emission>, emission: Emission) {
    if tx.send(emission).is_err() {
        debug!("emission channel closed, dropping emission");
    }
}

/// The batch ticks at the minimum interval across its streaming
/// subscriptions: one underlying fetch serves all of them.
fn batch_interval(subscriptions: &[Subscription]) -> Duration {
    subscriptions
        .iter()
        .filter(|s| s.streaming)
        .map(|s| s.interval)
        .min()
        .unwrap_or_else(crate::config::default_interval)
}
