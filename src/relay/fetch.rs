//! Background feed polling.
//!
//! Runs as a spawned task that searches the source once per tick, sorts the
//! batch chronologically, advances the watermark and pushes the batch onto
//! the relay queue.  The watermark lives here and nowhere else.
//!
//! ## For contributors
//!
//! The loop is deliberately sequential: one search, one enqueue, one sleep.
//! A full queue blocks the enqueue, which is how the post loop's pace pushes
//! back on polling.  Stop requests are only observed between ticks, so a
//! search or enqueue in flight always runs to completion.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::policy::{DedupPolicy, ErrorPolicy};
use super::{Fault, Stage};
use crate::error::SourceError;
use crate::source::{sort_chronological, FeedItem, FeedSource, Watermark};

pub(crate) struct FetchLoop {
    source: Arc<dyn FeedSource>,
    query: String,
    watermark: Watermark,
    /// Highest id ever handed to the queue.  Can run ahead of `watermark`
    /// when a larger id sorts earlier in a batch than the last item.
    enqueued_max: Watermark,
    dedup: DedupPolicy,
    policy: ErrorPolicy,
    queue: mpsc::Sender<FeedItem>,
    faults: mpsc::UnboundedSender<Fault>,
}

impl FetchLoop {
    pub(crate) fn new(
        source: Arc<dyn FeedSource>,
        query: String,
        dedup: DedupPolicy,
        policy: ErrorPolicy,
        queue: mpsc::Sender<FeedItem>,
        faults: mpsc::UnboundedSender<Fault>,
    ) -> Self {
        Self {
            source,
            query,
            watermark: Watermark::NONE,
            enqueued_max: Watermark::NONE,
            dedup,
            policy,
            queue,
            faults,
        }
    }

    #[cfg(test)]
    pub(crate) fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Search once and return the batch to enqueue, in enqueue order.
    ///
    /// On error the watermark is left untouched.
    pub(crate) async fn fetch_batch(&mut self) -> Result<Vec<FeedItem>, SourceError> {
        let since = self.watermark;
        let source = &self.source;
        let query = self.query.as_str();

        let page = self
            .policy
            .run(Duration::ZERO, || source.search(query, since))
            .await?;

        if let Some(limit) = page.rate_limit {
            debug!(
                remaining = limit.remaining,
                reset_at = ?limit.reset_at,
                "search rate limit"
            );
        }

        let mut items = page.items;
        if items.is_empty() {
            return Ok(items);
        }

        sort_chronological(&mut items);
        if let Some(last) = items.last() {
            self.watermark = self.watermark.advance(last.id);
        }

        if self.dedup == DedupPolicy::FilterSeen {
            let seen = self.enqueued_max;
            let before = items.len();
            items.retain(|item| seen.is_behind(item.id));
            if items.len() < before {
                debug!(
                    dropped = before - items.len(),
                    %seen,
                    "dropped items that were already enqueued"
                );
            }
        }

        if let Some(max) = items.iter().map(|item| item.id).max() {
            self.enqueued_max = self.enqueued_max.advance(max);
        }
        Ok(items)
    }

    async fn tick(&mut self) -> ControlFlow<()> {
        let batch = match self.fetch_batch().await {
            Ok(batch) => batch,
            Err(err) => {
                let halted = self.policy.halts();
                error!(
                    source = self.source.name(),
                    error = %err,
                    halted,
                    "fetch failed"
                );
                let fault = Fault {
                    stage: Stage::Fetch,
                    error: err.into(),
                    halted,
                };
                if self.faults.send(fault).is_err() {
                    debug!("no fault listener, fault dropped");
                }
                return if halted {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                };
            }
        };

        info!(
            fetched = batch.len(),
            watermark = %self.watermark,
            "fetched new items"
        );

        for item in batch {
            debug!(%item, text = %item.text, "enqueue");
            if self.queue.send(item).await.is_err() {
                warn!("relay queue has no reader, stopping fetch loop");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Poll until `stop` flips to `true` (or its sender goes away).
    ///
    /// Dropping `self` on return closes the relay queue for writes.
    pub(crate) async fn run(mut self, interval: Duration, mut stop: watch::Receiver<bool>) {
        info!(query = %self.query, ?interval, "fetch loop started");

        loop {
            if *stop.borrow_and_update() {
                break;
            }
            if self.tick().await.is_break() {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(watermark = %self.watermark, "fetch loop stopped");
    }
}
