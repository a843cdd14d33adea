//! Paced delivery of queued items.
//!
//! The post loop is the only reader of the relay queue.  It sends one
//! permalink per item and then waits out the inter-send delay, which is the
//! relay's only rate limit towards the destination.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::policy::ErrorPolicy;
use super::{Fault, Stage};
use crate::destination::MessageSink;
use crate::source::FeedItem;

pub(crate) struct PostLoop {
    sink: Arc<dyn MessageSink>,
    delay: Duration,
    policy: ErrorPolicy,
    queue: mpsc::Receiver<FeedItem>,
    faults: mpsc::UnboundedSender<Fault>,
}

impl PostLoop {
    pub(crate) fn new(
        sink: Arc<dyn MessageSink>,
        delay: Duration,
        policy: ErrorPolicy,
        queue: mpsc::Receiver<FeedItem>,
        faults: mpsc::UnboundedSender<Fault>,
    ) -> Self {
        Self {
            sink,
            delay,
            policy,
            queue,
            faults,
        }
    }

    /// Deliver items until the queue is closed and empty, or a failure halts
    /// the loop.  Returns how many items were delivered.
    pub(crate) async fn run(mut self) -> u64 {
        info!(destination = self.sink.name(), delay = ?self.delay, "post loop started");
        let mut sent = 0;

        while let Some(item) = self.queue.recv().await {
            let text = item.permalink();
            let sink = &self.sink;

            match self.policy.run(self.delay, || sink.send(&text)).await {
                Ok(()) => {
                    sent += 1;
                    info!(id = item.id, author = %item.author, "relayed item");
                }
                Err(err) => {
                    let halted = self.policy.halts();
                    error!(id = item.id, error = %err, halted, "send failed");
                    let fault = Fault {
                        stage: Stage::Post,
                        error: err.into(),
                        halted,
                    };
                    if self.faults.send(fault).is_err() {
                        debug!("no fault listener, fault dropped");
                    }
                    if halted {
                        break;
                    }
                }
            }

            tokio::time::sleep(self.delay).await;
        }

        info!(sent, "post loop stopped");
        sent
    }
}
