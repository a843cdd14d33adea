//! The relay coordinator.
//!
//! A [`Relay`] owns two background tasks joined by a bounded queue:
//!
//! ```text
//! ┌────────────┐  FeedItem  ┌────────────┐  permalink  ┌─────────────┐
//! │ FetchLoop  │ ─────────► │  PostLoop  │ ──────────► │ MessageSink │
//! │ (watermark)│  (bounded) │  (paced)   │             └─────────────┘
//! └────────────┘            └────────────┘
//!       │ search(query, since)
//!       ▼
//! ┌────────────┐
//! │ FeedSource │
//! └────────────┘
//! ```
//!
//! Lifecycle: `Idle --start()--> Running --stop()--> StopRequested -->
//! Stopped`, after which [`Relay::drain`] waits for the post loop to deliver
//! whatever is still queued.  Failures from either loop are reported as
//! [`Fault`]s; see [`ErrorPolicy`] for what the loops do after one.

mod fetch;
mod policy;
mod post;

#[cfg(test)]
pub(crate) mod testing;

pub use policy::{DedupPolicy, ErrorPolicy};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::destination::MessageSink;
use crate::error::RelayError;
use crate::source::FeedSource;

use fetch::FetchLoop;
use post::PostLoop;

/// Where the relay is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::StopRequested => "stopping",
            Self::Stopped => "stopped",
        })
    }
}

/// Which loop a fault came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Post,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Post => "post",
        })
    }
}

/// A failure reported by one of the loops.
#[derive(Debug)]
pub struct Fault {
    pub stage: Stage,
    pub error: RelayError,
    /// The reporting loop has exited because of this fault.
    pub halted: bool,
}

/// Tunables that do not affect construction validity beyond `queue_capacity`.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Relay queue size; roughly one fetch batch.
    pub queue_capacity: usize,
    /// Pause after every send attempt.
    pub post_delay: Duration,
    pub error_policy: ErrorPolicy,
    pub dedup: DedupPolicy,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            post_delay: Duration::from_secs(5),
            error_policy: ErrorPolicy::default(),
            dedup: DedupPolicy::default(),
        }
    }
}

/// Collects the relay's collaborators; see [`Relay::builder`].
#[derive(Default)]
pub struct RelayBuilder {
    source: Option<Arc<dyn FeedSource>>,
    sink: Option<Arc<dyn MessageSink>>,
    tags: Vec<String>,
    options: RelayOptions,
}

impl RelayBuilder {
    #[must_use]
    pub fn source(mut self, source: Arc<dyn FeedSource>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn destination(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Filter tags, OR-combined into a single search query.
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn options(mut self, options: RelayOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate and build.  Nothing is spawned until [`Relay::start`].
    pub fn build(self) -> Result<Relay, RelayError> {
        let tags: Vec<String> = self
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if tags.is_empty() {
            return Err(RelayError::EmptyTags);
        }
        let source = self.source.ok_or(RelayError::MissingSource)?;
        let sink = self.sink.ok_or(RelayError::MissingDestination)?;
        if self.options.queue_capacity == 0 {
            return Err(RelayError::ZeroCapacity);
        }

        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        Ok(Relay {
            source,
            sink,
            query: tags.join(" OR "),
            options: self.options,
            state: LifecycleState::Idle,
            stop_tx: None,
            fetch: None,
            post: None,
            faults_tx,
            faults_rx: Some(faults_rx),
        })
    }
}

/// Polls a feed source and relays new items to a message sink.
pub struct Relay {
    source: Arc<dyn FeedSource>,
    sink: Arc<dyn MessageSink>,
    query: String,
    options: RelayOptions,
    state: LifecycleState,
    stop_tx: Option<watch::Sender<bool>>,
    fetch: Option<JoinHandle<()>>,
    post: Option<JoinHandle<u64>>,
    faults_tx: mpsc::UnboundedSender<Fault>,
    faults_rx: Option<mpsc::UnboundedReceiver<Fault>>,
}

impl Relay {
    pub fn builder() -> RelayBuilder {
        RelayBuilder::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The search query sent upstream each tick.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Take the fault stream.  Returns `None` after the first call.
    pub fn faults(&mut self) -> Option<mpsc::UnboundedReceiver<Fault>> {
        self.faults_rx.take()
    }

    /// Spawn the fetch loop (ticking every `poll_interval`) and the post loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, poll_interval: Duration) -> Result<(), RelayError> {
        if self.state != LifecycleState::Idle {
            return Err(RelayError::InvalidState {
                op: "start",
                state: self.state,
            });
        }

        let (queue_tx, queue_rx) = mpsc::channel(self.options.queue_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);

        let fetch = FetchLoop::new(
            Arc::clone(&self.source),
            self.query.clone(),
            self.options.dedup,
            self.options.error_policy,
            queue_tx,
            self.faults_tx.clone(),
        );
        let post = PostLoop::new(
            Arc::clone(&self.sink),
            self.options.post_delay,
            self.options.error_policy,
            queue_rx,
            self.faults_tx.clone(),
        );

        self.fetch = Some(tokio::spawn(fetch.run(poll_interval, stop_rx)));
        self.post = Some(tokio::spawn(post.run()));
        self.stop_tx = Some(stop_tx);
        self.state = LifecycleState::Running;

        info!(
            query = %self.query,
            source = self.source.name(),
            destination = self.sink.name(),
            "relay started"
        );
        Ok(())
    }

    /// Ask the fetch loop to stop and wait until it has.
    ///
    /// The relay queue is closed for writes once this returns.  Items already
    /// queued are left to the post loop; call [`Relay::drain`] to wait for
    /// them.
    pub async fn stop(&mut self) -> Result<(), RelayError> {
        if self.state != LifecycleState::Running {
            return Err(RelayError::InvalidState {
                op: "stop",
                state: self.state,
            });
        }

        self.state = LifecycleState::StopRequested;
        if let Some(stop_tx) = self.stop_tx.take() {
            // The fetch loop may already have halted on its own.
            let _ = stop_tx.send(true);
        }
        let joined = match self.fetch.take() {
            Some(fetch) => fetch.await,
            None => Ok(()),
        };
        // A panicked fetch loop still leaves the queue closed, so the post
        // loop can be drained either way.
        self.state = LifecycleState::Stopped;
        joined?;

        info!("fetch loop acknowledged stop");
        Ok(())
    }

    /// Wait for the post loop to deliver everything still queued.
    ///
    /// Only valid after [`Relay::stop`]; returns the number of items the post
    /// loop delivered over its lifetime.
    pub async fn drain(mut self) -> Result<u64, RelayError> {
        if self.state != LifecycleState::Stopped {
            return Err(RelayError::InvalidState {
                op: "drain",
                state: self.state,
            });
        }

        let sent = match self.post.take() {
            Some(post) => post.await?,
            None => 0,
        };
        info!(sent, "relay drained");
        Ok(sent)
    }
}
