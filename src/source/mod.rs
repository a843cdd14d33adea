//! Feed source abstraction layer.
//!
//! This module defines the [`FeedSource`] trait and the types a search
//! returns.  Concrete sources live in sub-modules (currently only
//! [`twitter`]).
//!
//! ## For contributors - adding a new source
//!
//! 1. Create a new file in this directory (e.g. `mastodon.rs`).
//! 2. Define a struct and implement [`FeedSource`] for it.
//! 3. Add `pub mod mastodon;` below.
//! 4. Construct it in `main.rs` and hand it to the relay builder.
//!
//! The fetch loop, watermark, and post loop are all source-agnostic.

mod feed_item;
pub mod twitter;

pub use feed_item::{sort_chronological, FeedItem, Watermark};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SourceError;

/// Rate-limit headroom reported alongside a search page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the window resets, if the source said.
    pub reset_at: Option<DateTime<Utc>>,
}

/// One search response.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// Matching items, in whatever order the source returned them.
    pub items: Vec<FeedItem>,
    pub rate_limit: Option<RateLimit>,
}

/// Trait that every feed source must implement.
///
/// The fetch loop calls [`search()`](FeedSource::search) once per tick from a
/// spawned task, so implementations must be [`Send`] and [`Sync`].
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Human-readable label used in logs.
    fn name(&self) -> &str;

    /// Return items matching `query` that are newer than `since`.
    ///
    /// `Watermark::NONE` means "no lower bound".  The relay treats the
    /// `since` filter as authoritative unless configured otherwise.
    async fn search(&self, query: &str, since: Watermark) -> Result<SearchPage, SourceError>;
}
