//! The item type shared by the fetch and post stages.
//!
//! `FeedItem` is one search result, normalised from whatever the source API
//! returns.  The fetch loop only looks at [`FeedItem::id`] (for the
//! watermark) and [`FeedItem::created_at`] (for ordering); the post loop only
//! renders [`FeedItem::permalink`].
//!
//! ## For contributors
//!
//! If you add a new source you should not need to touch this file.  Build
//! `FeedItem` values in your source's `search()` implementation and the rest
//! of the relay stays source-agnostic.

use chrono::{DateTime, Utc};
use std::fmt;

/// Prefix of the canonical status permalink.
///
/// Twitter resolves `/twitter/status/<id>` to the right author, so the
/// screen name is not needed to build a working link.
pub const PERMALINK_BASE: &str = "https://twitter.com/twitter/status";

/// A single search result, immutable once produced by a source.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FeedItem {
    /// Upstream identifier.  Totally ordered; larger means newer upstream.
    pub id: u64,

    /// Creation timestamp, used to order items within a batch.
    pub created_at: DateTime<Utc>,

    /// Screen name of the author.
    pub author: String,

    /// Display text.  Only used for logging; the outbound message is the
    /// permalink.
    pub text: String,
}

impl FeedItem {
    /// The outbound message text for this item.
    pub fn permalink(&self) -> String {
        format!("{PERMALINK_BASE}/{}", self.id)
    }
}

impl fmt::Display for FeedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by @{}", self.id, self.author)
    }
}

/// Sort a batch ascending by creation time.
///
/// The sort is stable, so items sharing a timestamp keep the order the source
/// returned them in.
pub fn sort_chronological(items: &mut [FeedItem]) {
    items.sort_by_key(|item| item.created_at);
}

/// Highest-seen item identifier.
///
/// Starts at [`Watermark::NONE`] and only ever moves forward.  The fetch loop
/// owns the only mutable copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(u64);

impl Watermark {
    /// Nothing has been fetched yet.
    pub const NONE: Self = Self(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// `max(self, id)`: the watermark never regresses.
    #[must_use]
    pub fn advance(self, id: u64) -> Self {
        Self(self.0.max(id))
    }

    /// Whether `id` is newer than everything this watermark covers.
    pub fn is_behind(self, id: u64) -> bool {
        id > self.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
