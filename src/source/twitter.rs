//! Twitter standard search source.
//!
//! Queries the v1.1 `search/tweets` endpoint with an app-only bearer token and
//! turns the returned statuses into [`FeedItem`]s.  Obtaining the token is
//! out of scope; pass an already-issued one.
//!
//! Statuses are screened before they reach the relay:
//!
//! * statuses without an id, author or parseable timestamp are dropped,
//! * statuses whose text contains a configured spam phrase are dropped,
//! * retweets of an original older than [`Screening::max_retweet_age`] are
//!   dropped, since the original would already have been relayed.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{FeedItem, FeedSource, RateLimit, SearchPage, Watermark};
use crate::error::SourceError;

/// Public API host.
pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com";

const SEARCH_PATH: &str = "/1.1/search/tweets.json";

/// `Wed Oct 10 20:19:24 +0000 2018`
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Largest page the standard search API hands out.
pub const MAX_PAGE_SIZE: usize = 100;

/// Filters applied to raw statuses before they become feed items.
#[derive(Debug, Clone)]
pub struct Screening {
    /// Statuses containing any of these (case-insensitive) are skipped.
    pub skip_phrases: Vec<String>,
    /// Retweets of anything older than this are skipped.
    pub max_retweet_age: ChronoDuration,
}

impl Default for Screening {
    fn default() -> Self {
        Self {
            skip_phrases: Vec::new(),
            max_retweet_age: ChronoDuration::minutes(5),
        }
    }
}

impl Screening {
    fn is_spam(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.skip_phrases
            .iter()
            .any(|phrase| text.contains(&phrase.to_lowercase()))
    }
}

/// A Twitter search source.
pub struct TwitterSearch {
    client: reqwest::Client,
    base_url: String,
    token: String,
    screening: Screening,
    page_size: usize,
}

impl TwitterSearch {
    /// Create a search source from an app-only bearer token.
    ///
    /// Fails with [`SourceError::MissingCredentials`] when the token is blank.
    pub fn new(token: impl Into<String>, client: reqwest::Client) -> Result<Self, SourceError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(SourceError::MissingCredentials);
        }
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
            screening: Screening::default(),
            page_size: MAX_PAGE_SIZE,
        })
    }

    /// Point the source at a different host (tests, proxies).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_screening(mut self, screening: Screening) -> Self {
        self.screening = screening;
        self
    }

    /// Statuses requested per search, clamped to `1..=MAX_PAGE_SIZE`.
    ///
    /// The binary sets this to the relay queue capacity so one batch fits
    /// the queue.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Query-string parameters for one search.
    ///
    /// `since_id` is omitted for [`Watermark::NONE`] so the first poll
    /// returns the most recent page.
    pub fn search_params(
        query: &str,
        since: Watermark,
        page_size: usize,
    ) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", query.to_string()),
            ("result_type", "recent".to_string()),
            ("count", page_size.to_string()),
            ("tweet_mode", "extended".to_string()),
        ];
        if !since.is_none() {
            params.push(("since_id", since.get().to_string()));
        }
        params
    }

    /// Convert a decoded response into screened [`FeedItem`]s.
    ///
    /// This is a pure function (no I/O) so tests can exercise the screening
    /// rules without a server.  `now` anchors the retweet age check.
    pub fn parse_statuses(
        response: SearchResponse,
        screening: &Screening,
        now: DateTime<Utc>,
    ) -> Vec<FeedItem> {
        response
            .statuses
            .into_iter()
            .filter_map(|status| {
                let (Some(id), Some(user)) = (status.id, status.user) else {
                    debug!("skipping status without id or user");
                    return None;
                };

                let Some(created_at) = parse_created_at(&status.created_at) else {
                    warn!(id, created_at = %status.created_at, "skipping status with bad timestamp");
                    return None;
                };

                let text = status.full_text.or(status.text).unwrap_or_default();
                if screening.is_spam(&text) {
                    debug!(id, "skipping spam");
                    return None;
                }

                if let Some(original) = status.retweeted_status {
                    let cutoff = now.checked_sub_signed(screening.max_retweet_age);
                    let stale = match (parse_created_at(&original.created_at), cutoff) {
                        (Some(at), Some(cutoff)) => at < cutoff,
                        (Some(_), None) => false,
                        (None, _) => true,
                    };
                    if stale {
                        debug!(id, "skipping stale retweet");
                        return None;
                    }
                }

                Some(FeedItem {
                    id,
                    created_at,
                    author: user.screen_name,
                    text,
                })
            })
            .collect()
    }
}

fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Read `x-rate-limit-*` headers, if present.
fn rate_limit(headers: &HeaderMap) -> Option<RateLimit> {
    let header = |name: &str| headers.get(name)?.to_str().ok()?.parse::<i64>().ok();

    let remaining = u32::try_from(header("x-rate-limit-remaining")?).ok()?;
    let reset_at = header("x-rate-limit-reset").and_then(|secs| DateTime::from_timestamp(secs, 0));
    Some(RateLimit {
        remaining,
        reset_at,
    })
}

#[async_trait]
impl FeedSource for TwitterSearch {
    fn name(&self) -> &str {
        "twitter"
    }

    async fn search(&self, query: &str, since: Watermark) -> Result<SearchPage, SourceError> {
        debug!(query, %since, "searching");

        let response = self
            .client
            .get(format!("{}{SEARCH_PATH}", self.base_url))
            .bearer_auth(&self.token)
            .query(&Self::search_params(query, since, self.page_size))
            .send()
            .await?;

        let status = response.status();
        let limit = rate_limit(response.headers());

        match status {
            s if s.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(SourceError::RateLimited {
                    reset_at: limit.and_then(|l| l.reset_at),
                });
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SourceError::Unauthorized(status));
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                return Err(SourceError::UnexpectedStatus { status, body });
            }
        }

        let body = response.bytes().await?;
        let decoded: SearchResponse = serde_json::from_slice(&body)?;
        let items = Self::parse_statuses(decoded, &self.screening, Utc::now());

        Ok(SearchPage {
            items,
            rate_limit: limit,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    statuses: Vec<Status>,
}

#[derive(Debug, Deserialize)]
struct Status {
    id: Option<u64>,
    #[serde(default)]
    created_at: String,
    text: Option<String>,
    full_text: Option<String>,
    user: Option<User>,
    retweeted_status: Option<Box<Original>>,
}

#[derive(Debug, Deserialize)]
struct User {
    screen_name: String,
}

#[derive(Debug, Deserialize)]
struct Original {
    #[serde(default)]
    created_at: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
