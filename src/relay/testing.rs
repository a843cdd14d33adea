//! In-memory source and sink used by the relay tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::time::Instant;

use crate::destination::MessageSink;
use crate::error::{SendError, SourceError};
use crate::source::{FeedItem, FeedSource, SearchPage, Watermark};

/// Item with id `id` created `secs` after the epoch.
pub(crate) fn item(id: u64, secs: i64) -> FeedItem {
    FeedItem {
        id,
        created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        author: "tester".to_string(),
        text: format!("tweet {id}"),
    }
}

/// Replays a fixed list of search results, then returns empty pages.
pub(crate) struct ScriptedSource {
    script: Mutex<VecDeque<Result<Vec<FeedItem>, SourceError>>>,
    calls: Mutex<Vec<(String, Watermark)>>,
}

impl ScriptedSource {
    pub(crate) fn new(script: Vec<Result<Vec<FeedItem>, SourceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, Watermark)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, query: &str, since: Watermark) -> Result<SearchPage, SourceError> {
        self.calls.lock().unwrap().push((query.to_string(), since));
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result.map(|items| SearchPage {
                items,
                rate_limit: None,
            }),
            None => Ok(SearchPage::default()),
        }
    }
}

/// Records every send attempt with the (tokio) time it happened.
#[derive(Default)]
pub(crate) struct RecordingSink {
    attempts: Mutex<Vec<(String, Instant)>>,
    failures: Mutex<VecDeque<SendError>>,
}

impl RecordingSink {
    /// Fail the next sends with these errors, in order.
    pub(crate) fn failing_with(failures: Vec<SendError>) -> Self {
        Self {
            attempts: Mutex::default(),
            failures: Mutex::new(failures.into()),
        }
    }

    pub(crate) fn attempts(&self) -> Vec<(String, Instant)> {
        self.attempts.lock().unwrap().clone()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.attempts().into_iter().map(|(text, _)| text).collect()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, text: &str) -> Result<(), SendError> {
        self.attempts
            .lock()
            .unwrap()
            .push((text.to_string(), Instant::now()));
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
