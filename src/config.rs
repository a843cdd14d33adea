//! Command-line and environment configuration.
//!
//! Every flag can also come from the environment, which is how the
//! credentials are expected to arrive in deployments.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use clap::{Parser, ValueEnum};

use crate::destination::groupme;
use crate::relay::{DedupPolicy, ErrorPolicy, RelayOptions};
use crate::source::twitter::{self, Screening};

/// Sent on every outbound HTTP request.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Footer appended by a GroupMe spam bot that reposts to Twitter.
pub const DEFAULT_SKIP_PHRASE: &str = "GroupMe by Cat Eyes";

#[derive(Debug, Parser)]
#[command(name = "tweet-relay")]
#[command(about = "Relay tweets matching a set of tags into a GroupMe bot", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Tags to search for, comma separated; OR-combined into one query
    #[arg(
        long,
        env = "RELAY_TAGS",
        value_delimiter = ',',
        default_value = "groupme,cats,burrito"
    )]
    pub tags: Vec<String>,

    /// App-only bearer token for the Twitter search API
    #[arg(long, env = "TWITTER_BEARER_TOKEN", hide_env_values = true)]
    pub twitter_bearer_token: String,

    /// Identifier of the GroupMe bot to post as
    #[arg(long, env = "GROUPME_BOT_ID", hide_env_values = true)]
    pub groupme_bot_id: String,

    /// Seconds between searches. The default search quota is 450 requests
    /// per 15 minutes, so 10s stays well inside it
    #[arg(long, env = "RELAY_POLL_INTERVAL_SECS", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_secs: u64,

    /// Seconds to wait after each message is posted
    #[arg(long, env = "RELAY_POST_DELAY_SECS", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub post_delay_secs: u64,

    /// Items buffered between the search and post stages
    #[arg(long, env = "RELAY_QUEUE_CAPACITY", default_value_t = 10)]
    pub queue_capacity: usize,

    /// What to do when a search or post fails
    #[arg(long, env = "RELAY_ERROR_POLICY", value_enum, default_value_t = PolicyKind::Retry)]
    pub error_policy: PolicyKind,

    /// Retries per failed call under the retry policy
    #[arg(long, default_value_t = 3)]
    pub retry_attempts: usize,

    /// First backoff delay under the retry policy, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub retry_base_delay_ms: u64,

    /// Whether to re-check search results against the watermark
    #[arg(long, value_enum, default_value_t = DedupKind::FilterSeen)]
    pub dedup: DedupKind,

    /// Skip tweets containing this phrase (repeatable)
    #[arg(
        long = "skip-phrase",
        env = "RELAY_SKIP_PHRASES",
        value_delimiter = ',',
        default_value = DEFAULT_SKIP_PHRASE
    )]
    pub skip_phrases: Vec<String>,

    /// Skip retweets whose original is older than this many seconds
    #[arg(long, default_value_t = 300)]
    pub max_retweet_age_secs: u64,

    /// How long to keep posting queued items after shutdown starts
    #[arg(long, default_value_t = 60)]
    pub drain_timeout_secs: u64,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub http_timeout_secs: u64,

    #[arg(long, env = "TWITTER_BASE_URL", default_value = twitter::DEFAULT_BASE_URL)]
    pub twitter_base_url: String,

    #[arg(long, env = "GROUPME_BASE_URL", default_value = groupme::DEFAULT_BASE_URL)]
    pub groupme_base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyKind {
    /// Log the failure and keep going
    Continue,
    /// Back off and retry transient failures, then keep going
    Retry,
    /// Shut the relay down
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DedupKind {
    /// Drop results the watermark already covers
    FilterSeen,
    /// Relay whatever the search returns
    TrustSource,
}

impl Cli {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        match self.error_policy {
            PolicyKind::Continue => ErrorPolicy::Continue,
            PolicyKind::Retry => ErrorPolicy::Retry {
                attempts: self.retry_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
            },
            PolicyKind::Halt => ErrorPolicy::Halt,
        }
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            queue_capacity: self.queue_capacity,
            post_delay: Duration::from_secs(self.post_delay_secs),
            error_policy: self.error_policy(),
            dedup: match self.dedup {
                DedupKind::FilterSeen => DedupPolicy::FilterSeen,
                DedupKind::TrustSource => DedupPolicy::TrustSource,
            },
        }
    }

    pub fn screening(&self) -> Screening {
        Screening {
            skip_phrases: self
                .skip_phrases
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            max_retweet_age: i64::try_from(self.max_retweet_age_secs)
                .ok()
                .and_then(ChronoDuration::try_seconds)
                .unwrap_or(ChronoDuration::MAX),
        }
    }

    /// Shared client for both APIs.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(self.http_timeout_secs))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 5] = [
        "tweet-relay",
        "--twitter-bearer-token",
        "tok",
        "--groupme-bot-id",
        "bot",
    ];

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(REQUIRED.iter().chain(extra))
    }

    #[test]
    fn defaults_match_documented_cadence() {
        let cli = parse(&[]).unwrap();

        assert_eq!(cli.tags, vec!["groupme", "cats", "burrito"]);
        assert_eq!(cli.poll_interval(), Duration::from_secs(10));

        let options = cli.relay_options();
        assert_eq!(options.post_delay, Duration::from_secs(5));
        assert_eq!(options.queue_capacity, 10);
        assert_eq!(options.dedup, DedupPolicy::FilterSeen);
        assert_eq!(
            options.error_policy,
            ErrorPolicy::Retry {
                attempts: 3,
                base_delay: Duration::from_millis(500)
            }
        );
    }

    #[test]
    fn tags_split_on_commas() {
        let cli = parse(&["--tags", "alpha,beta"]).unwrap();
        assert_eq!(cli.tags, vec!["alpha", "beta"]);
    }

    #[test]
    fn policies_map_onto_relay_options() {
        let cli = parse(&["--error-policy", "halt", "--dedup", "trust-source"]).unwrap();
        let options = cli.relay_options();

        assert_eq!(options.error_policy, ErrorPolicy::Halt);
        assert_eq!(options.dedup, DedupPolicy::TrustSource);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        assert!(parse(&["--poll-interval-secs", "0"]).is_err());
    }

    #[test]
    fn known_spam_phrase_is_skipped_by_default() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli.screening().skip_phrases, vec![DEFAULT_SKIP_PHRASE]);
    }

    #[test]
    fn screening_collects_skip_phrases() {
        let cli = parse(&[
            "--skip-phrase",
            "by cat eyes",
            "--skip-phrase",
            " ",
            "--max-retweet-age-secs",
            "60",
        ])
        .unwrap();
        let screening = cli.screening();

        assert_eq!(screening.skip_phrases, vec!["by cat eyes"]);
        assert_eq!(screening.max_retweet_age, ChronoDuration::seconds(60));
    }
}
