//! Error types for the relay and its two external clients.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

use crate::relay::LifecycleState;

/// Errors that can be retried with backoff implement this.
pub trait Retryable {
    /// Whether another attempt is worth making.  Credential and
    /// request-shape problems never are.
    fn is_retryable(&self) -> bool;
}

/// Errors raised by a [`FeedSource`](crate::source::FeedSource).
#[derive(Debug, Error)]
pub enum SourceError {
    /// No bearer token was supplied.
    #[error("search client needs a bearer token")]
    MissingCredentials,

    /// Transport-level failure.
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The search API rate limit is exhausted.
    #[error("search rate limited{}", reset_suffix(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// Credentials were rejected.
    #[error("search API rejected credentials ({0})")]
    Unauthorized(StatusCode),

    /// Any other non-success status.
    #[error("search API returned {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    /// The body was not the expected JSON.
    #[error("could not decode search response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors raised by a [`MessageSink`](crate::destination::MessageSink).
#[derive(Debug, Error)]
pub enum SendError {
    /// No bot identifier was supplied.
    #[error("bot client needs a bot id")]
    MissingBotId,

    /// Transport-level failure.
    #[error("post request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The destination is throttling us.
    #[error("post rate limited")]
    RateLimited,

    /// The bot id or credentials were rejected.
    #[error("destination rejected bot ({0})")]
    Unauthorized(StatusCode),

    /// The destination answered, but not with the expected status.
    #[error("destination returned {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
}

/// Errors surfaced by the relay coordinator.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("at least one filter tag is required")]
    EmptyTags,

    #[error("relay needs a feed source")]
    MissingSource,

    #[error("relay needs a message destination")]
    MissingDestination,

    #[error("relay queue capacity must be at least 1")]
    ZeroCapacity,

    #[error("cannot {op} a relay that is {state}")]
    InvalidState {
        op: &'static str,
        state: LifecycleState,
    },

    #[error("fetch failed: {0}")]
    Source(#[from] SourceError),

    #[error("send failed: {0}")]
    Send(#[from] SendError),

    #[error("relay task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn reset_suffix(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => format!(" until {}", at.format("%H:%M:%S UTC")),
        None => String::new(),
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout()
        || err.is_connect()
        || err.status().is_some_and(|s| s.is_server_error())
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => is_transient(err),
            Self::RateLimited { .. } => true,
            Self::UnexpectedStatus { status, .. } => status.is_server_error(),
            Self::MissingCredentials | Self::Unauthorized(_) | Self::Decode(_) => false,
        }
    }
}

/// Posting is not idempotent: a send is only retried when the destination
/// cannot have accepted it.  A timeout or a generic 5xx may already have
/// produced a message.
impl Retryable for SendError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => err.is_connect(),
            Self::RateLimited => true,
            Self::UnexpectedStatus { status, .. } => *status == StatusCode::SERVICE_UNAVAILABLE,
            Self::MissingBotId | Self::Unauthorized(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rate_limits_and_server_errors_are_retryable() {
        assert!(SourceError::RateLimited { reset_at: None }.is_retryable());
        assert!(SourceError::UnexpectedStatus {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        }
        .is_retryable());
        assert!(SendError::RateLimited.is_retryable());
        assert!(SendError::UnexpectedStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        }
        .is_retryable());
    }

    #[test]
    fn sends_that_may_have_landed_are_not_retried() {
        for status in [StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY] {
            assert!(!SendError::UnexpectedStatus {
                status,
                body: String::new(),
            }
            .is_retryable());
        }
    }

    #[tokio::test]
    async fn send_timeout_is_not_retryable_but_search_timeout_is() {
        // Accepts the connection and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            drop(socket);
        });

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(std::time::Duration::from_millis(100))
            .build()
            .unwrap();
        let err = client
            .post(format!("http://{addr}/v3/bots/post"))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let send = SendError::Http(err);
        assert!(!send.is_retryable());
        let SendError::Http(err) = send else {
            unreachable!()
        };
        assert!(SourceError::Http(err).is_retryable());
    }

    #[tokio::test]
    async fn refused_connection_is_retryable_for_sends() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .post(format!("http://{addr}/v3/bots/post"))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_connect());
        assert!(SendError::Http(err).is_retryable());
    }

    #[test]
    fn auth_and_client_errors_are_fatal() {
        assert!(!SourceError::Unauthorized(StatusCode::UNAUTHORIZED).is_retryable());
        assert!(!SourceError::MissingCredentials.is_retryable());
        assert!(!SendError::UnexpectedStatus {
            status: StatusCode::BAD_REQUEST,
            body: "bad".into(),
        }
        .is_retryable());
    }

    #[test]
    fn rate_limit_message_mentions_reset_time() {
        let reset_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let err = SourceError::RateLimited {
            reset_at: Some(reset_at),
        };
        assert_eq!(err.to_string(), "search rate limited until 12:30:00 UTC");
    }
}
