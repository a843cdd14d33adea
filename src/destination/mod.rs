//! Outbound message destinations.
//!
//! The post loop only needs "send this text, tell me if it worked".  Concrete
//! destinations live in sub-modules (currently only [`groupme`]).

pub mod groupme;

use async_trait::async_trait;

use crate::error::SendError;

/// Trait for chat destinations the relay posts into.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> &str;

    /// Deliver one message.  One call per relayed item.
    async fn send(&self, text: &str) -> Result<(), SendError>;
}
