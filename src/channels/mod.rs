//! Messaging-channel abstraction.
//!
//! The daemon talks to one channel implementation at a time. A readiness
//! probe and text sending are mandatory; voice sending and history
//! fetching are optional capabilities, and callers check for them instead
//! of branching on the concrete channel type.

pub mod bridge;
pub mod console;

pub use bridge::BridgeChannel;
pub use console::ConsoleChannel;

use std::path::Path;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::store::ExternalMessage;

/// Confirmation returned by a successful send.
#[derive(Debug, Clone, Default)]
pub struct SendReceipt {
    /// Channel-assigned id for the delivered message, when available.
    pub external_id: Option<String>,
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Channel name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the channel can accept sends right now.
    async fn is_ready(&self) -> bool;

    async fn send_text(&self, contact: &str, text: &str) -> Result<SendReceipt, ChannelError>;

    /// Voice capability, when the channel carries one.
    fn voice(&self) -> Option<&dyn VoiceSender> {
        None
    }

    /// History capability, when the channel carries one.
    fn history(&self) -> Option<&dyn HistorySource> {
        None
    }
}

#[async_trait]
pub trait VoiceSender: Send + Sync {
    async fn send_voice(
        &self,
        contact: &str,
        audio_path: &Path,
    ) -> Result<SendReceipt, ChannelError>;
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// The most recent `limit` raw messages for `contact`, oldest first.
    async fn fetch_recent(
        &self,
        contact: &str,
        limit: usize,
    ) -> Result<Vec<ExternalMessage>, ChannelError>;
}
