//! Console channel for local development.

use std::path::Path;

use async_trait::async_trait;

use crate::channels::{MessageChannel, SendReceipt, VoiceSender};
use crate::error::ChannelError;

/// Prints outgoing traffic to stdout instead of a real messaging session.
/// Always ready. Carries the voice capability so the voice path can be
/// exercised end to end, but no history source.
pub struct ConsoleChannel;

impl ConsoleChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageChannel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn is_ready(&self) -> bool {
        true
    }

    async fn send_text(&self, contact: &str, text: &str) -> Result<SendReceipt, ChannelError> {
        println!("💬 [{contact}] {text}");
        Ok(SendReceipt::default())
    }

    fn voice(&self) -> Option<&dyn VoiceSender> {
        Some(self)
    }
}

#[async_trait]
impl VoiceSender for ConsoleChannel {
    async fn send_voice(
        &self,
        contact: &str,
        audio_path: &Path,
    ) -> Result<SendReceipt, ChannelError> {
        println!("🎙️ [{contact}] voice note: {}", audio_path.display());
        Ok(SendReceipt::default())
    }
}
