//! Send-cycle orchestration.
//!
//! One cycle walks ready-check, history sync, context build, generation,
//! validation, send and record. Scheduled firings and manual triggers run
//! the exact same path; only error propagation differs (the scheduler
//! boundary swallows failures after counting them, manual callers see the
//! `CycleError`).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::channels::MessageChannel;
use crate::config::Settings;
use crate::error::CycleError;
use crate::generator::{ContentGenerator, GenerationOptions};
use crate::scheduler::{JobCallback, callback};
use crate::speech::{SpeechSynthesizer, prune_artifacts};
use crate::store::{ConversationStore, MessageKind};

/// Why a cycle ended without sending. Not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ChannelNotReady,
}

/// What a completed cycle did.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Sent { text: String, kind: MessageKind },
    Skipped(SkipReason),
}

/// Running totals for this process. `messages_sent` counts every send,
/// voice included.
#[derive(Debug, Clone, Default)]
pub struct DeliveryStats {
    pub messages_sent: u64,
    pub voice_messages_sent: u64,
    pub cycle_errors: u64,
    pub last_sent: Option<DateTime<Utc>>,
}

pub struct Orchestrator {
    settings: Settings,
    store: Arc<ConversationStore>,
    channel: Arc<dyn MessageChannel>,
    generator: Arc<dyn ContentGenerator>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    stats: Mutex<DeliveryStats>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        store: Arc<ConversationStore>,
        channel: Arc<dyn MessageChannel>,
        generator: Arc<dyn ContentGenerator>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> Self {
        Self {
            settings,
            store,
            channel,
            generator,
            synthesizer,
            stats: Mutex::new(DeliveryStats::default()),
        }
    }

    /// Run one full send cycle for the given message kind.
    pub async fn run_cycle(&self, kind: MessageKind) -> Result<CycleOutcome, CycleError> {
        match self.cycle(kind).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.stats_guard().cycle_errors += 1;
                Err(error)
            }
        }
    }

    /// Manual trigger. Same path as a scheduled firing, but the caller
    /// sees the result.
    pub async fn trigger_send(&self, kind: MessageKind) -> Result<CycleOutcome, CycleError> {
        self.run_cycle(kind).await
    }

    /// Package a cycle as a scheduler callback. Failures propagate into
    /// the firing-site log and go no further.
    pub fn scheduled(self: &Arc<Self>, kind: MessageKind) -> JobCallback {
        let orchestrator = Arc::clone(self);
        callback(move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator.run_cycle(kind).await?;
                Ok(())
            }
        })
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> DeliveryStats {
        self.stats_guard().clone()
    }

    async fn cycle(&self, kind: MessageKind) -> Result<CycleOutcome, CycleError> {
        let contact = self.settings.contact.key.as_str();

        if !self.channel.is_ready().await {
            debug!(
                channel = self.channel.name(),
                "channel not ready, skipping cycle"
            );
            return Ok(CycleOutcome::Skipped(SkipReason::ChannelNotReady));
        }

        // Voice prerequisites are checked before any external call.
        if kind == MessageKind::Voice
            && (self.synthesizer.is_none() || self.channel.voice().is_none())
        {
            return Err(CycleError::VoiceUnsupported);
        }

        self.sync_history(contact).await;

        let context = self
            .store
            .conversation_context(contact, self.settings.generation.context_window)
            .await;
        debug!(
            flow = context.flow.pattern.as_str(),
            window = context.messages.len(),
            "context built"
        );

        let options = self.options_for(kind);
        let generated = match kind {
            MessageKind::Text => self.generator.generate(&context, &options).await?,
            MessageKind::Voice => {
                self.generator
                    .generate_voice_variant(&context, &options)
                    .await?
            }
        };

        if let Err(rejection) = self.settings.policy.validate(&generated.text) {
            warn!(%rejection, "generated content rejected, nothing sent");
            return Err(CycleError::Validation(rejection));
        }

        match kind {
            MessageKind::Text => {
                self.channel.send_text(contact, &generated.text).await?;
            }
            MessageKind::Voice => {
                let synthesizer = self
                    .synthesizer
                    .as_deref()
                    .ok_or(CycleError::VoiceUnsupported)?;
                let voice = self.channel.voice().ok_or(CycleError::VoiceUnsupported)?;
                let audio = synthesizer.synthesize(&generated.text).await?;
                voice.send_voice(contact, &audio.path).await?;
                if let Err(error) = prune_artifacts(
                    &self.settings.audio.artifacts_dir,
                    self.settings.audio.keep_artifacts,
                )
                .await
                {
                    warn!(%error, "audio artifact pruning failed");
                }
            }
        }

        self.record(contact, &generated.text, kind).await;
        info!(
            contact,
            kind = ?kind,
            chars = generated.text.chars().count(),
            "message sent"
        );
        Ok(CycleOutcome::Sent {
            text: generated.text,
            kind,
        })
    }

    /// Pull recent channel history into the store. Best-effort: a failed
    /// sync leaves the cycle running on stored context.
    async fn sync_history(&self, contact: &str) {
        let Some(history) = self.channel.history() else {
            return;
        };
        match history
            .fetch_recent(contact, self.settings.generation.sync_limit)
            .await
        {
            Ok(batch) => match self.store.merge_external_batch(contact, &batch).await {
                Ok(merged) if merged > 0 => debug!(merged, "merged channel history"),
                Ok(_) => {}
                Err(error) => warn!(%error, "could not persist synced history"),
            },
            Err(error) => warn!(%error, "history sync failed, using stored context"),
        }
    }

    async fn record(&self, contact: &str, text: &str, kind: MessageKind) {
        if let Err(error) = self.store.mark_sent(contact, text, kind).await {
            warn!(%error, "sent message could not be recorded");
        }
        let mut stats = self.stats_guard();
        stats.messages_sent += 1;
        if kind == MessageKind::Voice {
            stats.voice_messages_sent += 1;
        }
        stats.last_sent = Some(Utc::now());
    }

    fn options_for(&self, kind: MessageKind) -> GenerationOptions {
        let generation = &self.settings.generation;
        GenerationOptions {
            style: generation.style.clone(),
            language: generation.language.clone(),
            max_tokens: generation.max_tokens,
            temperature: match kind {
                MessageKind::Text => generation.text_temperature,
                MessageKind::Voice => generation.voice_temperature,
            },
        }
    }

    fn stats_guard(&self) -> MutexGuard<'_, DeliveryStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
