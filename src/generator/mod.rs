//! Content generation.
//!
//! The orchestrator hands the generator a bounded conversation context
//! and gets candidate message text back. The trait boundary keeps cycle
//! logic testable with a canned generator.

pub mod openai;

pub use openai::OpenAiGenerator;

use async_trait::async_trait;

use crate::error::GeneratorError;
use crate::store::{ConversationContext, Direction};

/// Style and sampling knobs for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub style: String,
    pub language: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageMeta {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct GeneratedMessage {
    pub text: String,
    pub usage: UsageMeta,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Produce one chat message for the given conversation.
    async fn generate(
        &self,
        context: &ConversationContext,
        options: &GenerationOptions,
    ) -> Result<GeneratedMessage, GeneratorError>;

    /// Produce a script meant to be spoken aloud, not read.
    async fn generate_voice_variant(
        &self,
        context: &ConversationContext,
        options: &GenerationOptions,
    ) -> Result<GeneratedMessage, GeneratorError>;
}

/// System prompt shared by every backend.
pub(crate) fn system_prompt(options: &GenerationOptions, voice: bool) -> String {
    let mut prompt = format!(
        "You write one short message to your long-distance partner, in {language}. \
         Tone: {style}. Match the rhythm of the conversation you are shown. \
         Never mention assistants, software or how this message was produced. \
         Reply with the message text only.",
        language = options.language,
        style = options.style,
    );
    if voice {
        prompt.push_str(
            " The message will be synthesized to speech and sent as a voice note: \
             write it the way it should be spoken, without emoji, lists or \
             abbreviations.",
        );
    }
    prompt
}

/// Render the transcript and flow summary the model sees.
pub(crate) fn render_context(context: &ConversationContext) -> String {
    let name = context
        .display_name
        .as_deref()
        .unwrap_or(&context.contact_key);
    let mut prompt = format!("Contact: {name}\nFlow: {}", context.flow.pattern.as_str());
    if context.flow.awaiting_response {
        prompt.push_str(" (no reply to the last message yet)");
    }
    prompt.push('\n');

    if context.messages.is_empty() {
        prompt.push_str("No prior messages.\n");
    } else {
        prompt.push_str("Recent messages, oldest first:\n");
        for message in &context.messages {
            let who = match message.direction {
                Direction::Incoming => name,
                Direction::Outgoing => "you",
            };
            let kind = if message.is_voice() { " (voice note)" } else { "" };
            prompt.push_str(&format!("- {who}{kind}: {}\n", message.body));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::now_ms;
    use crate::store::{
        ConversationStats, FlowAnalysis, Message, MessageKind, MessageOrigin,
    };
    use uuid::Uuid;

    fn context_with(messages: Vec<Message>) -> ConversationContext {
        let flow = FlowAnalysis::from_window(&messages, now_ms());
        ConversationContext {
            contact_key: "alice".to_string(),
            display_name: Some("Alicia".to_string()),
            stats: ConversationStats::recompute(&messages),
            messages,
            flow,
        }
    }

    fn message(body: &str, direction: Direction, kind: MessageKind) -> Message {
        Message {
            id: Uuid::new_v4(),
            external_id: None,
            body: body.to_string(),
            direction,
            timestamp: 1_000,
            kind,
            origin: MessageOrigin::External,
        }
    }

    #[test]
    fn rendered_context_names_speakers_and_flow() {
        let rendered = render_context(&context_with(vec![
            message("hola", Direction::Incoming, MessageKind::Text),
            message("hola!", Direction::Outgoing, MessageKind::Voice),
        ]));
        assert!(rendered.contains("Contact: Alicia"));
        assert!(rendered.contains("Flow: balanced"));
        assert!(rendered.contains("(no reply to the last message yet)"));
        assert!(rendered.contains("- Alicia: hola"));
        assert!(rendered.contains("- you (voice note): hola!"));
    }

    #[test]
    fn empty_context_renders_a_placeholder() {
        let rendered = render_context(&context_with(Vec::new()));
        assert!(rendered.contains("Flow: empty"));
        assert!(rendered.contains("No prior messages."));
    }

    #[test]
    fn voice_prompt_adds_spoken_instructions() {
        let options = GenerationOptions {
            style: "cariñoso".to_string(),
            language: "es".to_string(),
            max_tokens: 150,
            temperature: 0.9,
        };
        let text = system_prompt(&options, false);
        let voice = system_prompt(&options, true);
        assert!(text.contains("cariñoso"));
        assert!(!text.contains("voice note"));
        assert!(voice.contains("voice note"));
    }
}
