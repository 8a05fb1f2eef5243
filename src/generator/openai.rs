//! OpenAI-compatible chat-completions backend.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::error::GeneratorError;
use crate::generator::{
    ContentGenerator, GeneratedMessage, GenerationOptions, UsageMeta, render_context,
    system_prompt,
};
use crate::store::ConversationContext;

pub struct OpenAiGenerator {
    api_key: SecretString,
    api_base: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client: reqwest::Client::new(),
        }
    }

    async fn complete(
        &self,
        system: String,
        user: String,
        options: &GenerationOptions,
    ) -> Result<GeneratedMessage, GeneratorError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| GeneratorError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(GeneratorError::RequestFailed(format!("{status}: {detail}")));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::InvalidResponse(e.to_string()))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| clean(&choice.message.content))
            .unwrap_or_default();
        if text.is_empty() {
            return Err(GeneratorError::EmptyCompletion);
        }

        let usage = completion.usage.unwrap_or_default();
        debug!(
            model = %self.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "generation complete"
        );
        Ok(GeneratedMessage {
            text,
            usage: UsageMeta {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        })
    }
}

/// Models sometimes quote the whole reply; strip one matched pair.
fn clean(text: &str) -> String {
    let trimmed = text.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        context: &ConversationContext,
        options: &GenerationOptions,
    ) -> Result<GeneratedMessage, GeneratorError> {
        self.complete(system_prompt(options, false), render_context(context), options)
            .await
    }

    async fn generate_voice_variant(
        &self,
        context: &ConversationContext,
        options: &GenerationOptions,
    ) -> Result<GeneratedMessage, GeneratorError> {
        self.complete(system_prompt(options, true), render_context(context), options)
            .await
    }
}
