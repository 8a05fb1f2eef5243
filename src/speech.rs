//! Voice-note synthesis.
//!
//! Voice cycles hand the generated script to a synthesizer and ship the
//! resulting file through the channel's voice capability. Artifacts are
//! written under a configured directory and pruned after each send so the
//! disk footprint stays bounded.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::config::AudioConfig;
use crate::error::SpeechError;
use crate::store::model::now_ms;

/// One synthesized voice note on disk.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub path: PathBuf,
    pub byte_size: usize,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SpeechError>;
}

/// ElevenLabs text-to-speech backend.
pub struct ElevenLabsSynthesizer {
    api_key: SecretString,
    voice_id: String,
    artifacts_dir: PathBuf,
    client: reqwest::Client,
}

impl ElevenLabsSynthesizer {
    const API_BASE: &'static str = "https://api.elevenlabs.io/v1";

    /// Returns `None` when no API key is configured.
    pub fn from_config(config: &AudioConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            api_key,
            voice_id: config.voice_id.clone(),
            artifacts_dir: config.artifacts_dir.clone(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SpeechError> {
        let body = serde_json::json!({
            "text": text,
            "model_id": "eleven_multilingual_v2",
        });

        let response = self
            .client
            .post(format!(
                "{}/text-to-speech/{}",
                Self::API_BASE,
                self.voice_id
            ))
            .header("xi-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeechError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SpeechError::RequestFailed(format!("{status}: {detail}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SpeechError::RequestFailed(e.to_string()))?;

        tokio::fs::create_dir_all(&self.artifacts_dir)
            .await
            .map_err(|source| SpeechError::Io {
                path: self.artifacts_dir.clone(),
                source,
            })?;

        let path = self.artifacts_dir.join(format!("voice-{}.mp3", now_ms()));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| SpeechError::Io {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), bytes = bytes.len(), "voice note synthesized");
        Ok(SynthesizedAudio {
            path,
            byte_size: bytes.len(),
        })
    }
}

/// Delete all but the `keep` newest audio artifacts in `dir`.
///
/// Missing directories count as already clean. Returns how many files
/// were removed.
pub async fn prune_artifacts(dir: &Path, keep: usize) -> Result<usize, SpeechError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(SpeechError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut files: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if let Ok(metadata) = entry.metadata().await
            && metadata.is_file()
        {
            let modified = metadata
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            files.push((modified, path));
        }
    }

    if files.len() <= keep {
        return Ok(0);
    }

    // Newest first; filenames carry a timestamp, so they break mtime ties.
    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    let mut removed = 0;
    for (_, path) in files.drain(keep..) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(error) => debug!(path = %path.display(), %error, "could not prune artifact"),
        }
    }
    if removed > 0 {
        debug!(removed, keep, dir = %dir.display(), "pruned audio artifacts");
    }
    Ok(removed)
}
