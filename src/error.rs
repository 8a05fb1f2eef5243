//! Error types for Paloma.

use std::path::PathBuf;

use crate::validator::Rejection;

/// Top-level error type for the daemon.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Speech error: {0}")]
    Speech(#[from] SpeechError),

    #[error("Cycle error: {0}")]
    Cycle(#[from] CycleError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Conversation-store errors.
///
/// A missing or corrupt store file is NOT an error: the store reinitializes
/// itself empty and logs a warning. These variants cover the I/O and
/// serialization paths that remain after that policy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write store file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize store document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Job '{0}' already exists; remove it before rescheduling")]
    DuplicateJob(String),

    #[error("Job '{0}' not found")]
    UnknownJob(String),

    #[error("Invalid timer spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("Interval must be at least one second")]
    ZeroInterval,

    #[error("Hour of day must be 0..=23, got {0}")]
    InvalidHour(u32),
}

/// Messaging-channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to send: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} failed to fetch messages: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid response from channel {name}: {reason}")]
    InvalidResponse { name: String, reason: String },
}

/// Content-generator errors.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("Generator request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid generator response: {0}")]
    InvalidResponse(String),

    #[error("Generator returned empty content")]
    EmptyCompletion,
}

/// Speech-synthesis errors.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("Synthesis request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to write audio artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a send cycle was abandoned.
///
/// Manual-trigger callers see these directly; scheduled cycles swallow
/// them at the scheduler boundary and they show up only in counters and
/// logs.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Generation failed: {0}")]
    Generation(#[from] GeneratorError),

    #[error("Generated content rejected: {0}")]
    Validation(#[from] Rejection),

    #[error("Send failed: {0}")]
    Send(#[from] ChannelError),

    #[error("Voice synthesis failed: {0}")]
    Speech(#[from] SpeechError),

    #[error("Voice cycle requested but the channel or synthesizer lacks voice support")]
    VoiceUnsupported,
}

/// Result type alias for the daemon.
pub type Result<T> = std::result::Result<T, Error>;
