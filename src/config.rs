//! Runtime configuration, assembled from the environment at startup.
//!
//! Every knob has a default; only the contact key and the generator API
//! key are required. Values that are present but malformed fail startup
//! instead of being silently replaced.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::validator::ContentPolicy;

#[derive(Debug, Clone)]
pub struct Settings {
    pub contact: ContactConfig,
    pub store: StoreConfig,
    pub schedule: ScheduleConfig,
    pub generation: GenerationConfig,
    pub channel: ChannelConfig,
    pub audio: AudioConfig,
    pub policy: ContentPolicy,
}

/// The single messaging counterpart this deployment talks to.
#[derive(Debug, Clone)]
pub struct ContactConfig {
    /// Canonical contact key on the messaging platform.
    pub key: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Sliding-window cap per conversation; oldest entries drop first.
    pub max_retained: usize,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub text_interval: Duration,
    pub voice_interval: Duration,
    pub voice_enabled: bool,
    /// Extra once-a-day send at this UTC hour, when set.
    pub daily_hour: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: SecretString,
    pub api_base: String,
    pub model: String,
    pub style: String,
    pub language: String,
    pub max_tokens: u32,
    pub text_temperature: f32,
    /// Voice scripts run hotter so they read naturally when spoken.
    pub voice_temperature: f32,
    /// How many stored messages feed each prompt.
    pub context_window: usize,
    /// How many channel messages each pre-send sync fetches.
    pub sync_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Console,
    Bridge,
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(ChannelKind::Console),
            "bridge" => Ok(ChannelKind::Bridge),
            other => Err(format!("unknown channel '{other}' (console|bridge)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub bridge_url: String,
    pub bridge_token: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub api_key: Option<SecretString>,
    pub voice_id: String,
    pub artifacts_dir: PathBuf,
    /// How many synthesized files to keep on disk after each voice send.
    pub keep_artifacts: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let contact = ContactConfig {
            key: required("PALOMA_CONTACT")?,
            display_name: optional("PALOMA_CONTACT_NAME"),
        };

        let store = StoreConfig {
            path: optional("PALOMA_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/conversations.json")),
            max_retained: parse_or("PALOMA_MAX_RETAINED", 200)?,
        };

        let schedule = ScheduleConfig {
            text_interval: Duration::from_secs(parse_or("PALOMA_TEXT_INTERVAL_SECS", 3_600)?),
            voice_interval: Duration::from_secs(parse_or("PALOMA_VOICE_INTERVAL_SECS", 14_400)?),
            voice_enabled: flag("PALOMA_VOICE_ENABLED", false)?,
            daily_hour: match optional("PALOMA_DAILY_HOUR") {
                Some(raw) => Some(parse_hour(&raw)?),
                None => None,
            },
        };
        if schedule.text_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "PALOMA_TEXT_INTERVAL_SECS".to_string(),
                message: "interval must be at least one second".to_string(),
            });
        }
        if schedule.voice_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "PALOMA_VOICE_INTERVAL_SECS".to_string(),
                message: "interval must be at least one second".to_string(),
            });
        }

        let generation = GenerationConfig {
            api_key: SecretString::from(required("OPENAI_API_KEY")?),
            api_base: optional("OPENAI_API_BASE")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: optional("PALOMA_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            style: optional("PALOMA_STYLE")
                .unwrap_or_else(|| "cariñoso, cercano y espontáneo".to_string()),
            language: optional("PALOMA_LANGUAGE").unwrap_or_else(|| "es".to_string()),
            max_tokens: parse_or("PALOMA_MAX_TOKENS", 150)?,
            text_temperature: parse_or("PALOMA_TEXT_TEMPERATURE", 0.75)?,
            voice_temperature: parse_or("PALOMA_VOICE_TEMPERATURE", 0.9)?,
            context_window: parse_or("PALOMA_CONTEXT_WINDOW", 20)?,
            sync_limit: parse_or("PALOMA_SYNC_LIMIT", 25)?,
        };

        let channel = ChannelConfig {
            kind: match optional("PALOMA_CHANNEL") {
                Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                    key: "PALOMA_CHANNEL".to_string(),
                    message,
                })?,
                None => ChannelKind::Console,
            },
            bridge_url: optional("PALOMA_BRIDGE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:3000".to_string()),
            bridge_token: optional("PALOMA_BRIDGE_TOKEN").map(SecretString::from),
        };

        let audio = AudioConfig {
            api_key: optional("ELEVENLABS_API_KEY").map(SecretString::from),
            voice_id: optional("ELEVENLABS_VOICE_ID")
                .unwrap_or_else(|| "EXAVITQu4vr4xnSDxMaL".to_string()),
            artifacts_dir: optional("PALOMA_AUDIO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/audio")),
            keep_artifacts: parse_or("PALOMA_KEEP_ARTIFACTS", 5)?,
        };

        let defaults = ContentPolicy::default();
        let policy = ContentPolicy {
            min_length: parse_or("PALOMA_MIN_LENGTH", defaults.min_length)?,
            max_length: parse_or("PALOMA_MAX_LENGTH", defaults.max_length)?,
            pet_name_exempt_length: defaults.pet_name_exempt_length,
            forbidden_topics: list_or("PALOMA_FORBIDDEN_TOPICS", defaults.forbidden_topics),
            identity_tokens: list_or("PALOMA_IDENTITY_TOKENS", defaults.identity_tokens),
            disclosure_tokens: list_or("PALOMA_DISCLOSURE_TOKENS", defaults.disclosure_tokens),
            pet_names: list_or("PALOMA_PET_NAMES", defaults.pet_names),
        };

        Ok(Self {
            contact,
            store,
            schedule,
            generation,
            channel,
            audio,
            policy,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &str) -> Result<String, ConfigError> {
    optional(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|error: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: error.to_string(),
            }),
    }
}

fn flag(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional(key) {
        None => Ok(default),
        Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected true/false, got '{raw}'"),
        }),
    }
}

fn parse_hour(raw: &str) -> Result<u32, ConfigError> {
    let hour: u32 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: "PALOMA_DAILY_HOUR".to_string(),
            message: format!("expected an hour 0..=23, got '{raw}'"),
        })?;
    if hour > 23 {
        return Err(ConfigError::InvalidValue {
            key: "PALOMA_DAILY_HOUR".to_string(),
            message: format!("hour out of range: {hour}"),
        });
    }
    Ok(hour)
}

fn list_or(key: &str, default: Vec<String>) -> Vec<String> {
    match optional(key) {
        Some(raw) => split_list(&raw),
        None => default,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
