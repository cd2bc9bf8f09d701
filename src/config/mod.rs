//! Configuration management for the reflection gateway
//!
//! Values resolve as env > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::Result;

/// Spoken when the reflection service fails
pub const DEFAULT_FALLBACK_REPLY: &str =
    "I'm having trouble responding right now. Let's try again in a moment.";

/// Reflection gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database, identity token)
    pub data_dir: PathBuf,

    /// Reflection server configuration
    pub server: ServerConfig,

    /// Classify-and-respond model configuration
    pub llm: LlmConfig,

    /// Voice processing configuration
    pub voice: VoiceConfig,

    /// Turn-taking session configuration
    pub session: SessionConfig,

    /// Turn-taking timings
    pub turn: TurnTimings,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,

    /// `SQLite` database file
    pub database: PathBuf,
}

/// LLM configuration (OpenAI-compatible chat completions)
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API base URL, without the `/chat/completions` suffix
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// API key (from `OPENAI_API_KEY` env)
    pub api_key: Option<SecretString>,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f64,
}

/// Client-side session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the reflection server
    pub endpoint: String,

    /// File holding the persisted identity token
    pub identity_file: PathBuf,
}

/// Timing and threshold knobs for the turn-taking controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTimings {
    /// Delay before listening is (re)started after mount or idle
    pub warmup: Duration,

    /// Quiet period that closes an utterance
    pub silence: Duration,

    /// Utterances must be strictly longer than this many characters to dispatch
    pub min_chars: usize,

    /// Delay between playback settling and listening again
    pub rearm: Duration,

    /// Delay before a failed turn clears its error and listens again
    pub recovery: Duration,

    /// Reply spoken when the reflection service fails
    pub fallback_reply: String,
}

impl Default for TurnTimings {
    fn default() -> Self {
        Self {
            warmup: Duration::from_millis(1000),
            silence: Duration::from_millis(2000),
            min_chars: 10,
            rearm: Duration::from_millis(1500),
            recovery: Duration::from_millis(3000),
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
        }
    }
}

impl TurnTimings {
    fn from_file(fc: file::TurnFileConfig) -> Self {
        let defaults = Self::default();
        let ms = |env: &str, file: Option<u64>, default: Duration| {
            env_parse::<u64>(env)
                .or(file)
                .map_or(default, Duration::from_millis)
        };

        Self {
            warmup: ms("REFLECT_WARMUP_MS", fc.warmup_ms, defaults.warmup),
            silence: ms("REFLECT_SILENCE_MS", fc.silence_ms, defaults.silence),
            min_chars: env_parse("REFLECT_MIN_CHARS")
                .or(fc.min_chars)
                .unwrap_or(defaults.min_chars),
            rearm: ms("REFLECT_REARM_MS", fc.rearm_ms, defaults.rearm),
            recovery: ms("REFLECT_RECOVERY_MS", fc.recovery_ms, defaults.recovery),
            fallback_reply: std::env::var("REFLECT_FALLBACK_REPLY")
                .ok()
                .or(fc.fallback_reply)
                .unwrap_or(defaults.fallback_reply),
        }
    }
}

impl Config {
    /// Load configuration from the standard config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Build configuration from a parsed config file, overlaid by environment
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created
    pub fn from_file(fc: file::ReflectConfigFile) -> Result<Self> {
        // Determine data directory (~/.local/share/reflect on Linux)
        let data_dir = std::env::var("REFLECT_DATA_DIR").map_or_else(
            |_| {
                directories::BaseDirs::new()
                    .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("reflect"))
            },
            PathBuf::from,
        );
        std::fs::create_dir_all(&data_dir)?;

        let server = ServerConfig {
            port: env_parse("REFLECT_PORT")
                .or_else(|| env_parse("PORT"))
                .or(fc.server.port)
                .unwrap_or(18800),
            static_dir: std::env::var("REFLECT_STATIC_DIR")
                .ok()
                .or(fc.server.static_dir)
                .map(PathBuf::from),
            database: std::env::var("REFLECT_DATABASE")
                .ok()
                .or(fc.server.database)
                .map_or_else(|| data_dir.join("reflect.db"), PathBuf::from),
        };

        let llm = LlmConfig {
            base_url: std::env::var("REFLECT_LLM_BASE_URL")
                .ok()
                .or(fc.llm.base_url)
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: std::env::var("REFLECT_LLM_MODEL")
                .ok()
                .or(fc.llm.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .or(fc.llm.api_key)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
        };

        let voice = VoiceConfig {
            stt_model: std::env::var("REFLECT_STT_MODEL")
                .ok()
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: std::env::var("REFLECT_TTS_MODEL")
                .ok()
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: std::env::var("REFLECT_TTS_VOICE")
                .ok()
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| "alloy".to_string()),
            tts_speed: fc.voice.tts_speed.unwrap_or(1.0).clamp(0.25, 4.0),
        };

        let session = SessionConfig {
            endpoint: std::env::var("REFLECT_ENDPOINT")
                .ok()
                .or(fc.session.endpoint)
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", server.port)),
            identity_file: std::env::var("REFLECT_IDENTITY_FILE")
                .ok()
                .or(fc.session.identity_file)
                .map_or_else(|| data_dir.join("identity"), PathBuf::from),
        };

        Ok(Self {
            data_dir,
            server,
            llm,
            voice,
            session,
            turn: TurnTimings::from_file(fc.turn),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let timings = TurnTimings::default();
        assert_eq!(timings.warmup, Duration::from_secs(1));
        assert_eq!(timings.silence, Duration::from_secs(2));
        assert_eq!(timings.min_chars, 10);
        assert_eq!(timings.recovery, Duration::from_secs(3));
        assert!(timings.rearm > Duration::from_secs(1));
        assert!(timings.rearm < timings.recovery);
    }

    #[test]
    fn test_file_timings_override_defaults() {
        let fc: file::TurnFileConfig = toml::from_str("silence_ms = 1200\nmin_chars = 4").unwrap();
        let timings = TurnTimings::from_file(fc);
        assert_eq!(timings.silence, Duration::from_millis(1200));
        assert_eq!(timings.min_chars, 4);
        assert_eq!(timings.warmup, Duration::from_secs(1));
    }
}
