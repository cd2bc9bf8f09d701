//! TOML configuration file loading
//!
//! Supports `~/.config/reflect/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ReflectConfigFile {
    /// Reflection server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Classify-and-respond model configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Turn-taking session configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Turn-taking timings
    #[serde(default)]
    pub turn: TurnFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Port to listen on
    pub port: Option<u16>,

    /// Static web UI directory
    pub static_dir: Option<String>,

    /// `SQLite` database file
    pub database: Option<String>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,

    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,

    /// API key
    pub api_key: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f64>,
}

/// Session (client side) configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Base URL of the reflection server
    pub endpoint: Option<String>,

    /// File holding the persisted identity token
    pub identity_file: Option<String>,
}

/// Turn-taking timings, all in milliseconds
#[derive(Debug, Default, Deserialize)]
pub struct TurnFileConfig {
    pub warmup_ms: Option<u64>,
    pub silence_ms: Option<u64>,
    pub min_chars: Option<usize>,
    pub rearm_ms: Option<u64>,
    pub recovery_ms: Option<u64>,
    pub fallback_reply: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ReflectConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ReflectConfigFile {
    config_file_path().map_or_else(ReflectConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path
pub fn load_from(path: &Path) -> ReflectConfigFile {
    if !path.exists() {
        return ReflectConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ReflectConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ReflectConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/reflect/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("reflect").join("config.toml"))
}
