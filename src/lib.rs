//! Reflect Gateway - voice-driven mood reflection
//!
//! This library provides:
//! - A turn-taking controller that turns continuous speech into discrete
//!   reflection turns and speaks the replies back
//! - Capture and playback adapters (console, and microphone/speaker with the
//!   `audio` feature)
//! - The reflection server: tone classification, empathetic replies, and a
//!   per-user mood history
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Session (client)                   │
//! │   Capture  ──►  TurnController  ──►  Playback        │
//! └───────────────────────┬──────────────────────────────┘
//!                         │ POST /api/reflect
//! ┌───────────────────────▼──────────────────────────────┐
//! │                Reflection server                      │
//! │   ReflectionEngine (LLM)  │  users / turns (SQLite)   │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod llm;
pub mod reflection;
pub mod tone;
pub mod turn;
pub mod voice;

pub use config::{Config, TurnTimings};
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use identity::{FileIdentityStore, IdentityStore, MemoryIdentityStore};
pub use llm::{OpenAiEngine, Reflection, ReflectionEngine};
pub use reflection::{HttpReflectionClient, ReflectionClient, TurnResult};
pub use tone::Tone;
pub use turn::{ControllerHandle, ControllerState, Phase, TurnController};
