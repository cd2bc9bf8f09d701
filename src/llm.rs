//! Tone classification and reply generation
//!
//! One chat completion per utterance returns both the tone label and the
//! empathetic reply.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::tone::Tone;
use crate::{Error, Result};

const SYSTEM_PROMPT: &str = r#"You are a warm, attentive companion helping someone reflect on their mood.

Read what the user said and reply with JSON of this exact shape:
{"tone": "<tone>", "response": "<reply>"}

tone must be one of: calm, excited, sad, neutral, angry, anxious, hopeful.

response is what you say back, out loud:
- One to three short sentences, spoken style, no lists or markdown
- Acknowledge the feeling you heard before anything else
- Be supportive without diagnosing or lecturing
- End with a gentle question when it helps them keep reflecting"#;

/// Tone and reply for one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflection {
    pub tone: Tone,
    pub response: String,
}

/// Produces a [`Reflection`] for an utterance
#[async_trait]
pub trait ReflectionEngine: Send + Sync {
    /// Classify `text` and write a reply to it
    ///
    /// # Errors
    ///
    /// Returns error if the model call fails or its output is unusable
    async fn reflect(&self, text: &str) -> Result<Reflection>;
}

/// `OpenAI`-compatible chat completions engine
pub struct OpenAiEngine {
    client: reqwest::Client,
    api_key: SecretString,
    url: String,
    model: String,
}

impl OpenAiEngine {
    /// Create an engine from LLM settings
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY required for reflection".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelOutput {
    tone: Option<String>,
    response: Option<String>,
}

#[async_trait]
impl ReflectionEngine for OpenAiEngine {
    async fn reflect(&self, text: &str) -> Result<Reflection> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            temperature: 0.7,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("chat completion error {status}: {body}")));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Llm("empty completion".to_string()))?;

        let reflection = parse_model_output(&content)?;
        tracing::debug!(tone = %reflection.tone, "reflection generated");
        Ok(reflection)
    }
}

/// Parse the model's JSON answer
///
/// # Errors
///
/// Returns error if the answer is not JSON or has no reply text
pub fn parse_model_output(content: &str) -> Result<Reflection> {
    let output: ModelOutput = serde_json::from_str(content.trim())
        .map_err(|e| Error::Llm(format!("unparsable model output: {e}")))?;

    let response = output
        .response
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::Llm("model output missing response".to_string()))?;

    Ok(Reflection {
        tone: output
            .tone
            .as_deref()
            .map_or(Tone::Neutral, Tone::parse_lenient),
        response,
    })
}
