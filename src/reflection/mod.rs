//! Reflection service contract
//!
//! The reflection service classifies the tone of an utterance, writes an
//! empathetic reply, stores the turn, and hands back the identity token the
//! turn was filed under.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tone::Tone;
use crate::{Error, Result};

pub use http::HttpReflectionClient;

/// Outcome of one reflected utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResult {
    pub tone: Tone,
    pub reply: String,
    pub identity: String,
}

/// Remote classify-and-respond endpoint
#[async_trait]
pub trait ReflectionClient: Send + Sync {
    /// Reflect on `text` on behalf of `identity` (a new identity is issued when absent)
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-success status, or a payload
    /// missing any required field
    async fn reflect(&self, text: &str, identity: Option<&str>) -> Result<TurnResult>;
}

/// Request body of `POST /api/reflect`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Success body of `POST /api/reflect`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectResponse {
    pub response: String,
    pub tone: Tone,
    pub user_id: String,
}

/// Failure body shared by all endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Success body as received, before validation
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReflectResponse {
    response: Option<String>,
    tone: Option<String>,
    user_id: Option<String>,
}

impl TryFrom<RawReflectResponse> for TurnResult {
    type Error = Error;

    fn try_from(raw: RawReflectResponse) -> Result<Self> {
        let reply = raw
            .response
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::Reflection("response missing reply text".to_string()))?;

        let tone = raw
            .tone
            .filter(|t| !t.trim().is_empty())
            .map(|t| Tone::parse_lenient(&t))
            .ok_or_else(|| Error::Reflection("response missing tone".to_string()))?;

        let identity = raw
            .user_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::Reflection("response missing identity token".to_string()))?;

        Ok(Self {
            tone,
            reply,
            identity,
        })
    }
}

/// Validate a raw success body
///
/// # Errors
///
/// Returns error if the body is not JSON or lacks a required field
pub fn parse_reflect_response(body: &[u8]) -> Result<TurnResult> {
    let raw: RawReflectResponse = serde_json::from_slice(body)
        .map_err(|e| Error::Reflection(format!("malformed response: {e}")))?;
    TurnResult::try_from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_response() {
        let result = parse_reflect_response(
            br#"{"response":"Great to hear!","tone":"excited","userId":"u-1"}"#,
        )
        .unwrap();

        assert_eq!(result.tone, Tone::Excited);
        assert_eq!(result.reply, "Great to hear!");
        assert_eq!(result.identity, "u-1");
    }

    #[test]
    fn test_unknown_tone_falls_back_to_neutral() {
        let result =
            parse_reflect_response(br#"{"response":"Hm.","tone":"wistful","userId":"u-1"}"#)
                .unwrap();
        assert_eq!(result.tone, Tone::Neutral);
    }

    #[test]
    fn test_missing_fields_are_failures() {
        let bodies: [&[u8]; 6] = [
            br#"{"tone":"calm","userId":"u-1"}"#,
            br#"{"response":"  ","tone":"calm","userId":"u-1"}"#,
            br#"{"response":"Okay","userId":"u-1"}"#,
            br#"{"response":"Okay","tone":"calm"}"#,
            br#"{"error":"Failed to process reflection"}"#,
            b"not json",
        ];

        for body in bodies {
            assert!(
                matches!(parse_reflect_response(body), Err(Error::Reflection(_))),
                "accepted {}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_request_omits_absent_identity() {
        let body = serde_json::to_value(ReflectRequest {
            text: "hello there".to_string(),
            user_id: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "text": "hello there" }));
    }
}
