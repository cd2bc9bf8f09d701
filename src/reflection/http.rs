//! HTTP client for the reflection endpoint

use std::time::Duration;

use async_trait::async_trait;

use super::{ReflectRequest, ReflectionClient, TurnResult, parse_reflect_response};
use crate::{Error, Result};

/// Upper bound on one reflection round trip
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to a reflection server over HTTP
#[derive(Debug, Clone)]
pub struct HttpReflectionClient {
    client: reqwest::Client,
    url: String,
}

impl HttpReflectionClient {
    /// Create a client for the server at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/api/reflect", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ReflectionClient for HttpReflectionClient {
    async fn reflect(&self, text: &str, identity: Option<&str>) -> Result<TurnResult> {
        let request = ReflectRequest {
            text: text.to_string(),
            user_id: identity.map(ToString::to_string),
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<super::ErrorResponse>(&body)
                .map_or_else(|_| String::from_utf8_lossy(&body).into_owned(), |e| e.error);
            tracing::warn!(status = %status, message = %message, "reflection endpoint error");
            return Err(Error::Reflection(format!("status {status}: {message}")));
        }

        let result = parse_reflect_response(&body)?;
        tracing::debug!(tone = %result.tone, reply_len = result.reply.len(), "reflection received");
        Ok(result)
    }
}
