//! Vision model client seam and the OpenAI-compatible HTTP implementation.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::VisionError;

/// Raw answer from a vision model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionResponse {
    /// Model output text.
    pub text: String,
    /// Model that produced the answer.
    pub model: String,
    /// Error reported in-band by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A model that can read an invoice image.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn analyze_image(
        &self,
        image_path: &Path,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<VisionResponse, VisionError>;
}

#[async_trait]
impl<T: VisionClient + ?Sized> VisionClient for Arc<T> {
    async fn analyze_image(
        &self,
        image_path: &Path,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<VisionResponse, VisionError> {
        (**self).analyze_image(image_path, prompt, max_tokens).await
    }
}

#[cfg(feature = "http")]
pub use http::OpenAiVisionClient;

#[cfg(feature = "http")]
mod http {
    use std::path::Path;
    use std::time::Duration;

    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
    use image::ImageFormat;
    use reqwest::{Client, StatusCode};
    use serde::Deserialize;
    use serde_json::json;
    use tracing::{debug, warn};

    use super::{VisionClient, VisionResponse};
    use crate::error::VisionError;
    use crate::models::config::VisionConfig;

    /// Chat-completions client sending the image as a base64 data URL.
    #[derive(Clone)]
    pub struct OpenAiVisionClient {
        http: Client,
        endpoint: String,
        model: String,
        api_key: String,
        timeout: Duration,
    }

    #[derive(Deserialize)]
    struct ChatCompletion {
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: ChoiceMessage,
    }

    #[derive(Deserialize)]
    struct ChoiceMessage {
        #[serde(default)]
        content: Option<String>,
    }

    impl OpenAiVisionClient {
        pub fn new(
            endpoint: impl Into<String>,
            model: impl Into<String>,
            api_key: impl Into<String>,
            timeout: Duration,
        ) -> Result<Self, VisionError> {
            let http = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| VisionError::Config(e.to_string()))?;
            Ok(Self {
                http,
                endpoint: endpoint.into(),
                model: model.into(),
                api_key: api_key.into(),
                timeout,
            })
        }

        /// Build a client, reading the API key from the configured variable.
        pub fn from_config(config: &VisionConfig) -> Result<Self, VisionError> {
            let api_key = std::env::var(&config.api_key_env)
                .map_err(|_| VisionError::Config(format!("{} not set", config.api_key_env)))?;
            Self::new(
                config.endpoint.clone(),
                config.model.clone(),
                api_key,
                config.request_timeout(),
            )
        }

        fn transport_error(&self, e: reqwest::Error) -> VisionError {
            warn!("Vision request failed: {}", e);
            if e.is_timeout() {
                VisionError::Timeout(self.timeout)
            } else if e.is_connect() || e.is_request() {
                VisionError::Unavailable(e.to_string())
            } else {
                VisionError::Api(e.to_string())
            }
        }
    }

    #[async_trait]
    impl VisionClient for OpenAiVisionClient {
        async fn analyze_image(
            &self,
            image_path: &Path,
            prompt: &str,
            max_tokens: u32,
        ) -> Result<VisionResponse, VisionError> {
            let mime = ImageFormat::from_path(image_path)
                .map(|f| f.to_mime_type())
                .map_err(|e| {
                    VisionError::Config(format!(
                        "unsupported image type {}: {}",
                        image_path.display(),
                        e
                    ))
                })?;
            let bytes = tokio::fs::read(image_path).await?;
            let data_url = format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(&bytes));

            let body = json!({
                "model": self.model,
                "max_tokens": max_tokens,
                "temperature": 0.0,
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": prompt},
                        {"type": "image_url", "image_url": {"url": data_url}}
                    ]
                }]
            });

            let start = std::time::Instant::now();
            let response = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                warn!("Vision API returned {}: {}", status, error_text);
                return Err(if is_transient(status) {
                    VisionError::Unavailable(format!("{}: {}", status, error_text))
                } else {
                    VisionError::Api(format!("{}: {}", status, error_text))
                });
            }

            let completion: ChatCompletion = response
                .json()
                .await
                .map_err(|e| VisionError::MalformedResponse(e.to_string()))?;

            let text = completion
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| VisionError::MalformedResponse("response has no content".into()))?;

            debug!(
                "Vision completion from {} in {} ms",
                self.model,
                start.elapsed().as_millis()
            );

            Ok(VisionResponse {
                text,
                model: completion.model.unwrap_or_else(|| self.model.clone()),
                error: None,
            })
        }
    }

    fn is_transient(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

}
