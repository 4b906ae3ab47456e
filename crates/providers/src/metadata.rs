//! Cheap-model adapter for metadata generation (titles, branch names,
//! commit messages).
//!
//! Speaks the OpenAI-compatible chat-completions shape; most inference
//! gateways accept it. Callers treat failures as non-fatal.

use serde::Deserialize;
use serde_json::json;

use paseo_domain::{Error, Result};

enum Backend {
    Http {
        client: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
        model: String,
    },
    /// Returns a fixed response; used by tests.
    Fixed(String),
}

pub struct MetadataModel {
    backend: Backend,
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

impl MetadataModel {
    pub fn http(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            backend: Backend::Http {
                client: reqwest::Client::new(),
                base_url,
                api_key,
                model,
            },
        }
    }

    /// A model that always answers with `response`. Test-only convenience.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self {
            backend: Backend::Fixed(response.into()),
        }
    }

    /// One-shot generation. Returns the assistant text.
    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        match &self.backend {
            Backend::Fixed(response) => Ok(response.clone()),
            Backend::Http {
                client,
                base_url,
                api_key,
                model,
            } => {
                let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
                let body = json!({
                    "model": model,
                    "messages": [
                        {"role": "system", "content": system},
                        {"role": "user", "content": prompt},
                    ],
                    "max_tokens": 256,
                });

                let mut req = client.post(&url).json(&body);
                if let Some(key) = api_key {
                    req = req.bearer_auth(key);
                }

                let resp = req.send().await.map_err(|e| Error::Provider {
                    provider: "metadata".into(),
                    message: e.to_string(),
                })?;

                if !resp.status().is_success() {
                    return Err(Error::Provider {
                        provider: "metadata".into(),
                        message: format!("HTTP {}", resp.status()),
                    });
                }

                let parsed: ChatResponse = resp.json().await.map_err(|e| Error::Provider {
                    provider: "metadata".into(),
                    message: format!("malformed response: {e}"),
                })?;

                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| Error::Provider {
                        provider: "metadata".into(),
                        message: "empty completion".into(),
                    })
            }
        }
    }
}
