//! Categorization via a text-generation model (Messages API).

use super::{CategorizerClient, ServiceCredentials, ServiceError};
use async_trait::async_trait;
use lightbox_protocol::Category;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const SERVICE: &str = "Categorizer";

/// API version header
const API_VERSION: &str = "2023-06-01";

const MAX_TOKENS: u32 = 16;

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

pub struct LlmCategorizer {
    client: Client,
    endpoint: String,
    model: String,
}

impl LlmCategorizer {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    fn build_request(&self, labels: &[String]) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: format!(
                "You sort photos into exactly one category. Answer with the category name only, \
                 chosen from: {}.",
                Category::vocabulary()
            ),
            messages: vec![ApiMessage {
                role: "user",
                content: format!("Image labels: {}", labels.join(", ")),
            }],
        }
    }
}

/// First text block, mapped onto the vocabulary. Anything unrecognized is `Other`.
fn category_from_response(response: MessagesResponse) -> Result<Category, ServiceError> {
    let text = response
        .content
        .into_iter()
        .find_map(|block| match block {
            ResponseBlock::Text { text } => Some(text),
            ResponseBlock::Other => None,
        })
        .ok_or_else(|| ServiceError::InvalidResponse("no text block in response".to_string()))?;

    match text.parse::<Category>() {
        Ok(category) => Ok(category),
        Err(e) => {
            tracing::debug!(error = %e, "Categorizer answered outside the vocabulary");
            Ok(Category::Other)
        }
    }
}

#[async_trait]
impl CategorizerClient for LlmCategorizer {
    async fn classify(
        &self,
        labels: &[String],
        creds: &ServiceCredentials,
    ) -> Result<Category, ServiceError> {
        let key = creds
            .categorizer_api_key()
            .ok_or(ServiceError::MissingCredential { service: SERVICE })?;

        if labels.is_empty() {
            return Ok(Category::Other);
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.build_request(labels))
            .send()
            .await
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(ServiceError::RateLimited { service: SERVICE });
            }
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                service: SERVICE,
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        category_from_response(body)
    }
}
