//! Label detection over the Vision `images:annotate` REST API.

use super::{AnnotationClient, ServiceCredentials, ServiceError};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const SERVICE: &str = "Vision";

#[derive(Debug, Serialize)]
struct AnnotateRequest {
    requests: Vec<ImageRequest>,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "maxResults")]
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default, rename = "labelAnnotations")]
    label_annotations: Vec<LabelAnnotation>,
    #[serde(default)]
    error: Option<StatusBody>,
}

#[derive(Debug, Deserialize)]
struct LabelAnnotation {
    description: String,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    message: String,
}

pub struct VisionClient {
    client: Client,
    endpoint: String,
    max_labels: u32,
}

impl VisionClient {
    pub fn new(endpoint: impl Into<String>, max_labels: u32) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            max_labels,
        }
    }

    fn build_request(&self, image: &[u8]) -> AnnotateRequest {
        AnnotateRequest {
            requests: vec![ImageRequest {
                image: ImageContent {
                    content: base64::engine::general_purpose::STANDARD.encode(image),
                },
                features: vec![Feature {
                    kind: "LABEL_DETECTION",
                    max_results: self.max_labels,
                }],
            }],
        }
    }
}

/// Labels in the order the service ranked them.
fn labels_from_response(response: AnnotateResponse) -> Result<Vec<String>, ServiceError> {
    let Some(first) = response.responses.into_iter().next() else {
        return Ok(Vec::new());
    };
    if let Some(error) = first.error {
        if !error.message.is_empty() {
            return Err(ServiceError::Rejected {
                service: SERVICE,
                message: error.message,
            });
        }
    }
    Ok(first
        .label_annotations
        .into_iter()
        .map(|l| l.description)
        .collect())
}

#[async_trait]
impl AnnotationClient for VisionClient {
    async fn detect_labels(
        &self,
        image: &[u8],
        creds: &ServiceCredentials,
    ) -> Result<Vec<String>, ServiceError> {
        let key = creds
            .vision_api_key()
            .ok_or(ServiceError::MissingCredential { service: SERVICE })?;

        let response = self
            .client
            .post(format!("{}/v1/images:annotate", self.endpoint))
            .query(&[("key", key)])
            .json(&self.build_request(image))
            .send()
            .await
            .map_err(|e| ServiceError::Http(e.without_url().to_string()))?;

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

        let body: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.without_url().to_string()))?;
        labels_from_response(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_shape() {
        let client = VisionClient::new("https://vision.example.com/", 5);
        assert_eq!(client.endpoint, "https://vision.example.com");

        let json = serde_json::to_value(client.build_request(b"abc")).unwrap();
        assert_eq!(json["requests"][0]["image"]["content"], "YWJj");
        assert_eq!(json["requests"][0]["features"][0]["type"], "LABEL_DETECTION");
        assert_eq!(json["requests"][0]["features"][0]["maxResults"], 5);
    }

    #[test]
    fn test_labels_keep_service_order() {
        let body: AnnotateResponse = serde_json::from_str(
            r#"{"responses":[{"labelAnnotations":[
                {"description":"Dog","score":0.98},
                {"description":"Grass","score":0.91},
                {"description":"Ball","score":0.80}
            ]}]}"#,
        )
        .unwrap();
        assert_eq!(
            labels_from_response(body).unwrap(),
            vec!["Dog", "Grass", "Ball"]
        );
    }

    #[test]
    fn test_empty_response_is_no_labels() {
        let body: AnnotateResponse = serde_json::from_str(r#"{"responses":[{}]}"#).unwrap();
        assert!(labels_from_response(body).unwrap().is_empty());
    }

    #[test]
    fn test_error_in_body_is_rejected() {
        let body: AnnotateResponse = serde_json::from_str(
            r#"{"responses":[{"error":{"code":3,"message":"Bad image data."}}]}"#,
        )
        .unwrap();
        assert!(matches!(
            labels_from_response(body),
            Err(ServiceError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() {
        let client = VisionClient::new("http://127.0.0.1:9", 5);
        let err = client
            .detect_labels(b"img", &ServiceCredentials::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MissingCredential { .. }));
    }
}
