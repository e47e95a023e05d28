//! 원격 임베딩 (OpenAI 호환 `/embeddings`)
//!
//! 요청: `{model, input: [text]}` → 응답: `{data: [{embedding}]}`
//! 429 / 5xx / 전송 실패는 지수 백오프로 재시도합니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::error::{RagError, Result};

const BACKEND: &str = "openai";

/// 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 1000;

/// OpenAI 호환 임베딩 구현체
#[derive(Debug)]
pub struct RemoteEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    name: String,
}

impl RemoteEmbedder {
    pub fn new(base_url: &str, model: &str, api_key: String, timeout_secs: u64) -> Result<Self> {
        if api_key.is_empty() {
            return Err(RagError::Config("API key must not be empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            name: format!("remote:{}", model),
        })
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![strip_newlines(text)],
        };
        let url = format!("{}/embeddings", self.base_url);

        let mut last_error: Option<RagError> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    "Embedding request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(RagError::transport(
                        BACKEND,
                        format!("Failed to send embedding request: {}", e),
                    ));
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| RagError::transport(BACKEND, format!("Failed to read response body: {}", e)))?;

            if status.is_success() {
                let parsed: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
                    RagError::transport(BACKEND, format!("Failed to parse embedding response: {}", e))
                })?;
                return parsed
                    .data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| RagError::transport(BACKEND, "API returned empty response"));
            }

            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            let error = RagError::transport(BACKEND, format!("HTTP {}: {}", status, message));

            // 429, 5xx 만 재시도
            if status.as_u16() == 429 || status.is_server_error() {
                last_error = Some(error);
                continue;
            }
            return Err(error);
        }

        Err(last_error.unwrap_or_else(|| {
            RagError::transport(BACKEND, format!("Embedding failed after {} retries", MAX_RETRIES))
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 줄바꿈을 공백으로 치환
fn strip_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace('\n', " ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_newlines() {
        assert_eq!(strip_newlines("a\nb\r\nc"), "a b c");
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let result = RemoteEmbedder::new("https://api.openai.com/v1", "m", String::new(), 10);
        assert!(matches!(result, Err(RagError::Config(_))));
    }

    #[test]
    fn test_request_shape() {
        let request = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: vec![strip_newlines("line one\nline two")],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"][0], "line one line two");
    }

    #[test]
    fn test_response_parse() {
        let body = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,0.2]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
    }

    #[test]
    fn test_name() {
        let embedder =
            RemoteEmbedder::new("https://api.openai.com/v1/", "text-embedding-3-small", "k".into(), 10)
                .unwrap();
        assert_eq!(embedder.name(), "remote:text-embedding-3-small");
        assert_eq!(embedder.base_url, "https://api.openai.com/v1");
    }
}
