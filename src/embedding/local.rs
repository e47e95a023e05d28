//! 로컬 임베딩 (Ollama `/api/embed`)
//!
//! 입력이 모델 최대 길이를 넘으면 실패하지 않고 앞부분만 사용합니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::error::{RagError, Result};

const BACKEND: &str = "ollama";

/// Ollama 임베딩 구현체
#[derive(Debug)]
pub struct LocalEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_length: usize,
    name: String,
}

impl LocalEmbedder {
    /// # Arguments
    /// * `base_url` - Ollama 서버 URL (예: `http://localhost:11434`)
    /// * `model` - 임베딩 모델 이름
    /// * `max_length` - 최대 입력 길이 (공백 기준 토큰 수)
    pub fn new(base_url: &str, model: &str, max_length: usize, timeout_secs: u64) -> Result<Self> {
        if max_length == 0 {
            return Err(RagError::Config("embedding max_length must be greater than 0".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_length,
            name: format!("local:{}", model),
        })
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = truncate_tokens(text, self.max_length);
        if input.len() < text.len() {
            tracing::debug!("Truncated embedding input to {} tokens", self.max_length);
        }

        let request = EmbedRequest {
            model: &self.model,
            input: &input,
            truncate: true,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to send embedding request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(RagError::transport(BACKEND, format!("HTTP {}: {}", status, body)));
        }

        let parsed: EmbedResponse = serde_json::from_str(&body)
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to parse embedding response: {}", e)))?;

        parsed
            .embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RagError::transport(BACKEND, "empty embedding in response"))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 앞에서부터 `max_tokens` 개의 공백 구분 토큰만 남김
fn truncate_tokens(text: &str, max_tokens: usize) -> String {
    let mut tokens = text.split_whitespace();
    let kept: Vec<&str> = tokens.by_ref().take(max_tokens).collect();
    if tokens.next().is_none() {
        return text.to_string();
    }
    kept.join(" ")
}

// ============================================================================
// Tests
// ============================================================================
