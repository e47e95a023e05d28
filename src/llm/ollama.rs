//! 로컬 생성 백엔드 (Ollama)
//!
//! - `GET /api/tags`: 설치된 모델 목록
//! - `POST /api/pull`: 모델 다운로드
//! - `POST /api/generate`: 생성 (`stream: true` 면 NDJSON)

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::stream::{request_timeout, response_lines};
use super::GenerationBackend;
use crate::error::{RagError, Result};

const BACKEND: &str = "ollama";

/// 모델 다운로드 타임아웃 (큰 모델 고려)
const PULL_TIMEOUT_SECS: u64 = 3600;

/// Ollama 생성 백엔드
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    options: GenerateOptions,
    /// 비스트리밍 요청 전체 제한 시간
    timeout: Duration,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaBackend {
    pub fn new(base_url: &str, temperature: f32, max_tokens: u32, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            options: GenerateOptions {
                temperature,
                num_predict: max_tokens,
            },
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// 설치된 모델 이름 목록
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to list models: {}", e)))?;

        if !response.status().is_success() {
            return Err(RagError::transport(
                BACKEND,
                format!("Failed to list models: HTTP {}", response.status()),
            ));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to parse model list: {}", e)))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// 모델 다운로드 (완료까지 대기)
    pub async fn pull(&self, model: &str) -> Result<()> {
        let unavailable = |message: String| RagError::ModelUnavailable {
            model: model.to_string(),
            message,
        };

        let response = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .timeout(Duration::from_secs(PULL_TIMEOUT_SECS))
            .json(&PullRequest { model, stream: false })
            .send()
            .await
            .map_err(|e| unavailable(format!("download request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| unavailable(format!("download interrupted: {}", e)))?;

        let parsed: Option<PullResponse> = serde_json::from_str(&body).ok();
        if let Some(error) = parsed.as_ref().and_then(|p| p.error.clone()) {
            return Err(unavailable(error));
        }
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {}: {}", status, body)));
        }
        match parsed {
            Some(p) if p.status == "success" => Ok(()),
            Some(p) => Err(unavailable(format!("unexpected pull status '{}'", p.status))),
            None => Err(unavailable(format!("unexpected pull response: {}", body))),
        }
    }

    async fn send_generate(&self, model: &str, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let request = GenerateRequest {
            model,
            prompt,
            stream,
            options: self.options,
        };

        let mut builder = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request);
        if let Some(timeout) = request_timeout(self.timeout, stream) {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to send generate request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::transport(BACKEND, format!("HTTP {}: {}", status, body)));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn ensure_model_available(&self, model: &str) -> Result<()> {
        let installed = self.list_models().await?;
        if is_installed(&installed, model) {
            tracing::debug!("Model '{}' is available locally", model);
            return Ok(());
        }

        tracing::info!("Model '{}' is not downloaded. Pulling...", model);
        self.pull(model).await?;
        tracing::info!("Successfully downloaded model '{}'", model);
        Ok(())
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let response = self.send_generate(model, prompt, false).await?;
        let chunk: GenerateChunk = response
            .json()
            .await
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to parse generate response: {}", e)))?;

        match chunk.error {
            Some(error) => Err(RagError::transport(BACKEND, error)),
            None => Ok(chunk.response),
        }
    }

    async fn stream(&self, model: &str, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let response = self.send_generate(model, prompt, true).await?;
        let mut lines = response_lines(response, BACKEND);

        let stream = async_stream::try_stream! {
            while let Some(line) = lines.next().await {
                let chunk = parse_chunk(&line?)?;
                if !chunk.response.is_empty() {
                    yield chunk.response;
                }
                if chunk.done {
                    break;
                }
            }
        };

        Ok(stream.boxed())
    }

    fn name(&self) -> &str {
        BACKEND
    }
}

/// NDJSON 한 줄 파싱
fn parse_chunk(line: &str) -> Result<GenerateChunk> {
    let chunk: GenerateChunk = serde_json::from_str(line)
        .map_err(|e| RagError::transport(BACKEND, format!("Invalid stream line: {}", e)))?;
    match chunk.error {
        Some(error) => Err(RagError::transport(BACKEND, error)),
        None => Ok(chunk),
    }
}

/// 태그 생략 시 `:latest` 로 간주
fn is_installed(installed: &[String], model: &str) -> bool {
    let wanted = if model.contains(':') {
        model.to_string()
    } else {
        format!("{}:latest", model)
    };
    installed.iter().any(|name| name == model || *name == wanted)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_installed() {
        let installed = vec!["deepseek-r1:1.5b".to_string(), "llama3:latest".to_string()];
        assert!(is_installed(&installed, "deepseek-r1:1.5b"));
        assert!(is_installed(&installed, "llama3"));
        assert!(!is_installed(&installed, "deepseek-r1:7b"));
        assert!(!is_installed(&[], "llama3"));
    }

    #[test]
    fn test_parse_chunk() {
        let chunk = parse_chunk(r#"{"model":"m","response":"Hel","done":false}"#).unwrap();
        assert_eq!(chunk.response, "Hel");
        assert!(!chunk.done);

        let last = parse_chunk(r#"{"model":"m","response":"","done":true}"#).unwrap();
        assert!(last.done);
    }

    #[test]
    fn test_parse_chunk_error_line() {
        let err = parse_chunk(r#"{"error":"model not found"}"#).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_generate_request_shape() {
        let request = GenerateRequest {
            model: "deepseek-r1:1.5b",
            prompt: "hi",
            stream: true,
            options: GenerateOptions {
                temperature: 0.2,
                num_predict: 64,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["options"]["num_predict"], 64);
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let backend = OllamaBackend::new("http://127.0.0.1:9", 0.2, 16, 2).unwrap();
        let err = backend.ensure_model_available("m").await.unwrap_err();
        assert!(err.is_transport());

        let err = backend.pull("m").await.unwrap_err();
        assert!(matches!(err, RagError::ModelUnavailable { .. }));
    }
}
