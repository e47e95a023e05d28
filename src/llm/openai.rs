//! 원격 생성 백엔드 (OpenAI 호환 chat completions)
//!
//! 스트리밍 응답은 SSE(`data: {...}`) 형식이며 `data: [DONE]` 으로 끝납니다.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::stream::{request_timeout, response_lines};
use super::GenerationBackend;
use crate::error::{RagError, Result};

const BACKEND: &str = "openai";

/// OpenAI 호환 생성 백엔드
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    /// 비스트리밍 요청 전체 제한 시간
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// SSE 한 줄 해석 결과
#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

impl OpenAiBackend {
    pub fn new(
        base_url: &str,
        api_key: String,
        max_tokens: u32,
        temperature: f32,
        timeout_secs: u64,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(RagError::Config("API key must not be empty".into()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_tokens,
            temperature,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn request<'a>(&self, model: &'a str, prompt: &'a str, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request);
        if let Some(timeout) = request_timeout(self.timeout, request.stream) {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to send chat request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::transport(BACKEND, format!("HTTP {}: {}", status, body)));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    /// 원격 API는 가용성 확인이 필요 없음
    async fn ensure_model_available(&self, _model: &str) -> Result<()> {
        Ok(())
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let response = self.send(&self.request(model, prompt, false)).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::transport(BACKEND, format!("Failed to parse chat response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::transport(BACKEND, "API returned no choices"))
    }

    async fn stream(&self, model: &str, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let response = self.send(&self.request(model, prompt, true)).await?;
        let mut lines = response_lines(response, BACKEND);

        let stream = async_stream::try_stream! {
            while let Some(line) = lines.next().await {
                match parse_sse_line(&line?)? {
                    SseEvent::Delta(text) => yield text,
                    SseEvent::Done => break,
                    SseEvent::Skip => {}
                }
            }
        };

        Ok(stream.boxed())
    }

    fn name(&self) -> &str {
        BACKEND
    }
}

/// SSE 한 줄 파싱
fn parse_sse_line(line: &str) -> Result<SseEvent> {
    let Some(data) = line.strip_prefix("data:") else {
        // event:, id:, 주석(:) 등
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let chunk: ChatChunk = serde_json::from_str(data)
        .map_err(|e| RagError::transport(BACKEND, format!("Invalid stream event: {}", e)))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty())
        .map(SseEvent::Delta)
        .unwrap_or(SseEvent::Skip))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_delta() {
        let line = r#"data: {"id":"1","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), SseEvent::Delta("Hel".into()));
    }

    #[test]
    fn test_parse_sse_done_and_skip() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseEvent::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseEvent::Skip);
        let role_only = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role_only).unwrap(), SseEvent::Skip);
    }

    #[test]
    fn test_parse_sse_invalid_json() {
        assert!(parse_sse_line("data: {not json").unwrap_err().is_transport());
    }

    #[test]
    fn test_chat_request_shape() {
        let backend = OpenAiBackend::new("https://api.openai.com/v1", "k".into(), 256, 0.5, 10).unwrap();
        let json = serde_json::to_value(backend.request("gpt-4o", "hello", true)).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["max_tokens"], 256);
        assert_eq!(json["stream"], true);
    }

    #[tokio::test]
    async fn test_no_availability_check() {
        let backend = OpenAiBackend::new("http://127.0.0.1:9", "k".into(), 16, 0.0, 2).unwrap();
        assert!(backend.ensure_model_available("gpt-4o").await.is_ok());
        assert!(backend.complete("gpt-4o", "hi").await.unwrap_err().is_transport());
    }
}
