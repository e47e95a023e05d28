//! LLM 모듈 - 응답 생성
//!
//! 검색 컨텍스트와 질문을 프롬프트 템플릿에 채워 생성 백엔드를 호출합니다.
//!
//! - [`OllamaBackend`]: 로컬 모델, 생성 전에 모델 존재 확인 후 없으면 다운로드
//! - [`OpenAiBackend`]: OpenAI 호환 chat completions
//!
//! 두 백엔드 모두 [`GenerationBackend`] 계약을 따르므로
//! [`Responder`] 는 어떤 백엔드인지 알 필요가 없습니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let backend = create_backend(&config.llm)?;
//! let responder = Responder::new(&context, "deepseek-r1:1.5b", DEFAULT_PROMPT, "질문", backend)?;
//! let mut fragments = responder.stream_chunks();
//! while let Some(fragment) = fragments.next().await { ... }
//! ```

mod ollama;
mod openai;
pub(crate) mod stream;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use regex::{Captures, Regex};

use crate::config::{resolve_api_key, BackendKind, LlmConfig};
use crate::error::{RagError, Result};

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

// ============================================================================
// GenerationBackend Trait
// ============================================================================

/// 텍스트 생성 백엔드 트레이트
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// 모델 사용 가능 여부 확인 (필요하면 다운로드)
    ///
    /// 다운로드 실패는 [`RagError::ModelUnavailable`].
    async fn ensure_model_available(&self, model: &str) -> Result<()>;

    /// 전체 응답을 한 번에 생성
    async fn complete(&self, model: &str, prompt: &str) -> Result<String>;

    /// 응답 조각 스트림 생성
    async fn stream(&self, model: &str, prompt: &str) -> Result<BoxStream<'static, Result<String>>>;

    /// 백엔드 이름
    fn name(&self) -> &str;
}

/// 설정에 맞는 생성 백엔드 생성
pub fn create_backend(config: &LlmConfig) -> Result<Arc<dyn GenerationBackend>> {
    let backend: Arc<dyn GenerationBackend> = match config.backend {
        BackendKind::Local => Arc::new(OllamaBackend::new(
            &config.base_url,
            config.temperature,
            config.max_tokens,
            config.timeout_secs,
        )?),
        BackendKind::Remote => {
            let api_key = resolve_api_key(&config.api_key_env)?;
            Arc::new(OpenAiBackend::new(
                &config.openai_base_url,
                api_key,
                config.max_tokens,
                config.temperature,
                config.timeout_secs,
            )?)
        }
    };

    tracing::info!(
        "Using {} generation backend ({})",
        backend.name(),
        config.active_model()
    );
    Ok(backend)
}

// ============================================================================
// PromptTemplate
// ============================================================================

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(data|query)\}").expect("valid placeholder regex"))
}

/// `{data}`, `{query}` placeholder 를 가진 프롬프트 템플릿
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// 템플릿 검증 후 생성
    pub fn parse(template: &str) -> Result<Self> {
        let mut has_data = false;
        let mut has_query = false;
        for caps in placeholder_pattern().captures_iter(template) {
            match &caps[1] {
                "data" => has_data = true,
                _ => has_query = true,
            }
        }

        let missing: Vec<&str> = [("{data}", has_data), ("{query}", has_query)]
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| name)
            .collect();
        if !missing.is_empty() {
            return Err(RagError::Template(format!(
                "prompt template is missing {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            template: template.to_string(),
        })
    }

    /// placeholder 치환 (한 번의 패스, 치환된 값은 다시 해석하지 않음)
    pub fn render(&self, data: &str, query: &str) -> String {
        placeholder_pattern()
            .replace_all(&self.template, |caps: &Captures| match &caps[1] {
                "data" => data.to_string(),
                _ => query.to_string(),
            })
            .into_owned()
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}

// ============================================================================
// Responder
// ============================================================================

/// 응답 생성기
///
/// `generate` / `stream_chunks` 는 `self` 를 소비하므로 한 번만 생성할 수 있습니다.
/// 다시 생성하려면 새 Responder 를 만들어야 합니다.
pub struct Responder {
    model: String,
    prompt: String,
    backend: Arc<dyn GenerationBackend>,
}

impl Responder {
    /// 템플릿 문자열로 생성 (placeholder 누락 시 Template 에러)
    pub fn new(
        data: &str,
        model: &str,
        template: &str,
        query: &str,
        backend: Arc<dyn GenerationBackend>,
    ) -> Result<Self> {
        let template = PromptTemplate::parse(template)?;
        Ok(Self::with_template(data, model, &template, query, backend))
    }

    /// 검증된 템플릿으로 생성
    pub fn with_template(
        data: &str,
        model: &str,
        template: &PromptTemplate,
        query: &str,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            model: model.to_string(),
            prompt: template.render(data, query),
            backend,
        }
    }

    /// 완성된 프롬프트
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 전체 응답 생성
    pub async fn generate(self) -> Result<String> {
        self.backend.ensure_model_available(&self.model).await?;
        tracing::debug!("Generating response with {} ({})", self.model, self.backend.name());
        self.backend.complete(&self.model, &self.prompt).await
    }

    /// 응답 조각 스트림
    ///
    /// 스트림을 처음 poll 할 때 생성이 시작되며, drop 하면 백엔드 연결도 해제됩니다.
    pub fn stream_chunks(self) -> BoxStream<'static, Result<String>> {
        let Self {
            model,
            prompt,
            backend,
        } = self;

        let stream = async_stream::try_stream! {
            backend.ensure_model_available(&model).await?;
            tracing::debug!("Streaming response with {} ({})", model, backend.name());

            let mut fragments = backend.stream(&model, &prompt).await?;
            while let Some(fragment) = fragments.next().await {
                yield fragment?;
            }
        };

        stream.boxed()
    }
}

// ============================================================================
// Tests
// ============================================================================
