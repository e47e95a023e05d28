//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 청크(저장 시)와 쿼리(검색 시)를 고정 길이 벡터로 변환합니다.
//!
//! - [`LocalEmbedder`]: 로컬 Ollama 임베딩 모델, 최대 길이 초과 시 잘라냄
//! - [`RemoteEmbedder`]: OpenAI 호환 `/embeddings` API, 줄바꿈 제거 후 전송
//!
//! 컬렉션 하나에는 한 가지 임베더만 사용해야 합니다 (차원 불변식).
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config.embedding)?;
//! let vector = embedder.embed("Hello, world!").await?;
//! ```

mod local;
mod remote;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{resolve_api_key, BackendKind, EmbeddingConfig};
use crate::error::Result;

pub use local::LocalEmbedder;
pub use remote::RemoteEmbedder;

// ============================================================================
// Embedder Trait
// ============================================================================

/// 임베더 트레이트
#[async_trait]
pub trait Embedder: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 컬렉션 매니페스트에 기록되는 식별자 (`backend:model`)
    fn name(&self) -> &str;
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베더 생성
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.backend {
        BackendKind::Local => Arc::new(LocalEmbedder::new(
            config.base_url(),
            config.model_name(),
            config.max_length,
            config.timeout_secs,
        )?),
        BackendKind::Remote => {
            let api_key = resolve_api_key(&config.api_key_env)?;
            Arc::new(RemoteEmbedder::new(
                config.base_url(),
                config.model_name(),
                api_key,
                config.timeout_secs,
            )?)
        }
    };

    tracing::info!("Using {} embedding", embedder.name());
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
