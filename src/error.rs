//! 에러 타입
//!
//! 라이브러리 전체에서 사용하는 에러 분류입니다.
//! - Config / Template: I/O 이전에 발생하는 치명적 설정 오류
//! - CollectionNotFound: Retriever가 빈 결과로 복구
//! - Transport: 임베딩/생성 백엔드 통신 실패
//! - ModelUnavailable: 로컬 모델 부재 + 다운로드 실패

use thiserror::Error;

/// RAG 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 잘못된 설정 (청크/오버랩 비율, 차원 불일치 등)
    #[error("Configuration error: {0}")]
    Config(String),

    /// 프롬프트 템플릿 오류 (필수 placeholder 누락)
    #[error("Template error: {0}")]
    Template(String),

    /// 컬렉션이 없거나 비어 있음
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// 외부 백엔드 통신 실패
    #[error("Transport error ({backend}): {message}")]
    Transport { backend: String, message: String },

    /// 로컬 모델을 사용할 수 없음
    #[error("Model '{model}' unavailable: {message}")]
    ModelUnavailable { model: String, message: String },

    /// 벡터 저장소 내부 오류
    #[error("Vector store error ({backend}): {message}")]
    Store { backend: String, message: String },

    /// 문서 텍스트 추출 실패
    #[error("Failed to extract {path}: {message}")]
    Extraction { path: String, message: String },

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub(crate) fn transport(backend: &str, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            backend: backend.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn store(backend: &str, message: impl std::fmt::Display) -> Self {
        Self::Store {
            backend: backend.to_string(),
            message: message.to_string(),
        }
    }

    /// 백엔드 통신 실패 여부
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// 컬렉션 부재 여부
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CollectionNotFound(_))
    }
}

/// 라이브러리 Result 별칭
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(RagError::transport("ollama", "refused").is_transport());
        assert!(RagError::CollectionNotFound("docs".into()).is_not_found());
        assert!(!RagError::Config("bad".into()).is_transport());
    }

    #[test]
    fn test_error_display() {
        let err = RagError::transport("openai", "timeout");
        assert_eq!(err.to_string(), "Transport error (openai): timeout");
    }
}
