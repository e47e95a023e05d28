//! 콘텐츠 추출 모듈
//!
//! 수집된 파일에서 문서 전체 텍스트를 추출합니다.
//! - 텍스트 파일: UTF-8로 직접 읽기
//! - PDF 파일: pdf-extract로 페이지 텍스트 추출 후 `\n` 으로 연결

pub mod pdf;

use std::path::Path;

use crate::collector::FileType;
use crate::error::{RagError, Result};

/// 파일에서 텍스트 추출
pub async fn extract(path: &Path, file_type: FileType) -> Result<String> {
    match file_type {
        FileType::Text => extract_text(path).await,
        FileType::Pdf => extract_pdf(path).await,
    }
}

/// 텍스트 파일에서 추출
async fn extract_text(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| RagError::Extraction {
        path: path.display().to_string(),
        message: format!("failed to read text file: {}", e),
    })?;

    String::from_utf8(bytes).map_err(|e| RagError::Extraction {
        path: path.display().to_string(),
        message: format!("not valid UTF-8: {}", e),
    })
}

/// PDF 파일에서 추출
async fn extract_pdf(path: &Path) -> Result<String> {
    // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || pdf::extract_text_from_pdf(&owned))
        .await
        .map_err(|e| RagError::Extraction {
            path: path.display().to_string(),
            message: format!("PDF extraction task failed: {}", e),
        })?
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_extract_text_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "First sentence. Second sentence.").unwrap();

        let text = extract(&path, FileType::Text).await.unwrap();
        assert_eq!(text, "First sentence. Second sentence.");
    }

    #[tokio::test]
    async fn test_extract_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let err = extract(&path, FileType::Text).await.unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }

    #[tokio::test]
    async fn test_extract_missing_file() {
        let err = extract(Path::new("/nonexistent/file.txt"), FileType::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }
}
