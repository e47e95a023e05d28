//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 텍스트를 추출합니다.

use std::path::Path;

use crate::error::{RagError, Result};

/// PDF에서 페이지별 텍스트 추출
///
/// 텍스트가 없는 페이지는 제외합니다. 스캔 문서처럼 추출할 텍스트가
/// 전혀 없으면 빈 벡터를 반환합니다.
pub fn extract_pages(path: &Path) -> Result<Vec<String>> {
    let extraction_error = |message: String| RagError::Extraction {
        path: path.display().to_string(),
        message,
    };

    let bytes = std::fs::read(path).map_err(|e| extraction_error(format!("failed to read PDF: {}", e)))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| extraction_error(format!("failed to extract text: {}", e)))?;

    let pages = split_pdf_pages(&text);
    if pages.is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
    }
    Ok(pages)
}

/// PDF 전체 텍스트 (페이지를 `\n` 으로 연결)
pub fn extract_text_from_pdf(path: &Path) -> Result<String> {
    Ok(extract_pages(path)?.join("\n"))
}

/// 폼피드(`\x0c`) 기준 페이지 분리, 빈 페이지 제거
fn split_pdf_pages(text: &str) -> Vec<String> {
    text.split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
