//! 스트리밍 응답 줄 단위 디코더
//!
//! Ollama(NDJSON)와 OpenAI(SSE) 모두 줄 단위 프로토콜이므로
//! 바이트 스트림을 완성된 줄로 재조립합니다.
//! 청크 경계에서 잘린 UTF-8 시퀀스도 줄이 완성될 때 함께 디코딩됩니다.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::{RagError, Result};

/// 요청 제한 시간
///
/// 스트리밍 응답은 생성 길이에 제한이 없으므로 연결 제한만 적용합니다.
pub(crate) fn request_timeout(timeout: Duration, stream: bool) -> Option<Duration> {
    if stream {
        None
    } else {
        Some(timeout)
    }
}

/// 바이트 → 줄 버퍼
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// 바이트를 추가하고 완성된 줄들을 반환 (빈 줄 제외)
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1])
                .trim_end_matches('\r')
                .to_string();
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// 스트림 종료 시 개행 없이 남은 마지막 줄
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// HTTP 응답 본문을 줄 스트림으로 변환
///
/// 스트림을 drop 하면 응답(연결)도 함께 해제됩니다.
pub(crate) fn response_lines(
    response: reqwest::Response,
    backend: &'static str,
) -> BoxStream<'static, Result<String>> {
    let stream = async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer = LineBuffer::default();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                RagError::transport(backend, format!("Stream interrupted: {}", e))
            })?;
            for line in buffer.push(&chunk) {
                yield line;
            }
        }

        if let Some(line) = buffer.finish() {
            yield line;
        }
    };

    stream.boxed()
}

// ============================================================================
// Tests
// ============================================================================
