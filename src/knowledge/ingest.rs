//! Ingestor - 문서 수집 파이프라인
//!
//! 파일 → 텍스트 추출 → 문장 분리 → 윈도우 청킹 → 임베딩 → upsert
//!
//! 실패 처리:
//! - 추출 실패: 해당 파일만 건너뜀
//! - 임베딩 전송 실패: 해당 청크만 건너뜀 (ID는 윈도우 순번 유지)
//! - 저장 실패 / 설정 오류: 해당 파일 중단
//!
//! 같은 컬렉션에 대한 수집은 한 번에 하나만 실행된다고 가정합니다.

use std::sync::Arc;

use serde::Serialize;

use crate::collector::CollectedFile;
use crate::config::RagConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::extractor;

use super::chunker::{ChunkConfig, Chunker, SentenceChunker};
use super::vector::{ensure_manifest, ChunkRecord, VectorStore};

/// 한 번에 upsert 할 레코드 수
const UPSERT_BATCH: usize = 64;

// ============================================================================
// Reports
// ============================================================================

/// 파일 하나의 수집 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file_name: String,
    /// 문장 수
    pub sentences: usize,
    /// 생성된 청크 수
    pub chunks: usize,
    /// 저장된 청크 수
    pub stored: usize,
    /// 임베딩 실패로 건너뛴 청크 수
    pub skipped: usize,
}

/// 전체 수집 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub files: Vec<FileReport>,
    /// 실패한 파일 (이름, 에러 메시지)
    pub failed: Vec<(String, String)>,
}

impl IngestReport {
    pub fn files_processed(&self) -> usize {
        self.files.len()
    }

    pub fn files_failed(&self) -> usize {
        self.failed.len()
    }

    pub fn chunks_stored(&self) -> usize {
        self.files.iter().map(|f| f.stored).sum()
    }

    pub fn chunks_skipped(&self) -> usize {
        self.files.iter().map(|f| f.skipped).sum()
    }
}

// ============================================================================
// Ingestor
// ============================================================================

/// 문서 수집기
pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chunker: SentenceChunker,
    collection: String,
    replace: bool,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        chunker: SentenceChunker,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            chunker,
            collection: collection.into(),
            replace: false,
        }
    }

    /// 설정값으로 생성 (청킹 설정 검증 포함)
    pub fn from_config(
        config: &RagConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let chunker = SentenceChunker::from_settings(
            &config.chunking.language,
            config.chunking.chunk_size,
            config.chunking.overlap_size,
        )?;
        Ok(Self::new(embedder, store, chunker, config.store.collection.clone()))
    }

    /// 저장 전에 파일의 기존 청크를 모두 삭제
    ///
    /// 청크 파라미터를 바꿔 재수집할 때 남는 이전 청크를 제거합니다.
    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        self.chunker.config()
    }

    /// 추출된 텍스트 수집
    pub async fn ingest_text(&self, file_name: &str, text: &str) -> Result<FileReport> {
        let chunked = self.chunker.chunk(text);
        let mut report = FileReport {
            file_name: file_name.to_string(),
            sentences: chunked.sentence_count,
            chunks: chunked.chunks.len(),
            ..Default::default()
        };

        if chunked.chunks.is_empty() {
            tracing::warn!("No chunks generated for document: {}", file_name);
            if self.replace {
                self.remove_previous(file_name).await?;
            }
            return Ok(report);
        }

        let mut pending: Vec<ChunkRecord> = Vec::with_capacity(UPSERT_BATCH);
        let mut manifest_checked = false;
        // 기존 청크는 새 청크를 처음 저장하기 직전에만 삭제
        let mut cleared = !self.replace;

        for chunk in chunked.chunks {
            let embedding = match self.embedder.embed(&chunk.text).await {
                Ok(embedding) => embedding,
                Err(e) if e.is_transport() => {
                    tracing::warn!(
                        "Skipping chunk {} of {}: {}",
                        chunk.index,
                        file_name,
                        e
                    );
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !manifest_checked {
                ensure_manifest(
                    self.store.as_ref(),
                    &self.collection,
                    self.embedder.name(),
                    embedding.len(),
                )
                .await?;
                manifest_checked = true;
            }

            pending.push(ChunkRecord::new(file_name, chunk.index, chunk.text, embedding));
            if pending.len() >= UPSERT_BATCH {
                if !cleared {
                    self.remove_previous(file_name).await?;
                    cleared = true;
                }
                report.stored += self.store.upsert(&self.collection, &pending).await?;
                pending.clear();
            }
        }

        if !pending.is_empty() {
            if !cleared {
                self.remove_previous(file_name).await?;
            }
            report.stored += self.store.upsert(&self.collection, &pending).await?;
        } else if report.stored == 0 && self.replace {
            tracing::warn!(
                "Kept previous chunks of {}: no chunk could be embedded",
                file_name
            );
        }

        tracing::info!(
            "Ingested {}: {} sentences, {} chunks stored, {} skipped",
            file_name,
            report.sentences,
            report.stored,
            report.skipped
        );
        Ok(report)
    }

    async fn remove_previous(&self, file_name: &str) -> Result<()> {
        let removed = self.store.delete_file(&self.collection, file_name).await?;
        if removed > 0 {
            tracing::info!("Removed {} previous chunks of {}", removed, file_name);
        }
        Ok(())
    }

    /// 파일 하나 수집 (추출 포함)
    pub async fn ingest_file(&self, file: &CollectedFile) -> Result<FileReport> {
        let text = extractor::extract(&file.path, file.file_type).await?;
        self.ingest_text(&file.file_name, &text).await
    }

    /// 여러 파일 순차 수집
    ///
    /// 파일 단위 실패는 보고서에 기록하고 다음 파일로 진행합니다.
    pub async fn ingest_files(&self, files: &[CollectedFile]) -> IngestReport {
        let mut report = IngestReport::default();

        for file in files {
            match self.ingest_file(file).await {
                Ok(file_report) => report.files.push(file_report),
                Err(e) => {
                    tracing::warn!("Failed to ingest {}: {}", file.file_name, e);
                    report.failed.push((file.file_name.clone(), e.to_string()));
                }
            }
        }

        report
    }
}

// ============================================================================
// Tests
// ============================================================================
