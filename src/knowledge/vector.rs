//! Vector Store - 벡터 저장소 트레이트 및 공용 타입
//!
//! 청크 텍스트 + 임베딩 + 메타데이터를 결정적 ID로 저장하고
//! 최근접 이웃 질의에 답합니다.
//!
//! 질의 결과는 다중 쿼리 배치를 반영한 중첩 리스트 형태이며,
//! 단일 쿼리 호출자는 항상 `[0]` 을 사용합니다 ([`QueryResponse::into_first`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터 (`{file_name, chunk_id}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_name: String,
    pub chunk_id: String,
}

/// 저장용 청크 레코드
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// `"{file_name}_chunk_{index}"`
    pub id: String,
    /// 청크 텍스트
    pub document: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl ChunkRecord {
    /// 파일 이름과 청크 순번으로 레코드 생성
    pub fn new(file_name: &str, chunk_index: usize, document: String, embedding: Vec<f32>) -> Self {
        let id = chunk_record_id(file_name, chunk_index);
        Self {
            metadata: ChunkMetadata {
                file_name: file_name.to_string(),
                chunk_id: id.clone(),
            },
            id,
            document,
            embedding,
        }
    }
}

/// 결정적 청크 ID
///
/// 같은 파일을 같은 파라미터로 재수집하면 같은 ID가 나와 덮어쓰기가 됩니다.
pub fn chunk_record_id(file_name: &str, chunk_index: usize) -> String {
    format!("{}_chunk_{}", file_name, chunk_index)
}

/// 최근접 이웃 질의 응답 (쿼리별 중첩 리스트)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    pub documents: Vec<Vec<String>>,
    pub metadatas: Vec<Vec<ChunkMetadata>>,
    pub distances: Vec<Vec<f32>>,
}

impl QueryResponse {
    /// 첫 번째 쿼리의 결과만 꺼내기 (거리 오름차순)
    pub fn into_first(self) -> Vec<RetrievedChunk> {
        let documents = self.documents.into_iter().next().unwrap_or_default();
        let metadatas = self.metadatas.into_iter().next().unwrap_or_default();
        let distances = self.distances.into_iter().next().unwrap_or_default();

        documents
            .into_iter()
            .zip(metadatas)
            .zip(distances)
            .map(|((document, metadata), distance)| RetrievedChunk {
                document,
                metadata,
                distance,
            })
            .collect()
    }

    /// 단일 쿼리 결과를 응답 형태로 포장
    pub fn push_query(&mut self, results: Vec<RetrievedChunk>) {
        let mut documents = Vec::with_capacity(results.len());
        let mut metadatas = Vec::with_capacity(results.len());
        let mut distances = Vec::with_capacity(results.len());
        for r in results {
            documents.push(r.document);
            metadatas.push(r.metadata);
            distances.push(r.distance);
        }
        self.documents.push(documents);
        self.metadatas.push(metadatas);
        self.distances.push(distances);
    }
}

/// 검색된 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub document: String,
    pub metadata: ChunkMetadata,
    /// 벡터 거리 (작을수록 가까움)
    pub distance: f32,
}

/// 컬렉션 매니페스트 - 컬렉션을 만든 임베더와 차원
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub embedder: String,
    pub dimension: usize,
}

impl CollectionManifest {
    /// 다른 임베더/차원이면 설정 에러
    pub fn check(&self, collection: &str, embedder: &str, dimension: usize) -> Result<()> {
        if self.embedder != embedder || self.dimension != dimension {
            return Err(RagError::Config(format!(
                "Collection '{}' was built with {} ({} dims); configured embedder is {} ({} dims)",
                collection, self.embedder, self.dimension, embedder, dimension
            )));
        }
        Ok(())
    }
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 동시 읽기는 안전해야 하며, 같은 컬렉션에 대한 쓰기는 단일 writer를 가정합니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 레코드 upsert (같은 ID는 덮어쓰기), 컬렉션이 없으면 생성
    async fn upsert(&self, collection: &str, records: &[ChunkRecord]) -> Result<usize>;

    /// 최근접 이웃 질의
    ///
    /// 컬렉션이 없거나 비어 있으면 [`RagError::CollectionNotFound`].
    async fn query(
        &self,
        collection: &str,
        query_embeddings: &[Vec<f32>],
        n_results: usize,
    ) -> Result<QueryResponse>;

    /// 레코드 개수 (컬렉션이 없으면 0)
    async fn count(&self, collection: &str) -> Result<usize>;

    /// 파일의 모든 청크 삭제
    async fn delete_file(&self, collection: &str, file_name: &str) -> Result<usize>;

    /// 컬렉션 이름 목록
    async fn collections(&self) -> Result<Vec<String>>;

    /// 컬렉션 매니페스트 조회
    async fn manifest(&self, collection: &str) -> Result<Option<CollectionManifest>>;

    /// 컬렉션 매니페스트 기록
    async fn write_manifest(&self, collection: &str, manifest: &CollectionManifest) -> Result<()>;

    /// 저장소 이름
    fn name(&self) -> &str;
}

/// 임베더/차원 호환성 확인, 매니페스트가 없으면 기록
///
/// 한 컬렉션에 서로 다른 임베딩 모델이 섞이는 것을 막습니다.
pub async fn ensure_manifest(
    store: &dyn VectorStore,
    collection: &str,
    embedder: &str,
    dimension: usize,
) -> Result<()> {
    match store.manifest(collection).await? {
        Some(existing) => existing.check(collection, embedder, dimension),
        None => {
            let manifest = CollectionManifest {
                embedder: embedder.to_string(),
                dimension,
            };
            store.write_manifest(collection, &manifest).await?;
            tracing::info!(
                "Recorded manifest for collection '{}' ({}, {} dims)",
                collection,
                embedder,
                dimension
            );
            Ok(())
        }
    }
}

/// 배치 내 임베딩 차원 확인
pub(crate) fn batch_dimension(records: &[ChunkRecord]) -> Result<usize> {
    let dimension = records.first().map(|r| r.embedding.len()).unwrap_or(0);
    if dimension == 0 {
        return Err(RagError::Config("embedding vectors must not be empty".into()));
    }
    if let Some(bad) = records.iter().find(|r| r.embedding.len() != dimension) {
        return Err(RagError::Config(format!(
            "embedding dimension mismatch in batch: {} has {} dims, expected {}",
            bad.id,
            bad.embedding.len(),
            dimension
        )));
    }
    Ok(dimension)
}

/// 제곱 L2 거리
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

// ============================================================================
// Tests
// ============================================================================
