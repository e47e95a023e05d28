//! Retriever - 쿼리 → 관련 청크 검색 + 프롬프트용 포맷
//!
//! 쿼리를 임베딩한 뒤 벡터 저장소에서 최근접 청크를 찾습니다.
//!
//! - [`Retriever::retrieve`]: 어떤 실패든 빈 결과로 복구 (원인은 로그)
//! - [`Retriever::try_retrieve`]: 컬렉션 부재만 빈 결과로, 백엔드 장애는 에러로 구분

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::Result;

use super::vector::{RetrievedChunk, VectorStore};

/// 검색 결과가 없을 때 프롬프트에 들어가는 문구
pub const NO_RELEVANT_DATA: &str = "No relevant data found.";

/// 결과 블록 구분선 너비
const RULE_WIDTH: usize = 80;

// ============================================================================
// Retriever
// ============================================================================

/// 벡터 검색기
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    collection: String,
    n_results: usize,
}

impl Retriever {
    /// # Arguments
    /// * `collection` - 검색할 컬렉션 이름
    /// * `n_results` - 기본 결과 개수
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        n_results: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
            n_results,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn n_results(&self) -> usize {
        self.n_results
    }

    /// 검색 (실패 시 빈 결과)
    pub async fn retrieve(&self, query: &str) -> Vec<RetrievedChunk> {
        self.retrieve_n(query, self.n_results).await
    }

    /// 결과 개수를 지정한 검색 (실패 시 빈 결과)
    pub async fn retrieve_n(&self, query: &str, n_results: usize) -> Vec<RetrievedChunk> {
        match self.try_retrieve_n(query, n_results).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("An error occurred during retrieval: {}", e);
                Vec::new()
            }
        }
    }

    /// 검색 (백엔드 장애는 에러로 전달)
    pub async fn try_retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.try_retrieve_n(query, self.n_results).await
    }

    /// 결과 개수를 지정한 검색 (백엔드 장애는 에러로 전달)
    ///
    /// 컬렉션이 없거나 비어 있으면 `Ok(vec![])`.
    pub async fn try_retrieve_n(&self, query: &str, n_results: usize) -> Result<Vec<RetrievedChunk>> {
        if n_results == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;

        // 다른 임베더로 만든 컬렉션은 거리 비교가 무의미
        if let Some(manifest) = self.store.manifest(&self.collection).await? {
            manifest.check(&self.collection, self.embedder.name(), embedding.len())?;
        }

        match self
            .store
            .query(&self.collection, &[embedding], n_results)
            .await
        {
            Ok(response) => {
                let results = response.into_first();
                tracing::debug!(
                    "Retrieved {} chunks from '{}'",
                    results.len(),
                    self.collection
                );
                Ok(results)
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("Collection '{}' is empty or missing", self.collection);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Prompt Formatting
// ============================================================================

/// 검색 결과를 프롬프트용 텍스트로 변환
///
/// 결과가 없으면 [`NO_RELEVANT_DATA`] 를 그대로 반환합니다.
pub fn format_for_prompt(results: &[RetrievedChunk]) -> String {
    if results.is_empty() {
        return NO_RELEVANT_DATA.to_string();
    }

    let rule = "-".repeat(RULE_WIDTH);
    let mut formatted = String::new();
    for (idx, result) in results.iter().enumerate() {
        formatted.push_str(&format!("Document {}:\n", idx + 1));
        formatted.push_str(&format!("Document ID: {}\n", result.metadata.chunk_id));
        formatted.push_str(&format!("File Name: {}\n", result.metadata.file_name));
        formatted.push_str(&format!("Content:\n{}\n", result.document));
        formatted.push_str(&rule);
        formatted.push('\n');
    }
    formatted
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use crate::knowledge::memory::InMemoryVectorStore;
    use crate::knowledge::vector::{ensure_manifest, ChunkMetadata, ChunkRecord};
    use crate::testing::{hash_embedding, FailingEmbedder, FakeEmbedder};

    fn chunk(file: &str, id: &str, doc: &str) -> RetrievedChunk {
        RetrievedChunk {
            document: doc.to_string(),
            metadata: ChunkMetadata {
                file_name: file.to_string(),
                chunk_id: id.to_string(),
            },
            distance: 0.1,
        }
    }

    async fn seeded_store() -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new());
        let texts = [
            "Rust ownership rules prevent data races.",
            "Bread is baked from flour and water.",
            "The borrow checker enforces ownership in Rust.",
        ];
        let records: Vec<ChunkRecord> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| ChunkRecord::new("notes.txt", i, t.to_string(), hash_embedding(t)))
            .collect();
        store.upsert("docs", &records).await.unwrap();
        store
    }

    #[test]
    fn test_format_empty_is_sentinel() {
        assert_eq!(format_for_prompt(&[]), "No relevant data found.");
    }

    #[test]
    fn test_format_blocks() {
        let results = vec![
            chunk("a.txt", "a.txt_chunk_0", "alpha"),
            chunk("b.pdf", "b.pdf_chunk_3", "beta"),
        ];
        let rule = "-".repeat(80);
        let expected = format!(
            "Document 1:\nDocument ID: a.txt_chunk_0\nFile Name: a.txt\nContent:\nalpha\n{rule}\n\
             Document 2:\nDocument ID: b.pdf_chunk_3\nFile Name: b.pdf\nContent:\nbeta\n{rule}\n"
        );
        assert_eq!(format_for_prompt(&results), expected);
    }

    #[tokio::test]
    async fn test_retrieve_missing_collection_is_empty() {
        let retriever = Retriever::new(
            Arc::new(FakeEmbedder::new()),
            Arc::new(InMemoryVectorStore::new()),
            "nope",
            5,
        );
        assert!(retriever.retrieve("anything").await.is_empty());
        assert!(retriever.try_retrieve("anything").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_ranks_nearest_first() {
        let store = seeded_store().await;
        let retriever = Retriever::new(Arc::new(FakeEmbedder::new()), store, "docs", 2);

        let results = retriever
            .try_retrieve("Rust ownership rules prevent data races.")
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metadata.chunk_id, "notes.txt_chunk_0");
        assert!(results[0].distance <= results[1].distance);
    }

    #[tokio::test]
    async fn test_backend_down_is_distinct_from_empty() {
        let store = seeded_store().await;
        let retriever = Retriever::new(Arc::new(FailingEmbedder), store, "docs", 3);

        // 복구 경로는 빈 결과
        assert!(retriever.retrieve("rust").await.is_empty());
        // 구분 경로는 전송 에러
        let err = retriever.try_retrieve("rust").await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_manifest_mismatch_rejected() {
        let store = seeded_store().await;
        ensure_manifest(store.as_ref(), "docs", "remote:other-model", 16)
            .await
            .unwrap();

        let retriever = Retriever::new(Arc::new(FakeEmbedder::new()), store, "docs", 3);
        let err = retriever.try_retrieve("rust").await.unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[tokio::test]
    async fn test_emptied_collection_is_empty_result() {
        let store = seeded_store().await;
        store.delete_file("docs", "notes.txt").await.unwrap();
        assert_eq!(store.count("docs").await.unwrap(), 0);

        let retriever = Retriever::new(Arc::new(FakeEmbedder::new()), store, "docs", 3);
        assert!(retriever.retrieve("rust").await.is_empty());
        assert!(retriever.try_retrieve("rust").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_n_results_override() {
        let store = seeded_store().await;
        let embedder = Arc::new(FakeEmbedder::new());
        let retriever = Retriever::new(embedder.clone(), store, "docs", 1);
        assert_eq!(retriever.retrieve("rust").await.len(), 1);
        assert_eq!(retriever.retrieve_n("rust", 3).await.len(), 3);
        assert_eq!(embedder.calls(), 2);

        // 0개 요청은 임베딩 호출 없이 빈 결과
        assert!(retriever.retrieve_n("rust", 0).await.is_empty());
        assert_eq!(embedder.calls(), 2);
    }
}
