//! In-memory Vector Store
//!
//! 프로세스 내부 HashMap 기반 저장소입니다. 테스트와 일회성 실행에 사용합니다.
//! 거리는 LanceDB 기본값과 같은 제곱 L2 입니다.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::vector::{
    batch_dimension, l2_distance_squared, ChunkRecord, CollectionManifest, QueryResponse,
    RetrievedChunk, VectorStore,
};
use crate::error::{RagError, Result};

const BACKEND: &str = "memory";

#[derive(Debug, Default)]
struct Collection {
    records: BTreeMap<String, ChunkRecord>,
    manifest: Option<CollectionManifest>,
}

impl Collection {
    fn dimension(&self) -> Option<usize> {
        self.records.values().next().map(|r| r.embedding.len())
    }
}

/// 메모리 벡터 저장소
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, collection: &str, records: &[ChunkRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let dimension = batch_dimension(records)?;

        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();

        if let Some(existing) = entry.dimension() {
            if existing != dimension {
                return Err(RagError::Config(format!(
                    "Collection '{}' stores {}-dim vectors, got {}",
                    collection, existing, dimension
                )));
            }
        }

        for record in records {
            entry.records.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        collection: &str,
        query_embeddings: &[Vec<f32>],
        n_results: usize,
    ) -> Result<QueryResponse> {
        let collections = self.collections.read().await;
        let store = collections
            .get(collection)
            .filter(|c| !c.records.is_empty())
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;

        let dimension = store.dimension().unwrap_or(0);
        let mut response = QueryResponse::default();

        for embedding in query_embeddings {
            if embedding.len() != dimension {
                return Err(RagError::Config(format!(
                    "Query has {} dims, collection '{}' stores {}",
                    embedding.len(),
                    collection,
                    dimension
                )));
            }

            let mut scored: Vec<RetrievedChunk> = store
                .records
                .values()
                .map(|r| RetrievedChunk {
                    document: r.document.clone(),
                    metadata: r.metadata.clone(),
                    distance: l2_distance_squared(&r.embedding, embedding),
                })
                .collect();

            scored.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.metadata.chunk_id.cmp(&b.metadata.chunk_id))
            });
            scored.truncate(n_results);
            response.push_query(scored);
        }

        Ok(response)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map(|c| c.records.len()).unwrap_or(0))
    }

    async fn delete_file(&self, collection: &str, file_name: &str) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let Some(store) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = store.records.len();
        store.records.retain(|_, r| r.metadata.file_name != file_name);
        Ok(before - store.records.len())
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn manifest(&self, collection: &str) -> Result<Option<CollectionManifest>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|c| c.manifest.clone()))
    }

    async fn write_manifest(&self, collection: &str, manifest: &CollectionManifest) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.entry(collection.to_string()).or_default().manifest = Some(manifest.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        BACKEND
    }
}

// ============================================================================
// Tests
// ============================================================================
