//! LanceDB Vector Store - 영구 벡터 저장소
//!
//! 컬렉션마다 LanceDB 테이블 하나를 사용합니다.
//! upsert는 같은 ID 행을 지운 뒤 추가하는 방식이라 재수집이 중복을 만들지 않습니다.
//!
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::vector::{
    batch_dimension, ChunkMetadata, ChunkRecord, CollectionManifest, QueryResponse,
    RetrievedChunk, VectorStore,
};
use crate::error::{RagError, Result};

const BACKEND: &str = "lancedb";

/// 삭제 필터 하나에 넣을 최대 ID 수
const DELETE_BATCH: usize = 256;

fn lance_err(context: &str, e: impl std::fmt::Display) -> RagError {
    RagError::store(BACKEND, format!("{}: {}", context, e))
}

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    path: PathBuf,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기 (디렉토리가 없으면 생성)
    pub async fn open(path: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(path).await?;

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::Config(format!("Invalid path encoding: {:?}", path)))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(|e| lance_err("Failed to connect to LanceDB", e))?;

        tracing::debug!("Opened LanceDB at {:?}", path);
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 컬렉션 테이블 스키마
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("file_name", DataType::Utf8, false),
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("document", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(records: &[ChunkRecord], dimension: usize) -> Result<RecordBatch> {
        let dimension = i32::try_from(dimension)
            .map_err(|_| RagError::Config(format!("dimension too large: {}", dimension)))?;

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let file_names: Vec<&str> = records.iter().map(|r| r.metadata.file_name.as_str()).collect();
        let chunk_ids: Vec<&str> = records.iter().map(|r| r.metadata.chunk_id.as_str()).collect();
        let documents: Vec<&str> = records.iter().map(|r| r.document.as_str()).collect();

        let embeddings_flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings = FixedSizeListArray::try_new(
            field,
            dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| lance_err("Failed to create embedding array", e))?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension)),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(file_names)),
                Arc::new(StringArray::from(chunk_ids)),
                Arc::new(StringArray::from(documents)),
                Arc::new(embeddings),
            ],
        )
        .map_err(|e| lance_err("Failed to create RecordBatch", e))
    }

    async fn table_exists(&self, collection: &str) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| lance_err("Failed to list tables", e))?;
        Ok(names.iter().any(|n| n == collection))
    }

    async fn open_table(&self, collection: &str) -> Result<lancedb::table::Table> {
        self.db
            .open_table(collection)
            .execute()
            .await
            .map_err(|e| lance_err("Failed to open table", e))
    }

    /// 기존 테이블의 임베딩 차원
    async fn table_dimension(table: &lancedb::table::Table) -> Result<Option<usize>> {
        let schema = table
            .schema()
            .await
            .map_err(|e| lance_err("Failed to read schema", e))?;
        let dimension = schema.field_with_name("embedding").ok().and_then(|f| {
            match f.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            }
        });
        Ok(dimension)
    }

    fn manifest_path(&self, collection: &str) -> PathBuf {
        self.path.join(format!("{}.manifest.json", collection))
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn upsert(&self, collection: &str, records: &[ChunkRecord]) -> Result<usize> {
        validate_collection_name(collection)?;
        if records.is_empty() {
            return Ok(0);
        }

        let dimension = batch_dimension(records)?;
        let batch = Self::records_to_batch(records, dimension)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if !self.table_exists(collection).await? {
            self.db
                .create_table(collection, batches)
                .execute()
                .await
                .map_err(|e| lance_err("Failed to create table", e))?;
            tracing::info!("Created collection '{}' ({} dims)", collection, dimension);
            return Ok(records.len());
        }

        let table = self.open_table(collection).await?;
        if let Some(existing) = Self::table_dimension(&table).await? {
            if existing != dimension {
                return Err(RagError::Config(format!(
                    "Collection '{}' stores {}-dim vectors, got {}",
                    collection, existing, dimension
                )));
            }
        }

        // 같은 ID 먼저 삭제 → 덮어쓰기
        for ids in records.chunks(DELETE_BATCH) {
            let list = ids
                .iter()
                .map(|r| sql_quote(&r.id))
                .collect::<Vec<_>>()
                .join(", ");
            table
                .delete(&format!("id IN ({})", list))
                .await
                .map_err(|e| lance_err("Failed to delete previous rows", e))?;
        }

        table
            .add(batches)
            .execute()
            .await
            .map_err(|e| lance_err("Failed to add vectors to table", e))?;

        Ok(records.len())
    }

    async fn query(
        &self,
        collection: &str,
        query_embeddings: &[Vec<f32>],
        n_results: usize,
    ) -> Result<QueryResponse> {
        validate_collection_name(collection)?;
        if !self.table_exists(collection).await? {
            return Err(RagError::CollectionNotFound(collection.to_string()));
        }

        let table = self.open_table(collection).await?;
        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| lance_err("Failed to count rows", e))?;
        if rows == 0 {
            return Err(RagError::CollectionNotFound(collection.to_string()));
        }

        let dimension = Self::table_dimension(&table).await?;
        let mut response = QueryResponse::default();

        for embedding in query_embeddings {
            if let Some(dimension) = dimension {
                if embedding.len() != dimension {
                    return Err(RagError::Config(format!(
                        "Query has {} dims, collection '{}' stores {}",
                        embedding.len(),
                        collection,
                        dimension
                    )));
                }
            }

            let stream = table
                .vector_search(embedding.clone())
                .map_err(|e| lance_err("Failed to create vector search", e))?
                .limit(n_results)
                .execute()
                .await
                .map_err(|e| lance_err("Failed to execute vector search", e))?;

            let batches: Vec<RecordBatch> = stream
                .try_collect()
                .await
                .map_err(|e| lance_err("Failed to read search results", e))?;

            let mut results = Vec::new();
            for batch in batches {
                results.extend(batch_to_results(&batch)?);
            }
            results.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            results.truncate(n_results);
            response.push_query(results);
        }

        Ok(response)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        validate_collection_name(collection)?;
        if !self.table_exists(collection).await? {
            return Ok(0);
        }
        let table = self.open_table(collection).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| lance_err("Failed to count rows", e))
    }

    async fn delete_file(&self, collection: &str, file_name: &str) -> Result<usize> {
        validate_collection_name(collection)?;
        if !self.table_exists(collection).await? {
            return Ok(0);
        }

        let table = self.open_table(collection).await?;
        let filter = format!("file_name = {}", sql_quote(file_name));

        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .map_err(|e| lance_err("Failed to count rows for file", e))?;

        table
            .delete(&filter)
            .await
            .map_err(|e| lance_err("Failed to delete vectors", e))?;

        Ok(before)
    }

    async fn collections(&self) -> Result<Vec<String>> {
        self.db
            .table_names()
            .execute()
            .await
            .map_err(|e| lance_err("Failed to list tables", e))
    }

    async fn manifest(&self, collection: &str) -> Result<Option<CollectionManifest>> {
        validate_collection_name(collection)?;
        let path = self.manifest_path(collection);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| lance_err("Corrupt collection manifest", e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_manifest(&self, collection: &str, manifest: &CollectionManifest) -> Result<()> {
        validate_collection_name(collection)?;
        let content = serde_json::to_string_pretty(manifest)
            .map_err(|e| lance_err("Failed to encode manifest", e))?;
        tokio::fs::write(self.manifest_path(collection), content).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        BACKEND
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 검색 결과 배치 → RetrievedChunk
fn batch_to_results(batch: &RecordBatch) -> Result<Vec<RetrievedChunk>> {
    let column = |name: &str| {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| lance_err("Missing column", name))
    };

    let documents = column("document")?;
    let file_names = column("file_name")?;
    let chunk_ids = column("chunk_id")?;

    // _distance 컬럼 (LanceDB가 자동 추가)
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| lance_err("Missing column", "_distance"))?;

    Ok((0..batch.num_rows())
        .map(|i| RetrievedChunk {
            document: documents.value(i).to_string(),
            metadata: ChunkMetadata {
                file_name: file_names.value(i).to_string(),
                chunk_id: chunk_ids.value(i).to_string(),
            },
            distance: distances.value(i),
        })
        .collect())
}

/// SQL 문자열 리터럴 (작은따옴표 이스케이프)
fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// 컬렉션 이름은 테이블/파일 이름으로 쓰이므로 제한
fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(RagError::Config(format!(
            "Invalid collection name '{}': use letters, digits, '_', '-' or '.'",
            name
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================
