//! Knowledge 모듈 - 청킹, 벡터 저장, 검색
//!
//! - Chunker: 언어별 문장 분리 + 겹치는 문장 윈도우
//! - VectorStore: 컬렉션 단위 upsert / 최근접 질의 (LanceDB, 메모리)
//! - Ingestor: 파일 → 청크 → 임베딩 → 저장
//! - Retriever: 쿼리 → 청크 → 프롬프트 텍스트

mod chunker;
mod ingest;
mod lance;
pub(crate) mod memory;
mod retriever;
pub(crate) mod vector;

// Re-exports
pub use chunker::{
    chunk, chunk_windows, split_into_sentences, ChunkConfig, ChunkedText, Chunker, Language,
    SentenceChunker, SentenceSplitter, TextChunk,
};
pub use ingest::{FileReport, IngestReport, Ingestor};
pub use lance::LanceVectorStore;
pub use memory::InMemoryVectorStore;
pub use retriever::{format_for_prompt, Retriever, NO_RELEVANT_DATA};
pub use vector::{
    chunk_record_id, ensure_manifest, l2_distance_squared, ChunkMetadata, ChunkRecord,
    CollectionManifest, QueryResponse, RetrievedChunk, VectorStore,
};
