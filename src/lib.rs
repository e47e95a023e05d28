//! docrag - 문장 단위 청킹 기반 RAG 파이프라인
//!
//! 문서를 겹치는 문장 윈도우로 청킹하여 LanceDB에 임베딩으로 저장하고,
//! 질문과 가까운 청크를 프롬프트에 넣어 Ollama/OpenAI 모델로 답변을 생성합니다.

pub mod chat;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod knowledge;
pub mod llm;
pub mod server;

#[cfg(test)]
mod testing;

// Re-exports
pub use chat::{
    docs_marker, AssembledResponse, ChatLog, ChatLogStore, ChatResponse, ChatService, DocumentRef,
    SearchOutcome, StreamAssembler, DOCS_MARKER,
};
pub use config::{get_data_dir, BackendKind, RagConfig};
pub use embedding::{create_embedder, Embedder};
pub use error::{RagError, Result};
pub use knowledge::{
    chunk, format_for_prompt, split_into_sentences, ChunkConfig, Ingestor, LanceVectorStore,
    Retriever, RetrievedChunk, SentenceChunker, VectorStore, NO_RELEVANT_DATA,
};
pub use llm::{create_backend, GenerationBackend, PromptTemplate, Responder};
