//! Chat 모듈 - 검색 → 프롬프트 → 생성
//!
//! 스트리밍 응답은 생성 조각들 뒤에 인용 문서 메타데이터를 한 번 붙입니다:
//!
//! ```text
//! "Hel" "lo" "<|DOCS_JSON|>[{...}]"
//! ```
//!
//! 생성이 실패하면 잘린 에러 메시지와 빈 문서 목록(`<|DOCS_JSON|>[]`)을 보내므로
//! 클라이언트는 항상 무언가를 표시할 수 있습니다.
//! 소비자 쪽은 [`StreamAssembler`] 로 본문과 메타데이터를 분리합니다.

mod history;

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::RagConfig;
use crate::embedding::create_embedder;
use crate::error::{RagError, Result};
use crate::knowledge::{format_for_prompt, LanceVectorStore, RetrievedChunk, Retriever, VectorStore};
use crate::llm::{create_backend, GenerationBackend, PromptTemplate, Responder};

pub use history::{ChatLog, ChatLogStore};

/// 문서 메타데이터 마커
pub const DOCS_MARKER: &str = "<|DOCS_JSON|>";

/// 스트림에 붙일 에러 메시지 최대 길이 (문자 수)
const ERROR_PREVIEW_CHARS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// 인용 문서
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub file_name: String,
    pub chunk_id: String,
    pub content: String,
    pub distance: f32,
}

impl From<RetrievedChunk> for DocumentRef {
    fn from(chunk: RetrievedChunk) -> Self {
        Self {
            file_name: chunk.metadata.file_name,
            chunk_id: chunk.metadata.chunk_id,
            content: chunk.document,
            distance: chunk.distance,
        }
    }
}

/// 검색 결과 (프롬프트 텍스트 + 인용 문서)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub formatted_data: String,
    pub documents: Vec<DocumentRef>,
}

/// 동기 응답
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub documents: Vec<DocumentRef>,
    pub query: String,
    pub model_used: String,
}

// ============================================================================
// ChatService
// ============================================================================

/// 대화 서비스
///
/// 요청마다 독립적으로 동작하며 공유 상태는 읽기 전용입니다.
#[derive(Clone)]
pub struct ChatService {
    retriever: Retriever,
    backend: Arc<dyn GenerationBackend>,
    template: PromptTemplate,
    model: String,
    log: Option<ChatLogStore>,
}

impl ChatService {
    pub fn new(
        retriever: Retriever,
        backend: Arc<dyn GenerationBackend>,
        template: PromptTemplate,
        model: impl Into<String>,
    ) -> Self {
        Self {
            retriever,
            backend,
            template,
            model: model.into(),
            log: None,
        }
    }

    /// 완료된 대화를 기록
    pub fn with_log(mut self, log: ChatLogStore) -> Self {
        self.log = Some(log);
        self
    }

    /// 설정으로 전체 파이프라인 구성
    pub async fn from_config(config: &RagConfig) -> Result<Self> {
        let template = PromptTemplate::parse(&config.llm.prompt)?;
        let embedder = create_embedder(&config.embedding)?;
        let store: Arc<dyn VectorStore> = Arc::new(LanceVectorStore::open(&config.store.path).await?);
        let retriever = Retriever::new(
            embedder,
            store,
            config.store.collection.clone(),
            config.store.n_results,
        );
        let backend = create_backend(&config.llm)?;

        let mut service = Self::new(retriever, backend, template, config.llm.active_model());
        if config.llm.record_data {
            match ChatLogStore::open_default() {
                Ok(log) => service = service.with_log(log),
                Err(e) => tracing::warn!("Chat log disabled: {}", e),
            }
        }
        Ok(service)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 기본 검색 결과 개수
    pub fn default_n_results(&self) -> usize {
        self.retriever.n_results()
    }

    pub fn log(&self) -> Option<&ChatLogStore> {
        self.log.as_ref()
    }

    /// 관련 문서 검색
    ///
    /// 검색 실패는 빈 결과가 되어 "No relevant data found." 로 이어집니다.
    pub async fn search_documents(&self, query: &str, n_results: usize) -> SearchOutcome {
        let results = self.retriever.retrieve_n(query, n_results).await;
        SearchOutcome {
            formatted_data: format_for_prompt(&results),
            documents: results.into_iter().map(DocumentRef::from).collect(),
        }
    }

    fn responder(&self, search: &SearchOutcome, query: &str) -> Responder {
        Responder::with_template(
            &search.formatted_data,
            &self.model,
            &self.template,
            query,
            self.backend.clone(),
        )
    }

    /// 동기 응답 생성
    pub async fn generate_sync_response(&self, query: &str, n_results: usize) -> Result<ChatResponse> {
        let search = self.search_documents(query, n_results).await;
        let response = self.responder(&search, query).generate().await?;
        self.record(query, &response).await;

        Ok(ChatResponse {
            response,
            documents: search.documents,
            query: query.to_string(),
            model_used: self.model.clone(),
        })
    }

    /// 스트리밍 응답 생성
    ///
    /// 생성 조각들 뒤에 `<|DOCS_JSON|>[...]` 가 한 번 붙습니다.
    /// 스트림을 drop 하면 생성도 즉시 멈춥니다.
    pub fn generate_stream_response(&self, query: &str, n_results: usize) -> BoxStream<'static, String> {
        let service = self.clone();
        let query = query.to_string();

        let stream = async_stream::stream! {
            let search = service.search_documents(&query, n_results).await;
            let mut fragments = service.responder(&search, &query).stream_chunks();

            let mut full = String::new();
            let mut failure: Option<RagError> = None;

            while let Some(item) = fragments.next().await {
                match item {
                    Ok(fragment) => {
                        full.push_str(&fragment);
                        yield fragment;
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            drop(fragments);

            match failure {
                None => {
                    service.record(&query, &full).await;
                    yield docs_marker(&search.documents);
                }
                Some(e) => {
                    tracing::warn!("Error during response generation: {}", e);
                    yield error_fragment(&e);
                    yield docs_marker(&[]);
                }
            }
        };

        stream.boxed()
    }

    /// 대화 기록 (실패해도 응답에는 영향 없음)
    ///
    /// SQLite 쓰기는 블로킹이므로 spawn_blocking 에서 실행합니다.
    async fn record(&self, query: &str, response: &str) {
        let Some(log) = self.log.clone() else {
            return;
        };
        let (query, response) = (query.to_string(), response.to_string());

        match tokio::task::spawn_blocking(move || log.record(&query, &response)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Failed to record chat log: {}", e),
            Err(e) => tracing::warn!("Chat log task failed: {}", e),
        }
    }
}

/// `<|DOCS_JSON|>[...]`
pub fn docs_marker(documents: &[DocumentRef]) -> String {
    let json = serde_json::to_string(documents).unwrap_or_else(|_| "[]".to_string());
    format!("{}{}", DOCS_MARKER, json)
}

/// 스트림에 붙는 에러 메시지 (앞 100자)
fn error_fragment(error: &RagError) -> String {
    let message: String = error.to_string().chars().take(ERROR_PREVIEW_CHARS).collect();
    format!("\n\nError during response generation: {}...", message)
}

// ============================================================================
// StreamAssembler
// ============================================================================

/// 재조립된 응답
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledResponse {
    pub text: String,
    pub documents: Vec<DocumentRef>,
    /// 마커를 받았는지 여부
    pub complete: bool,
}

/// 스트림 소비자 - 본문과 문서 메타데이터 분리
///
/// `push` 는 화면에 바로 표시해도 되는 본문만 돌려주고,
/// 마커의 앞부분일 수 있는 꼬리는 다음 조각이 올 때까지 보류합니다.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    text: String,
    pending: String,
    payload: Option<String>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 조각 추가, 표시 가능한 본문 반환
    pub fn push(&mut self, fragment: &str) -> String {
        if let Some(payload) = self.payload.as_mut() {
            payload.push_str(fragment);
            return String::new();
        }

        self.pending.push_str(fragment);

        if let Some(pos) = self.pending.find(DOCS_MARKER) {
            let visible = self.pending[..pos].to_string();
            self.payload = Some(self.pending[pos + DOCS_MARKER.len()..].to_string());
            self.pending.clear();
            self.text.push_str(&visible);
            return visible;
        }

        let hold = marker_prefix_len(&self.pending);
        let split = self.pending.len() - hold;
        let visible: String = self.pending.drain(..split).collect();
        self.text.push_str(&visible);
        visible
    }

    /// 스트림 종료 후 결과
    ///
    /// 마커가 없으면 보류 중인 꼬리까지 본문으로 취급합니다.
    pub fn finish(mut self) -> Result<AssembledResponse> {
        match self.payload {
            Some(payload) => {
                let documents: Vec<DocumentRef> = serde_json::from_str(payload.trim())
                    .map_err(|e| RagError::transport("docs-marker", format!("Invalid document list: {}", e)))?;
                Ok(AssembledResponse {
                    text: self.text,
                    documents,
                    complete: true,
                })
            }
            None => {
                self.text.push_str(&self.pending);
                Ok(AssembledResponse {
                    text: self.text,
                    documents: Vec::new(),
                    complete: false,
                })
            }
        }
    }
}

/// 버퍼 끝에서 마커의 앞부분과 일치하는 가장 긴 길이
fn marker_prefix_len(buffer: &str) -> usize {
    let max = DOCS_MARKER.len().saturating_sub(1).min(buffer.len());
    (1..=max)
        .rev()
        .find(|&len| {
            let start = buffer.len() - len;
            buffer.is_char_boundary(start) && DOCS_MARKER.starts_with(&buffer[start..])
        })
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PROMPT;
    use crate::knowledge::{ChunkRecord, InMemoryVectorStore};
    use crate::testing::{hash_embedding, FailingBackend, FakeEmbedder, ScriptedBackend};
    use tempfile::TempDir;

    fn service_with(
        store: Arc<InMemoryVectorStore>,
        backend: Arc<dyn GenerationBackend>,
    ) -> ChatService {
        let retriever = Retriever::new(Arc::new(FakeEmbedder::new()), store, "docs", 5);
        let template = PromptTemplate::parse(DEFAULT_PROMPT).unwrap();
        ChatService::new(retriever, backend, template, "test-model")
    }

    async fn seeded_store() -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new());
        let text = "Lance stores vectors in columnar files.";
        store
            .upsert(
                "docs",
                &[ChunkRecord::new("lance.txt", 0, text.to_string(), hash_embedding(text))],
            )
            .await
            .unwrap();
        store
    }

    fn assemble(fragments: &[String]) -> AssembledResponse {
        let mut assembler = StreamAssembler::new();
        for fragment in fragments {
            assembler.push(fragment);
        }
        assembler.finish().unwrap()
    }

    #[tokio::test]
    async fn test_empty_collection_prompt_has_sentinel() {
        let backend = Arc::new(ScriptedBackend::new(&["NO Answer found"]));
        let service = service_with(Arc::new(InMemoryVectorStore::new()), backend.clone());

        let search = service.search_documents("What is Lance?", 5).await;
        assert_eq!(search.formatted_data, "No relevant data found.");
        assert!(search.documents.is_empty());

        let response = service.generate_sync_response("What is Lance?", 5).await.unwrap();
        assert_eq!(response.response, "NO Answer found");
        assert_eq!(response.model_used, "test-model");
        assert!(backend.prompts()[0].contains("No relevant data found."));
    }

    #[tokio::test]
    async fn test_stream_fragments_then_marker() {
        let backend = Arc::new(ScriptedBackend::new(&["Hel", "lo"]));
        let service = service_with(seeded_store().await, backend);

        let fragments: Vec<String> = service
            .generate_stream_response("Lance vectors", 5)
            .collect()
            .await;

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0], "Hel");
        assert_eq!(fragments[1], "lo");
        assert!(fragments[2].starts_with(DOCS_MARKER));

        let assembled = assemble(&fragments);
        assert_eq!(assembled.text, "Hello");
        assert!(assembled.complete);
        assert_eq!(assembled.documents.len(), 1);
        assert_eq!(assembled.documents[0].chunk_id, "lance.txt_chunk_0");
        assert_eq!(assembled.documents[0].file_name, "lance.txt");
    }

    #[tokio::test]
    async fn test_stream_error_appends_message_and_empty_docs() {
        let service = service_with(seeded_store().await, Arc::new(FailingBackend::transport()));

        let fragments: Vec<String> = service.generate_stream_response("q", 5).collect().await;
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].starts_with("\n\nError during response generation: "));
        assert!(fragments[0].ends_with("..."));
        assert_eq!(fragments[1], "<|DOCS_JSON|>[]");

        let assembled = assemble(&fragments);
        assert!(assembled.documents.is_empty());
        assert!(assembled.complete);
    }

    #[tokio::test]
    async fn test_stream_error_midway_keeps_fragments() {
        let backend = Arc::new(ScriptedBackend::failing_midway(&["partial "]));
        let service = service_with(seeded_store().await, backend);

        let fragments: Vec<String> = service.generate_stream_response("q", 5).collect().await;
        assert_eq!(fragments[0], "partial ");
        assert!(fragments[1].contains("Error during response generation"));
        assert_eq!(fragments.last().unwrap(), "<|DOCS_JSON|>[]");
    }

    #[tokio::test]
    async fn test_dropped_stream_stops_generation() {
        let backend = Arc::new(ScriptedBackend::new(&["one ", "two ", "three"]));
        let service = service_with(seeded_store().await, backend.clone());

        let mut stream = service.generate_stream_response("q", 5);
        assert_eq!(stream.next().await.unwrap(), "one ");
        assert!(!backend.stream_released());

        drop(stream);
        assert!(backend.stream_released());
        assert_eq!(backend.pulled_fragments(), 1);
    }

    #[tokio::test]
    async fn test_model_unavailable_surfaces_in_sync_response() {
        let service = service_with(seeded_store().await, Arc::new(FailingBackend::model_unavailable()));
        let err = service.generate_sync_response("q", 5).await.unwrap_err();
        assert!(matches!(err, RagError::ModelUnavailable { .. }));
    }

    #[test]
    fn test_error_fragment_truncated() {
        let err = RagError::transport("openai", "x".repeat(300));
        let fragment = error_fragment(&err);
        let body = fragment
            .strip_prefix("\n\nError during response generation: ")
            .unwrap()
            .strip_suffix("...")
            .unwrap();
        assert_eq!(body.chars().count(), 100);
    }

    #[tokio::test]
    async fn test_completed_exchange_is_recorded() {
        let dir = TempDir::new().unwrap();
        let log = ChatLogStore::open(&dir.path().join("chat.db")).unwrap();
        let service = service_with(seeded_store().await, Arc::new(ScriptedBackend::new(&["Hi"])))
            .with_log(log.clone());

        let _: Vec<String> = service.generate_stream_response("hello?", 5).collect().await;
        service.generate_sync_response("again?", 5).await.unwrap();

        let logs = log.recent(10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].user_query, "hello?");
        assert_eq!(logs[1].response, "Hi");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_recording_runs_off_the_async_worker() {
        let dir = TempDir::new().unwrap();
        let log = ChatLogStore::open(&dir.path().join("chat.db")).unwrap();
        let service = service_with(seeded_store().await, Arc::new(ScriptedBackend::new(&["ok"])))
            .with_log(log.clone());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .generate_sync_response(&format!("q{}", i), 5)
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(log.recent(10).unwrap().len(), 4);
    }

    #[test]
    fn test_assembler_marker_split_across_fragments() {
        let mut assembler = StreamAssembler::new();
        assert_eq!(assembler.push("Hi <|DO"), "Hi ");
        assert_eq!(assembler.push("CS_JSON|>[{\"file_name\":\"a.txt\","), "");
        assert_eq!(
            assembler.push("\"chunk_id\":\"a.txt_chunk_0\",\"content\":\"c\",\"distance\":0.5}]"),
            ""
        );

        let assembled = assembler.finish().unwrap();
        assert_eq!(assembled.text, "Hi ");
        assert_eq!(assembled.documents[0].chunk_id, "a.txt_chunk_0");
    }

    #[test]
    fn test_assembler_releases_false_prefix() {
        let mut assembler = StreamAssembler::new();
        assert_eq!(assembler.push("a <"), "a ");
        assert_eq!(assembler.push("b"), "<b");

        let assembled = assembler.finish().unwrap();
        assert_eq!(assembled.text, "a <b");
        assert!(!assembled.complete);
    }

    #[test]
    fn test_assembler_invalid_payload() {
        let mut assembler = StreamAssembler::new();
        assembler.push("text<|DOCS_JSON|>{oops");
        assert!(assembler.finish().is_err());
    }

    #[test]
    fn test_marker_prefix_len() {
        assert_eq!(marker_prefix_len("hello"), 0);
        assert_eq!(marker_prefix_len("hello<|"), 2);
        assert_eq!(marker_prefix_len("<|DOCS_JSON|"), 12);
        assert_eq!(marker_prefix_len("한글"), 0);
    }
}
