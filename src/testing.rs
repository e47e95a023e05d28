//! 테스트용 가짜 임베더 / 생성 백엔드
//!
//! 외부 서비스 없이 파이프라인 전체를 결정적으로 검증합니다.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::llm::GenerationBackend;

pub const FAKE_DIMENSION: usize = 16;

// ============================================================================
// Embedders
// ============================================================================

/// 단어 해시 bag-of-words 임베더
///
/// 같은 단어를 공유하는 텍스트일수록 가깝습니다.
#[derive(Debug)]
pub struct FakeEmbedder {
    calls: AtomicUsize,
    name: &'static str,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::named("fake:hash")
    }

    /// 같은 벡터를 내지만 다른 식별자를 가진 임베더
    pub fn named(name: &'static str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            name,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; FAKE_DIMENSION];
    for word in text.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.is_empty() {
            continue;
        }
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        vector[(hash % FAKE_DIMENSION as u64) as usize] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(hash_embedding(text))
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// 항상 전송 실패하는 임베더
#[derive(Debug, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::transport("fake", "connection refused"))
    }

    fn name(&self) -> &str {
        "fake:hash"
    }
}

/// 특정 단어가 포함된 텍스트에서만 실패하는 임베더
#[derive(Debug)]
pub struct FlakyEmbedder {
    needle: String,
}

impl FlakyEmbedder {
    pub fn failing_on(needle: &str) -> Self {
        Self {
            needle: needle.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(&self.needle) {
            return Err(RagError::transport("fake", "rate limited"));
        }
        Ok(hash_embedding(text))
    }

    fn name(&self) -> &str {
        "fake:hash"
    }
}

// ============================================================================
// Generation Backends
// ============================================================================

/// drop 되면 플래그를 세움
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// 미리 정한 조각을 돌려주는 백엔드
///
/// 스트림이 내보낸 조각 수와 스트림 해제 여부를 기록합니다.
#[derive(Debug)]
pub struct ScriptedBackend {
    fragments: Vec<String>,
    fail_after_fragments: bool,
    checks: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    pulled: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl ScriptedBackend {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            fail_after_fragments: false,
            checks: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            pulled: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 조각을 모두 보낸 뒤 전송 에러
    pub fn failing_midway(fragments: &[&str]) -> Self {
        Self {
            fail_after_fragments: true,
            ..Self::new(fragments)
        }
    }

    pub fn availability_checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    /// 스트림이 내보낸 조각 수
    pub fn pulled_fragments(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    /// 마지막 스트림이 drop 되었는지 여부
    pub fn stream_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn record(&self, prompt: &str) {
        self.prompts.lock().unwrap().push(prompt.to_string());
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn ensure_model_available(&self, _model: &str) -> Result<()> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn complete(&self, _model: &str, prompt: &str) -> Result<String> {
        self.record(prompt);
        if self.fail_after_fragments {
            return Err(RagError::transport("scripted", "connection reset"));
        }
        Ok(self.fragments.concat())
    }

    async fn stream(&self, _model: &str, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        self.record(prompt);
        let mut items: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
        if self.fail_after_fragments {
            items.push(Err(RagError::transport("scripted", "connection reset")));
        }

        self.released.store(false, Ordering::SeqCst);
        let guard = DropFlag(self.released.clone());
        let pulled = self.pulled.clone();
        let stream = async_stream::stream! {
            let _guard = guard;
            for item in items {
                pulled.fetch_add(1, Ordering::SeqCst);
                yield item;
            }
        };
        Ok(stream.boxed())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// 항상 실패하는 백엔드
#[derive(Debug)]
pub struct FailingBackend {
    model_missing: bool,
}

impl FailingBackend {
    pub fn transport() -> Self {
        Self {
            model_missing: false,
        }
    }

    pub fn model_unavailable() -> Self {
        Self {
            model_missing: true,
        }
    }
}

#[async_trait]
impl GenerationBackend for FailingBackend {
    async fn ensure_model_available(&self, model: &str) -> Result<()> {
        if self.model_missing {
            return Err(RagError::ModelUnavailable {
                model: model.to_string(),
                message: "pull failed: file does not exist".into(),
            });
        }
        Ok(())
    }

    async fn complete(&self, _model: &str, _prompt: &str) -> Result<String> {
        Err(RagError::transport("failing", "backend unreachable"))
    }

    async fn stream(&self, _model: &str, _prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        Err(RagError::transport("failing", "backend unreachable"))
    }

    fn name(&self) -> &str {
        "failing"
    }
}
