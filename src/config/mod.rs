//! 설정 모듈
//!
//! 프로세스 시작 시 한 번 생성되어 각 컴포넌트에 참조로 전달됩니다.
//!
//! 우선순위 (낮음 → 높음):
//! 1. 기본값
//! 2. TOML 파일 (`--config`, `$DOCRAG_CONFIG`, `~/.docrag/config.toml`)
//! 3. `.env` 파일 (dotenvy)
//! 4. `DOCRAG_<SECTION>_<KEY>` 환경변수
//! 5. CLI 플래그

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::llm::PromptTemplate;

/// 설정 파일 경로 환경변수
pub const CONFIG_ENV: &str = "DOCRAG_CONFIG";

/// 벡터 저장소 경로 단축 환경변수
pub const DB_DIRECTORY_ENV: &str = "DOCRAG_DB_DIRECTORY";

/// 기본 프롬프트 템플릿
pub const DEFAULT_PROMPT: &str = "\
DOCUMENTS:

{data}


QUESTION:
{query}


INSTRUCTIONS:
Answer the users QUESTION using the DOCUMENTS text above.
Keep your answer ground in the facts of the DOCUMENT.
If the DOCUMENT doesn't contain the facts to answer the QUESTION return NO Answer found
";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.docrag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docrag")
}

/// `~` 로 시작하는 경로를 홈 디렉토리로 확장
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// 환경변수에서 API 키 로드
pub fn resolve_api_key(env_name: &str) -> Result<String> {
    match std::env::var(env_name) {
        Ok(key) if !key.is_empty() => {
            tracing::debug!("Using API key from {}", env_name);
            Ok(key)
        }
        _ => Err(RagError::Config(format!(
            "API key not found. Set the {} environment variable.",
            env_name
        ))),
    }
}

// ============================================================================
// Backend Selection
// ============================================================================

/// 백엔드 선택 (임베딩, 생성 공통)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// 로컬 Ollama 서버
    Local,
    /// OpenAI 호환 원격 API
    Remote,
}

impl FromStr for BackendKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" | "ollama" => Ok(Self::Local),
            "remote" | "openai" => Ok(Self::Remote),
            other => Err(RagError::Config(format!(
                "Unknown backend '{}'. Use 'local' or 'remote'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// 임베딩 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: BackendKind,
    /// 모델 이름 (없으면 백엔드별 기본값)
    pub model: Option<String>,
    /// API 기본 URL (없으면 백엔드별 기본값)
    pub base_url: Option<String>,
    /// 원격 API 키 환경변수 이름
    pub api_key_env: String,
    /// 로컬 모델 최대 입력 길이 (공백 기준 토큰 수)
    pub max_length: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            model: None,
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_length: 512,
            timeout_secs: 60,
        }
    }
}

impl EmbeddingConfig {
    pub fn model_name(&self) -> &str {
        match (&self.model, self.backend) {
            (Some(model), _) if !model.trim().is_empty() => model,
            (_, BackendKind::Local) => "nomic-embed-text",
            (_, BackendKind::Remote) => "text-embedding-3-small",
        }
    }

    pub fn base_url(&self) -> &str {
        match (&self.base_url, self.backend) {
            (Some(url), _) if !url.trim().is_empty() => url,
            (_, BackendKind::Local) => "http://localhost:11434",
            (_, BackendKind::Remote) => "https://api.openai.com/v1",
        }
    }

    /// 컬렉션 매니페스트에 기록되는 임베더 식별자
    pub fn identity(&self) -> String {
        format!("{}:{}", self.backend, self.model_name())
    }
}

/// 벡터 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub collection: String,
    pub n_results: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: get_data_dir().join("vectors.lance"),
            collection: "my_collection".to_string(),
            n_results: 5,
        }
    }
}

/// 청킹 설정 (문장 수 기준)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// 청크 당 문장 수
    pub chunk_size: usize,
    /// 인접 청크 간 중첩 문장 수
    pub overlap_size: usize,
    /// 문장 분리 언어
    pub language: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            overlap_size: 5,
            language: "english".to_string(),
        }
    }
}

/// 원본 문서 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    /// 문서 루트 디렉토리
    pub root: Option<PathBuf>,
    /// 지원 확장자
    pub extensions: Vec<String>,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: None,
            extensions: vec!["txt".to_string(), "pdf".to_string()],
            max_file_size: 50 * 1024 * 1024,
        }
    }
}

/// 생성 모델 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: BackendKind,
    /// 로컬(Ollama) 모델
    pub model: String,
    /// 원격(OpenAI 호환) 모델
    pub remote_model: String,
    /// Ollama 서버 URL
    pub base_url: String,
    /// OpenAI 호환 API URL
    pub openai_base_url: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// 비스트리밍 요청 제한 시간 (스트리밍 응답은 길이 제한 없음)
    pub timeout_secs: u64,
    /// `{data}`, `{query}` placeholder를 포함하는 프롬프트 템플릿
    pub prompt: String,
    /// 대화 기록 저장 여부
    pub record_data: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            model: "deepseek-r1:1.5b".to_string(),
            remote_model: "gpt-4o".to_string(),
            base_url: "http://localhost:11434".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
            timeout_secs: 300,
            prompt: DEFAULT_PROMPT.to_string(),
            record_data: true,
        }
    }
}

impl LlmConfig {
    /// 선택된 백엔드의 모델 이름
    pub fn active_model(&self) -> &str {
        match self.backend {
            BackendKind::Local => &self.model,
            BackendKind::Remote => &self.remote_model,
        }
    }
}

/// HTTP 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub chunking: ChunkingConfig,
    pub documents: DocumentsConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
}

impl RagConfig {
    /// 모든 소스를 병합하여 설정 로드
    ///
    /// 명시적으로 지정한 파일이 없으면 에러, 기본 위치의 파일은 선택 사항입니다.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        // .env 는 없어도 됨
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {:?}", path);
        }

        let file = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => {
                let default_path = get_data_dir().join("config.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.expand_paths();
        Ok(config)
    }

    /// TOML 파일에서 로드
    pub fn from_file(path: &Path) -> Result<Self> {
        let path = expand_home(path);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            RagError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        tracing::debug!("Loaded config file {:?}", path);
        Self::from_toml_str(&content)
    }

    /// TOML 문자열 파싱
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RagError::Config(format!("Invalid config: {}", e)))
    }

    /// `~` 경로 확장
    fn expand_paths(&mut self) {
        self.store.path = expand_home(&self.store.path);
        if let Some(root) = self.documents.root.take() {
            self.documents.root = Some(expand_home(&root));
        }
    }

    /// 환경변수 오버라이드 적용
    ///
    /// `lookup` 으로 변수를 조회하므로 테스트에서 프로세스 환경을 건드리지 않습니다.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // embedding
        if let Some(v) = get("DOCRAG_EMBEDDING_BACKEND") {
            self.embedding.backend = v.parse()?;
        }
        if let Some(v) = get("DOCRAG_EMBEDDING_MODEL") {
            self.embedding.model = Some(v);
        }
        if let Some(v) = get("DOCRAG_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(v);
        }
        if let Some(v) = get("DOCRAG_EMBEDDING_API_KEY_ENV") {
            self.embedding.api_key_env = v;
        }
        override_parsed(&get, "DOCRAG_EMBEDDING_MAX_LENGTH", &mut self.embedding.max_length)?;
        override_parsed(&get, "DOCRAG_EMBEDDING_TIMEOUT_SECS", &mut self.embedding.timeout_secs)?;

        // store
        if let Some(v) = get(DB_DIRECTORY_ENV).or_else(|| get("DOCRAG_STORE_PATH")) {
            self.store.path = PathBuf::from(v);
        }
        if let Some(v) = get("DOCRAG_STORE_COLLECTION") {
            self.store.collection = v;
        }
        override_parsed(&get, "DOCRAG_STORE_N_RESULTS", &mut self.store.n_results)?;

        // chunking
        override_parsed(&get, "DOCRAG_CHUNKING_CHUNK_SIZE", &mut self.chunking.chunk_size)?;
        override_parsed(&get, "DOCRAG_CHUNKING_OVERLAP_SIZE", &mut self.chunking.overlap_size)?;
        if let Some(v) = get("DOCRAG_CHUNKING_LANGUAGE") {
            self.chunking.language = v;
        }

        // documents
        if let Some(v) = get("DOCRAG_DOCUMENTS_ROOT") {
            self.documents.root = Some(PathBuf::from(v));
        }
        if let Some(v) = get("DOCRAG_DOCUMENTS_EXTENSIONS") {
            self.documents.extensions = v
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_string())
                .filter(|e| !e.is_empty())
                .collect();
        }
        override_parsed(&get, "DOCRAG_DOCUMENTS_MAX_FILE_SIZE", &mut self.documents.max_file_size)?;

        // llm
        if let Some(v) = get("DOCRAG_LLM_BACKEND") {
            self.llm.backend = v.parse()?;
        }
        if let Some(v) = get("DOCRAG_LLM_USE_OPENAI") {
            if parse_bool(&v) {
                self.llm.backend = BackendKind::Remote;
            }
        }
        if let Some(v) = get("DOCRAG_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("DOCRAG_LLM_REMOTE_MODEL") {
            self.llm.remote_model = v;
        }
        if let Some(v) = get("DOCRAG_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("DOCRAG_LLM_OPENAI_BASE_URL") {
            self.llm.openai_base_url = v;
        }
        if let Some(v) = get("DOCRAG_LLM_API_KEY_ENV") {
            self.llm.api_key_env = v;
        }
        override_parsed(&get, "DOCRAG_LLM_MAX_TOKENS", &mut self.llm.max_tokens)?;
        override_parsed(&get, "DOCRAG_LLM_TEMPERATURE", &mut self.llm.temperature)?;
        override_parsed(&get, "DOCRAG_LLM_TIMEOUT_SECS", &mut self.llm.timeout_secs)?;
        if let Some(v) = get("DOCRAG_LLM_PROMPT") {
            self.llm.prompt = v;
        }
        if let Some(v) = get("DOCRAG_LLM_RECORD_DATA") {
            self.llm.record_data = parse_bool(&v);
        }

        // server
        if let Some(v) = get("DOCRAG_SERVER_HOST") {
            self.server.host = v;
        }
        override_parsed(&get, "DOCRAG_SERVER_PORT", &mut self.server.port)?;

        Ok(())
    }

    /// 설정 검증 (I/O 이전)
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than 0".into()));
        }
        if chunking.overlap_size >= chunking.chunk_size {
            return Err(RagError::Config(format!(
                "overlap_size ({}) must be smaller than chunk_size ({})",
                chunking.overlap_size, chunking.chunk_size
            )));
        }

        if self.store.n_results == 0 {
            return Err(RagError::Config("n_results must be greater than 0".into()));
        }
        if self.store.collection.trim().is_empty() {
            return Err(RagError::Config("collection name must not be empty".into()));
        }

        if self.documents.extensions.is_empty() {
            return Err(RagError::Config(
                "at least one supported file extension is required".into(),
            ));
        }

        if self.embedding.backend == BackendKind::Remote && self.embedding.api_key_env.is_empty() {
            return Err(RagError::Config(
                "remote embedding backend requires api_key_env".into(),
            ));
        }
        if self.llm.backend == BackendKind::Remote && self.llm.api_key_env.is_empty() {
            return Err(RagError::Config("remote llm backend requires api_key_env".into()));
        }

        PromptTemplate::parse(&self.llm.prompt)?;
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// true / yes / 1 (대소문자 무시)
fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "yes" | "1")
}

fn override_parsed<G, T>(get: &G, key: &str, target: &mut T) -> Result<()>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| RagError::Config(format!("Invalid value for {}: {} ({})", key, raw, e)))?;
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
