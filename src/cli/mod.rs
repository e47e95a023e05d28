//! CLI 모듈
//!
//! docrag CLI 명령어 정의 및 구현

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::{ChatLogStore, ChatService, StreamAssembler};
use crate::collector::{CollectionStats, CollectorConfig, FileCollector};
use crate::config::{get_data_dir, RagConfig};
use crate::embedding::create_embedder;
use crate::knowledge::{Ingestor, LanceVectorStore, Retriever, VectorStore};
use crate::server::run_server;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "docrag")]
#[command(version, about = "문장 단위 청킹 기반 RAG 파이프라인", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 디버그 로그 출력
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일 또는 폴더를 벡터 저장소에 추가
    Ingest {
        /// 수집할 파일/폴더 경로 (없으면 documents.root)
        path: Option<PathBuf>,

        /// 대상 컬렉션
        #[arg(long)]
        collection: Option<String>,

        /// 파일의 기존 청크를 삭제 후 다시 저장
        #[arg(long)]
        replace: bool,
    },

    /// 관련 청크 검색 (생성 없음)
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수
        #[arg(short, long)]
        n_results: Option<usize>,

        /// 대상 컬렉션
        #[arg(long)]
        collection: Option<String>,
    },

    /// 질문 한 번에 답변 (스트리밍)
    Ask {
        /// 질문
        query: String,

        /// 검색 결과 개수
        #[arg(short, long)]
        n_results: Option<usize>,

        /// 대상 컬렉션
        #[arg(long)]
        collection: Option<String>,
    },

    /// 대화형 질의 (quit 입력 시 종료)
    Chat {
        /// 검색 결과 개수
        #[arg(short, long)]
        n_results: Option<usize>,

        /// 대상 컬렉션
        #[arg(long)]
        collection: Option<String>,
    },

    /// HTTP 서버 실행
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// 최근 대화 기록
    History {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;

    match cli.command {
        Commands::Ingest {
            path,
            collection,
            replace,
        } => {
            apply_collection(&mut config, collection);
            cmd_ingest(&config, path, replace).await
        }
        Commands::Search {
            query,
            n_results,
            collection,
        } => {
            apply_collection(&mut config, collection);
            cmd_search(&config, &query, n_results).await
        }
        Commands::Ask {
            query,
            n_results,
            collection,
        } => {
            apply_collection(&mut config, collection);
            cmd_ask(&config, &query, n_results).await
        }
        Commands::Chat {
            n_results,
            collection,
        } => {
            apply_collection(&mut config, collection);
            cmd_chat(&config, n_results).await
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            cmd_serve(&config).await
        }
        Commands::History { limit } => cmd_history(limit),
        Commands::Status => cmd_status(&config).await,
    }
}

fn apply_collection(config: &mut RagConfig, collection: Option<String>) {
    if let Some(collection) = collection {
        config.store.collection = collection;
    }
}

async fn open_store(config: &RagConfig) -> Result<Arc<dyn VectorStore>> {
    let store = LanceVectorStore::open(&config.store.path)
        .await
        .with_context(|| format!("벡터 저장소 열기 실패: {}", config.store.path.display()))?;
    Ok(Arc::new(store))
}

async fn chat_service(config: &RagConfig) -> Result<ChatService> {
    config.validate().context("설정 검증 실패")?;
    ChatService::from_config(config)
        .await
        .context("ChatService 초기화 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
///
/// 파일 또는 폴더의 문서를 문장 단위로 청킹하여 임베딩 후 저장합니다.
async fn cmd_ingest(config: &RagConfig, path: Option<PathBuf>, replace: bool) -> Result<()> {
    config.validate().context("설정 검증 실패")?;

    let root = match path.or_else(|| config.documents.root.clone()) {
        Some(root) => root,
        None => bail!("수집할 경로를 지정하거나 documents.root 를 설정해야 합니다"),
    };

    let collector = FileCollector::new(CollectorConfig::from_documents(&config.documents));
    let files = collector
        .collect(&root)
        .with_context(|| format!("파일 수집 실패: {}", root.display()))?;

    if files.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: {} 파일", stats.total_files);
    println!("    텍스트: {}, PDF: {}", stats.text_files, stats.pdf_files);
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));

    let embedder = create_embedder(&config.embedding).context("임베더 생성 실패")?;
    let store = open_store(config).await?;
    let ingestor = Ingestor::from_config(config, embedder, store)
        .context("Ingestor 초기화 실패")?
        .replace_existing(replace);

    let chunking = ingestor.chunk_config();
    println!(
        "[*] 컬렉션: {} (청크 {} 문장, 중첩 {} 문장)",
        ingestor.collection(),
        chunking.chunk_size(),
        chunking.overlap_size()
    );
    println!();

    let report = ingestor.ingest_files(&files).await;

    for file in &report.files {
        if file.skipped > 0 {
            println!(
                "[!] {}: {} 청크 중 {} 저장, {} 건너뜀",
                file.file_name, file.chunks, file.stored, file.skipped
            );
        } else {
            println!("[OK] {}: {} 청크 저장", file.file_name, file.stored);
        }
    }
    for (file_name, error) in &report.failed {
        println!("[!] {}: 실패 ({})", file_name, error);
    }

    println!();
    println!(
        "[OK] 완료: 파일 {} 성공, {} 실패 / 청크 {} 저장, {} 건너뜀",
        report.files_processed(),
        report.files_failed(),
        report.chunks_stored(),
        report.chunks_skipped()
    );

    Ok(())
}

/// 검색 명령어 (search)
///
/// 백엔드 장애는 빈 결과와 구분하여 에러로 보고합니다.
async fn cmd_search(config: &RagConfig, query: &str, n_results: Option<usize>) -> Result<()> {
    config.validate().context("설정 검증 실패")?;

    println!("[*] 검색 중: \"{}\"", query);

    let embedder = create_embedder(&config.embedding).context("임베더 생성 실패")?;
    let store = open_store(config).await?;
    let retriever = Retriever::new(
        embedder,
        store,
        config.store.collection.clone(),
        config.store.n_results,
    );

    let n_results = n_results.unwrap_or(config.store.n_results);
    let results = retriever
        .try_retrieve_n(query, n_results)
        .await
        .context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [거리: {:.4}] {}",
            i + 1,
            result.distance,
            result.metadata.chunk_id
        );
        println!("   파일: {}", result.metadata.file_name);
        println!("   내용: {}", truncate_text(&result.document, 200));
        println!();
    }

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(config: &RagConfig, query: &str, n_results: Option<usize>) -> Result<()> {
    let service = chat_service(config).await?;
    let n_results = n_results.unwrap_or_else(|| service.default_n_results());

    println!("[*] 모델: {}", service.model());
    print_log_target(&service);
    println!();
    stream_answer(&service, query, n_results).await
}

/// 대화 명령어 (chat)
async fn cmd_chat(config: &RagConfig, n_results: Option<usize>) -> Result<()> {
    let service = chat_service(config).await?;
    let n_results = n_results.unwrap_or_else(|| service.default_n_results());

    println!("[*] 모델: {} / 컬렉션: {}", service.model(), config.store.collection);
    print_log_target(&service);
    println!("    종료하려면 quit 를 입력하세요.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n질문> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("quit") {
            break;
        }

        println!();
        stream_answer(&service, query, n_results).await?;
    }

    Ok(())
}

fn print_log_target(service: &ChatService) {
    if let Some(log) = service.log() {
        println!("[*] 대화 기록: {}", log.db_path().display());
    }
}

/// 스트리밍 응답을 출력하고 인용 문서를 표시
async fn stream_answer(service: &ChatService, query: &str, n_results: usize) -> Result<()> {
    let mut stream = service.generate_stream_response(query, n_results);
    let mut assembler = StreamAssembler::new();
    let mut stdout = std::io::stdout();

    while let Some(fragment) = stream.next().await {
        let visible = assembler.push(&fragment);
        if !visible.is_empty() {
            write!(stdout, "{}", visible)?;
            stdout.flush()?;
        }
    }
    println!();

    let assembled = assembler.finish().context("응답 메타데이터 파싱 실패")?;
    if !assembled.documents.is_empty() {
        println!();
        println!("[*] 참고 문서:");
        for doc in &assembled.documents {
            println!("    - {} ({})", doc.chunk_id, doc.file_name);
        }
    }

    Ok(())
}

/// 서버 명령어 (serve)
async fn cmd_serve(config: &RagConfig) -> Result<()> {
    let service = chat_service(config).await?;
    println!(
        "[*] http://{}:{} 에서 서버 시작 (모델: {})",
        config.server.host,
        config.server.port,
        service.model()
    );
    run_server(&config.server, service).await
}

/// 대화 기록 명령어 (history)
fn cmd_history(limit: usize) -> Result<()> {
    let log = ChatLogStore::open_default().context("대화 기록 열기 실패")?;
    let logs = log.recent(limit).context("대화 기록 조회 실패")?;

    if logs.is_empty() {
        println!("[!] 저장된 대화가 없습니다.");
        return Ok(());
    }

    println!("[OK] 최근 대화 ({} 건):\n", logs.len());

    for entry in logs {
        println!("  #{:<4} {}", entry.id, entry.timestamp.format("%Y-%m-%d %H:%M"));
        println!("        Q: {}", truncate_text(&entry.user_query, 80));
        println!("        A: {}", truncate_text(&entry.response, 120));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
///
/// 시스템 상태를 확인합니다.
async fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("docrag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());
    println!("[*] 임베딩: {}", config.embedding.identity());
    println!(
        "[*] 생성 모델: {} ({})",
        config.llm.active_model(),
        config.llm.backend
    );

    match config.validate() {
        Ok(()) => println!("[OK] 설정: 유효"),
        Err(e) => println!("[!] 설정 오류: {}", e),
    }

    // 벡터 저장소
    println!("[*] 벡터 저장소: {}", config.store.path.display());
    match open_store(config).await {
        Ok(store) => match store.collections().await {
            Ok(collections) if collections.is_empty() => {
                println!("[!] 컬렉션 없음");
            }
            Ok(collections) => {
                for name in collections {
                    let count = store.count(&name).await.unwrap_or(0);
                    let marker = if name == config.store.collection { "*" } else { " " };
                    print!("   {} {}: {} 청크", marker, name, count);
                    match store.manifest(&name).await {
                        Ok(Some(manifest)) => {
                            println!(" [{}, {} dims]", manifest.embedder, manifest.dimension)
                        }
                        Ok(None) => println!(),
                        Err(e) => {
                            println!();
                            tracing::debug!("Manifest lookup failed for '{}': {}", name, e);
                        }
                    }
                }
            }
            Err(e) => println!("[!] 컬렉션 조회 실패: {}", e),
        },
        Err(e) => println!("[!] {:#}", e),
    }

    // 대화 기록
    match ChatLogStore::open_default() {
        Ok(log) => match log.count() {
            Ok(count) => println!("[OK] 대화 기록: {} 건 ({})", count, log.db_path().display()),
            Err(e) => println!("[!] 대화 기록 조회 실패: {}", e),
        },
        Err(e) => println!("[!] 대화 기록 열기 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
