//! Chat Log - rusqlite 기반 대화 기록 저장소
//!
//! 완료된 질의/응답 쌍을 저장합니다.
//! 저장 위치: ~/.docrag/chat_logs.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::config::get_data_dir;
use crate::error::{RagError, Result};

// ============================================================================
// Types
// ============================================================================

/// 저장된 대화 기록
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLog {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub user_query: String,
    pub response: String,
}

impl ChatLog {
    /// `[timestamp] 질문 앞 50자...`
    pub fn summary(&self) -> String {
        let preview: String = self.user_query.chars().take(50).collect();
        format!("[{}] {}...", self.timestamp.format("%Y-%m-%d %H:%M:%S"), preview)
    }
}

// ============================================================================
// ChatLogStore
// ============================================================================

/// 대화 기록 저장소
#[derive(Clone)]
pub struct ChatLogStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl ChatLogStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.docrag/chat_logs.db)
    pub fn open_default() -> Result<Self> {
        Self::open(&get_data_dir().join("chat_logs.db"))
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RagError::store("sqlite", format!("Lock error: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chat_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                user_query TEXT NOT NULL,
                response TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chat_logs_timestamp ON chat_logs(timestamp)",
            [],
        )?;

        tracing::debug!("Chat log initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 대화 기록 추가
    pub fn record(&self, user_query: &str, response: &str) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO chat_logs (timestamp, user_query, response) VALUES (?1, ?2, ?3)",
            params![now, user_query, response],
        )?;

        let id = conn.last_insert_rowid();
        tracing::debug!("Recorded chat log (id={})", id);
        Ok(id)
    }

    /// 최근 기록 (최신순)
    pub fn recent(&self, limit: usize) -> Result<Vec<ChatLog>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, user_query, response FROM chat_logs
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ChatLog {
                id: row.get(0)?,
                timestamp: parse_datetime(row.get::<_, String>(1)?),
                user_query: row.get(2)?,
                response: row.get(3)?,
            })
        })?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// 기록 개수
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chat_logs", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
