//! 파일 수집 모듈
//!
//! 문서 루트를 재귀 탐색하여 지원 확장자의 파일만 수집합니다.
//! 숨김 파일과 .gitignore 패턴은 건너뛰고, 결과는 경로순으로 정렬되어
//! 수집 순서가 항상 같습니다.

use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;

use crate::config::DocumentsConfig;
use crate::error::{RagError, Result};

// ============================================================================
// File Types
// ============================================================================

/// 지원하는 파일 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// UTF-8 텍스트 파일
    Text,
    /// PDF 파일
    Pdf,
}

impl FileType {
    /// 확장자로 파일 타입 결정 (pdf 외에는 텍스트로 읽음)
    pub fn from_extension(ext: &str) -> Self {
        if ext.eq_ignore_ascii_case("pdf") {
            FileType::Pdf
        } else {
            FileType::Text
        }
    }

    /// 파일 경로에서 타입 결정
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(FileType::Text)
    }
}

// ============================================================================
// Collected File
// ============================================================================

/// 수집된 파일 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedFile {
    /// 파일 경로
    pub path: PathBuf,
    /// 문서 루트 기준 상대 경로 (`/` 구분) - 청크 ID의 file_name
    pub file_name: String,
    /// 파일 타입
    pub file_type: FileType,
    /// 파일 크기 (바이트)
    pub size: u64,
}

/// 문서 루트 기준 파일 이름
///
/// 루트 밖의 파일이면 파일 이름만 사용합니다.
pub fn document_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).ok().filter(|p| !p.as_os_str().is_empty());

    match relative {
        Some(rel) => rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned()),
    }
}

// ============================================================================
// File Collector
// ============================================================================

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
    /// 수집할 확장자 (점 없이, 대소문자 무시)
    pub extensions: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::from_documents(&DocumentsConfig::default())
    }
}

impl CollectorConfig {
    pub fn from_documents(config: &DocumentsConfig) -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: config.max_file_size,
            extensions: config.extensions.clone(),
        }
    }
}

/// 파일 수집기
pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    /// 새 수집기 생성
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 수집기 생성
    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 경로 수집 (파일이면 단일 파일, 디렉토리면 재귀)
    pub fn collect(&self, path: &Path) -> Result<Vec<CollectedFile>> {
        if path.is_dir() {
            self.collect_directory(path)
        } else {
            let root = path.parent().unwrap_or_else(|| Path::new(""));
            Ok(self.collect_file(root, path)?.into_iter().collect())
        }
    }

    /// 단일 파일 수집 (필터에 걸리면 `None`)
    pub fn collect_file(&self, root: &Path, path: &Path) -> Result<Option<CollectedFile>> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            RagError::Extraction {
                path: path.display().to_string(),
                message: format!("file not found: {}", e),
            }
        })?;

        if !metadata.is_file() {
            return Err(RagError::Extraction {
                path: path.display().to_string(),
                message: "not a file".to_string(),
            });
        }

        let file = CollectedFile {
            path: path.to_path_buf(),
            file_name: document_name(root, path),
            file_type: FileType::from_path(path),
            size: metadata.len(),
        };

        Ok(self.should_include(&file).then_some(file))
    }

    /// 폴더 재귀 수집 (경로순 정렬)
    pub fn collect_directory(&self, root: &Path) -> Result<Vec<CollectedFile>> {
        if !root.is_dir() {
            return Err(RagError::Config(format!("Not a directory: {:?}", root)));
        }

        let mut files = Vec::new();

        // ignore 크레이트로 .gitignore 지원
        let walker = WalkBuilder::new(root)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            // 파일만 처리
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            match self.collect_file(root, entry.path()) {
                Ok(Some(file)) => files.push(file),
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to collect file: {}", e),
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::info!("Collected {} files from {:?}", files.len(), root);
        Ok(files)
    }

    /// 파일이 필터 조건을 만족하는지 확인
    fn should_include(&self, file: &CollectedFile) -> bool {
        let Some(ext) = file.path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        if !self
            .config
            .extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
        {
            return false;
        }

        // 파일 크기 제한
        if self.config.max_file_size > 0 && file.size > self.config.max_file_size {
            tracing::warn!("Skipping large file: {:?} ({} bytes)", file.path, file.size);
            return false;
        }

        true
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// 수집 통계
#[derive(Debug, Default)]
pub struct CollectionStats {
    pub total_files: usize,
    pub text_files: usize,
    pub pdf_files: usize,
    pub total_size: u64,
}

impl CollectionStats {
    /// 수집된 파일 목록에서 통계 계산
    pub fn from_files(files: &[CollectedFile]) -> Self {
        let mut stats = Self::default();

        for file in files {
            stats.total_files += 1;
            stats.total_size += file.size;

            match file.file_type {
                FileType::Text => stats.text_files += 1,
                FileType::Pdf => stats.pdf_files += 1,
            }
        }

        stats
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_extension("txt"), FileType::Text);
        assert_eq!(FileType::from_extension("PDF"), FileType::Pdf);
        assert_eq!(FileType::from_path(Path::new("a/b.pdf")), FileType::Pdf);
    }

    #[test]
    fn test_document_name() {
        let root = Path::new("/data/docs");
        assert_eq!(document_name(root, Path::new("/data/docs/a.txt")), "a.txt");
        assert_eq!(document_name(root, Path::new("/data/docs/sub/b.pdf")), "sub/b.pdf");
        assert_eq!(document_name(root, Path::new("/elsewhere/c.txt")), "c.txt");
    }

    #[test]
    fn test_collect_directory_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.txt", "bee");
        write(dir.path(), "a.TXT", "ay");
        write(dir.path(), "sub/c.txt", "see");
        write(dir.path(), "notes.md", "ignored");
        write(dir.path(), ".hidden.txt", "hidden");

        let collector = FileCollector::with_defaults();
        let files = collector.collect_directory(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();

        assert_eq!(names, vec!["a.TXT", "b.txt", "sub/c.txt"]);

        let stats = CollectionStats::from_files(&files);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.text_files, 3);
        assert_eq!(stats.pdf_files, 0);
    }

    #[test]
    fn test_max_file_size() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "big.txt", &"x".repeat(100));
        write(dir.path(), "small.txt", "x");

        let collector = FileCollector::new(CollectorConfig {
            max_file_size: 10,
            ..CollectorConfig::default()
        });
        let files = collector.collect_directory(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "small.txt");
    }

    #[test]
    fn test_collect_single_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "one.txt", "hello");

        let collector = FileCollector::with_defaults();
        let files = collector.collect(&dir.path().join("one.txt")).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "one.txt");

        assert!(collector.collect(&dir.path().join("missing.txt")).is_err());
    }
}
