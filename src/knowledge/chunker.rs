//! Sentence Chunking Module
//!
//! 문서 텍스트를 문장 단위로 분리하고, 문장 윈도우를 겹치게 이동시켜 청크를 만듭니다.
//!
//! - 문장 경계: Unicode UAX #29 + 언어별 약어 테이블
//! - 청크: `chunk_size` 문장 윈도우, 이동 폭 `chunk_size - overlap_size`
//!
//! 오버랩은 청크 경계에서 문맥이 끊기지 않게 해 검색 recall을 높입니다.

use std::sync::OnceLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{RagError, Result};

// ============================================================================
// Language
// ============================================================================

/// 문장 분리 지원 언어
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Czech,
    Danish,
    Dutch,
    English,
    Estonian,
    Finnish,
    French,
    German,
    Greek,
    Italian,
    Norwegian,
    Polish,
    Portuguese,
    Russian,
    Slovene,
    Spanish,
    Swedish,
    Turkish,
}

impl Language {
    /// 언어 이름으로 조회 (대소문자 무시)
    pub fn from_name(name: &str) -> Option<Self> {
        let lang = match name.trim().to_lowercase().as_str() {
            "czech" => Self::Czech,
            "danish" => Self::Danish,
            "dutch" => Self::Dutch,
            "english" => Self::English,
            "estonian" => Self::Estonian,
            "finnish" => Self::Finnish,
            "french" => Self::French,
            "german" => Self::German,
            "greek" => Self::Greek,
            "italian" => Self::Italian,
            "norwegian" => Self::Norwegian,
            "polish" => Self::Polish,
            "portuguese" => Self::Portuguese,
            "russian" => Self::Russian,
            "slovene" => Self::Slovene,
            "spanish" => Self::Spanish,
            "swedish" => Self::Swedish,
            "turkish" => Self::Turkish,
            _ => return None,
        };
        Some(lang)
    }

    /// 문장 끝으로 오인하면 안 되는 약어 (소문자, 마침표 포함)
    ///
    /// 문장 끝에도 자주 오는 약어(etc. 등)는 넣지 않습니다.
    fn abbreviations(self) -> &'static [&'static str] {
        match self {
            Self::English => &[
                "mr.", "mrs.", "ms.", "dr.", "prof.", "sr.", "jr.", "st.", "vs.", "e.g.",
                "i.e.", "mt.", "gen.", "col.", "capt.", "lt.", "sgt.", "rev.", "fig.",
                "approx.", "dept.",
            ],
            Self::German => &[
                "z.b.", "bzw.", "d.h.", "dr.", "prof.", "nr.", "hr.", "fr.", "str.", "ca.",
                "vgl.", "u.a.", "evtl.",
            ],
            Self::French => &[
                "m.", "mme.", "mlle.", "dr.", "p.ex.", "cf.", "av.", "bd.", "st.", "ste.",
            ],
            Self::Spanish => &[
                "sr.", "sra.", "srta.", "dr.", "dra.", "p.ej.", "ud.", "uds.", "av.", "pág.",
            ],
            Self::Italian => &["sig.", "dott.", "prof.", "ing.", "avv.", "pag.", "p.es."],
            Self::Portuguese => &["sr.", "sra.", "dr.", "dra.", "prof.", "av.", "pág.", "p.ex."],
            Self::Dutch => &["dhr.", "mevr.", "dr.", "prof.", "bijv.", "o.a.", "nr.", "blz."],
            Self::Danish | Self::Norwegian => {
                &["hr.", "fru.", "dr.", "prof.", "f.eks.", "bl.a.", "nr.", "ca."]
            }
            Self::Swedish => &["hr.", "fr.", "dr.", "prof.", "t.ex.", "bl.a.", "nr.", "ca."],
            Self::Finnish => &["esim.", "ks.", "prof.", "tri.", "mm."],
            Self::Estonian => &["nt.", "vt.", "prof.", "dr.", "hr.", "pr."],
            Self::Czech => &["např.", "tzv.", "prof.", "dr.", "ing.", "mgr.", "str.", "č."],
            Self::Polish => &["np.", "tzw.", "prof.", "dr.", "inż.", "mgr.", "ul.", "nr.", "ok."],
            Self::Slovene => &["npr.", "dr.", "prof.", "ga.", "g.", "t.i."],
            Self::Russian => &["г.", "гг.", "т.е.", "т.к.", "им.", "проф.", "ул.", "стр.", "см."],
            Self::Greek => &["κ.", "δρ.", "π.χ.", "καθ."],
            Self::Turkish => &["dr.", "prof.", "doç.", "av.", "bkz.", "vb."],
        }
    }
}

// ============================================================================
// Sentence Splitter
// ============================================================================

/// 언어 인식 문장 분리기
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    language: Option<Language>,
}

impl SentenceSplitter {
    /// 언어 이름으로 생성
    ///
    /// 지원하지 않는 언어면 기본(UAX #29) 분리기로 폴백합니다.
    pub fn for_language(name: &str) -> Self {
        let language = Language::from_name(name);
        if language.is_none() {
            tracing::warn!(
                "No sentence model for language '{}', falling back to default boundaries",
                name
            );
        }
        Self { language }
    }

    pub fn language(&self) -> Option<Language> {
        self.language
    }

    /// 텍스트를 문장 목록으로 분리 (문서 순서 유지)
    ///
    /// 빈 줄은 문단 경계로 취급하고, 문단 내부의 줄바꿈은 공백으로 합칩니다.
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();

        for paragraph in paragraph_separator().split(text) {
            let paragraph = collapse_whitespace(paragraph);
            if paragraph.is_empty() {
                continue;
            }

            let mut pending = String::new();
            for segment in paragraph.split_sentence_bounds() {
                pending.push_str(segment);
                let candidate = pending.trim();
                if candidate.is_empty() {
                    pending.clear();
                    continue;
                }
                if self.ends_with_abbreviation(candidate) {
                    continue;
                }
                sentences.push(candidate.to_string());
                pending.clear();
            }

            let rest = pending.trim();
            if !rest.is_empty() {
                sentences.push(rest.to_string());
            }
        }

        sentences
    }

    fn ends_with_abbreviation(&self, candidate: &str) -> bool {
        let Some(language) = self.language else {
            return false;
        };

        let last = candidate
            .split_whitespace()
            .next_back()
            .unwrap_or_default()
            .trim_start_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();

        language.abbreviations().contains(&last.as_str())
    }
}

/// 텍스트를 문장으로 분리
pub fn split_into_sentences(text: &str, language: &str) -> Vec<String> {
    SentenceSplitter::for_language(language).split(text)
}

fn paragraph_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t\r\f]*\n").expect("valid paragraph regex"))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Windowed Chunking
// ============================================================================

/// 청킹 설정 (문장 수 기준)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    chunk_size: usize,
    overlap_size: usize,
}

impl ChunkConfig {
    /// `0 <= overlap_size < chunk_size` 가 아니면 설정 에러
    pub fn new(chunk_size: usize, overlap_size: usize) -> Result<Self> {
        if overlap_size >= chunk_size {
            return Err(RagError::Config(format!(
                "overlap_size ({}) must be smaller than chunk_size ({})",
                overlap_size, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap_size,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap_size(&self) -> usize {
        self.overlap_size
    }

    /// 윈도우 이동 폭
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap_size
    }
}

/// 문장 윈도우 청크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 0-based 윈도우 순번
    pub index: usize,
    /// 첫 문장의 인덱스
    pub start_sentence: usize,
    /// 포함된 문장 수
    pub sentence_count: usize,
    /// 공백으로 이어붙인 문장들
    pub text: String,
}

/// 문장 목록을 겹치는 윈도우로 분할
///
/// 마지막 윈도우는 `chunk_size` 보다 짧을 수 있습니다.
pub fn chunk_windows(sentences: &[String], config: ChunkConfig) -> Vec<TextChunk> {
    let step = config.step();
    let mut chunks = Vec::with_capacity(sentences.len().div_ceil(step));
    let mut start = 0;

    while start < sentences.len() {
        let end = (start + config.chunk_size).min(sentences.len());
        chunks.push(TextChunk {
            index: chunks.len(),
            start_sentence: start,
            sentence_count: end - start,
            text: sentences[start..end].join(" "),
        });
        start += step;
    }

    chunks
}

/// 문장 목록을 청크 문자열로 분할
///
/// `overlap_size >= chunk_size` 면 입력과 무관하게 설정 에러입니다.
pub fn chunk(sentences: &[String], chunk_size: usize, overlap_size: usize) -> Result<Vec<String>> {
    let config = ChunkConfig::new(chunk_size, overlap_size)?;
    Ok(chunk_windows(sentences, config)
        .into_iter()
        .map(|c| c.text)
        .collect())
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> ChunkedText;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

/// 청킹 결과
#[derive(Debug, Clone, Default)]
pub struct ChunkedText {
    pub sentence_count: usize,
    pub chunks: Vec<TextChunk>,
}

/// 문장 윈도우 청커
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    splitter: SentenceSplitter,
    config: ChunkConfig,
}

impl SentenceChunker {
    pub fn new(splitter: SentenceSplitter, config: ChunkConfig) -> Self {
        Self { splitter, config }
    }

    /// 설정값으로 생성 (검증 포함)
    pub fn from_settings(language: &str, chunk_size: usize, overlap_size: usize) -> Result<Self> {
        let config = ChunkConfig::new(chunk_size, overlap_size)?;
        Ok(Self::new(SentenceSplitter::for_language(language), config))
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> ChunkedText {
        let sentences = self.splitter.split(text);
        ChunkedText {
            sentence_count: sentences.len(),
            chunks: chunk_windows(&sentences, self.config),
        }
    }

    fn name(&self) -> &'static str {
        "SentenceChunker"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s{}", i)).collect()
    }

    #[test]
    fn test_chunk_empty_sentences() {
        let chunks = chunk(&[], 4, 1).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_chunk_rejects_overlap_ge_size() {
        assert!(matches!(chunk(&numbered(10), 4, 4), Err(RagError::Config(_))));
        assert!(matches!(chunk(&numbered(10), 4, 7), Err(RagError::Config(_))));
        // 빈 입력이어도 에러
        assert!(matches!(chunk(&[], 3, 3), Err(RagError::Config(_))));
        assert!(matches!(chunk(&[], 0, 0), Err(RagError::Config(_))));
    }

    #[test]
    fn test_chunk_basic_window() {
        let chunks = chunk(&numbered(10), 4, 1).unwrap();
        assert_eq!(
            chunks,
            vec!["s0 s1 s2 s3", "s3 s4 s5 s6", "s6 s7 s8 s9", "s9"]
        );
    }

    #[test]
    fn test_chunk_no_overlap_partition() {
        let chunks = chunk(&numbered(5), 2, 0).unwrap();
        assert_eq!(chunks, vec!["s0 s1", "s2 s3", "s4"]);
    }

    #[test]
    fn test_chunk_45_sentences_20_5() {
        let sentences = numbered(45);
        let chunks = chunk_windows(&sentences, ChunkConfig::new(20, 5).unwrap());

        assert_eq!(chunks.len(), 3);
        let starts: Vec<usize> = chunks.iter().map(|c| c.start_sentence).collect();
        assert_eq!(starts, vec![0, 15, 30]);

        let last = &chunks[2];
        assert_eq!(last.sentence_count, 15);
        assert!(last.text.starts_with("s30 "));
        assert!(last.text.ends_with(" s44"));
    }

    #[test]
    fn test_chunk_count_and_overlap_properties() {
        for n in 0..40 {
            for size in 1..8 {
                for overlap in 0..size {
                    let sentences = numbered(n);
                    let config = ChunkConfig::new(size, overlap).unwrap();
                    let chunks = chunk_windows(&sentences, config);

                    let expected = if n == 0 { 0 } else { n.div_ceil(size - overlap) };
                    assert_eq!(chunks.len(), expected, "n={} size={} overlap={}", n, size, overlap);

                    for (i, c) in chunks.iter().enumerate() {
                        assert_eq!(c.index, i);
                        assert!(!c.text.is_empty());
                        assert!(c.sentence_count >= 1 && c.sentence_count <= size);
                    }

                    for pair in chunks.windows(2) {
                        let prev_end = pair[0].start_sentence + pair[0].sentence_count;
                        let shared = prev_end.saturating_sub(pair[1].start_sentence);
                        assert!(shared <= overlap);
                        if pair[0].sentence_count == size && pair[1].sentence_count == size {
                            assert_eq!(shared, overlap);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_split_basic_sentences() {
        let sentences = split_into_sentences("Hello world. How are you? I am fine!", "english");
        assert_eq!(sentences, vec!["Hello world.", "How are you?", "I am fine!"]);
    }

    #[test]
    fn test_split_respects_english_abbreviations() {
        let text = "Dr. Smith arrived late. Mr. Jones waited.";
        let sentences = split_into_sentences(text, "english");
        assert_eq!(sentences, vec!["Dr. Smith arrived late.", "Mr. Jones waited."]);
    }

    #[test]
    fn test_split_unknown_language_falls_back() {
        let splitter = SentenceSplitter::for_language("klingon");
        assert!(splitter.language().is_none());

        let sentences = splitter.split("Dr. Smith arrived. He sat.");
        // 약어 테이블이 없으므로 "Dr." 뒤에서 분리됨
        assert_eq!(sentences, vec!["Dr.", "Smith arrived.", "He sat."]);
    }

    #[test]
    fn test_split_joins_wrapped_lines_and_breaks_paragraphs() {
        let text = "This sentence is\nwrapped across lines.\n\nHeading without period\n\nNext one.";
        let sentences = split_into_sentences(text, "english");
        assert_eq!(
            sentences,
            vec![
                "This sentence is wrapped across lines.",
                "Heading without period",
                "Next one."
            ]
        );
    }

    #[test]
    fn test_split_is_restartable() {
        let splitter = SentenceSplitter::for_language("german");
        let text = "Das ist z.B. ein Test. Noch ein Satz.";
        let first = splitter.split(text);
        let second = splitter.split(text);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_split_empty_text() {
        assert!(split_into_sentences("", "english").is_empty());
        assert!(split_into_sentences("  \n\n \t", "english").is_empty());
    }

    #[test]
    fn test_sentence_chunker() {
        let chunker = SentenceChunker::from_settings("english", 2, 1).unwrap();
        let text = "One. Two. Three.";
        let result = chunker.chunk(text);

        assert_eq!(result.sentence_count, 3);
        let texts: Vec<&str> = result.chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["One. Two.", "Two. Three.", "Three."]);
        assert_eq!(chunker.name(), "SentenceChunker");
    }

    #[test]
    fn test_sentence_chunker_invalid_settings() {
        assert!(SentenceChunker::from_settings("english", 5, 5).is_err());
    }

    #[test]
    fn test_language_lookup() {
        assert_eq!(Language::from_name("English"), Some(Language::English));
        assert_eq!(Language::from_name("turkish"), Some(Language::Turkish));
        assert_eq!(Language::from_name("esperanto"), None);
    }
}
