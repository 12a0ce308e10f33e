use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    /// Status moves forward only; `Failed` is terminal for the attempt.
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, next) {
            (Pending, Processing) | (Processing, Completed) => true,
            (Pending, Failed) | (Processing, Failed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: Uuid,
    pub title: String,
    pub source_path: String,
    pub checksum: String,
    pub status: UploadStatus,
    pub processing_log: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Upload {
    pub fn log_line(&mut self, line: impl Into<String>) {
        self.processing_log.push(line.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: Uuid,
    pub upload_id: Uuid,
    /// 1-based, contiguous within the upload, in source order.
    pub chapter_no: u32,
    pub title: String,
    pub text: String,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub has_questions: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    FillBlank,
}

impl QuestionType {
    pub fn has_options(self) -> bool {
        matches!(self, Self::MultipleChoice | Self::TrueFalse)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Mixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Local,
    Delegated,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub text: String,
    pub question_type: QuestionType,
    /// Empty for free-response types. For choice types, `correct_answer`
    /// is always a verbatim member of this list.
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub difficulty: Difficulty,
    /// Set by the verifier on acceptance, in [0, 1].
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionAttempt {
    pub question_id: Uuid,
    pub given_answer: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub chapter_id: Uuid,
    pub score: u32,
    pub total_questions: u32,
    pub duration_secs: u64,
    pub completed_at: DateTime<Utc>,
    pub attempts: Vec<QuestionAttempt>,
}

pub const REVIEW_STAGE_MAX: u8 = 4;

/// Days until the next review, indexed by stage 1..=4.
pub fn review_interval(stage: u8) -> Duration {
    let days = match stage {
        1 => 1,
        2 => 7,
        3 => 16,
        _ => 35,
    };
    Duration::days(days)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecommendation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub question_id: Uuid,
    pub review_stage: u8,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub next_review_at: DateTime<Utc>,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl ReviewRecommendation {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.completed && now >= self.next_review_at
    }

    pub fn days_until_review(&self, now: DateTime<Utc>) -> i64 {
        (self.next_review_at - now).num_days()
    }
}

#[derive(Debug, Clone)]
pub struct SegmenterOptions {
    /// Line-anchored boundary marker. A marker must start its line, with at
    /// most a short trailing title before end-of-line, so "chapter" inside
    /// quoted prose or tables does not open a chapter.
    pub marker_regex: &'static str,
    pub max_title_len: usize,
    /// Front matter shorter than this is discarded instead of becoming a
    /// leading chapter.
    pub min_front_matter_chars: usize,
    /// Enables embedding-drift boundary detection, preferred over lexical
    /// markers when it finds any boundary.
    pub semantic_boundaries: bool,
    /// Sentences per sliding window when measuring drift.
    pub drift_window: usize,
    /// A boundary opens where (1 - cosine) between adjacent windows exceeds
    /// this.
    pub drift_threshold: f32,
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            // The roman branch follows numeral grammar (1..39) instead of a
            // bare letter class, so words like "did" cannot open a chapter.
            marker_regex: r"(?im)^\s*chapter\s+(\d+|x{0,3}(?:ix|iv|v?i{1,3}|v)|x{1,3})\b\s*[:.\-]?\s*(\S.{0,80})?$",
            max_title_len: 80,
            min_front_matter_chars: 200,
            semantic_boundaries: false,
            drift_window: 4,
            drift_threshold: 0.65,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerOptions {
    pub min_sentence_tokens: usize,
    pub summary_sentences: usize,
    pub summary_max_chars: usize,
    pub keyword_count: usize,
    /// Candidates this similar to an already-picked keyphrase are skipped.
    pub keyword_diversity_ceiling: f32,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            min_sentence_tokens: 5,
            summary_sentences: 3,
            summary_max_chars: 600,
            keyword_count: 8,
            keyword_diversity_ceiling: 0.85,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VerifierOptions {
    pub evidence_top_k: usize,
    pub similarity_floor: f64,
    pub acceptance_threshold: f64,
    pub similarity_weight: f64,
    pub lexical_weight: f64,
    pub structural_weight: f64,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            evidence_top_k: 3,
            similarity_floor: 0.15,
            acceptance_threshold: 0.78,
            similarity_weight: 0.55,
            lexical_weight: 0.25,
            structural_weight: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GeneratorOptions {
    /// Verification retries per seed before the seed is dropped (or handed
    /// to the alternate strategy in hybrid mode).
    pub retry_budget: u32,
    /// Transient provider errors tolerated per call before the seed is
    /// skipped.
    pub provider_attempts: u32,
    pub backoff_base_ms: u64,
    /// Seeds this similar to an already-chosen seed are not selected.
    pub seed_diversity_ceiling: f32,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            retry_budget: 2,
            provider_attempts: 3,
            backoff_base_ms: 250,
            seed_diversity_ceiling: 0.9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub chapter_id: Uuid,
    pub desired_count: usize,
    pub difficulty: Difficulty,
    pub mode: GenerationMode,
    /// Optional explicit mix; when empty the default split is used
    /// (half multiple choice, a quarter true/false, the rest short answer).
    pub type_mix: Vec<QuestionType>,
}
