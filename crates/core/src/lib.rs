pub mod analyzer;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generator;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod scheduler;
pub mod segmenter;
pub mod stores;
pub mod traits;
pub mod verifier;

pub use analyzer::{analyze_chapter, frequency_keywords, ChapterAnalysis, RankedSentence};
pub use embeddings::{
    centroid, cosine_similarity, shared_embedder, Embedder, HashedNgramEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{GenerationError, PipelineError, SchedulingError};
pub use extractor::{extract_document, DocumentExtractor, DocumentKind, PageText};
pub use generator::{GenerationReport, QuestionGenerator, Strategy};
pub use models::{
    review_interval, AnalyzerOptions, Chapter, Difficulty, ExamSession, GenerationMode,
    GenerationRequest, GeneratorOptions, Question, QuestionAttempt, QuestionType,
    ReviewRecommendation, SegmenterOptions, Upload, UploadStatus, VerifierOptions,
    REVIEW_STAGE_MAX,
};
pub use pipeline::{StudyPipeline, SubmittedAnswer};
pub use provider::{
    build_prompt, CandidateQuestion, HttpQuestionProvider, ProviderConfig, QuestionProvider,
};
pub use scheduler::ReviewScheduler;
pub use segmenter::{normalize_whitespace, segment_chapters, ChapterDraft};
pub use stores::MemoryStore;
pub use traits::{
    ChapterStore, DocumentStore, QuestionStore, ReviewStore, SessionStore, UploadStore,
};
pub use verifier::{AnswerVerifier, Evidence, Verification};
