use crate::error::{PipelineError, SchedulingError};
use crate::models::{
    Chapter, ExamSession, Question, ReviewRecommendation, Upload, UploadStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Document-storage collaborator: raw bytes in, status/log lines out.
#[async_trait]
pub trait DocumentStore {
    async fn fetch_bytes(&self, upload_id: Uuid) -> Result<Vec<u8>, PipelineError>;

    async fn update_status(
        &self,
        upload_id: Uuid,
        status: UploadStatus,
        log_line: &str,
    ) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait UploadStore {
    async fn upload(&self, upload_id: Uuid) -> Result<Option<Upload>, PipelineError>;

    async fn append_log(&self, upload_id: Uuid, line: &str) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait ChapterStore {
    /// Writes against a deleted upload are an idempotent no-op.
    async fn insert_chapters(&self, chapters: &[Chapter]) -> Result<(), PipelineError>;

    async fn chapter(&self, chapter_id: Uuid) -> Result<Option<Chapter>, PipelineError>;

    async fn chapters_for_upload(&self, upload_id: Uuid) -> Result<Vec<Chapter>, PipelineError>;

    async fn set_has_questions(&self, chapter_id: Uuid, value: bool) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait QuestionStore {
    async fn insert_questions(&self, questions: &[Question]) -> Result<(), PipelineError>;

    async fn question(&self, question_id: Uuid) -> Result<Option<Question>, PipelineError>;

    async fn questions_for_chapter(
        &self,
        chapter_id: Uuid,
    ) -> Result<Vec<Question>, PipelineError>;
}

#[async_trait]
pub trait SessionStore {
    async fn insert_session(&self, session: &ExamSession) -> Result<(), PipelineError>;

    async fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<ExamSession>, PipelineError>;
}

#[async_trait]
pub trait ReviewStore {
    async fn insert_recommendation(
        &self,
        recommendation: &ReviewRecommendation,
    ) -> Result<(), PipelineError>;

    async fn recommendation(
        &self,
        recommendation_id: Uuid,
    ) -> Result<Option<ReviewRecommendation>, PipelineError>;

    /// The at-most-one-open rule: the single not-yet-completed
    /// recommendation for this (user, question), if any.
    async fn open_recommendation(
        &self,
        user_id: Uuid,
        question_id: Uuid,
    ) -> Result<Option<ReviewRecommendation>, PipelineError>;

    /// Compare-and-swap on `expected_updated_at`; a mismatch means another
    /// writer got there first and yields `SchedulingError::Conflict`.
    async fn update_recommendation(
        &self,
        recommendation: &ReviewRecommendation,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), SchedulingError>;

    async fn due_recommendations(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewRecommendation>, PipelineError>;
}
