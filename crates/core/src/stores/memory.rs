use crate::error::{PipelineError, SchedulingError};
use crate::models::{
    Chapter, ExamSession, Question, ReviewRecommendation, Upload, UploadStatus,
};
use crate::traits::{
    ChapterStore, DocumentStore, QuestionStore, ReviewStore, SessionStore, UploadStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    uploads: HashMap<Uuid, Upload>,
    blobs: HashMap<Uuid, Vec<u8>>,
    chapters: HashMap<Uuid, Chapter>,
    questions: HashMap<Uuid, Question>,
    sessions: HashMap<Uuid, ExamSession>,
    reviews: HashMap<Uuid, ReviewRecommendation>,
}

/// In-memory store implementing every persistence seam. Backs the CLI and
/// the integration tests; a database-backed store would implement the same
/// traits.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending upload together with its raw bytes.
    pub async fn stage_upload(&self, title: &str, file_name: &str, bytes: Vec<u8>) -> Upload {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let checksum = format!("{:x}", hasher.finalize());

        let upload = Upload {
            id: Uuid::new_v4(),
            title: title.to_string(),
            source_path: file_name.to_string(),
            checksum,
            status: UploadStatus::Pending,
            processing_log: Vec::new(),
            created_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        state.blobs.insert(upload.id, bytes);
        state.uploads.insert(upload.id, upload.clone());
        upload
    }

    /// Owner deleted the upload; in-flight stage writes become no-ops.
    pub async fn delete_upload(&self, upload_id: Uuid) {
        let mut state = self.state.write().await;
        state.uploads.remove(&upload_id);
        state.blobs.remove(&upload_id);
        state.chapters.retain(|_, chapter| chapter.upload_id != upload_id);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch_bytes(&self, upload_id: Uuid) -> Result<Vec<u8>, PipelineError> {
        let state = self.state.read().await;
        state
            .blobs
            .get(&upload_id)
            .cloned()
            .ok_or_else(|| PipelineError::Storage(format!("no bytes for upload {upload_id}")))
    }

    async fn update_status(
        &self,
        upload_id: Uuid,
        status: UploadStatus,
        log_line: &str,
    ) -> Result<(), PipelineError> {
        let mut state = self.state.write().await;
        let Some(upload) = state.uploads.get_mut(&upload_id) else {
            return Ok(()); // deleted mid-flight
        };

        if upload.status != status && !upload.status.can_transition_to(status) {
            return Err(PipelineError::Storage(format!(
                "illegal status transition {:?} -> {:?}",
                upload.status, status
            )));
        }

        upload.status = status;
        upload.log_line(log_line);
        Ok(())
    }
}

#[async_trait]
impl UploadStore for MemoryStore {
    async fn upload(&self, upload_id: Uuid) -> Result<Option<Upload>, PipelineError> {
        Ok(self.state.read().await.uploads.get(&upload_id).cloned())
    }

    async fn append_log(&self, upload_id: Uuid, line: &str) -> Result<(), PipelineError> {
        let mut state = self.state.write().await;
        if let Some(upload) = state.uploads.get_mut(&upload_id) {
            upload.log_line(line);
        }
        Ok(())
    }
}

#[async_trait]
impl ChapterStore for MemoryStore {
    async fn insert_chapters(&self, chapters: &[Chapter]) -> Result<(), PipelineError> {
        let mut state = self.state.write().await;
        for chapter in chapters {
            if !state.uploads.contains_key(&chapter.upload_id) {
                continue; // parent deleted mid-flight
            }
            state.chapters.insert(chapter.id, chapter.clone());
        }
        Ok(())
    }

    async fn chapter(&self, chapter_id: Uuid) -> Result<Option<Chapter>, PipelineError> {
        Ok(self.state.read().await.chapters.get(&chapter_id).cloned())
    }

    async fn chapters_for_upload(&self, upload_id: Uuid) -> Result<Vec<Chapter>, PipelineError> {
        let state = self.state.read().await;
        let mut chapters: Vec<Chapter> = state
            .chapters
            .values()
            .filter(|chapter| chapter.upload_id == upload_id)
            .cloned()
            .collect();
        chapters.sort_by_key(|chapter| chapter.chapter_no);
        Ok(chapters)
    }

    async fn set_has_questions(&self, chapter_id: Uuid, value: bool) -> Result<(), PipelineError> {
        let mut state = self.state.write().await;
        if let Some(chapter) = state.chapters.get_mut(&chapter_id) {
            chapter.has_questions = value;
        }
        Ok(())
    }
}

#[async_trait]
impl QuestionStore for MemoryStore {
    async fn insert_questions(&self, questions: &[Question]) -> Result<(), PipelineError> {
        let mut state = self.state.write().await;
        for question in questions {
            if !state.chapters.contains_key(&question.chapter_id) {
                continue;
            }
            state.questions.insert(question.id, question.clone());
        }
        Ok(())
    }

    async fn question(&self, question_id: Uuid) -> Result<Option<Question>, PipelineError> {
        Ok(self.state.read().await.questions.get(&question_id).cloned())
    }

    async fn questions_for_chapter(
        &self,
        chapter_id: Uuid,
    ) -> Result<Vec<Question>, PipelineError> {
        Ok(self
            .state
            .read()
            .await
            .questions
            .values()
            .filter(|question| question.chapter_id == chapter_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &ExamSession) -> Result<(), PipelineError> {
        self.state
            .write()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<ExamSession>, PipelineError> {
        let mut sessions: Vec<ExamSession> = self
            .state
            .read()
            .await
            .sessions
            .values()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|session| session.completed_at);
        Ok(sessions)
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn insert_recommendation(
        &self,
        recommendation: &ReviewRecommendation,
    ) -> Result<(), PipelineError> {
        self.state
            .write()
            .await
            .reviews
            .insert(recommendation.id, recommendation.clone());
        Ok(())
    }

    async fn recommendation(
        &self,
        recommendation_id: Uuid,
    ) -> Result<Option<ReviewRecommendation>, PipelineError> {
        Ok(self
            .state
            .read()
            .await
            .reviews
            .get(&recommendation_id)
            .cloned())
    }

    async fn open_recommendation(
        &self,
        user_id: Uuid,
        question_id: Uuid,
    ) -> Result<Option<ReviewRecommendation>, PipelineError> {
        Ok(self
            .state
            .read()
            .await
            .reviews
            .values()
            .find(|rec| {
                rec.user_id == user_id && rec.question_id == question_id && !rec.completed
            })
            .cloned())
    }

    async fn update_recommendation(
        &self,
        recommendation: &ReviewRecommendation,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        let mut state = self.state.write().await;
        let stored = state
            .reviews
            .get_mut(&recommendation.id)
            .ok_or_else(|| SchedulingError::NotFound(recommendation.id.to_string()))?;

        if stored.updated_at != expected_updated_at {
            return Err(SchedulingError::Conflict(recommendation.id.to_string()));
        }

        *stored = recommendation.clone();
        Ok(())
    }

    async fn due_recommendations(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewRecommendation>, PipelineError> {
        let mut due: Vec<ReviewRecommendation> = self
            .state
            .read()
            .await
            .reviews
            .values()
            .filter(|rec| rec.user_id == user_id && rec.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|rec| rec.next_review_at);
        Ok(due)
    }
}
