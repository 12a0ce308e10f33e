use crate::analyzer::analyze_chapter;
use crate::error::{PipelineError, Result, SchedulingError};
use crate::extractor::extract_document;
use crate::generator::{GenerationReport, QuestionGenerator};
use crate::models::{
    AnalyzerOptions, Chapter, Difficulty, ExamSession, GenerationMode, GenerationRequest,
    GeneratorOptions, QuestionAttempt, ReviewRecommendation, SegmenterOptions, UploadStatus,
    VerifierOptions,
};
use crate::provider::QuestionProvider;
use crate::scheduler::ReviewScheduler;
use crate::segmenter::segment_chapters;
use crate::traits::{
    ChapterStore, DocumentStore, QuestionStore, ReviewStore, SessionStore, UploadStore,
};
use chrono::Utc;
use uuid::Uuid;

/// One answer submitted during an exam session.
#[derive(Debug, Clone)]
pub struct SubmittedAnswer {
    pub question_id: Uuid,
    pub answer: String,
}

/// Facade over the whole pipeline: extraction, segmentation, analysis,
/// generation, verification, and review scheduling, against one store.
/// Uploads process independently of each other; within one upload the
/// stages run strictly in order.
pub struct StudyPipeline<S> {
    store: S,
    provider: Option<Box<dyn QuestionProvider>>,
    segmenter: SegmenterOptions,
    analyzer: AnalyzerOptions,
    generator: GeneratorOptions,
    verifier: VerifierOptions,
}

impl<S> StudyPipeline<S>
where
    S: DocumentStore
        + UploadStore
        + ChapterStore
        + QuestionStore
        + SessionStore
        + ReviewStore
        + Send
        + Sync,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            provider: None,
            segmenter: SegmenterOptions::default(),
            analyzer: AnalyzerOptions::default(),
            generator: GeneratorOptions::default(),
            verifier: VerifierOptions::default(),
        }
    }

    pub fn with_provider(mut self, provider: Box<dyn QuestionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_segmenter_options(mut self, options: SegmenterOptions) -> Self {
        self.segmenter = options;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Extraction -> segmentation -> per-chapter analysis -> persistence,
    /// advancing the upload's status and appending a log line at every
    /// stage boundary. An unreadable document marks the upload failed; a
    /// missing boundary heuristic degrades to one chapter and completes.
    pub async fn process_upload(&self, upload_id: Uuid) -> Result<Vec<Chapter>> {
        let upload = self
            .store
            .upload(upload_id)
            .await?
            .ok_or_else(|| PipelineError::InvalidArgument(format!("unknown upload {upload_id}")))?;

        self.store
            .update_status(upload_id, UploadStatus::Processing, "extraction started")
            .await?;

        let bytes = self.store.fetch_bytes(upload_id).await?;
        let pages = match extract_document(&upload.source_path, &bytes) {
            Ok(pages) => pages,
            Err(error) => {
                self.store
                    .update_status(
                        upload_id,
                        UploadStatus::Failed,
                        &format!("extraction failed: {error}"),
                    )
                    .await?;
                return Err(error);
            }
        };
        self.store
            .append_log(upload_id, &format!("extracted {} page(s)", pages.len()))
            .await?;

        let drafts = match segment_chapters(&upload.title, &pages, &self.segmenter) {
            Ok(drafts) => drafts,
            Err(error) => {
                self.store
                    .update_status(
                        upload_id,
                        UploadStatus::Failed,
                        &format!("segmentation failed: {error}"),
                    )
                    .await?;
                return Err(error);
            }
        };

        if drafts.len() == 1 && drafts[0].title == upload.title {
            self.store
                .append_log(
                    upload_id,
                    "no chapter boundaries found; fell back to a single chapter",
                )
                .await?;
        }

        let chapters: Vec<Chapter> = drafts
            .into_iter()
            .enumerate()
            .map(|(index, draft)| {
                let analysis = analyze_chapter(&draft.body, &self.analyzer);
                Chapter {
                    id: Uuid::new_v4(),
                    upload_id,
                    chapter_no: (index + 1) as u32,
                    title: draft.title,
                    text: draft.body,
                    summary: if analysis.summary.is_empty() {
                        None
                    } else {
                        Some(analysis.summary)
                    },
                    keywords: analysis.keywords,
                    has_questions: false,
                }
            })
            .collect();

        self.store.insert_chapters(&chapters).await?;
        self.store
            .update_status(
                upload_id,
                UploadStatus::Completed,
                &format!("processing complete: {} chapter(s)", chapters.len()),
            )
            .await?;

        Ok(chapters)
    }

    /// Generates up to `count` questions for one chapter, persists the
    /// accepted ones, and reports partial success in the upload's log.
    pub async fn generate_questions(
        &self,
        chapter_id: Uuid,
        count: usize,
        difficulty: Difficulty,
        mode: GenerationMode,
    ) -> Result<GenerationReport> {
        let chapter = self
            .store
            .chapter(chapter_id)
            .await?
            .ok_or_else(|| PipelineError::InvalidArgument(format!("unknown chapter {chapter_id}")))?;

        let analysis = analyze_chapter(&chapter.text, &self.analyzer);
        let generator = QuestionGenerator::new(
            self.generator,
            self.verifier,
            self.provider.as_deref(),
        );
        let request = GenerationRequest {
            chapter_id,
            desired_count: count,
            difficulty,
            mode,
            type_mix: Vec::new(),
        };

        let report = generator.generate(&chapter, &analysis, &request).await;

        self.store.insert_questions(&report.accepted).await?;
        if !report.accepted.is_empty() {
            self.store.set_has_questions(chapter_id, true).await?;
        }

        let mut log = format!(
            "generated {}/{} question(s) for chapter {}",
            report.accepted.len(),
            report.requested,
            chapter.chapter_no
        );
        if report.is_partial() {
            log.push_str(" (partial)");
        }
        self.store.append_log(chapter.upload_id, &log).await?;
        for note in &report.notes {
            self.store.append_log(chapter.upload_id, note).await?;
        }

        Ok(report)
    }

    /// Scores a finished session and routes every incorrect answer through
    /// the review scheduler.
    pub async fn record_exam_session(
        &self,
        user_id: Uuid,
        chapter_id: Uuid,
        answers: &[SubmittedAnswer],
        duration_secs: u64,
    ) -> Result<ExamSession> {
        if answers.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "a session needs at least one answer".to_string(),
            ));
        }

        let now = Utc::now();
        let mut attempts = Vec::with_capacity(answers.len());

        for submitted in answers {
            let question = self
                .store
                .question(submitted.question_id)
                .await?
                .ok_or_else(|| {
                    PipelineError::InvalidArgument(format!(
                        "unknown question {}",
                        submitted.question_id
                    ))
                })?;
            if question.chapter_id != chapter_id {
                return Err(PipelineError::InvalidArgument(format!(
                    "question {} belongs to another chapter",
                    question.id
                )));
            }

            let is_correct = submitted.answer.trim().eq_ignore_ascii_case(
                question.correct_answer.trim(),
            );
            attempts.push(QuestionAttempt {
                question_id: question.id,
                given_answer: submitted.answer.clone(),
                is_correct,
            });
        }

        let score = attempts.iter().filter(|attempt| attempt.is_correct).count() as u32;
        let session = ExamSession {
            id: Uuid::new_v4(),
            user_id,
            chapter_id,
            score,
            total_questions: attempts.len() as u32,
            duration_secs,
            completed_at: now,
            attempts: attempts.clone(),
        };
        self.store.insert_session(&session).await?;

        for attempt in attempts.iter().filter(|attempt| !attempt.is_correct) {
            self.schedule_incorrect(user_id, attempt.question_id).await?;
        }

        Ok(session)
    }

    /// One open recommendation per (user, question): a fresh failure opens
    /// at stage 1; a failure with one already open re-bases its clock.
    async fn schedule_incorrect(&self, user_id: Uuid, question_id: Uuid) -> Result<()> {
        let now = Utc::now();
        match self.store.open_recommendation(user_id, question_id).await? {
            Some(mut open) => {
                let stamp = open.updated_at;
                ReviewScheduler::repeat_incorrect(&mut open, now);
                self.store
                    .update_recommendation(&open, stamp)
                    .await
                    .map_err(PipelineError::Scheduling)?;
            }
            None => {
                let rec = ReviewScheduler::open(user_id, question_id, now);
                self.store.insert_recommendation(&rec).await?;
            }
        }
        Ok(())
    }

    pub async fn list_due_reviews(&self, user_id: Uuid) -> Result<Vec<ReviewRecommendation>> {
        self.store.due_recommendations(user_id, Utc::now()).await
    }

    /// Applies a review completion. A concurrent update is retried once
    /// with a fresh read, then surfaced as a conflict.
    pub async fn complete_review(
        &self,
        recommendation_id: Uuid,
        was_correct: bool,
    ) -> Result<ReviewRecommendation> {
        for attempt in 0..2 {
            let mut rec = self
                .store
                .recommendation(recommendation_id)
                .await?
                .ok_or_else(|| {
                    PipelineError::Scheduling(SchedulingError::NotFound(
                        recommendation_id.to_string(),
                    ))
                })?;

            let stamp = rec.updated_at;
            ReviewScheduler::complete(&mut rec, was_correct, Utc::now());

            match self.store.update_recommendation(&rec, stamp).await {
                Ok(()) => return Ok(rec),
                Err(SchedulingError::Conflict(_)) if attempt == 0 => continue,
                Err(error) => return Err(PipelineError::Scheduling(error)),
            }
        }
        unreachable!("loop returns on success or final error")
    }

    /// Learner declared no further review is needed.
    pub async fn skip_review(&self, recommendation_id: Uuid) -> Result<ReviewRecommendation> {
        let mut rec = self
            .store
            .recommendation(recommendation_id)
            .await?
            .ok_or_else(|| {
                PipelineError::Scheduling(SchedulingError::NotFound(recommendation_id.to_string()))
            })?;

        let stamp = rec.updated_at;
        ReviewScheduler::skip(&mut rec, Utc::now());
        self.store
            .update_recommendation(&rec, stamp)
            .await
            .map_err(PipelineError::Scheduling)?;
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use chrono::Duration;

    const DOCUMENT: &str = "Chapter 1: Cells\n\
        All living things are made of cells and cells arise from other cells. \
        The cell membrane controls what enters and leaves the cell interior. \
        Organelles divide the labor of life inside eukaryotic cells.\n\
        Chapter 2: Energy\n\
        Photosynthesis converts sunlight into chemical energy inside chloroplasts. \
        Cellular respiration releases stored energy from glucose molecules. \
        The mitochondria is the powerhouse of the cell. \
        Enzymes lower the activation energy of biochemical reactions. \
        Energy flows through ecosystems from producers to consumers.\n\
        Chapter 3: Genetics\n\
        Genes carry hereditary information encoded in DNA sequences. \
        Mutations introduce variation into populations over generations. \
        Inheritance follows patterns first described by Gregor Mendel.";

    async fn processed_pipeline() -> (StudyPipeline<MemoryStore>, Uuid, Vec<Chapter>) {
        let store = MemoryStore::new();
        let upload = store
            .stage_upload("Biology Primer", "biology.txt", DOCUMENT.as_bytes().to_vec())
            .await;
        let upload_id = upload.id;

        let pipeline = StudyPipeline::new(store);
        let chapters = pipeline.process_upload(upload_id).await.unwrap();
        (pipeline, upload_id, chapters)
    }

    #[tokio::test]
    async fn processing_yields_contiguous_chapters_in_source_order() {
        let (pipeline, upload_id, chapters) = processed_pipeline().await;

        assert_eq!(chapters.len(), 3);
        for (index, chapter) in chapters.iter().enumerate() {
            assert_eq!(chapter.chapter_no, (index + 1) as u32);
        }
        assert!(chapters[0].title.contains("Cells"));
        assert!(chapters[2].title.contains('3'));

        let upload = pipeline.store().upload(upload_id).await.unwrap().unwrap();
        assert_eq!(upload.status, UploadStatus::Completed);
        assert!(upload
            .processing_log
            .iter()
            .any(|line| line.contains("3 chapter(s)")));

        // Derived fields were written during analysis.
        assert!(chapters.iter().all(|chapter| chapter.summary.is_some()));
        assert!(chapters.iter().all(|chapter| !chapter.keywords.is_empty()));
    }

    #[tokio::test]
    async fn unreadable_document_marks_the_upload_failed() {
        let store = MemoryStore::new();
        let upload = store
            .stage_upload("Broken", "broken.pdf", b"%PDF-1.4\n%broken".to_vec())
            .await;
        let upload_id = upload.id;

        let pipeline = StudyPipeline::new(store);
        assert!(pipeline.process_upload(upload_id).await.is_err());

        let upload = pipeline.store().upload(upload_id).await.unwrap().unwrap();
        assert_eq!(upload.status, UploadStatus::Failed);
        assert!(upload
            .processing_log
            .iter()
            .any(|line| line.contains("extraction failed")));

        let chapters = pipeline
            .store()
            .chapters_for_upload(upload_id)
            .await
            .unwrap();
        assert!(chapters.is_empty(), "no partial chapters persisted");
    }

    #[tokio::test]
    async fn unsupported_format_is_rejected() {
        let store = MemoryStore::new();
        let upload = store
            .stage_upload("Slides", "slides.pptx", b"not really".to_vec())
            .await;
        let upload_id = upload.id;

        let pipeline = StudyPipeline::new(store);
        let result = pipeline.process_upload(upload_id).await;
        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
    }

    #[tokio::test]
    async fn generation_persists_accepted_questions_and_flags_the_chapter() {
        let (pipeline, _, chapters) = processed_pipeline().await;
        let chapter = &chapters[1];

        let report = pipeline
            .generate_questions(chapter.id, 5, Difficulty::Medium, GenerationMode::Local)
            .await
            .unwrap();

        assert!(report.accepted.len() <= 5);
        assert!(!report.accepted.is_empty());

        let persisted = pipeline
            .store()
            .questions_for_chapter(chapter.id)
            .await
            .unwrap();
        assert_eq!(persisted.len(), report.accepted.len());
        assert!(persisted
            .iter()
            .all(|question| question.chapter_id == chapter.id));

        let chapter = pipeline.store().chapter(chapter.id).await.unwrap().unwrap();
        assert!(chapter.has_questions);
    }

    #[tokio::test]
    async fn exam_scoring_creates_stage_one_recommendations_for_misses() {
        let (pipeline, _, chapters) = processed_pipeline().await;
        let chapter = &chapters[1];
        let user_id = Uuid::new_v4();

        let report = pipeline
            .generate_questions(chapter.id, 5, Difficulty::Medium, GenerationMode::Local)
            .await
            .unwrap();
        let questions = report.accepted;
        assert!(questions.len() >= 3, "need enough questions for the scenario");

        // First two answered correctly, the rest wrong.
        let answers: Vec<SubmittedAnswer> = questions
            .iter()
            .enumerate()
            .map(|(index, question)| SubmittedAnswer {
                question_id: question.id,
                answer: if index < 2 {
                    question.correct_answer.clone()
                } else {
                    "definitely wrong".to_string()
                },
            })
            .collect();

        let session = pipeline
            .record_exam_session(user_id, chapter.id, &answers, 300)
            .await
            .unwrap();

        assert_eq!(session.score, 2);
        assert_eq!(session.total_questions, questions.len() as u32);
        assert!(session.score <= session.total_questions);

        let due_tomorrow = pipeline
            .store()
            .due_recommendations(user_id, Utc::now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(due_tomorrow.len(), questions.len() - 2);
        assert!(due_tomorrow.iter().all(|rec| rec.review_stage == 1));

        // Nothing is due yet today.
        assert!(pipeline.list_due_reviews(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_failure_updates_the_open_recommendation_in_place() {
        let (pipeline, _, chapters) = processed_pipeline().await;
        let chapter = &chapters[1];
        let user_id = Uuid::new_v4();

        let report = pipeline
            .generate_questions(chapter.id, 3, Difficulty::Medium, GenerationMode::Local)
            .await
            .unwrap();
        let question = &report.accepted[0];

        let wrong = vec![SubmittedAnswer {
            question_id: question.id,
            answer: "wrong".to_string(),
        }];
        pipeline
            .record_exam_session(user_id, chapter.id, &wrong, 60)
            .await
            .unwrap();
        pipeline
            .record_exam_session(user_id, chapter.id, &wrong, 60)
            .await
            .unwrap();

        let open = pipeline
            .store()
            .open_recommendation(user_id, question.id)
            .await
            .unwrap()
            .expect("one open recommendation");
        assert_eq!(open.review_stage, 1);

        let all_due = pipeline
            .store()
            .due_recommendations(user_id, Utc::now() + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(all_due.len(), 1, "no duplicate recommendation was created");
    }

    #[tokio::test]
    async fn completing_reviews_walks_stages_and_skip_resolves() {
        let (pipeline, _, chapters) = processed_pipeline().await;
        let chapter = &chapters[1];
        let user_id = Uuid::new_v4();

        let report = pipeline
            .generate_questions(chapter.id, 3, Difficulty::Medium, GenerationMode::Local)
            .await
            .unwrap();
        let question = &report.accepted[0];

        pipeline
            .record_exam_session(
                user_id,
                chapter.id,
                &[SubmittedAnswer {
                    question_id: question.id,
                    answer: "wrong".to_string(),
                }],
                60,
            )
            .await
            .unwrap();

        let rec = pipeline
            .store()
            .open_recommendation(user_id, question.id)
            .await
            .unwrap()
            .unwrap();

        let advanced = pipeline.complete_review(rec.id, true).await.unwrap();
        assert_eq!(advanced.review_stage, 2);

        let reset = pipeline.complete_review(rec.id, false).await.unwrap();
        assert_eq!(reset.review_stage, 1);

        let skipped = pipeline.skip_review(rec.id).await.unwrap();
        assert!(skipped.completed);
        assert!(pipeline
            .store()
            .open_recommendation(user_id, question.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn completing_an_unknown_review_is_not_found() {
        let (pipeline, _, _) = processed_pipeline().await;
        let result = pipeline.complete_review(Uuid::new_v4(), true).await;
        assert!(matches!(
            result,
            Err(PipelineError::Scheduling(SchedulingError::NotFound(_)))
        ));
    }
}
