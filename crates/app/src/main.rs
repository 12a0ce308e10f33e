use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use studyforge_core::{
    Chapter, Difficulty, GenerationMode, HttpQuestionProvider, MemoryStore, Question,
    ReviewStore, SegmenterOptions, StudyPipeline, SubmittedAnswer, UploadStore,
};
use std::io::Write as _;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "studyforge", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Prefer embedding-drift chapter boundaries over lexical markers.
    #[arg(long, default_value_t = false)]
    semantic_boundaries: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum DifficultyArg {
    Easy,
    Medium,
    Hard,
    Mixed,
}

impl From<DifficultyArg> for Difficulty {
    fn from(value: DifficultyArg) -> Self {
        match value {
            DifficultyArg::Easy => Difficulty::Easy,
            DifficultyArg::Medium => Difficulty::Medium,
            DifficultyArg::Hard => Difficulty::Hard,
            DifficultyArg::Mixed => Difficulty::Mixed,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Local,
    Delegated,
    Hybrid,
}

impl From<ModeArg> for GenerationMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Local => GenerationMode::Local,
            ModeArg::Delegated => GenerationMode::Delegated,
            ModeArg::Hybrid => GenerationMode::Hybrid,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Extract and segment a document, printing its chapters.
    Process {
        /// Path to a .pdf, .txt, or .md document.
        #[arg(long)]
        file: String,
        /// Document title; defaults to the file name.
        #[arg(long)]
        title: Option<String>,
    },
    /// Process a document and generate verified questions for one chapter.
    Generate {
        #[arg(long)]
        file: String,
        /// 1-based chapter number.
        #[arg(long, default_value = "1")]
        chapter: u32,
        #[arg(long, default_value = "5")]
        count: usize,
        #[arg(long, value_enum, default_value = "medium")]
        difficulty: DifficultyArg,
        /// Delegated/hybrid modes read STUDYFORGE_PROVIDER_ENDPOINT.
        #[arg(long, value_enum, default_value = "local")]
        mode: ModeArg,
    },
    /// Interactive quiz over one chapter; misses are scheduled for review.
    Quiz {
        #[arg(long)]
        file: String,
        #[arg(long, default_value = "1")]
        chapter: u32,
        #[arg(long, default_value = "5")]
        count: usize,
        #[arg(long, value_enum, default_value = "local")]
        mode: ModeArg,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let segmenter = SegmenterOptions {
        semantic_boundaries: cli.semantic_boundaries,
        ..SegmenterOptions::default()
    };

    match cli.command {
        Command::Process { file, title } => {
            let (pipeline, upload_id) = stage(&file, title, segmenter, ModeArg::Local).await?;
            let chapters = pipeline.process_upload(upload_id).await?;

            for chapter in &chapters {
                println!("[{}] {}", chapter.chapter_no, chapter.title);
                if let Some(summary) = &chapter.summary {
                    println!("  summary: {summary}");
                }
                if !chapter.keywords.is_empty() {
                    println!("  keywords: {}", chapter.keywords.join(", "));
                }
            }
            print_log(&pipeline, upload_id).await?;
        }
        Command::Generate {
            file,
            chapter,
            count,
            difficulty,
            mode,
        } => {
            let (pipeline, upload_id) = stage(&file, None, segmenter, mode).await?;
            let chapters = pipeline.process_upload(upload_id).await?;
            let target = find_chapter(&chapters, chapter)?;

            let report = pipeline
                .generate_questions(target, count, difficulty.into(), mode.into())
                .await?;

            info!(
                accepted = report.accepted.len(),
                requested = report.requested,
                dropped = report.dropped_seeds,
                "generation finished"
            );
            if report.is_partial() {
                warn!("partial result: fewer questions than requested");
            }

            for (index, question) in report.accepted.iter().enumerate() {
                print_question(index, question);
                println!("  answer: {}", question.correct_answer);
                if let Some(confidence) = question.confidence {
                    println!("  confidence: {confidence:.2}");
                }
            }
            print_log(&pipeline, upload_id).await?;
        }
        Command::Quiz {
            file,
            chapter,
            count,
            mode,
        } => {
            let (pipeline, upload_id) = stage(&file, None, segmenter, mode).await?;
            let chapters = pipeline.process_upload(upload_id).await?;
            let target = find_chapter(&chapters, chapter)?;

            let report = pipeline
                .generate_questions(target, count, Difficulty::Mixed, mode.into())
                .await?;
            if report.accepted.is_empty() {
                anyhow::bail!("no questions survived verification for this chapter");
            }

            let user_id = Uuid::new_v4();
            let mut answers = Vec::new();
            for (index, question) in report.accepted.iter().enumerate() {
                print_question(index, question);
                answers.push(SubmittedAnswer {
                    question_id: question.id,
                    answer: read_answer(question)?,
                });
            }

            let session = pipeline
                .record_exam_session(user_id, target, &answers, 0)
                .await?;
            println!(
                "score: {}/{} at {}",
                session.score,
                session.total_questions,
                session.completed_at.to_rfc3339()
            );

            let now = Utc::now();
            for attempt in session.attempts.iter().filter(|attempt| !attempt.is_correct) {
                if let Some(rec) = pipeline
                    .store()
                    .open_recommendation(user_id, attempt.question_id)
                    .await?
                {
                    println!(
                        "review scheduled (stage {}): due {} ({} day(s) from now)",
                        rec.review_stage,
                        rec.next_review_at.format("%Y-%m-%d"),
                        rec.days_until_review(now)
                    );
                }
            }
            let due = pipeline.list_due_reviews(user_id).await?;
            println!("{} review(s) already due", due.len());
        }
    }

    Ok(())
}

async fn stage(
    file: &str,
    title: Option<String>,
    segmenter: SegmenterOptions,
    mode: ModeArg,
) -> anyhow::Result<(StudyPipeline<MemoryStore>, Uuid)> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {file}"))?;
    let file_name = file.rsplit('/').next().unwrap_or(file).to_string();
    let title = title.unwrap_or_else(|| file_name.clone());

    let store = MemoryStore::new();
    let upload = store.stage_upload(&title, &file_name, bytes).await;
    let upload_id = upload.id;

    let mut pipeline = StudyPipeline::new(store).with_segmenter_options(segmenter);
    if !matches!(mode, ModeArg::Local) {
        match HttpQuestionProvider::from_env() {
            Ok(provider) => pipeline = pipeline.with_provider(Box::new(provider)),
            Err(error) => warn!(%error, "delegated provider unavailable, staying local"),
        }
    }

    Ok((pipeline, upload_id))
}

fn find_chapter(chapters: &[Chapter], chapter_no: u32) -> anyhow::Result<Uuid> {
    chapters
        .iter()
        .find(|chapter| chapter.chapter_no == chapter_no)
        .map(|chapter| chapter.id)
        .with_context(|| format!("document has no chapter {chapter_no}"))
}

async fn print_log(
    pipeline: &StudyPipeline<MemoryStore>,
    upload_id: Uuid,
) -> anyhow::Result<()> {
    if let Some(upload) = pipeline.store().upload(upload_id).await? {
        for line in &upload.processing_log {
            println!("log: {line}");
        }
    }
    Ok(())
}

fn print_question(index: usize, question: &Question) {
    println!("{}. {}", index + 1, question.text);
    for (option_index, option) in question.options.iter().enumerate() {
        let letter = (b'A' + option_index as u8) as char;
        println!("   {letter}) {option}");
    }
}

fn read_answer(question: &Question) -> anyhow::Result<String> {
    print!("> ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let line = line.trim().to_string();

    // A single letter selects an option for choice questions.
    if question.question_type.has_options() && line.len() == 1 {
        if let Some(byte) = line.to_ascii_uppercase().bytes().next() {
            let index = byte.wrapping_sub(b'A') as usize;
            if let Some(option) = question.options.get(index) {
                return Ok(option.clone());
            }
        }
    }
    Ok(line)
}
