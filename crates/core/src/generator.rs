use crate::analyzer::{ChapterAnalysis, RankedSentence};
use crate::embeddings::cosine_similarity;
use crate::error::GenerationError;
use crate::models::{
    Chapter, Difficulty, GenerationMode, GenerationRequest, GeneratorOptions, Question,
    QuestionType, VerifierOptions,
};
use crate::provider::{build_prompt, CandidateQuestion, QuestionProvider};
use crate::verifier::AnswerVerifier;
use std::time::Duration;
use uuid::Uuid;

/// Context handed to the delegated provider is capped so a long chapter
/// does not blow the request body.
const PROVIDER_CONTEXT_MAX_CHARS: usize = 4_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Template,
    Delegated,
}

/// Per-seed progress. Kept as an explicit machine so the retry budget and
/// the hybrid fallback switch stay auditable. Acceptance returns the
/// finished question directly; `Dropped` is the other terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeedState {
    Pending,
    Generating { strategy: Strategy, attempt: u32 },
    Dropped,
}

#[derive(Debug)]
pub struct GenerationReport {
    pub requested: usize,
    pub accepted: Vec<Question>,
    pub dropped_seeds: usize,
    /// Human-readable per-seed outcomes for the upload's processing log.
    pub notes: Vec<String>,
}

impl GenerationReport {
    /// Fewer questions than requested is a valid outcome, but callers must
    /// be able to tell.
    pub fn is_partial(&self) -> bool {
        self.accepted.len() < self.requested
    }
}

pub struct QuestionGenerator<'a> {
    options: GeneratorOptions,
    verifier: AnswerVerifier,
    provider: Option<&'a dyn QuestionProvider>,
}

impl<'a> QuestionGenerator<'a> {
    pub fn new(
        options: GeneratorOptions,
        verifier_options: VerifierOptions,
        provider: Option<&'a dyn QuestionProvider>,
    ) -> Self {
        Self {
            options,
            verifier: AnswerVerifier::new(verifier_options),
            provider,
        }
    }

    pub fn local() -> Self {
        Self::new(GeneratorOptions::default(), VerifierOptions::default(), None)
    }

    /// Runs generation for one chapter: seed selection, strategy execution
    /// with retries, verification gating. Returns accepted questions plus a
    /// report; partial results are expected, not an error.
    pub async fn generate(
        &self,
        chapter: &Chapter,
        analysis: &ChapterAnalysis,
        request: &GenerationRequest,
    ) -> GenerationReport {
        let seeds = select_seeds(
            &analysis.ranked_sentences,
            request.desired_count,
            self.options.seed_diversity_ceiling,
        );
        let mix = resolve_type_mix(request, seeds.len());

        let mut accepted = Vec::new();
        let mut dropped = 0usize;
        let mut notes = Vec::new();

        if seeds.len() < request.desired_count {
            notes.push(format!(
                "only {} distinct seeds available for {} requested questions",
                seeds.len(),
                request.desired_count
            ));
        }

        for (seed_index, (seed, question_type)) in seeds.iter().zip(mix).enumerate() {
            let difficulty = resolve_difficulty(request.difficulty, seed_index);
            match self
                .run_seed(chapter, analysis, seed, question_type, difficulty, request.mode)
                .await
            {
                Some(question) => accepted.push(question),
                None => {
                    dropped += 1;
                    notes.push(format!(
                        "seed {} dropped after exhausting the retry budget",
                        seed_index + 1
                    ));
                }
            }
        }

        GenerationReport {
            requested: request.desired_count,
            accepted,
            dropped_seeds: dropped,
            notes,
        }
    }

    /// Drives one seed through the state machine:
    /// pending -> generating -> verifying -> accepted | retrying | dropped,
    /// with a one-time strategy switch in hybrid mode.
    async fn run_seed(
        &self,
        chapter: &Chapter,
        analysis: &ChapterAnalysis,
        seed: &RankedSentence,
        question_type: QuestionType,
        difficulty: Difficulty,
        mode: GenerationMode,
    ) -> Option<Question> {
        let primary = self.primary_strategy(mode);
        let mut state = SeedState::Pending;
        let mut switched = false;

        loop {
            state = match state {
                SeedState::Pending => SeedState::Generating {
                    strategy: primary,
                    attempt: 0,
                },
                SeedState::Generating { strategy, attempt } => {
                    let candidate = match strategy {
                        Strategy::Template => template_candidate(
                            seed,
                            question_type,
                            &analysis.keywords,
                            attempt as usize,
                        ),
                        Strategy::Delegated => {
                            self.delegated_candidate(chapter, seed, question_type, difficulty)
                                .await
                        }
                    };

                    let verified = candidate.and_then(|candidate| {
                        let verdict = self.verifier.verify(
                            &candidate.text,
                            &candidate.correct_answer,
                            &candidate.options,
                            candidate.question_type,
                            &chapter.text,
                        );
                        verdict
                            .accepted
                            .then(|| (candidate, verdict.confidence))
                    });

                    match verified {
                        Some((candidate, confidence)) => {
                            return Some(into_question(chapter, candidate, difficulty, confidence));
                        }
                        None if attempt + 1 < self.options.retry_budget => SeedState::Generating {
                            strategy,
                            attempt: attempt + 1,
                        },
                        None => {
                            // Budget exhausted on this strategy: hybrid gets
                            // one switch to the alternate before giving up.
                            match self.fallback_strategy(mode, strategy) {
                                Some(alternate) if !switched => {
                                    switched = true;
                                    SeedState::Generating {
                                        strategy: alternate,
                                        // one fallback attempt only
                                        attempt: self.options.retry_budget.saturating_sub(1),
                                    }
                                }
                                _ => SeedState::Dropped,
                            }
                        }
                    }
                }
                SeedState::Dropped => return None,
            };
        }
    }

    fn primary_strategy(&self, mode: GenerationMode) -> Strategy {
        match mode {
            GenerationMode::Local => Strategy::Template,
            GenerationMode::Delegated => Strategy::Delegated,
            GenerationMode::Hybrid => {
                if self.provider.is_some() {
                    Strategy::Delegated
                } else {
                    Strategy::Template
                }
            }
        }
    }

    fn fallback_strategy(&self, mode: GenerationMode, tried: Strategy) -> Option<Strategy> {
        if mode != GenerationMode::Hybrid {
            return None;
        }
        match tried {
            Strategy::Delegated => Some(Strategy::Template),
            Strategy::Template if self.provider.is_some() => Some(Strategy::Delegated),
            Strategy::Template => None,
        }
    }

    /// Delegated generation with bounded retry/backoff on transient
    /// provider errors. Non-transient errors skip the call immediately.
    async fn delegated_candidate(
        &self,
        chapter: &Chapter,
        seed: &RankedSentence,
        question_type: QuestionType,
        difficulty: Difficulty,
    ) -> Option<CandidateQuestion> {
        let provider = self.provider?;
        let prompt = build_prompt(&seed.text, difficulty_label(difficulty), question_type);
        let context: String = chapter.text.chars().take(PROVIDER_CONTEXT_MAX_CHARS).collect();

        let mut attempt = 0u32;
        loop {
            match provider.generate(&prompt, &context).await {
                Ok(candidate) => return Some(candidate),
                Err(error) if error.is_transient() && attempt + 1 < self.options.provider_attempts => {
                    let delay = self.options.backoff_base_ms.saturating_mul(1 << attempt.min(6));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(GenerationError::NotConfigured(_)) => return None,
                Err(_) => return None,
            }
        }
    }
}

/// Diversity-filtered seed selection: ranked sentences are taken in order,
/// skipping any too similar to an already-chosen seed.
fn select_seeds(
    ranked: &[RankedSentence],
    desired: usize,
    diversity_ceiling: f32,
) -> Vec<RankedSentence> {
    let mut chosen: Vec<RankedSentence> = Vec::new();
    for sentence in ranked {
        if chosen.len() >= desired {
            break;
        }
        let near_duplicate = chosen.iter().any(|picked| {
            cosine_similarity(&picked.embedding, &sentence.embedding) > diversity_ceiling
        });
        if !near_duplicate {
            chosen.push(sentence.clone());
        }
    }
    chosen
}

/// Default split from the original generator: half multiple choice, a
/// quarter true/false, the remainder short answer.
fn resolve_type_mix(request: &GenerationRequest, count: usize) -> Vec<QuestionType> {
    if !request.type_mix.is_empty() {
        return (0..count)
            .map(|index| request.type_mix[index % request.type_mix.len()])
            .collect();
    }

    let mcq = count / 2;
    let true_false = count / 4;
    (0..count)
        .map(|index| {
            if index < mcq {
                QuestionType::MultipleChoice
            } else if index < mcq + true_false {
                QuestionType::TrueFalse
            } else {
                QuestionType::ShortAnswer
            }
        })
        .collect()
}

fn resolve_difficulty(requested: Difficulty, seed_index: usize) -> Difficulty {
    match requested {
        Difficulty::Mixed => match seed_index % 3 {
            0 => Difficulty::Easy,
            1 => Difficulty::Medium,
            _ => Difficulty::Hard,
        },
        fixed => fixed,
    }
}

fn difficulty_label(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => "easy",
        Difficulty::Medium => "medium",
        Difficulty::Hard => "hard",
        Difficulty::Mixed => "mixed",
    }
}

fn fnv1a(text: &str) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

/// Case-insensitive first-occurrence mask, preserving the original span.
/// Candidate windows are taken at char positions of the original string;
/// case folding that changes byte length cannot shift the span.
fn mask_term(sentence: &str, term: &str) -> Option<(String, String)> {
    let term_chars = term.chars().count();
    if term_chars == 0 {
        return None;
    }
    let term_lower = term.to_lowercase();
    let starts: Vec<usize> = sentence.char_indices().map(|(index, _)| index).collect();

    for (pos, &start) in starts.iter().enumerate() {
        if pos + term_chars > starts.len() {
            break;
        }
        let end = starts.get(pos + term_chars).copied().unwrap_or(sentence.len());
        let window = &sentence[start..end];
        if window.to_lowercase() != term_lower {
            continue;
        }

        let mut masked = String::with_capacity(sentence.len());
        masked.push_str(&sentence[..start]);
        masked.push_str("_____");
        masked.push_str(&sentence[end..]);
        return Some((masked, window.to_string()));
    }
    None
}

/// Keyword anchoring a template question: prefers a ranked chapter keyword
/// present in the seed, offset by the retry attempt so a retry varies the
/// template instead of repeating it. Falls back to the seed's longest
/// content word when no ranked keyword occurs in it.
fn anchor_keyword(seed: &str, keywords: &[String], attempt: usize) -> Option<String> {
    let lowered = seed.to_lowercase();
    let present: Vec<&String> = keywords
        .iter()
        .filter(|keyword| lowered.contains(keyword.as_str()))
        .collect();
    if !present.is_empty() {
        return Some(present[attempt % present.len()].clone());
    }

    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 3)
        .max_by_key(|token| token.len())
        .map(|token| token.to_string())
}

/// Template instantiation for one seed. Returns None when the chapter does
/// not offer enough material (e.g. too few distractors), which drops the
/// seed rather than emitting a weak item.
fn template_candidate(
    seed: &RankedSentence,
    question_type: QuestionType,
    keywords: &[String],
    attempt: usize,
) -> Option<CandidateQuestion> {
    match question_type {
        QuestionType::TrueFalse => Some(CandidateQuestion {
            text: seed.text.clone(),
            question_type,
            options: vec!["True".to_string(), "False".to_string()],
            correct_answer: "True".to_string(),
            explanation: Some("The statement appears verbatim in the chapter.".to_string()),
        }),
        QuestionType::ShortAnswer => {
            let keyword = anchor_keyword(&seed.text, keywords, attempt)?;
            Some(CandidateQuestion {
                text: format!("What does the chapter state about {keyword}?"),
                question_type,
                options: Vec::new(),
                correct_answer: seed.text.clone(),
                explanation: None,
            })
        }
        QuestionType::FillBlank => {
            let keyword = anchor_keyword(&seed.text, keywords, attempt)?;
            let (masked, span) = mask_term(&seed.text, &keyword)?;
            Some(CandidateQuestion {
                text: format!("Fill in the blank: {masked}"),
                question_type,
                options: Vec::new(),
                correct_answer: span,
                explanation: None,
            })
        }
        QuestionType::MultipleChoice => {
            let keyword = anchor_keyword(&seed.text, keywords, attempt)?;
            let (masked, span) = mask_term(&seed.text, &keyword)?;

            // Distractors are other high-ranked keywords absent from the
            // seed, so exactly one option is supported by it.
            let distractors: Vec<String> = keywords
                .iter()
                .filter(|candidate| {
                    !seed.text.to_lowercase().contains(candidate.as_str())
                        && candidate.as_str() != span.to_lowercase()
                })
                .skip(attempt)
                .take(3)
                .cloned()
                .collect();
            if distractors.len() < 3 {
                return None;
            }

            let mut options = distractors;
            let position = (fnv1a(&seed.text) % (options.len() as u64 + 1)) as usize;
            options.insert(position, span.clone());

            Some(CandidateQuestion {
                text: format!("Which term completes the statement: \"{masked}\"?"),
                question_type,
                options,
                correct_answer: span,
                explanation: None,
            })
        }
    }
}

fn into_question(
    chapter: &Chapter,
    candidate: CandidateQuestion,
    difficulty: Difficulty,
    confidence: f64,
) -> Question {
    Question {
        id: Uuid::new_v4(),
        chapter_id: chapter.id,
        text: candidate.text,
        question_type: candidate.question_type,
        options: candidate.options,
        correct_answer: candidate.correct_answer,
        explanation: candidate.explanation,
        difficulty,
        confidence: Some(confidence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_chapter;
    use crate::models::AnalyzerOptions;
    use crate::provider::QuestionProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    const CHAPTER_TEXT: &str = "Photosynthesis converts sunlight into chemical energy. \
        Plants capture sunlight using chlorophyll inside chloroplasts. \
        The light reactions split water molecules and release oxygen gas. \
        Carbon dioxide enters leaves through small pores called stomata. \
        The Calvin cycle uses stored energy to build sugar molecules. \
        Cellular respiration later releases that energy inside mitochondria.";

    fn chapter() -> Chapter {
        Chapter {
            id: Uuid::new_v4(),
            upload_id: Uuid::new_v4(),
            chapter_no: 1,
            title: "Photosynthesis".to_string(),
            text: CHAPTER_TEXT.to_string(),
            summary: None,
            keywords: Vec::new(),
            has_questions: false,
        }
    }

    fn request(count: usize, mode: GenerationMode) -> GenerationRequest {
        GenerationRequest {
            chapter_id: Uuid::new_v4(),
            desired_count: count,
            difficulty: Difficulty::Medium,
            mode,
            type_mix: Vec::new(),
        }
    }

    struct FixedProvider;

    #[async_trait]
    impl QuestionProvider for FixedProvider {
        async fn generate(
            &self,
            _prompt: &str,
            _context: &str,
        ) -> Result<CandidateQuestion, GenerationError> {
            Ok(CandidateQuestion {
                text: "Which organelle hosts cellular respiration?".to_string(),
                question_type: QuestionType::MultipleChoice,
                options: vec![
                    "mitochondria".to_string(),
                    "stomata".to_string(),
                    "chlorophyll".to_string(),
                    "sugar".to_string(),
                ],
                correct_answer: "mitochondria".to_string(),
                explanation: None,
            })
        }
    }

    struct FailingProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl QuestionProvider for FailingProvider {
        async fn generate(
            &self,
            _prompt: &str,
            _context: &str,
        ) -> Result<CandidateQuestion, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GenerationError::InvalidResponse("garbage".to_string()))
        }
    }

    #[tokio::test]
    async fn local_mode_produces_verified_questions() {
        let chapter = chapter();
        let analysis = analyze_chapter(&chapter.text, &AnalyzerOptions::default());
        let generator = QuestionGenerator::local();

        let report = generator
            .generate(&chapter, &analysis, &request(5, GenerationMode::Local))
            .await;

        assert!(report.accepted.len() <= 5);
        assert!(!report.accepted.is_empty());
        for question in &report.accepted {
            assert_eq!(question.chapter_id, chapter.id);
            let confidence = question.confidence.expect("accepted questions carry confidence");
            assert!((0.0..=1.0).contains(&confidence));
            if question.question_type.has_options() {
                assert!(question.options.contains(&question.correct_answer));
                let mut seen = std::collections::HashSet::new();
                for option in &question.options {
                    assert!(seen.insert(option.clone()), "duplicate option");
                }
            } else {
                assert!(question.options.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn default_mix_is_half_mcq_quarter_true_false() {
        let mix = resolve_type_mix(&request(8, GenerationMode::Local), 8);
        let mcq = mix.iter().filter(|t| **t == QuestionType::MultipleChoice).count();
        let tf = mix.iter().filter(|t| **t == QuestionType::TrueFalse).count();
        let sa = mix.iter().filter(|t| **t == QuestionType::ShortAnswer).count();
        assert_eq!((mcq, tf, sa), (4, 2, 2));
    }

    #[tokio::test]
    async fn delegated_mode_uses_the_provider() {
        let chapter = chapter();
        let analysis = analyze_chapter(&chapter.text, &AnalyzerOptions::default());
        let provider = FixedProvider;
        let generator = QuestionGenerator::new(
            GeneratorOptions::default(),
            VerifierOptions::default(),
            Some(&provider),
        );

        let report = generator
            .generate(&chapter, &analysis, &request(2, GenerationMode::Delegated))
            .await;

        assert!(!report.accepted.is_empty());
        assert!(report
            .accepted
            .iter()
            .all(|question| question.correct_answer == "mitochondria"));
    }

    #[tokio::test]
    async fn hybrid_mode_falls_back_to_templates_when_provider_misbehaves() {
        let chapter = chapter();
        let analysis = analyze_chapter(&chapter.text, &AnalyzerOptions::default());
        let provider = FailingProvider {
            calls: AtomicU32::new(0),
        };
        let generator = QuestionGenerator::new(
            GeneratorOptions::default(),
            VerifierOptions::default(),
            Some(&provider),
        );

        let report = generator
            .generate(&chapter, &analysis, &request(3, GenerationMode::Hybrid))
            .await;

        assert!(provider.calls.load(Ordering::SeqCst) > 0);
        assert!(!report.accepted.is_empty(), "template fallback should fill in");
    }

    #[tokio::test]
    async fn partial_results_are_reported_not_hidden() {
        let chapter = Chapter {
            text: "Stomata regulate gas exchange in leaves constantly.".to_string(),
            ..chapter()
        };
        let analysis = analyze_chapter(&chapter.text, &AnalyzerOptions::default());
        let generator = QuestionGenerator::local();

        let report = generator
            .generate(&chapter, &analysis, &request(10, GenerationMode::Local))
            .await;

        assert!(report.accepted.len() < 10);
        assert!(report.is_partial());
        assert!(!report.notes.is_empty());
    }

    #[test]
    fn seed_selection_skips_near_duplicates() {
        let embedder = crate::embeddings::HashedNgramEmbedder::default();
        use crate::embeddings::Embedder;
        let make = |text: &str, score: f32| RankedSentence {
            index: 0,
            text: text.to_string(),
            embedding: embedder.embed(text),
            score,
        };

        let ranked = vec![
            make("Plants capture sunlight using chlorophyll", 0.9),
            make("Plants capture sunlight using chlorophyll", 0.8),
            make("The treaty was signed after long negotiations", 0.7),
        ];
        let seeds = select_seeds(&ranked, 3, 0.9);
        assert_eq!(seeds.len(), 2);
    }

    #[test]
    fn mask_term_is_case_insensitive_and_preserves_span() {
        let (masked, span) = mask_term("The Calvin cycle builds sugar", "calvin cycle").unwrap();
        assert_eq!(masked, "The _____ builds sugar");
        assert_eq!(span, "Calvin cycle");
    }

    #[test]
    fn mask_term_survives_case_folding_that_changes_byte_length() {
        // 'İ' grows by a byte when lowercased; the mask must still land on
        // the term, not a shifted slice.
        let (masked, span) =
            mask_term("İstanbul straddles the Bosphorus strait", "bosphorus").unwrap();
        assert_eq!(span, "Bosphorus");
        assert_eq!(masked, "İstanbul straddles the _____ strait");
    }
}
