use crate::analyzer::split_sentences;
use crate::embeddings::{cosine_similarity, shared_embedder, Embedder};
use crate::models::{QuestionType, VerifierOptions};
use crate::segmenter::normalize_whitespace;

#[derive(Debug, Clone)]
pub struct Evidence {
    pub sentence: String,
    pub similarity: f64,
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub accepted: bool,
    /// Weighted confidence in [0, 1].
    pub confidence: f64,
    /// Best-supporting sentences, strongest first. Returned on rejection
    /// too, for quality review.
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default)]
pub struct AnswerVerifier {
    options: VerifierOptions,
}

impl AnswerVerifier {
    pub fn new(options: VerifierOptions) -> Self {
        Self { options }
    }

    /// Checks that a candidate's correct answer is grounded in the chapter
    /// text. Deterministic: the same inputs always produce the same
    /// decision and confidence.
    pub fn verify(
        &self,
        question_text: &str,
        correct_answer: &str,
        option_list: &[String],
        question_type: QuestionType,
        chapter_text: &str,
    ) -> Verification {
        // For true/false items the word "True" carries no grounding; the
        // claim being asserted is what must be supported.
        let target = match question_type {
            QuestionType::TrueFalse => question_text,
            _ => correct_answer,
        };

        let embedder = shared_embedder();
        let target_vector = embedder.embed(target);

        let mut evidence: Vec<Evidence> = split_sentences(chapter_text)
            .into_iter()
            .map(|sentence| {
                let similarity =
                    cosine_similarity(&target_vector, &embedder.embed(&sentence)) as f64;
                Evidence {
                    sentence,
                    similarity,
                }
            })
            .filter(|item| item.similarity >= self.options.similarity_floor)
            .collect();
        evidence.sort_by(|left, right| right.similarity.total_cmp(&left.similarity));
        evidence.truncate(self.options.evidence_top_k);

        let mut similarity_score = evidence
            .first()
            .map(|item| item.similarity)
            .unwrap_or(0.0);

        // Verbatim containment is the strongest grounding signal a local
        // embedder can miss on short targets.
        let normalized_chapter = normalize_whitespace(chapter_text).to_lowercase();
        let normalized_target = normalize_whitespace(target).to_lowercase();
        if !normalized_target.is_empty() && normalized_chapter.contains(&normalized_target) {
            similarity_score = similarity_score.max(0.95);
        }

        let lexical_score = lexical_overlap(target, chapter_text);

        let confidence = if question_type.has_options() {
            let structural_score =
                structural_check(correct_answer, option_list, embedder) as u8 as f64;
            self.options.similarity_weight * similarity_score
                + self.options.lexical_weight * lexical_score
                + self.options.structural_weight * structural_score
        } else {
            // Free-response items have no option structure; that weight
            // rides on similarity instead.
            (self.options.similarity_weight + self.options.structural_weight) * similarity_score
                + self.options.lexical_weight * lexical_score
        };
        let confidence = confidence.clamp(0.0, 1.0);

        Verification {
            accepted: confidence >= self.options.acceptance_threshold,
            confidence,
            evidence,
        }
    }
}

/// Share of the target's salient tokens that appear in the chapter.
fn lexical_overlap(target: &str, chapter_text: &str) -> f64 {
    let chapter_lower = chapter_text.to_lowercase();
    let tokens: Vec<String> = target
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 2)
        .map(|token| token.to_string())
        .collect();

    if tokens.is_empty() {
        return 0.0;
    }

    let matched = tokens
        .iter()
        .filter(|token| chapter_lower.contains(token.as_str()))
        .count();
    matched as f64 / tokens.len() as f64
}

/// Exactly one option matches the stated correct answer, no option is
/// duplicated, and no other option is a near-duplicate of the answer.
fn structural_check(
    correct_answer: &str,
    option_list: &[String],
    embedder: &impl Embedder,
) -> bool {
    let exact_matches = option_list
        .iter()
        .filter(|option| option.as_str() == correct_answer)
        .count();
    if exact_matches != 1 {
        return false;
    }

    let mut seen = std::collections::HashSet::new();
    for option in option_list {
        if !seen.insert(option.trim().to_lowercase()) {
            return false;
        }
    }

    let answer_vector = embedder.embed(correct_answer);
    option_list
        .iter()
        .filter(|option| option.as_str() != correct_answer)
        .all(|option| cosine_similarity(&answer_vector, &embedder.embed(option)) < 0.92)
}
