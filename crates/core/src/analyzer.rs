use crate::embeddings::{centroid, cosine_similarity, shared_embedder, Embedder};
use crate::models::AnalyzerOptions;
use std::collections::HashMap;

const STOP_WORDS: [&str; 48] = [
    "the", "a", "an", "and", "or", "but", "if", "then", "else", "when", "of", "to", "in", "on",
    "at", "by", "for", "with", "about", "into", "through", "is", "are", "was", "were", "be",
    "been", "being", "it", "its", "this", "that", "these", "those", "as", "from", "has", "have",
    "had", "not", "no", "can", "will", "would", "there", "their", "they", "which",
];

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

#[derive(Debug, Clone)]
pub struct RankedSentence {
    /// Position in the chapter's original sentence order.
    pub index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Cosine similarity against the chapter centroid; higher means more
    /// representative.
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct ChapterAnalysis {
    pub summary: String,
    pub keywords: Vec<String>,
    /// All retained sentences, most representative first.
    pub ranked_sentences: Vec<RankedSentence>,
}

pub fn split_sentences(text: &str) -> Vec<String> {
    text.split_terminator(['.', '!', '?', '\u{3002}'])
        .map(|sentence| sentence.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 1)
        .map(|token| token.to_string())
        .collect()
}

/// Derives summary, keywords, and sentence embeddings for one chapter.
/// Read-only: the chapter text is never mutated.
pub fn analyze_chapter(text: &str, options: &AnalyzerOptions) -> ChapterAnalysis {
    let embedder = shared_embedder();

    let sentences: Vec<(usize, String)> = split_sentences(text)
        .into_iter()
        .enumerate()
        .filter(|(_, sentence)| tokenize(sentence).len() >= options.min_sentence_tokens)
        .collect();

    if sentences.is_empty() {
        return ChapterAnalysis {
            summary: String::new(),
            keywords: frequency_keywords(text, options.keyword_count),
            ranked_sentences: Vec::new(),
        };
    }

    let embeddings: Vec<Vec<f32>> = sentences
        .iter()
        .map(|(_, sentence)| embedder.embed(sentence))
        .collect();
    let center = centroid(&embeddings);

    let mut ranked: Vec<RankedSentence> = sentences
        .into_iter()
        .zip(embeddings)
        .map(|((index, text), embedding)| {
            let score = cosine_similarity(&embedding, &center);
            RankedSentence {
                index,
                text,
                embedding,
                score,
            }
        })
        .collect();
    ranked.sort_by(|left, right| right.score.total_cmp(&left.score));

    let summary = build_summary(&ranked, options);
    let keywords = keyphrases(text, &center, options);

    ChapterAnalysis {
        summary,
        keywords,
        ranked_sentences: ranked,
    }
}

/// Top-N most representative sentences, re-ordered to source order and
/// truncated to the character budget.
fn build_summary(ranked: &[RankedSentence], options: &AnalyzerOptions) -> String {
    let mut picked: Vec<&RankedSentence> =
        ranked.iter().take(options.summary_sentences).collect();
    picked.sort_by_key(|sentence| sentence.index);

    let mut summary = String::new();
    for sentence in picked {
        let addition = format!("{}. ", sentence.text);
        if summary.len() + addition.len() > options.summary_max_chars {
            break;
        }
        summary.push_str(&addition);
    }
    summary.trim_end().to_string()
}

/// Multi-gram keyphrase extraction: candidate 1..=3-gram phrases ranked by
/// similarity to the chapter centroid, with near-duplicate phrases skipped.
fn keyphrases(text: &str, center: &[f32], options: &AnalyzerOptions) -> Vec<String> {
    if center.is_empty() {
        return frequency_keywords(text, options.keyword_count);
    }

    let embedder = shared_embedder();
    let tokens = tokenize(text);

    let mut candidates: HashMap<String, u32> = HashMap::new();
    for gram_len in 1..=3usize {
        for window in tokens.windows(gram_len) {
            if window.iter().any(|token| is_stop_word(token)) {
                continue;
            }
            *candidates.entry(window.join(" ")).or_insert(0) += 1;
        }
    }

    let mut scored: Vec<(String, Vec<f32>, f32)> = candidates
        .into_iter()
        .filter(|(_, count)| *count >= 1)
        .map(|(phrase, count)| {
            let embedding = embedder.embed(&phrase);
            // Frequency nudges ties toward recurring phrases.
            let score = cosine_similarity(&embedding, center) + (count as f32).ln() * 0.01;
            (phrase, embedding, score)
        })
        .collect();
    scored.sort_by(|left, right| right.2.total_cmp(&left.2));

    let mut chosen: Vec<(String, Vec<f32>)> = Vec::new();
    for (phrase, embedding, _) in scored {
        if chosen.len() >= options.keyword_count {
            break;
        }
        let near_duplicate = chosen.iter().any(|(_, existing)| {
            cosine_similarity(existing, &embedding) > options.keyword_diversity_ceiling
        });
        if !near_duplicate {
            chosen.push((phrase, embedding));
        }
    }

    chosen.into_iter().map(|(phrase, _)| phrase).collect()
}

/// Stop-word-filtered frequency ranking, used when embeddings degenerate.
pub fn frequency_keywords(text: &str, count: usize) -> Vec<String> {
    let mut frequencies: HashMap<String, u32> = HashMap::new();
    for token in tokenize(text) {
        if !is_stop_word(&token) {
            *frequencies.entry(token).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(String, u32)> = frequencies.into_iter().collect();
    ranked.sort_by(|left, right| right.1.cmp(&left.1).then(left.0.cmp(&right.0)));
    ranked.into_iter().take(count).map(|(token, _)| token).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAPTER: &str = "Photosynthesis converts sunlight into chemical energy. \
        Plants capture sunlight using chlorophyll inside chloroplasts. \
        The light reactions split water molecules and release oxygen. \
        Carbon dioxide enters leaves through small pores called stomata. \
        The Calvin cycle uses captured energy to build sugar molecules. \
        Ok. \
        Photosynthesis sustains nearly every food chain on the planet.";

    #[test]
    fn noise_sentences_are_filtered_out() {
        let analysis = analyze_chapter(CHAPTER, &AnalyzerOptions::default());
        assert!(analysis
            .ranked_sentences
            .iter()
            .all(|sentence| sentence.text != "Ok"));
        assert_eq!(analysis.ranked_sentences.len(), 6);
    }

    #[test]
    fn summary_preserves_source_order() {
        let analysis = analyze_chapter(CHAPTER, &AnalyzerOptions::default());
        assert!(!analysis.summary.is_empty());

        // Each summary sentence must appear in the chapter, in the same
        // relative order.
        let mut last_position = 0usize;
        for sentence in analysis.summary.split(". ").filter(|s| !s.is_empty()) {
            let sentence = sentence.trim_end_matches('.');
            let position = CHAPTER.find(sentence).expect("summary sentence comes from source");
            assert!(position >= last_position);
            last_position = position;
        }
    }

    #[test]
    fn summary_respects_character_budget() {
        let options = AnalyzerOptions {
            summary_max_chars: 80,
            ..Default::default()
        };
        let analysis = analyze_chapter(CHAPTER, &options);
        assert!(analysis.summary.len() <= 80);
    }

    #[test]
    fn keywords_are_ranked_and_bounded() {
        let options = AnalyzerOptions::default();
        let analysis = analyze_chapter(CHAPTER, &options);
        assert!(!analysis.keywords.is_empty());
        assert!(analysis.keywords.len() <= options.keyword_count);
    }

    #[test]
    fn keywords_contain_no_duplicates() {
        let analysis = analyze_chapter(CHAPTER, &AnalyzerOptions::default());
        let mut seen = std::collections::HashSet::new();
        for keyword in &analysis.keywords {
            assert!(seen.insert(keyword.clone()), "duplicate keyword {keyword}");
        }
    }

    #[test]
    fn frequency_fallback_skips_stop_words() {
        let keywords = frequency_keywords("the the the cell cell membrane", 5);
        assert_eq!(keywords[0], "cell");
        assert!(!keywords.contains(&"the".to_string()));
    }

    #[test]
    fn analysis_is_deterministic() {
        let first = analyze_chapter(CHAPTER, &AnalyzerOptions::default());
        let second = analyze_chapter(CHAPTER, &AnalyzerOptions::default());
        assert_eq!(first.summary, second.summary);
        assert_eq!(first.keywords, second.keywords);
    }
}
