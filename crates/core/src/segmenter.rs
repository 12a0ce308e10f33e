use crate::embeddings::{cosine_similarity, shared_embedder, Embedder};
use crate::error::PipelineError;
use crate::extractor::PageText;
use crate::models::SegmenterOptions;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct ChapterDraft {
    pub title: String,
    pub body: String,
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Splits extracted text into ordered chapter drafts. Lexical markers are
/// the default signal; embedding drift is preferred when enabled and it
/// finds any boundary. Zero boundaries collapse into a single chapter
/// titled after the document.
pub fn segment_chapters(
    document_title: &str,
    pages: &[PageText],
    options: &SegmenterOptions,
) -> Result<Vec<ChapterDraft>, PipelineError> {
    let full_text = pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let lines: Vec<&str> = full_text.lines().collect();

    let mut drafts = if options.semantic_boundaries {
        let semantic = segment_by_drift(&lines, options);
        if semantic.is_empty() {
            segment_by_markers(&lines, options)?
        } else {
            semantic
        }
    } else {
        segment_by_markers(&lines, options)?
    };

    if drafts.is_empty() {
        let body = full_text.trim().to_string();
        if body.is_empty() {
            return Err(PipelineError::Extraction(
                "no text to segment".to_string(),
            ));
        }
        drafts.push(ChapterDraft {
            title: document_title.to_string(),
            body,
        });
    }

    Ok(drafts)
}

fn segment_by_markers(
    lines: &[&str],
    options: &SegmenterOptions,
) -> Result<Vec<ChapterDraft>, PipelineError> {
    let marker = Regex::new(options.marker_regex)?;

    // Boundary candidates: (line index, title). The marker must start the
    // line; anything longer than a short trailing title fails the regex, so
    // "chapter" inside quoted prose or tables does not open a chapter.
    let mut boundaries = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        if let Some(captures) = marker.captures(line.trim_end()) {
            let number = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let trailing = captures
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|title| !title.is_empty() && title.len() <= options.max_title_len);

            let title = match trailing {
                Some(rest) => format!("Chapter {number}: {rest}"),
                None => format!("Chapter {number}"),
            };
            boundaries.push((index, title));
        }
    }

    if boundaries.is_empty() {
        return Ok(Vec::new());
    }

    let mut drafts = Vec::new();

    let front = lines[..boundaries[0].0].join("\n");
    let front = front.trim();
    if front.len() >= options.min_front_matter_chars {
        drafts.push(ChapterDraft {
            title: "Front Matter".to_string(),
            body: front.to_string(),
        });
    }

    for (position, (start, title)) in boundaries.iter().enumerate() {
        let end = boundaries
            .get(position + 1)
            .map(|(next_start, _)| *next_start)
            .unwrap_or(lines.len());

        let body = lines[start + 1..end].join("\n").trim().to_string();
        drafts.push(ChapterDraft {
            title: title.clone(),
            body,
        });
    }

    Ok(drafts)
}

/// Embedding-drift segmentation: adjacent windows of sentences are embedded
/// and a boundary opens where (1 - cosine) exceeds the threshold.
fn segment_by_drift(lines: &[&str], options: &SegmenterOptions) -> Vec<ChapterDraft> {
    let sentences: Vec<String> = lines
        .iter()
        .flat_map(|line| line.split_terminator(['.', '!', '?']))
        .map(|sentence| sentence.trim().to_string())
        .filter(|sentence| !sentence.is_empty())
        .collect();

    let window = options.drift_window.max(1);
    if sentences.len() < window * 2 {
        return Vec::new();
    }

    let embedder = shared_embedder();
    let window_vectors: Vec<Vec<f32>> = sentences
        .chunks(window)
        .map(|chunk| embedder.embed(&chunk.join(". ")))
        .collect();

    let mut cut_points = Vec::new();
    for index in 1..window_vectors.len() {
        let drift = 1.0 - cosine_similarity(&window_vectors[index - 1], &window_vectors[index]);
        if drift > options.drift_threshold {
            cut_points.push(index * window);
        }
    }

    if cut_points.is_empty() {
        return Vec::new();
    }

    let mut drafts = Vec::new();
    let mut start = 0usize;
    for cut in cut_points.into_iter().chain(std::iter::once(sentences.len())) {
        let cut = cut.min(sentences.len());
        if cut <= start {
            continue;
        }
        let body = sentences[start..cut].join(". ");
        let title = sentences[start]
            .chars()
            .take(options.max_title_len)
            .collect::<String>();
        drafts.push(ChapterDraft { title, body });
        start = cut;
    }

    drafts
}
