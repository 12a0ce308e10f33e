use std::sync::OnceLock;

const DEFAULT: usize = 256;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

pub trait Embedder {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic local sentence embedder: word unigrams plus character
/// trigrams hashed into a fixed number of buckets, L2-normalized. Cheap,
/// read-only, and safe for concurrent use.
#[derive(Debug, Clone, Copy)]
pub struct HashedNgramEmbedder {
    pub dimensions: usize,
}

impl Default for HashedNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

impl Embedder for HashedNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();

        // Word tokens carry most of the signal; weight them above trigrams.
        for word in lowered.split(|c: char| !c.is_alphanumeric()) {
            if word.len() < 2 {
                continue;
            }
            let bucket = (fnv1a(word) % vector.len() as u64) as usize;
            vector[bucket] += 2.0;
        }

        let chars: Vec<char> = lowered.chars().collect();
        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let bucket = (fnv1a(&token) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.is_empty() || left.len() != right.len() {
        return 0.0;
    }

    let dot = left
        .iter()
        .zip(right.iter())
        .map(|(a, b)| a * b)
        .sum::<f32>();
    let left_mag = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let right_mag = right.iter().map(|v| v * v).sum::<f32>().sqrt();

    if left_mag == 0.0 || right_mag == 0.0 {
        0.0
    } else {
        dot / (left_mag * right_mag)
    }
}

pub fn centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };

    let mut sum = vec![0f32; first.len()];
    for vector in vectors {
        for (slot, value) in sum.iter_mut().zip(vector.iter()) {
            *slot += value;
        }
    }

    let count = vectors.len() as f32;
    for slot in &mut sum {
        *slot /= count;
    }
    sum
}

static SHARED_EMBEDDER: OnceLock<HashedNgramEmbedder> = OnceLock::new();

/// Process-wide embedder instance. Initialized at most once, read-only
/// afterwards; every in-flight analysis shares it.
pub fn shared_embedder() -> &'static HashedNgramEmbedder {
    SHARED_EMBEDDER.get_or_init(HashedNgramEmbedder::default)
}
