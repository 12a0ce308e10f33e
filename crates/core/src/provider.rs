use crate::error::GenerationError;
use crate::models::QuestionType;
use async_trait::async_trait;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A generation candidate in the shape shared by every strategy. Provider
/// output is parsed-then-validated into this before anything downstream
/// sees it.
#[derive(Debug, Clone)]
pub struct CandidateQuestion {
    pub text: String,
    pub question_type: QuestionType,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: Option<String>,
}

#[async_trait]
pub trait QuestionProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        context: &str,
    ) -> Result<CandidateQuestion, GenerationError>;
}

#[derive(Debug, Clone, Serialize)]
struct ProviderRequest<'a> {
    prompt: &'a str,
    context: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderResponse {
    question: Option<String>,
    #[serde(default)]
    question_type: Option<String>,
    #[serde(default)]
    options: Vec<String>,
    correct_answer: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Reads `STUDYFORGE_PROVIDER_ENDPOINT`, `STUDYFORGE_PROVIDER_API_KEY`,
    /// and `STUDYFORGE_PROVIDER_TIMEOUT_SECS`. Returns None when no
    /// endpoint is configured.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("STUDYFORGE_PROVIDER_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = std::env::var("STUDYFORGE_PROVIDER_API_KEY")
            .ok()
            .and_then(|value| {
                let key = value.trim().to_string();
                if key.is_empty() {
                    None
                } else {
                    Some(key)
                }
            });

        let timeout_secs = std::env::var("STUDYFORGE_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(30);

        Some(Self {
            endpoint,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// HTTP provider for delegated generation. Calls are blocking with a
/// bounded timeout and never hold store state while waiting.
pub struct HttpQuestionProvider {
    config: ProviderConfig,
}

impl HttpQuestionProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Result<Self, GenerationError> {
        ProviderConfig::from_env().map(Self::new).ok_or_else(|| {
            GenerationError::NotConfigured(
                "STUDYFORGE_PROVIDER_ENDPOINT is not set".to_string(),
            )
        })
    }

    fn call_blocking(
        &self,
        prompt: &str,
        context: &str,
    ) -> Result<CandidateQuestion, GenerationError> {
        let payload = ProviderRequest { prompt, context };

        let mut request = Client::builder()
            .timeout(self.config.timeout)
            .build()?
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().map_err(|error| {
            if error.is_timeout() {
                GenerationError::Timeout(self.config.endpoint.clone())
            } else {
                GenerationError::Http(error)
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(GenerationError::RateLimited(self.config.endpoint.clone()));
        }
        if !status.is_success() {
            return Err(GenerationError::InvalidResponse(format!(
                "provider returned {status}"
            )));
        }

        let parsed: ProviderResponse = response
            .json()
            .map_err(|error| GenerationError::InvalidResponse(error.to_string()))?;

        validate_candidate(parsed)
    }
}

#[async_trait]
impl QuestionProvider for HttpQuestionProvider {
    async fn generate(
        &self,
        prompt: &str,
        context: &str,
    ) -> Result<CandidateQuestion, GenerationError> {
        tokio::task::block_in_place(|| self.call_blocking(prompt, context))
    }
}

fn parse_question_type(raw: Option<&str>) -> QuestionType {
    match raw.map(|value| value.trim().to_lowercase()).as_deref() {
        Some("true_false") => QuestionType::TrueFalse,
        Some("short_answer") => QuestionType::ShortAnswer,
        Some("fill_blank") => QuestionType::FillBlank,
        _ => QuestionType::MultipleChoice,
    }
}

/// Strict validation of a provider payload. Malformed output is rejected
/// as `InvalidResponse` instead of flowing downstream untyped.
fn validate_candidate(raw: ProviderResponse) -> Result<CandidateQuestion, GenerationError> {
    let text = raw
        .question
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GenerationError::InvalidResponse("missing question text".to_string()))?;

    let question_type = parse_question_type(raw.question_type.as_deref());

    let options: Vec<String> = raw
        .options
        .into_iter()
        .map(|option| option.trim().to_string())
        .filter(|option| !option.is_empty())
        .collect();

    let answer = raw
        .correct_answer
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GenerationError::InvalidResponse("missing correct answer".to_string()))?;

    if !question_type.has_options() {
        return Ok(CandidateQuestion {
            text,
            question_type,
            options: Vec::new(),
            correct_answer: answer,
            explanation: raw.explanation,
        });
    }

    if options.len() < 2 {
        return Err(GenerationError::InvalidResponse(format!(
            "choice question needs at least two options, got {}",
            options.len()
        )));
    }

    let mut seen = std::collections::HashSet::new();
    for option in &options {
        if !seen.insert(option.to_lowercase()) {
            return Err(GenerationError::InvalidResponse(format!(
                "duplicate option: {option}"
            )));
        }
    }

    // Providers often answer with a letter key; map it onto the option
    // list unless the key is itself a verbatim option.
    let answer = if answer.len() == 1 && !options.iter().any(|option| option == &answer) {
        let letter = answer.chars().next().unwrap_or('A').to_ascii_uppercase();
        let index = (letter as usize).wrapping_sub('A' as usize);
        options
            .get(index)
            .cloned()
            .ok_or_else(|| {
                GenerationError::InvalidResponse(format!("answer key {letter} out of range"))
            })?
    } else {
        answer
    };

    if !options.iter().any(|option| option == &answer) {
        return Err(GenerationError::InvalidResponse(format!(
            "correct answer not among options: {answer}"
        )));
    }

    Ok(CandidateQuestion {
        text,
        question_type,
        options,
        correct_answer: answer,
        explanation: raw.explanation,
    })
}

/// Prompt shape for delegated generation, mirroring the option/answer/
/// explanation JSON contract above.
pub fn build_prompt(seed: &str, difficulty: &str, question_type: QuestionType) -> String {
    let type_label = match question_type {
        QuestionType::MultipleChoice => "multiple choice question with 4 options",
        QuestionType::TrueFalse => "true/false question",
        QuestionType::ShortAnswer => "short answer question",
        QuestionType::FillBlank => "fill-in-the-blank question",
    };
    format!(
        "Create one {type_label} (difficulty: {difficulty}) grounded in the \
         supplied context, anchored on: \"{seed}\". Respond with JSON fields \
         question, question_type, options, correct_answer, explanation."
    )
}
