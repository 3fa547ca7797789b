//! Content-safety classification.
//!
//! `Classifier` is the seam: the pipeline holds an `Arc<dyn Classifier>` and
//! never talks HTTP itself. `LlmClassifier` is the production backend.
//! Classifiers never retry; the caller owns timeout and fallback policy.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod client;
pub mod prompts;

pub use client::{ClassifierSettings, LlmClassifier};

/// Risk category reported by the classifier. Anything the model invents
/// outside this list deserializes as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Safe,
    MildNegative,
    SevereDistress,
    Depression,
    SelfHarm,
    Suicide,
    Aggressive,
    #[serde(other)]
    Unknown,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Safe => "safe",
            Category::MildNegative => "mild_negative",
            Category::SevereDistress => "severe_distress",
            Category::Depression => "depression",
            Category::SelfHarm => "self_harm",
            Category::Suicide => "suicide",
            Category::Aggressive => "aggressive",
            Category::Unknown => "unknown",
        }
    }

    /// Label shown in counselor review tooling.
    pub fn label(self) -> &'static str {
        match self {
            Category::Safe => "Safe",
            Category::MildNegative => "Mildly negative",
            Category::SevereDistress => "Severe distress",
            Category::Depression => "Depression",
            Category::SelfHarm => "Self-harm",
            Category::Suicide => "Suicidal ideation",
            Category::Aggressive => "Aggressive / violent",
            Category::Unknown => "Unknown",
        }
    }
}

/// Structured classifier output for one piece of text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub category: Category,
    /// Clamped to [0, 1]. Audit only; never changes the action.
    pub confidence: f32,
    pub reasoning: String,
    pub keywords: Vec<String>,
}

impl Verdict {
    /// Verdict for blank text, which is never sent to the classifier.
    pub fn blank() -> Self {
        Self {
            category: Category::Safe,
            confidence: 1.0,
            reasoning: "Empty content".to_string(),
            keywords: Vec::new(),
        }
    }
}

/// Wire shape of the payload embedded in the model's answer. Every field is
/// optional so a sloppy answer still yields a verdict.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    category: Option<Category>,
    confidence: Option<f32>,
    reasoning: Option<String>,
    #[serde(alias = "keywords")]
    keywords_detected: Option<Vec<String>>,
}

impl From<RawVerdict> for Verdict {
    fn from(raw: RawVerdict) -> Self {
        Self {
            category: raw.category.unwrap_or(Category::Unknown),
            confidence: raw.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
            reasoning: raw.reasoning.unwrap_or_default(),
            keywords: raw.keywords_detected.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier API key is not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("classifier returned empty content")]
    EmptyContent,

    #[error("no JSON object in classifier response")]
    NoJsonObject,

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Sends non-blank, trimmed text to the backend.
    async fn request_verdict(&self, text: &str) -> Result<Verdict, ClassifierError>;

    /// Classifies `text`. Blank text is `safe` without a backend call.
    async fn classify(&self, text: &str) -> Result<Verdict, ClassifierError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Verdict::blank());
        }
        self.request_verdict(text).await
    }
}

/// Returns the first balanced `{…}` substring of `text`, honouring string
/// literals and escapes. A `{` that never closes is skipped and the scan
/// resumes at the next one.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate().skip(open) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[open..=i]);
                    }
                }
                _ => {}
            }
        }
        start = open + 1;
    }
    None
}

/// Parses the verdict embedded in a free-form model answer.
pub fn parse_verdict(text: &str) -> Result<Verdict, ClassifierError> {
    let json = extract_json_object(text).ok_or(ClassifierError::NoJsonObject)?;
    let raw: RawVerdict = serde_json::from_str(json)?;
    Ok(raw.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    #[async_trait]
    impl Classifier for Unreachable {
        async fn request_verdict(&self, _text: &str) -> Result<Verdict, ClassifierError> {
            panic!("blank text must not reach the backend");
        }
    }

    #[tokio::test]
    async fn test_blank_text_short_circuits_to_safe() {
        let verdict = Unreachable.classify("   \n\t").await.unwrap();
        assert_eq!(verdict.category, Category::Safe);
    }

    #[test]
    fn test_extract_json_object_from_prose() {
        let text = "Sure! Here is the result: {\"category\": \"safe\"} hope this helps";
        assert_eq!(extract_json_object(text), Some("{\"category\": \"safe\"}"));
    }

    #[test]
    fn test_extract_json_object_respects_braces_in_strings() {
        let text = r#"```json
{"category": "mild_negative", "reasoning": "uses } and { \" inside"}
```"#;
        let json = extract_json_object(text).unwrap();
        assert!(json.ends_with("inside\"}"));
        let verdict = parse_verdict(text).unwrap();
        assert_eq!(verdict.category, Category::MildNegative);
    }

    #[test]
    fn test_extract_json_object_nested() {
        let text = "x {\"a\": {\"b\": 1}, \"c\": 2} y {\"d\": 3}";
        assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 1}, \"c\": 2}"));
    }

    #[test]
    fn test_extract_json_object_skips_unclosed_brace() {
        assert_eq!(extract_json_object("{ oops"), None);
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn test_parse_verdict_defaults_and_clamps() {
        let verdict = parse_verdict(r#"{"category": "suicide", "confidence": 1.7}"#).unwrap();
        assert_eq!(verdict.category, Category::Suicide);
        assert_eq!(verdict.confidence, 1.0);
        assert!(verdict.keywords.is_empty());
    }

    #[test]
    fn test_parse_verdict_unmapped_category_is_unknown() {
        let verdict = parse_verdict(r#"{"category": "spam", "keywords_detected": ["buy"]}"#).unwrap();
        assert_eq!(verdict.category, Category::Unknown);
        assert_eq!(verdict.keywords, vec!["buy".to_string()]);
    }

    #[test]
    fn test_parse_verdict_without_object_is_error() {
        assert!(matches!(parse_verdict("I cannot help with that"), Err(ClassifierError::NoJsonObject)));
    }
}
