//! Vision analysis collaborator.
//!
//! `GeminiClient` sends an image to the Gemini `generateContent` endpoint
//! with a structured-extraction prompt and parses the reply into an
//! `ImageAnalysis`. Models routinely wrap their JSON in prose or code
//! fences, so the parser extracts the first well-formed JSON object from
//! the reply text and falls back to a description-only result when nothing
//! parses.

use crate::models::analysis::ImageAnalysis;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("image analysis is disabled: no API key configured")]
    Disabled,
    #[error("vision API returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("vision API returned no content")]
    EmptyResponse,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Boundary trait for the analysis collaborator so the ingestion pipeline
/// can be exercised without network access.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        base64_image: &str,
        mime_type: &str,
    ) -> Result<ImageAnalysis, AnalysisError>;
}

const ANALYSIS_PROMPT: &str = r#"Analyze this image in detail and provide structured information about its content.
Identify and categorize the following:

1. Main objects in the image
2. Scene type (e.g., indoor, outdoor, urban, nature)
3. Dominant colors
4. Activities or actions occurring in the image
5. Any text visible in the image
6. Overall mood or atmosphere
7. Time of day if apparent
8. Weather conditions if apparent
9. Distinctive landmarks if any

Format the response as a JSON object with the following structure:
{
  "description": "A brief overall description of the image",
  "objects": ["object1", "object2"],
  "scenes": ["scene1", "scene2"],
  "colors": ["color1", "color2"],
  "activities": ["activity1", "activity2"],
  "textContent": "Any visible text",
  "mood": ["mood1", "mood2"],
  "timeOfDay": "time if apparent",
  "weather": "weather if apparent",
  "landmarks": ["landmark1", "landmark2"],
  "tags": ["tag1", "tag2"]
}

The "tags" field should contain the most relevant keywords that would be useful for searching this image."#;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Gemini-backed analyzer.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        }
    }
}

#[async_trait]
impl ImageAnalyzer for GeminiClient {
    async fn analyze(
        &self,
        base64_image: &str,
        mime_type: &str,
    ) -> Result<ImageAnalysis, AnalysisError> {
        let key = self.api_key.as_deref().ok_or(AnalysisError::Disabled)?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );

        let body = json!({
            "contents": [{
                "parts": [
                    { "text": ANALYSIS_PROMPT },
                    { "inline_data": { "mime_type": mime_type, "data": base64_image } }
                ]
            }],
            "generationConfig": { "temperature": 0.2 }
        });

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AnalysisError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply: GenerateContentResponse = resp.json().await?;
        let text = reply
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(AnalysisError::EmptyResponse);
        }

        Ok(parse_analysis(&text))
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Turn a raw model reply into an `ImageAnalysis`.
///
/// Prefers the first well-formed JSON object embedded in the text; when
/// none parses, keeps a truncated slice of the raw text as the description
/// rather than failing the call.
pub fn parse_analysis(text: &str) -> ImageAnalysis {
    match extract_first_json(text).and_then(|value| serde_json::from_value(value).ok()) {
        Some(analysis) => analysis,
        None => ImageAnalysis::from_raw_text(text),
    }
}

/// Find and parse the first balanced `{...}` object in `text`.
///
/// Brace matching is string-aware so braces inside JSON string values do
/// not terminate the scan early.
fn extract_first_json(text: &str) -> Option<serde_json::Value> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(rel) = bytes[search_from..].iter().position(|&b| b == b'{') {
        let start = search_from + rel;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if escaped {
                escaped = false;
                continue;
            }
            match b {
                b'\\' if in_string => escaped = true,
                b'"' => in_string = !in_string,
                b'{' if !in_string => depth += 1,
                b'}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(start + offset);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(end) => {
                if let Ok(value) = serde_json::from_str(&text[start..=end]) {
                    return Some(value);
                }
                search_from = start + 1;
            }
            None => return None,
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let text = r#"Sure! Here is the analysis you asked for:
```json
{"description": "A dog on a beach", "tags": ["dog", "beach"]}
```
Let me know if you need anything else."#;

        let analysis = parse_analysis(text);
        assert_eq!(analysis.description, "A dog on a beach");
        assert_eq!(analysis.tags, vec!["dog", "beach"]);
    }

    #[test]
    fn braces_inside_strings_do_not_break_matching() {
        let text = r#"{"description": "shows {curly} braces and a \" quote", "tags": []}"#;
        let analysis = parse_analysis(text);
        assert_eq!(analysis.description, "shows {curly} braces and a \" quote");
    }

    #[test]
    fn skips_malformed_object_and_finds_later_one() {
        let text = r#"{not json at all} but then {"description": "ok", "colors": ["red"]}"#;
        let analysis = parse_analysis(text);
        assert_eq!(analysis.description, "ok");
        assert_eq!(analysis.colors, vec!["red"]);
    }

    #[test]
    fn degrades_to_raw_text_when_nothing_parses() {
        let text = "The image shows a mountain at dusk.";
        let analysis = parse_analysis(text);
        assert_eq!(analysis.description, text);
        assert!(analysis.tags.is_empty());
        assert!(analysis.objects.is_empty());
    }

    #[test]
    fn raw_text_fallback_truncates_long_replies() {
        let text = "x".repeat(2000);
        let analysis = parse_analysis(&text);
        assert_eq!(analysis.description.chars().count(), 500);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let text = r#"{"description": "d", "tags": ["t"], "confidence": 0.93}"#;
        let analysis = parse_analysis(text);
        assert_eq!(analysis.tags, vec!["t"]);
    }
}
