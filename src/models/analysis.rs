//! Structured output of the vision analysis collaborator.

use serde::{Deserialize, Serialize};

/// Everything the vision model reports about one image.
///
/// Only `description`, `tags`, `objects`, `scenes` and `colors` are
/// persisted and searchable; the remaining fields ride along in the upload
/// response for clients that want them. All fields default so a partial
/// model response still deserializes.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ImageAnalysis {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub objects: Vec<String>,

    #[serde(default)]
    pub scenes: Vec<String>,

    #[serde(default)]
    pub colors: Vec<String>,

    #[serde(default)]
    pub activities: Vec<String>,

    /// Any text visible in the image.
    #[serde(default, rename = "textContent")]
    pub text_content: Option<String>,

    #[serde(default)]
    pub mood: Vec<String>,

    #[serde(default, rename = "timeOfDay")]
    pub time_of_day: Option<String>,

    #[serde(default)]
    pub weather: Option<String>,

    #[serde(default)]
    pub landmarks: Vec<String>,
}

impl ImageAnalysis {
    /// Fallback used when the model reply contains no parseable JSON:
    /// keep a truncated slice of the raw text as the description and
    /// leave every label set empty.
    pub fn from_raw_text(text: &str) -> Self {
        let description = text.chars().take(500).collect();
        Self {
            description,
            ..Self::default()
        }
    }
}
