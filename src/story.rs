//! Story generation: topic selection, the Gemini call and length validation.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::session::JobSession;
use crate::utils::{normalize_whitespace, truncate_chars};

const GEMINI_API: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Only the first rows of the topic sheet are drawn from.
const TOPIC_ROWS: usize = 98;
const TITLE_CHARS: usize = 50;
pub const SOFT_STORY_CHARS: usize = 300;
pub const HARD_STORY_CHARS: usize = 500;

/// Turns a prompt into story text.
#[async_trait]
pub trait StoryWriter: Send + Sync {
    async fn write_story(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiResponse {
    fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()?
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    api_key: String,
    client: Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl StoryWriter for GeminiClient {
    async fn write_story(&self, prompt: &str) -> Result<String> {
        let url = format!("{GEMINI_API}/{GEMINI_MODEL}:generateContent");
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };
        let response: GeminiResponse = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response
            .text()
            .ok_or_else(|| PipelineError::generation("Gemini returned no story text"))
    }
}

/// Read topics from the first column of a CSV file with a header row.
pub fn load_topics(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|e| {
        PipelineError::config(format!("cannot read topics {}: {e}", path.display()))
    })?;
    Ok(data
        .lines()
        .skip(1)
        .filter_map(first_csv_field)
        .filter(|t| !t.is_empty())
        .collect())
}

/// First field of a CSV line, honouring double-quoted fields.
fn first_csv_field(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('"') else {
        return line.split(',').next().map(|f| f.trim().to_string());
    };

    let mut field = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => break,
            other => field.push(other),
        }
    }
    Some(field.trim().to_string())
}

pub fn pick_topic(topics: &[String]) -> Option<&String> {
    let pool = &topics[..topics.len().min(TOPIC_ROWS)];
    pool.choose(&mut rand::rng())
}

pub fn build_prompt(topic: &str) -> String {
    format!(
        "Write a concise children's story of maximum upto 300 characters about: {topic}. \
         Do not add any special characters in it, text and ! are acceptable only."
    )
}

pub fn story_title(topic: &str) -> String {
    truncate_chars(topic.trim(), TITLE_CHARS).trim_end().to_string()
}

/// Collapse whitespace and enforce the length caps.
///
/// Past [`HARD_STORY_CHARS`] the story is rejected; past [`SOFT_STORY_CHARS`]
/// a warning is logged and the story is kept.
pub fn validate_story(text: &str) -> Result<String> {
    let cleaned = normalize_whitespace(text);
    let len = cleaned.chars().count();
    if len > HARD_STORY_CHARS {
        return Err(PipelineError::StoryTooLong {
            len,
            max: HARD_STORY_CHARS,
        });
    }
    if len > SOFT_STORY_CHARS {
        warn!("Text length ({}) exceeds {} chars", len, SOFT_STORY_CHARS);
    }
    Ok(cleaned)
}

/// Generate, validate and persist a story about `topic`.
///
/// Returns the video title and the story text.
pub async fn generate_story(
    writer: &dyn StoryWriter,
    topic: &str,
    session: &JobSession,
) -> Result<(String, String)> {
    let prompt = build_prompt(topic);
    info!("Generating story for topic: {}", topic);

    let story = writer
        .write_story(&prompt)
        .await
        .and_then(|raw| validate_story(&raw))
        .inspect_err(|e| error!("Story generation failed: {}", e))?;
    info!("Generated story length: {} characters", story.chars().count());

    let story_path = session.story_path();
    fs::write(&story_path, &story)?;
    info!("Story saved to: {}", story_path.display());

    Ok((story_title(topic), story))
}
