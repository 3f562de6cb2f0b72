use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::audio::write_pcm16_wav;
use crate::error::{PipelineError, Result};
use crate::utils::truncate_chars;

const ELEVEN_LABS_API: &str = "https://api.elevenlabs.io/v1";
const TTS_MODEL: &str = "eleven_turbo_v2";
const SAMPLE_RATE: u32 = 24_000;
/// Longest text sent to the speech service in one request.
pub const MAX_TTS_CHARS: usize = 500;

/// Turns text into a narration file.
#[async_trait]
pub trait AudioSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, output: &Path) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Gender {
    Female,
    Male,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub labels: Option<VoiceLabels>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoiceLabels {
    #[serde(default)]
    pub gender: Option<String>,
}

impl Voice {
    pub fn gender(&self) -> Option<&str> {
        self.labels.as_ref().and_then(|l| l.gender.as_deref())
    }

    /// Display name, falling back to the id when the service omits it.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.voice_id)
    }
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    #[serde(default)]
    voices: Vec<Voice>,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// Voices offered by the speech service plus the default pick per gender.
#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    voices: Vec<Voice>,
    female: Option<usize>,
    male: Option<usize>,
}

impl VoiceCatalog {
    pub fn new(voices: Vec<Voice>) -> Self {
        let first_with = |gender: &str| {
            voices
                .iter()
                .position(|v| v.gender().is_some_and(|g| g.eq_ignore_ascii_case(gender)))
        };
        let female = first_with("female").or(if voices.is_empty() { None } else { Some(0) });
        let male = first_with("male").or(if voices.len() > 1 { Some(1) } else { female });
        Self {
            voices,
            female,
            male,
        }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// The preset voice for `gender`, or a uniformly random one when no gender
    /// is requested or no preset exists.
    pub fn select(&self, gender: Option<Gender>) -> Option<&Voice> {
        let preset = match gender {
            Some(Gender::Female) => self.female,
            Some(Gender::Male) => self.male,
            None => None,
        };
        match preset {
            Some(idx) => self.voices.get(idx),
            None => self.voices.choose(&mut rand::rng()),
        }
    }
}

/// ElevenLabs text-to-speech client.
pub struct ElevenLabsTts {
    client: Client,
    api_key: String,
    catalog: VoiceCatalog,
    gender: Option<Gender>,
}

impl ElevenLabsTts {
    /// Create a client and fetch the voice catalog.
    ///
    /// A failed catalog fetch is logged and leaves the catalog empty, so every
    /// later synthesis fails with [`PipelineError::NoVoice`].
    pub async fn connect(api_key: impl Into<String>, gender: Option<Gender>) -> Self {
        let client = Client::new();
        let api_key = api_key.into();
        let catalog = match fetch_voices(&client, &api_key).await {
            Ok(voices) => {
                info!("Loaded {} voices", voices.len());
                VoiceCatalog::new(voices)
            }
            Err(e) => {
                error!("Error fetching voices: {}", e);
                VoiceCatalog::default()
            }
        };
        Self {
            client,
            api_key,
            catalog,
            gender,
        }
    }
}

async fn fetch_voices(client: &Client, api_key: &str) -> Result<Vec<Voice>> {
    let response: VoicesResponse = client
        .get(format!("{ELEVEN_LABS_API}/voices"))
        .header("xi-api-key", api_key)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(response.voices)
}

#[async_trait]
impl AudioSynthesizer for ElevenLabsTts {
    async fn synthesize(&self, text: &str, output: &Path) -> Result<PathBuf> {
        let voice = self.catalog.select(self.gender).ok_or(PipelineError::NoVoice)?;
        info!(
            "Selected voice ({}): {}",
            self.gender.map_or("random", |g| match g {
                Gender::Female => "female",
                Gender::Male => "male",
            }),
            voice.display_name()
        );

        let url = format!(
            "{ELEVEN_LABS_API}/text-to-speech/{}?output_format=pcm_{SAMPLE_RATE}",
            voice.voice_id
        );
        let request = SpeechRequest {
            text: truncate_chars(text, MAX_TTS_CHARS),
            model_id: TTS_MODEL,
        };
        let pcm = self
            .client
            .post(url)
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!("Audio generation failed: {}", e);
                PipelineError::generation(format!("speech synthesis: {e}"))
            })?
            .bytes()
            .await?;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_pcm16_wav(output, &pcm, SAMPLE_RATE)?;
        info!("Audio saved to: {}", output.display());
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(id: &str, gender: Option<&str>) -> Voice {
        Voice {
            voice_id: id.to_string(),
            name: Some(id.to_uppercase()),
            labels: Some(VoiceLabels {
                gender: gender.map(str::to_string),
            }),
        }
    }

    #[test]
    fn test_gender_presets() {
        let catalog = VoiceCatalog::new(vec![
            voice("george", Some("male")),
            voice("rachel", Some("Female")),
            voice("sam", None),
        ]);
        assert_eq!(catalog.select(Some(Gender::Female)).unwrap().voice_id, "rachel");
        assert_eq!(catalog.select(Some(Gender::Male)).unwrap().voice_id, "george");
    }

    #[test]
    fn test_missing_gender_labels_fall_back_by_position() {
        let catalog = VoiceCatalog::new(vec![voice("a", None), voice("b", None)]);
        assert_eq!(catalog.select(Some(Gender::Female)).unwrap().voice_id, "a");
        assert_eq!(catalog.select(Some(Gender::Male)).unwrap().voice_id, "b");

        let single = VoiceCatalog::new(vec![voice("only", None)]);
        assert_eq!(single.select(Some(Gender::Male)).unwrap().voice_id, "only");
    }

    #[test]
    fn test_random_selection_draws_from_catalog() {
        let catalog = VoiceCatalog::new(vec![voice("a", None), voice("b", None), voice("c", None)]);
        for _ in 0..20 {
            let picked = catalog.select(None).unwrap();
            assert!(["a", "b", "c"].contains(&picked.voice_id.as_str()));
        }
    }

    #[test]
    fn test_empty_catalog_has_no_voice() {
        let catalog = VoiceCatalog::new(Vec::new());
        assert!(catalog.is_empty());
        assert!(catalog.select(None).is_none());
        assert!(catalog.select(Some(Gender::Female)).is_none());
    }

    #[test]
    fn test_voices_response_tolerates_missing_fields() {
        let parsed: VoicesResponse = serde_json::from_str(
            r#"{"voices": [
                {"voice_id": "v1", "name": "Rachel", "labels": {"gender": "female", "accent": "american"}},
                {"voice_id": "v2", "labels": null}
            ]}"#,
        )
        .unwrap();
        assert_eq!(parsed.voices.len(), 2);
        assert_eq!(parsed.voices[0].gender(), Some("female"));
        assert_eq!(parsed.voices[1].gender(), None);
        assert_eq!(parsed.voices[1].display_name(), "v2");
    }

    #[tokio::test]
    async fn test_synthesis_without_voices_fails() {
        let tts = ElevenLabsTts {
            client: Client::new(),
            api_key: "unused".to_string(),
            catalog: VoiceCatalog::default(),
            gender: None,
        };
        let tmp = tempfile::tempdir().unwrap();
        let err = tts
            .synthesize("Hello.", &tmp.path().join("a.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoVoice));
    }
}
