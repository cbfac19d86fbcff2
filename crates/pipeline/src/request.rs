// crates/pipeline/src/request.rs
//! The composed creation request and its validation rules.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

const MAX_TOPIC_CHARS: usize = 500;
const MAX_KEYWORDS: usize = 20;

/// What the video is about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brief {
    pub topic: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// How the script should be planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    pub target_duration_secs: u32,
    #[serde(default)]
    pub scene_count: Option<u32>,
    #[serde(default = "default_style")]
    pub style: String,
}

fn default_style() -> String {
    "standard".to_string()
}

/// Narration voice settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSpec {
    pub voice: String,
    #[serde(default = "default_rate")]
    pub rate: f32,
    /// Semitones relative to the voice's natural pitch.
    #[serde(default)]
    pub pitch: f32,
}

fn default_rate() -> f32 {
    1.0
}

/// Container format of the composed video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
    Mov,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mov => "mov",
        }
    }
}

/// Output geometry and encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSpec {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub format: OutputFormat,
}

fn default_fps() -> u32 {
    30
}

/// Everything the pipeline needs to produce one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub brief: Brief,
    pub plan: PlanSpec,
    pub voice: VoiceSpec,
    pub render: RenderSpec,
}

impl GenerationRequest {
    pub fn new(brief: Brief, plan: PlanSpec, voice: VoiceSpec, render: RenderSpec) -> Self {
        Self {
            brief,
            plan,
            voice,
            render,
        }
    }

    /// Collect every problem with the request.
    ///
    /// Returns an empty `Vec` if valid; otherwise a list of human-readable errors.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let topic = self.brief.topic.trim();
        if topic.is_empty() {
            errors.push("brief.topic must not be empty".to_string());
        } else if topic.chars().count() > MAX_TOPIC_CHARS {
            errors.push(format!("brief.topic must be at most {MAX_TOPIC_CHARS} characters"));
        }
        if self.brief.keywords.len() > MAX_KEYWORDS {
            errors.push(format!("brief.keywords allows at most {MAX_KEYWORDS} entries"));
        }
        if self.brief.keywords.iter().any(|k| k.trim().is_empty()) {
            errors.push("brief.keywords must not contain blank entries".to_string());
        }

        if !(5..=3600).contains(&self.plan.target_duration_secs) {
            errors.push("plan.targetDurationSecs must be between 5 and 3600".to_string());
        }
        if let Some(scenes) = self.plan.scene_count {
            if !(1..=200).contains(&scenes) {
                errors.push("plan.sceneCount must be between 1 and 200".to_string());
            }
        }
        if self.plan.style.trim().is_empty() {
            errors.push("plan.style must not be empty".to_string());
        }

        if self.voice.voice.trim().is_empty() {
            errors.push("voice.voice must not be empty".to_string());
        }
        if !self.voice.rate.is_finite() || !(0.5..=2.0).contains(&self.voice.rate) {
            errors.push("voice.rate must be between 0.5 and 2.0".to_string());
        }
        if !self.voice.pitch.is_finite() || !(-12.0..=12.0).contains(&self.voice.pitch) {
            errors.push("voice.pitch must be between -12 and 12 semitones".to_string());
        }

        for (field, value) in [("width", self.render.width), ("height", self.render.height)] {
            if !(16..=7680).contains(&value) {
                errors.push(format!("render.{field} must be between 16 and 7680"));
            } else if value % 2 != 0 {
                errors.push(format!("render.{field} must be even"));
            }
        }
        if !(1..=120).contains(&self.render.fps) {
            errors.push("render.fps must be between 1 and 120".to_string());
        }

        errors
    }

    /// Validate, folding all problems into a single `Validation` error.
    pub fn ensure_valid(&self) -> PipelineResult<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Validation(errors.join("; ")))
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_request() -> GenerationRequest {
    GenerationRequest::new(
        Brief {
            topic: "How tides work".to_string(),
            audience: Some("students".to_string()),
            goal: None,
            tone: Some("friendly".to_string()),
            keywords: vec!["moon".to_string(), "gravity".to_string()],
        },
        PlanSpec {
            target_duration_secs: 60,
            scene_count: Some(6),
            style: default_style(),
        },
        VoiceSpec {
            voice: "alloy".to_string(),
            rate: 1.0,
            pitch: 0.0,
        },
        RenderSpec {
            width: 1920,
            height: 1080,
            fps: 30,
            format: OutputFormat::Mp4,
        },
    )
}
