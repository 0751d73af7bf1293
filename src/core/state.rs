use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::core::error::StudioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepId {
    Voices,
    Avatars,
    Script,
    Summary,
    Video,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::Voices => "voices",
            StepId::Avatars => "avatars",
            StepId::Script => "script",
            StepId::Summary => "summary",
            StepId::Video => "video",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = StudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STEPS
            .iter()
            .map(|step| step.id)
            .find(|id| id.as_str() == s)
            .ok_or_else(|| StudioError::UnknownStep(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkflowStep {
    pub id: StepId,
    pub label: &'static str,
    pub description: &'static str,
    pub guidance_message: &'static str,
}

pub static STEPS: [WorkflowStep; 5] = [
    WorkflowStep {
        id: StepId::Voices,
        label: "Voice",
        description: "Choose the voice that will read your script",
        guidance_message: "Pick a voice, then continue to choose an avatar.",
    },
    WorkflowStep {
        id: StepId::Avatars,
        label: "Avatar",
        description: "Choose the presenter shown in the video",
        guidance_message: "Pick an avatar, then continue to write the script.",
    },
    WorkflowStep {
        id: StepId::Script,
        label: "Script",
        description: "Write what the avatar should say",
        guidance_message: "Enter the script text, then review the summary.",
    },
    WorkflowStep {
        id: StepId::Summary,
        label: "Summary",
        description: "Review the voice, avatar and script",
        guidance_message: "Confirm your selections to unlock video generation.",
    },
    WorkflowStep {
        id: StepId::Video,
        label: "Video",
        description: "Generate the video and wait for it to finish",
        guidance_message: "Start generation. This usually takes a few minutes.",
    },
];

pub fn step_index(id: StepId) -> usize {
    // STEPS covers every StepId variant
    STEPS.iter().position(|s| s.id == id).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSelection {
    pub voice_id: String,
    pub name: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarSelection {
    pub avatar_id: String,
    pub name: String,
}

/// Data recorded when a step is completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPayload {
    Voice(VoiceSelection),
    Avatar(AvatarSelection),
    Script { text: String },
    Summary { confirmed: bool },
    Video { job_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowState {
    pub active_step_index: usize,
    pub completed: HashMap<StepId, bool>,
    pub payload: HashMap<StepId, StepPayload>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            active_step_index: 0,
            completed: STEPS.iter().map(|s| (s.id, false)).collect(),
            payload: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub job_id: String,
    pub status: JobStatus,
    pub result_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error_detail: Option<String>,
    /// Last status string the vendor reported, kept for diagnostics.
    pub raw_status: Option<String>,
}

impl GenerationJob {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            result_url: None,
            thumbnail_url: None,
            error_detail: None,
            raw_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_ids_round_trip_through_slugs() {
        for (i, step) in STEPS.iter().enumerate() {
            let parsed: StepId = step.id.as_str().parse().unwrap();
            assert_eq!(parsed, step.id);
            assert_eq!(step_index(parsed), i);
        }
    }

    #[test]
    fn test_unknown_slug_is_rejected() {
        let err = "thumbnails".parse::<StepId>().unwrap_err();
        assert_eq!(err, StudioError::UnknownStep("thumbnails".to_string()));
    }

    #[test]
    fn test_initial_state() {
        let state = WorkflowState::default();
        assert_eq!(state.active_step_index, 0);
        assert_eq!(state.completed.len(), STEPS.len());
        assert!(state.completed.values().all(|done| !done));
        assert!(state.payload.is_empty());
    }

    #[test]
    fn test_payload_serializes_with_kind_tag() {
        let payload = StepPayload::Script {
            text: "Hello".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "script");
        assert_eq!(json["text"], "Hello");
    }
}
