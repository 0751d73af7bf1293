use crate::core::error::StudioError;
use crate::core::state::{
    step_index, AvatarSelection, StepId, StepPayload, VoiceSelection, WorkflowState,
    WorkflowStep, STEPS,
};
use crate::services::heygen::GenerationRequest;
use log::debug;

/// Result of the gated "Next" action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Advanced,
    /// Current step is not completed yet.
    Blocked,
    /// Already on the last step.
    AtEnd,
}

/// Tracks where the user is in the voice → avatar → script → summary → video
/// pipeline. Owned by the session and handed out by reference.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCoordinator {
    state: WorkflowState,
}

impl WorkflowCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &'static [WorkflowStep] {
        &STEPS
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn active_index(&self) -> usize {
        self.state.active_step_index
    }

    pub fn active_step(&self) -> &'static WorkflowStep {
        &STEPS[self.state.active_step_index]
    }

    pub fn is_completed(&self, id: StepId) -> bool {
        self.state.completed.get(&id).copied().unwrap_or(false)
    }

    pub fn payload(&self, id: StepId) -> Option<&StepPayload> {
        self.state.payload.get(&id)
    }

    /// Marks the step done and stores its payload. Never moves the cursor.
    pub fn complete_step(&mut self, step: &str, payload: StepPayload) -> Result<(), StudioError> {
        let id: StepId = step.parse()?;
        debug!("Completing step {}", id);
        self.state.completed.insert(id, true);
        self.state.payload.insert(id, payload);
        Ok(())
    }

    /// Jumps straight to a step, completed or not.
    pub fn navigate_to(&mut self, step: &str) -> Result<(), StudioError> {
        let id: StepId = step.parse()?;
        self.state.active_step_index = step_index(id);
        debug!("Navigated to step {}", id);
        Ok(())
    }

    pub fn can_advance(&self) -> bool {
        self.state.active_step_index + 1 < STEPS.len() && self.is_completed(self.active_step().id)
    }

    pub fn advance(&mut self) -> Advance {
        let next = self.state.active_step_index + 1;
        if next >= STEPS.len() {
            return Advance::AtEnd;
        }
        if !self.is_completed(self.active_step().id) {
            debug!("Advance blocked: {} not completed", self.active_step().id);
            return Advance::Blocked;
        }
        self.state.active_step_index = next;
        Advance::Advanced
    }

    pub fn retreat(&mut self) {
        self.state.active_step_index = self.state.active_step_index.saturating_sub(1);
    }

    pub fn reset(&mut self) {
        self.state = WorkflowState::default();
    }

    pub fn voice(&self) -> Option<&VoiceSelection> {
        match self.payload(StepId::Voices) {
            Some(StepPayload::Voice(v)) => Some(v),
            _ => None,
        }
    }

    pub fn avatar(&self) -> Option<&AvatarSelection> {
        match self.payload(StepId::Avatars) {
            Some(StepPayload::Avatar(a)) => Some(a),
            _ => None,
        }
    }

    pub fn script(&self) -> Option<&str> {
        match self.payload(StepId::Script) {
            Some(StepPayload::Script { text }) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Builds the submission input from the recorded selections.
    pub fn generation_request(&self) -> Result<GenerationRequest, StudioError> {
        let voice = self
            .voice()
            .filter(|v| !v.voice_id.trim().is_empty())
            .ok_or_else(|| StudioError::Submission("No voice selected".to_string()))?;
        let avatar = self
            .avatar()
            .filter(|a| !a.avatar_id.trim().is_empty())
            .ok_or_else(|| StudioError::Submission("No avatar selected".to_string()))?;
        let script = self
            .script()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StudioError::Submission("Script is empty".to_string()))?;

        Ok(GenerationRequest {
            voice_id: voice.voice_id.clone(),
            avatar_id: avatar.avatar_id.clone(),
            script: script.to_string(),
        })
    }
}
