use crate::core::config::Config;
use crate::core::error::{PollError, StudioError};
use crate::core::io::Storage;
use crate::core::state::{
    AvatarSelection, GenerationJob, StepId, StepPayload, VoiceSelection, STEPS,
};
use crate::services::catalog::{filter_voices, Catalog};
use crate::services::heygen::{Avatar, Voice};
use crate::services::session::Session;
use crate::services::workflow::{Advance, WorkflowCoordinator};
use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, Password, Select, Text};
use log::info;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuAction {
    Step(StepId),
    Next,
    Back,
    Jump,
    RefreshLists,
    StartOver,
    Quit,
}

impl fmt::Display for MenuAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MenuAction::Step(StepId::Voices) => "Choose voice",
            MenuAction::Step(StepId::Avatars) => "Choose avatar",
            MenuAction::Step(StepId::Script) => "Enter script",
            MenuAction::Step(StepId::Summary) => "Confirm summary",
            MenuAction::Step(StepId::Video) => "Generate video",
            MenuAction::Next => "Next →",
            MenuAction::Back => "← Back",
            MenuAction::Jump => "Jump to step…",
            MenuAction::RefreshLists => "Refresh voice/avatar lists",
            MenuAction::StartOver => "Start over",
            MenuAction::Quit => "Quit",
        };
        f.write_str(text)
    }
}

struct VoiceOption(Voice);

impl fmt::Display for VoiceOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}) [{}]",
            self.0.name,
            self.0.language.as_deref().unwrap_or("?"),
            self.0.gender.as_deref().unwrap_or("?"),
            self.0.voice_id
        )
    }
}

struct AvatarOption(Avatar);

impl fmt::Display for AvatarOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.0.avatar_name, self.0.avatar_id)
    }
}

/// Step indicator line, e.g. `[x] Voice  >[ ] Avatar<  [ ] Script ...`.
pub fn render_steps(workflow: &WorkflowCoordinator) -> String {
    STEPS
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let mark = if workflow.is_completed(step.id) { "x" } else { " " };
            if i == workflow.active_index() {
                format!(">[{}] {}<", mark, step.label)
            } else {
                format!("[{}] {}", mark, step.label)
            }
        })
        .collect::<Vec<_>>()
        .join("  ")
}

pub fn render_summary(workflow: &WorkflowCoordinator) -> String {
    let voice = workflow
        .voice()
        .map(|v| format!("{} [{}]", v.name, v.voice_id))
        .unwrap_or_else(|| "(not selected)".to_string());
    let avatar = workflow
        .avatar()
        .map(|a| format!("{} [{}]", a.name, a.avatar_id))
        .unwrap_or_else(|| "(not selected)".to_string());
    let script = workflow.script().unwrap_or("(empty)");
    format!("Voice:  {}\nAvatar: {}\nScript: {}", voice, avatar, script)
}

/// Asks for the HeyGen API key when neither `config.yml` nor the
/// environment provides one, and offers to store it in `config.yml`.
pub fn ensure_api_key(config: &mut Config) -> Result<()> {
    if !config.heygen.api_key.trim().is_empty() {
        return Ok(());
    }
    if config.unattended {
        return Err(anyhow!(
            "HeyGen API key missing. Set heygen.api_key in config.yml or HEYGEN_API_KEY."
        ));
    }

    let key = Password::new("HeyGen API key:")
        .without_confirmation()
        .prompt()?;
    if key.trim().is_empty() {
        return Err(anyhow!("HeyGen API key cannot be empty"));
    }
    config.heygen.api_key = key.trim().to_string();

    if Confirm::new("Save the key to config.yml?")
        .with_default(false)
        .prompt()
        .unwrap_or(false)
    {
        config.save()?;
        println!("Configuration saved.");
    }
    Ok(())
}

pub struct App {
    config: Config,
    session: Session,
    catalog: Catalog,
    output: Arc<dyn Storage>,
}

impl App {
    pub fn new(config: Config, session: Session, catalog: Catalog, output: Arc<dyn Storage>) -> Self {
        Self {
            config,
            session,
            catalog,
            output,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        loop {
            let step = self.session.workflow().active_step();
            println!();
            println!("{}", render_steps(self.session.workflow()));
            println!("{}: {}", step.label, step.description);
            println!("{}", step.guidance_message);

            let mut actions = vec![MenuAction::Step(step.id)];
            if self.session.workflow().can_advance() {
                actions.push(MenuAction::Next);
            }
            if self.session.workflow().active_index() > 0 {
                actions.push(MenuAction::Back);
            }
            actions.extend([
                MenuAction::Jump,
                MenuAction::RefreshLists,
                MenuAction::StartOver,
                MenuAction::Quit,
            ]);

            let action = match Select::new("What next?", actions).prompt() {
                Ok(a) => a,
                Err(_) => MenuAction::Quit,
            };

            match action {
                MenuAction::Step(id) => match self.run_step(id).await {
                    Ok(true) if self.config.unattended => {
                        self.session.advance();
                    }
                    Ok(_) => {}
                    Err(e) => println!("Error: {:#}", e),
                },
                MenuAction::Next => match self.session.advance() {
                    Advance::Advanced => {}
                    Advance::Blocked => println!("Finish this step before moving on."),
                    Advance::AtEnd => println!("This is the last step."),
                },
                MenuAction::Back => self.session.retreat(),
                MenuAction::Jump => {
                    let labels: Vec<&str> = STEPS.iter().map(|s| s.label).collect();
                    if let Ok(label) = Select::new("Jump to:", labels).prompt() {
                        if let Some(target) = STEPS.iter().find(|s| s.label == label) {
                            self.session.navigate_to(target.id.as_str())?;
                        }
                    }
                }
                MenuAction::RefreshLists => match self.catalog.refresh().await {
                    Ok((voices, avatars)) => {
                        println!("Loaded {} voices and {} avatars.", voices.len(), avatars.len())
                    }
                    Err(e) => println!("Error: {:#}", e),
                },
                MenuAction::StartOver => {
                    self.session.discard_job();
                    self.session.workflow_mut().reset();
                }
                MenuAction::Quit => {
                    self.session.discard_job();
                    println!("Bye.");
                    return Ok(());
                }
            }
        }
    }

    /// Runs the action for a step. Returns whether the step got completed.
    async fn run_step(&mut self, id: StepId) -> Result<bool> {
        match id {
            StepId::Voices => self.choose_voice().await,
            StepId::Avatars => self.choose_avatar().await,
            StepId::Script => self.enter_script(),
            StepId::Summary => self.confirm_summary(),
            StepId::Video => self.generate_video().await,
        }
    }

    async fn choose_voice(&mut self) -> Result<bool> {
        println!("Fetching voices...");
        let voices = self.catalog.voices(false).await?;
        let language = self.config.language.clone().unwrap_or_default();
        let mut filtered = filter_voices(&voices, &language);
        if filtered.is_empty() {
            // fall back to the full list rather than an empty picker
            filtered = voices;
        }
        if filtered.is_empty() {
            return Err(anyhow!("No voices available from HeyGen"));
        }

        let options: Vec<VoiceOption> = filtered.into_iter().map(VoiceOption).collect();
        let Ok(VoiceOption(voice)) = Select::new("Select voice:", options).prompt() else {
            return Ok(false);
        };
        self.session.workflow_mut().complete_step(
            StepId::Voices.as_str(),
            StepPayload::Voice(VoiceSelection {
                voice_id: voice.voice_id,
                name: voice.name,
                language: voice.language,
            }),
        )?;
        Ok(true)
    }

    async fn choose_avatar(&mut self) -> Result<bool> {
        println!("Fetching avatars...");
        let avatars = self.catalog.avatars(false).await?;
        if avatars.is_empty() {
            return Err(anyhow!("No avatars available from HeyGen"));
        }

        let options: Vec<AvatarOption> = avatars.into_iter().map(AvatarOption).collect();
        let Ok(AvatarOption(avatar)) = Select::new("Select avatar:", options).prompt() else {
            return Ok(false);
        };
        self.session.workflow_mut().complete_step(
            StepId::Avatars.as_str(),
            StepPayload::Avatar(AvatarSelection {
                avatar_id: avatar.avatar_id,
                name: avatar.avatar_name,
            }),
        )?;
        Ok(true)
    }

    fn enter_script(&mut self) -> Result<bool> {
        let current = self.session.workflow().script().unwrap_or("").to_string();
        let Ok(text) = Text::new("Script:").with_initial_value(&current).prompt() else {
            return Ok(false);
        };
        if text.trim().is_empty() {
            println!("The script cannot be empty.");
            return Ok(false);
        }
        self.session
            .workflow_mut()
            .complete_step(StepId::Script.as_str(), StepPayload::Script { text })?;
        Ok(true)
    }

    fn confirm_summary(&mut self) -> Result<bool> {
        println!("{}", render_summary(self.session.workflow()));
        if let Err(e) = self.session.workflow().generation_request() {
            println!("{}", e);
            return Ok(false);
        }

        let confirmed = self.config.unattended
            || Confirm::new("Use these settings?")
                .with_default(true)
                .prompt()
                .unwrap_or(false);
        if !confirmed {
            return Ok(false);
        }
        self.session.workflow_mut().complete_step(
            StepId::Summary.as_str(),
            StepPayload::Summary { confirmed: true },
        )?;
        Ok(true)
    }

    async fn generate_video(&mut self) -> Result<bool> {
        if !self.session.workflow().is_completed(StepId::Summary) {
            println!("Confirm the summary before generating.");
            return Ok(false);
        }

        loop {
            match self.generate_once().await {
                Ok(job) => {
                    println!("Video ready: {}", job.result_url.as_deref().unwrap_or("?"));
                    if let Some(thumb) = &job.thumbnail_url {
                        println!("Thumbnail: {}", thumb);
                    }
                    self.save_job(&job).await?;
                    return Ok(true);
                }
                Err(e @ (StudioError::Submission(_) | StudioError::Poll(_))) => {
                    println!("{}", e);
                    let retry = !self.config.unattended
                        && Confirm::new("Retry?").with_default(true).prompt().unwrap_or(false);
                    if !retry {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn generate_once(&mut self) -> Result<GenerationJob, StudioError> {
        let rx = self.session.generate().await?;

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message("Submitted, waiting for HeyGen...");

        let outcome = self
            .session
            .await_job(rx, |job| {
                let raw = job.raw_status.as_deref().unwrap_or("queued");
                pb.set_message(format!("Job {}: {}", job.job_id, raw));
            })
            .await;

        match &outcome {
            Ok(_) => pb.finish_with_message("Generation complete"),
            Err(_) => pb.abandon_with_message("Generation stopped"),
        }
        outcome?;

        self.session
            .job()
            .cloned()
            .ok_or_else(|| StudioError::Poll(PollError::Transient("Job record missing".to_string())))
    }

    async fn save_job(&self, job: &GenerationJob) -> Result<()> {
        let path = format!("{}.json", job.job_id);
        let content = serde_json::to_string_pretty(job)?;
        self.output.write(&path, content.as_bytes()).await?;
        info!("Saved job record to {}/{}", self.config.output_folder, path);
        Ok(())
    }
}
