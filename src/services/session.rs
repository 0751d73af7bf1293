use crate::core::error::{PollError, StudioError};
use crate::core::state::{GenerationJob, JobStatus, StepId, StepPayload};
use crate::services::heygen::{JobResult, VideoService};
use crate::services::poller::{JobPoller, PollEvent, PollHandle};
use crate::services::workflow::{Advance, WorkflowCoordinator};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// One user session: the workflow cursor plus at most one generation job.
pub struct Session {
    workflow: WorkflowCoordinator,
    service: Arc<dyn VideoService>,
    poller: JobPoller,
    interval: Duration,
    job: Option<GenerationJob>,
    handle: Option<PollHandle>,
}

impl Session {
    pub fn new(service: Arc<dyn VideoService>, interval: Duration) -> Self {
        Self {
            workflow: WorkflowCoordinator::new(),
            poller: JobPoller::new(service.clone()),
            service,
            interval,
            job: None,
            handle: None,
        }
    }

    pub fn workflow(&self) -> &WorkflowCoordinator {
        &self.workflow
    }

    pub fn workflow_mut(&mut self) -> &mut WorkflowCoordinator {
        &mut self.workflow
    }

    pub fn job(&self) -> Option<&GenerationJob> {
        self.job.as_ref()
    }

    pub fn advance(&mut self) -> Advance {
        let outcome = self.workflow.advance();
        self.discard_job_if_left_video();
        outcome
    }

    pub fn retreat(&mut self) {
        self.workflow.retreat();
        self.discard_job_if_left_video();
    }

    pub fn navigate_to(&mut self, step: &str) -> Result<(), StudioError> {
        self.workflow.navigate_to(step)?;
        self.discard_job_if_left_video();
        Ok(())
    }

    /// Submits the recorded selections and starts polling the new job.
    pub async fn generate(&mut self) -> Result<UnboundedReceiver<PollEvent>, StudioError> {
        let request = self.workflow.generation_request()?;
        self.discard_job();

        let job_id = self
            .service
            .submit_generation(&request)
            .await
            .map_err(|e| StudioError::Submission(format!("{:#}", e)))?;
        info!("Submitted video generation, job {}", job_id);

        // the job exists at the vendor even if polling fails to start
        self.job = Some(GenerationJob::new(job_id.clone()));
        let (handle, rx) = self.poller.start(&job_id, self.interval).map_err(|e| {
            warn!("Job {} was submitted but cannot be polled: {}", job_id, e);
            e
        })?;
        self.handle = Some(handle);
        Ok(rx)
    }

    /// Folds a poller event into the job record. Events for other jobs and
    /// events after a terminal status are ignored.
    pub fn apply_event(&mut self, event: &PollEvent) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        if job.job_id != event.job_id() || job.status.is_terminal() {
            return;
        }

        match event {
            PollEvent::Status { status, raw, .. } => {
                job.status = *status;
                job.raw_status = Some(raw.clone());
            }
            PollEvent::Completed { job_id, result } => {
                job.status = JobStatus::Completed;
                job.raw_status = Some("completed".to_string());
                job.result_url = Some(result.result_url.clone());
                job.thumbnail_url = result.thumbnail_url.clone();
                self.handle = None;
                let payload = StepPayload::Video {
                    job_id: job_id.clone(),
                };
                if let Err(e) = self.workflow.complete_step(StepId::Video.as_str(), payload) {
                    warn!("Could not record finished video: {}", e);
                }
            }
            PollEvent::Failed { error, .. } => {
                job.status = JobStatus::Failed;
                job.error_detail = Some(error.detail().to_string());
                self.handle = None;
            }
        }
    }

    /// Drains poller events until the job finishes, calling `on_update`
    /// after every event.
    pub async fn await_job<F>(
        &mut self,
        mut rx: UnboundedReceiver<PollEvent>,
        mut on_update: F,
    ) -> Result<JobResult, StudioError>
    where
        F: FnMut(&GenerationJob),
    {
        while let Some(event) = rx.recv().await {
            self.apply_event(&event);
            if let Some(job) = &self.job {
                on_update(job);
            }
            match event {
                PollEvent::Completed { result, .. } => return Ok(result),
                PollEvent::Failed { error, .. } => return Err(StudioError::Poll(error)),
                PollEvent::Status { .. } => {}
            }
        }
        Err(StudioError::Poll(PollError::Transient(
            "Polling stopped before the job finished".to_string(),
        )))
    }

    pub fn cancel_job(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.poller.cancel(&handle);
        }
    }

    /// Cancels polling and forgets the job record.
    pub fn discard_job(&mut self) {
        self.cancel_job();
        self.job = None;
    }

    fn discard_job_if_left_video(&mut self) {
        if self.job.is_some() && self.workflow.active_step().id != StepId::Video {
            info!("Left the video step, discarding job record");
            self.discard_job();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{AvatarSelection, VoiceSelection};
    use crate::services::heygen::JobStatusReport;
    use crate::services::poller::tests::{report, ScriptedService};
    use std::sync::atomic::Ordering;

    const TICK: Duration = Duration::from_millis(10);

    fn ready_session(service: Arc<ScriptedService>) -> Session {
        let mut session = Session::new(service, TICK);
        let wf = session.workflow_mut();
        wf.complete_step(
            "voices",
            StepPayload::Voice(VoiceSelection {
                voice_id: "v1".to_string(),
                name: "Paige".to_string(),
                language: None,
            }),
        )
        .unwrap();
        wf.complete_step(
            "avatars",
            StepPayload::Avatar(AvatarSelection {
                avatar_id: "a1".to_string(),
                name: "Anna".to_string(),
            }),
        )
        .unwrap();
        wf.complete_step(
            "script",
            StepPayload::Script {
                text: "Hello there".to_string(),
            },
        )
        .unwrap();
        wf.complete_step("summary", StepPayload::Summary { confirmed: true })
            .unwrap();
        wf.navigate_to("video").unwrap();
        session
    }

    #[tokio::test]
    async fn test_generate_and_await_completion() {
        let service = Arc::new(ScriptedService::new(vec![
            report("pending"),
            report("processing"),
            report("completed"),
        ]));
        let mut session = ready_session(service.clone());

        let rx = session.generate().await.unwrap();
        assert_eq!(session.job().unwrap().status, JobStatus::Queued);

        let mut seen = Vec::new();
        let result = session
            .await_job(rx, |job| seen.push(job.status))
            .await
            .unwrap();

        assert_eq!(result.result_url, "https://cdn.example/job-1.mp4");
        assert_eq!(
            seen,
            vec![JobStatus::Processing, JobStatus::Processing, JobStatus::Completed]
        );
        let job = session.job().unwrap();
        assert_eq!(job.result_url.as_deref(), Some("https://cdn.example/job-1.mp4"));
        assert!(session.workflow().is_completed(StepId::Video));
        assert_eq!(service.result_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_job_surfaces_detail() {
        let service = Arc::new(ScriptedService::new(vec![Ok(JobStatusReport {
            status: "failed".to_string(),
            error_detail: Some("quota exceeded".to_string()),
        })]));
        let mut session = ready_session(service);

        let rx = session.generate().await.unwrap();
        let err = session.await_job(rx, |_| {}).await.unwrap_err();
        assert_eq!(
            err,
            StudioError::Poll(PollError::JobFailed("quota exceeded".to_string()))
        );
        let job = session.job().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_detail.as_deref(), Some("quota exceeded"));
        assert!(!session.workflow().is_completed(StepId::Video));
    }

    #[tokio::test]
    async fn test_submission_failure_is_reported() {
        let mut scripted = ScriptedService::new(vec![]);
        scripted.submit_error = Some("401 Unauthorized".to_string());
        let mut session = ready_session(Arc::new(scripted));

        match session.generate().await {
            Err(StudioError::Submission(msg)) => assert!(msg.contains("401")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert!(session.job().is_none());
    }

    #[tokio::test]
    async fn test_submitted_job_is_kept_when_polling_cannot_start() {
        let service = Arc::new(ScriptedService::new(vec![]));
        let mut session = ready_session(service.clone());
        let (existing, _rx) = session
            .poller
            .start("job-1", Duration::from_secs(60))
            .unwrap();

        let err = session.generate().await.unwrap_err();
        assert_eq!(err, StudioError::AlreadyPolling("job-1".to_string()));
        let job = session.job().unwrap();
        assert_eq!(job.job_id, "job-1");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(service.status_calls.load(Ordering::SeqCst), 0);

        session.poller.cancel(&existing);
    }

    #[tokio::test]
    async fn test_generate_requires_inputs() {
        let service = Arc::new(ScriptedService::new(vec![]));
        let mut session = Session::new(service.clone(), TICK);
        assert!(matches!(
            session.generate().await,
            Err(StudioError::Submission(_))
        ));
        assert_eq!(service.status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_leaving_video_step_discards_job() {
        let service = Arc::new(ScriptedService::new(vec![]));
        let mut session = ready_session(service);
        let _rx = session.generate().await.unwrap();
        assert!(session.job().is_some());

        session.retreat();
        assert!(session.job().is_none());
        // payloads from earlier steps survive
        assert!(session.workflow().script().is_some());
    }

    #[tokio::test]
    async fn test_events_after_terminal_are_ignored() {
        let service = Arc::new(ScriptedService::new(vec![]));
        let mut session = ready_session(service);
        let _rx = session.generate().await.unwrap();
        session.cancel_job();

        session.apply_event(&PollEvent::Failed {
            job_id: "job-1".to_string(),
            error: PollError::JobFailed("boom".to_string()),
        });
        session.apply_event(&PollEvent::Status {
            job_id: "job-1".to_string(),
            status: JobStatus::Processing,
            raw: "processing".to_string(),
        });
        session.apply_event(&PollEvent::Status {
            job_id: "other".to_string(),
            status: JobStatus::Processing,
            raw: "processing".to_string(),
        });

        let job = session.job().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_detail.as_deref(), Some("boom"));
    }
}
