use crate::core::error::{PollError, StudioError};
use crate::core::state::JobStatus;
use crate::services::heygen::{JobResult, VideoService};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Non-terminal tick. `raw` is the vendor string behind `status`.
    Status {
        job_id: String,
        status: JobStatus,
        raw: String,
    },
    Completed {
        job_id: String,
        result: JobResult,
    },
    Failed {
        job_id: String,
        error: PollError,
    },
}

impl PollEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollEvent::Status { .. })
    }

    pub fn job_id(&self) -> &str {
        match self {
            PollEvent::Status { job_id, .. }
            | PollEvent::Completed { job_id, .. }
            | PollEvent::Failed { job_id, .. } => job_id,
        }
    }
}

/// Maps a vendor status string. Unknown strings count as still processing.
pub fn map_status(raw: &str) -> JobStatus {
    match raw {
        "processing" | "pending" => JobStatus::Processing,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Processing,
    }
}

#[derive(Default)]
struct CancelSignal {
    cancelled: AtomicBool,
    wake: Notify,
}

impl CancelSignal {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            // notify_one keeps a permit if the loop is not waiting yet
            self.wake.notify_one();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct PollHandle {
    job_id: String,
    serial: u64,
    signal: Arc<CancelSignal>,
}

impl PollHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }
}

impl std::fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollHandle")
            .field("job_id", &self.job_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

type Registry = Arc<Mutex<HashMap<String, u64>>>;

/// Removes the job from the registry when the loop ends, unless a newer
/// loop for the same job has taken its place.
struct Registration {
    registry: Registry,
    job_id: String,
    serial: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        release(&self.registry, &self.job_id, self.serial);
    }
}

fn release(registry: &Registry, job_id: &str, serial: u64) {
    let mut active = registry.lock().unwrap_or_else(|e| e.into_inner());
    if active.get(job_id) == Some(&serial) {
        active.remove(job_id);
    }
}

pub struct JobPoller {
    service: Arc<dyn VideoService>,
    active: Registry,
    next_serial: AtomicU64,
}

impl JobPoller {
    pub fn new(service: Arc<dyn VideoService>) -> Self {
        Self {
            service,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_serial: AtomicU64::new(1),
        }
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(job_id)
    }

    /// Spawns the poll loop for `job_id`. The loop ticks every `interval`,
    /// sends one event per tick and stops by itself on a terminal event.
    /// Dropping the receiver also stops it.
    pub fn start(
        &self,
        job_id: &str,
        interval: Duration,
    ) -> Result<(PollHandle, mpsc::UnboundedReceiver<PollEvent>), StudioError> {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.contains_key(job_id) {
                return Err(StudioError::AlreadyPolling(job_id.to_string()));
            }
            active.insert(job_id.to_string(), serial);
        }

        let signal = Arc::new(CancelSignal::default());
        let handle = PollHandle {
            job_id: job_id.to_string(),
            serial,
            signal: signal.clone(),
        };
        let registration = Registration {
            registry: self.active.clone(),
            job_id: job_id.to_string(),
            serial,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let service = self.service.clone();
        let job_id = job_id.to_string();

        info!("Polling job {} every {:?}", job_id, interval);
        tokio::spawn(async move {
            poll_loop(service.as_ref(), &job_id, interval, &signal, &tx).await;
            drop(registration);
            drop(tx);
        });

        Ok((handle, rx))
    }

    /// Stops the loop behind `handle`. Safe to call any number of times.
    pub fn cancel(&self, handle: &PollHandle) {
        if !handle.is_cancelled() {
            debug!("Cancelling poll for job {}", handle.job_id);
        }
        handle.signal.cancel();
        release(&self.active, &handle.job_id, handle.serial);
    }
}

async fn poll_loop(
    service: &dyn VideoService,
    job_id: &str,
    interval: Duration,
    signal: &CancelSignal,
    tx: &mpsc::UnboundedSender<PollEvent>,
) {
    loop {
        if signal.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = signal.wake.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }
        if signal.is_cancelled() {
            return;
        }

        let Some(event) = tick(service, job_id, signal).await else {
            debug!("Job {} cancelled during status check, discarding result", job_id);
            return;
        };
        if signal.is_cancelled() {
            debug!("Job {} cancelled during result fetch, discarding result", job_id);
            return;
        }
        let terminal = event.is_terminal();
        if tx.send(event).is_err() {
            debug!("No subscriber left for job {}, stopping", job_id);
            return;
        }
        if terminal {
            return;
        }
    }
}

/// One status check. Returns `None` when the job was cancelled while the
/// check was in flight; no result fetch is made in that case.
async fn tick(service: &dyn VideoService, job_id: &str, signal: &CancelSignal) -> Option<PollEvent> {
    let result = service.query_job_status(job_id).await;
    if signal.is_cancelled() {
        return None;
    }
    let report = match result {
        Ok(r) => r,
        Err(e) => {
            warn!("Status check for job {} failed: {:#}", job_id, e);
            return Some(PollEvent::Failed {
                job_id: job_id.to_string(),
                error: PollError::Transient(format!("{:#}", e)),
            });
        }
    };

    let event = match map_status(&report.status) {
        JobStatus::Completed => match service.fetch_job_result(job_id).await {
            Ok(result) => {
                info!("Job {} completed: {}", job_id, result.result_url);
                PollEvent::Completed {
                    job_id: job_id.to_string(),
                    result,
                }
            }
            Err(e) => {
                warn!("Fetching result for job {} failed: {:#}", job_id, e);
                PollEvent::Failed {
                    job_id: job_id.to_string(),
                    error: PollError::Transient(format!("{:#}", e)),
                }
            }
        },
        JobStatus::Failed => {
            let detail = report
                .error_detail
                .unwrap_or_else(|| "no error detail provided".to_string());
            warn!("Job {} failed: {}", job_id, detail);
            PollEvent::Failed {
                job_id: job_id.to_string(),
                error: PollError::JobFailed(detail),
            }
        }
        status => {
            if !matches!(report.status.as_str(), "processing" | "pending") {
                debug!("Job {} reported unrecognised status '{}'", job_id, report.status);
            }
            PollEvent::Status {
                job_id: job_id.to_string(),
                status,
                raw: report.status,
            }
        }
    };
    Some(event)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::heygen::{Avatar, GenerationRequest, JobStatusReport, Voice};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    const TICK: Duration = Duration::from_millis(10);
    const WAIT: Duration = Duration::from_secs(5);

    /// Replays a fixed list of status responses.
    pub(crate) struct ScriptedService {
        pub statuses: Mutex<VecDeque<Result<JobStatusReport>>>,
        pub status_calls: AtomicUsize,
        pub result_calls: AtomicUsize,
        pub query_delay: Duration,
        pub submit_error: Option<String>,
    }

    impl ScriptedService {
        pub(crate) fn new(statuses: Vec<Result<JobStatusReport>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                status_calls: AtomicUsize::new(0),
                result_calls: AtomicUsize::new(0),
                query_delay: Duration::ZERO,
                submit_error: None,
            }
        }

        pub(crate) fn remaining(&self) -> usize {
            self.statuses.lock().unwrap().len()
        }
    }

    pub(crate) fn report(status: &str) -> Result<JobStatusReport> {
        Ok(JobStatusReport {
            status: status.to_string(),
            error_detail: None,
        })
    }

    #[async_trait]
    impl VideoService for ScriptedService {
        async fn list_voices(&self) -> Result<Vec<Voice>> {
            Ok(vec![])
        }
        async fn list_avatars(&self) -> Result<Vec<Avatar>> {
            Ok(vec![])
        }
        async fn submit_generation(&self, _: &GenerationRequest) -> Result<String> {
            match &self.submit_error {
                Some(msg) => Err(anyhow!("{}", msg)),
                None => Ok("job-1".to_string()),
            }
        }
        async fn query_job_status(&self, _: &str) -> Result<JobStatusReport> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            if !self.query_delay.is_zero() {
                tokio::time::sleep(self.query_delay).await;
            }
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| report("processing"))
        }
        async fn fetch_job_result(&self, job_id: &str) -> Result<JobResult> {
            self.result_calls.fetch_add(1, Ordering::SeqCst);
            Ok(JobResult {
                result_url: format!("https://cdn.example/{}.mp4", job_id),
                thumbnail_url: None,
            })
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<PollEvent>) -> Option<PollEvent> {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("poller produced no event in time")
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("processing"), JobStatus::Processing);
        assert_eq!(map_status("pending"), JobStatus::Processing);
        assert_eq!(map_status("completed"), JobStatus::Completed);
        assert_eq!(map_status("failed"), JobStatus::Failed);
        assert_eq!(map_status("waiting"), JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_completes_after_third_tick_and_stops() {
        let service = Arc::new(ScriptedService::new(vec![
            report("processing"),
            report("processing"),
            report("completed"),
            report("processing"),
        ]));
        let poller = JobPoller::new(service.clone());
        let (_handle, mut rx) = poller.start("job-1", TICK).unwrap();

        for _ in 0..2 {
            match next_event(&mut rx).await {
                Some(PollEvent::Status { status, .. }) => {
                    assert_eq!(status, JobStatus::Processing);
                    assert_eq!(service.result_calls.load(Ordering::SeqCst), 0);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }

        match next_event(&mut rx).await {
            Some(PollEvent::Completed { job_id, result }) => {
                assert_eq!(job_id, "job-1");
                assert_eq!(result.result_url, "https://cdn.example/job-1.mp4");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // loop closed its side of the channel
        assert_eq!(next_event(&mut rx).await, None);
        tokio::time::sleep(TICK * 5).await;

        assert_eq!(service.result_calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(service.remaining(), 1, "fourth status must not be consumed");
        assert!(!poller.is_polling("job-1"));
    }

    #[tokio::test]
    async fn test_failed_status_carries_detail() {
        let service = Arc::new(ScriptedService::new(vec![
            Ok(JobStatusReport {
                status: "failed".to_string(),
                error_detail: Some("quota exceeded".to_string()),
            }),
            report("processing"),
        ]));
        let poller = JobPoller::new(service.clone());
        let (_handle, mut rx) = poller.start("job-2", TICK).unwrap();

        match next_event(&mut rx).await {
            Some(PollEvent::Failed { error, .. }) => {
                assert_eq!(error, PollError::JobFailed("quota exceeded".to_string()));
                assert_eq!(error.detail(), "quota exceeded");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(next_event(&mut rx).await, None);
        assert_eq!(service.remaining(), 1);
        assert_eq!(service.result_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_error_halts_loop() {
        let service = Arc::new(ScriptedService::new(vec![
            report("processing"),
            Err(anyhow!("connection reset")),
            report("completed"),
        ]));
        let poller = JobPoller::new(service.clone());
        let (_handle, mut rx) = poller.start("job-3", TICK).unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            Some(PollEvent::Status { .. })
        ));
        match next_event(&mut rx).await {
            Some(PollEvent::Failed {
                error: PollError::Transient(msg),
                ..
            }) => assert!(msg.contains("connection reset")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(next_event(&mut rx).await, None);
        assert_eq!(service.remaining(), 1);
    }

    #[tokio::test]
    async fn test_unknown_status_surfaces_raw_string() {
        let service = Arc::new(ScriptedService::new(vec![report("waiting")]));
        let poller = JobPoller::new(service);
        let (handle, mut rx) = poller.start("job-4", TICK).unwrap();

        match next_event(&mut rx).await {
            Some(PollEvent::Status { status, raw, .. }) => {
                assert_eq!(status, JobStatus::Processing);
                assert_eq!(raw, "waiting");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        poller.cancel(&handle);
    }

    #[tokio::test]
    async fn test_second_start_for_same_job_is_rejected() {
        let service = Arc::new(ScriptedService::new(vec![]));
        let poller = JobPoller::new(service);
        let (handle, _rx) = poller.start("job-5", Duration::from_secs(60)).unwrap();

        assert!(poller.is_polling("job-5"));
        assert_eq!(
            poller.start("job-5", TICK).err(),
            Some(StudioError::AlreadyPolling("job-5".to_string()))
        );
        // other jobs are unaffected
        let (other, _rx2) = poller.start("job-6", Duration::from_secs(60)).unwrap();

        poller.cancel(&handle);
        poller.cancel(&other);
        assert!(!poller.is_polling("job-5"));
        // retry after cancel is allowed
        let (again, _rx3) = poller.start("job-5", Duration::from_secs(60)).unwrap();
        poller.cancel(&again);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_stops_ticks() {
        let service = Arc::new(ScriptedService::new(vec![]));
        let poller = JobPoller::new(service.clone());
        let (handle, mut rx) = poller.start("job-7", Duration::from_millis(50)).unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            Some(PollEvent::Status { .. })
        ));
        poller.cancel(&handle);
        poller.cancel(&handle);
        assert!(handle.is_cancelled());

        assert_eq!(next_event(&mut rx).await, None);
        let calls = service.status_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(service.status_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_in_flight_result_is_discarded_after_cancel() {
        let mut scripted = ScriptedService::new(vec![report("completed")]);
        scripted.query_delay = Duration::from_millis(200);
        let service = Arc::new(scripted);
        let poller = JobPoller::new(service.clone());
        let (handle, mut rx) = poller.start("job-8", TICK).unwrap();

        // let the first tick start its request
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(service.status_calls.load(Ordering::SeqCst), 1);
        poller.cancel(&handle);

        assert_eq!(next_event(&mut rx).await, None);
        assert_eq!(service.result_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_registry_still_answers_after_poisoned_lock() {
        let poller = JobPoller::new(Arc::new(ScriptedService::new(vec![])));
        let (handle, _rx) = poller.start("job-9", Duration::from_secs(60)).unwrap();

        let registry = poller.active.clone();
        let _ = std::thread::spawn(move || {
            let _guard = registry.lock().unwrap();
            panic!("poison the registry");
        })
        .join();
        assert!(poller.active.is_poisoned());

        assert!(poller.is_polling("job-9"));
        assert_eq!(
            poller.start("job-9", TICK).err(),
            Some(StudioError::AlreadyPolling("job-9".to_string()))
        );
        poller.cancel(&handle);
        assert!(!poller.is_polling("job-9"));
    }
}
