//! Job submission and long-horizon polling with a bounded failure budget
//!
//! The backend may be CPU-bound for many minutes, so there is no wall-clock
//! timeout on the success path. The only bound is the number of consecutive
//! transient failures, tracked by [`RetryPolicy`].

use crate::config::QualityPreset;
use crate::error::{InpaintError, Result};
use crate::types::ImagePayload;
use async_trait::async_trait;
use instant::Instant;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info as trace_info, instrument, warn as trace_warn};

/// Message used when the backend reports failure without a reason
pub const GENERIC_JOB_FAILURE: &str = "Job failed";

/// Poll timing and the consecutive-failure budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Wait before every status query
    pub poll_interval: Duration,
    /// Extra wait after a transient failure, on top of `poll_interval`
    pub backoff_interval: Duration,
    /// Abort once consecutive failures exceed this count
    pub max_consecutive_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            backoff_interval: Duration::from_secs(5),
            max_consecutive_failures: 150,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_consecutive_failures == 0 {
            return Err(InpaintError::config_value_error(
                "max consecutive failures",
                0,
                ">= 1",
                Some(150),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(InpaintError::invalid_config("Poll interval must be non-zero"));
        }
        Ok(())
    }

    /// Whether `failures` consecutive failures exhaust the budget
    #[must_use]
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures > self.max_consecutive_failures
    }
}

/// Backend-assigned job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    /// Any status this client does not know; polling continues
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Body of `GET /jobs/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusResponse {
    #[must_use]
    pub fn new(status: JobStatus) -> Self {
        Self { status, error: None }
    }

    #[must_use]
    pub fn failed<S: Into<String>>(error: Option<S>) -> Self {
        Self {
            status: JobStatus::Failed,
            error: error.map(Into::into),
        }
    }
}

/// Body of `POST /inpaint`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// A job as last observed by the poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub error: Option<String>,
}

impl Job {
    fn queued(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            error: None,
        }
    }

    fn observe(&mut self, response: &StatusResponse) {
        self.status = response.status;
        self.error.clone_from(&response.error);
    }
}

/// Everything an inpaint submission carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub image: ImagePayload,
    /// Binary PNG mask, white marks pixels to remove
    pub mask: ImagePayload,
    pub quality: QualityPreset,
}

/// Outcome of a successful job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: Job,
    /// Result image bytes as returned by the backend
    pub image: Vec<u8>,
    /// Status queries issued, successful or not
    pub polls: u32,
    pub elapsed: Duration,
}

/// The three calls the poll loop depends on
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Submit an edit and return the job id
    async fn submit(&self, request: &EditRequest) -> Result<JobId>;

    /// Query a job's status
    async fn poll(&self, job_id: &JobId) -> Result<StatusResponse>;

    /// Download the finished result
    async fn fetch_result(&self, job_id: &JobId) -> Result<Vec<u8>>;
}

/// Progress events emitted while a job runs
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Submitted { job_id: JobId },
    StatusPolled { job_id: JobId, status: JobStatus },
    RetryScheduled {
        job_id: JobId,
        failures: u32,
        delay: Duration,
        error: String,
    },
    Completed { job_id: JobId, bytes: usize },
    Failed { job_id: Option<JobId>, error: String },
}

/// Receives job progress events
pub trait JobObserver: Send + Sync {
    fn on_event(&self, event: &JobEvent);
}

/// Observer that discards every event
pub struct NoOpObserver;

impl JobObserver for NoOpObserver {
    fn on_event(&self, _event: &JobEvent) {}
}

/// Submits edits and drives the poll loop to a terminal state
#[derive(Debug, Clone, Default)]
pub struct JobOrchestrator {
    policy: RetryPolicy,
}

impl JobOrchestrator {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit `request` and poll until the job completes, fails or is cancelled
    ///
    /// # Errors
    /// - `BackendJob` when the backend reports the job failed
    /// - `PollBudgetExhausted` after too many consecutive transient failures
    /// - `Cancelled` when `cancel` fires
    /// - the submit error itself, which is never retried
    #[instrument(
        name = "job",
        skip(self, backend, request, cancel, observer),
        fields(quality = %request.quality, image_bytes = request.image.size())
    )]
    pub async fn run<B>(
        &self,
        backend: &B,
        request: &EditRequest,
        cancel: &CancellationToken,
        observer: &dyn JobObserver,
    ) -> Result<JobOutcome>
    where
        B: JobBackend + ?Sized,
    {
        let submitted = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(InpaintError::Cancelled),
            r = backend.submit(request) => r,
        };
        let job_id = match submitted {
            Ok(id) => id,
            Err(e) => {
                observer.on_event(&JobEvent::Failed {
                    job_id: None,
                    error: e.to_string(),
                });
                return Err(e);
            },
        };

        trace_info!(job_id = %job_id, "Job submitted");
        observer.on_event(&JobEvent::Submitted {
            job_id: job_id.clone(),
        });

        let result = self.wait_for_result(backend, job_id.clone(), cancel, observer).await;
        if let Err(ref e) = result {
            observer.on_event(&JobEvent::Failed {
                job_id: Some(job_id),
                error: e.to_string(),
            });
        }
        result
    }

    /// Poll an already-submitted job until it reaches a terminal state
    pub async fn wait_for_result<B>(
        &self,
        backend: &B,
        job_id: JobId,
        cancel: &CancellationToken,
        observer: &dyn JobObserver,
    ) -> Result<JobOutcome>
    where
        B: JobBackend + ?Sized,
    {
        let start = Instant::now();
        let mut job = Job::queued(job_id);
        let mut failures: u32 = 0;
        let mut polls: u32 = 0;

        loop {
            sleep_or_cancel(self.policy.poll_interval, cancel).await?;
            polls += 1;

            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(InpaintError::Cancelled),
                r = backend.poll(&job.id) => r,
            };

            let transient = match polled {
                Ok(response) => {
                    failures = 0;
                    job.observe(&response);
                    observer.on_event(&JobEvent::StatusPolled {
                        job_id: job.id.clone(),
                        status: job.status,
                    });

                    match job.status {
                        JobStatus::Completed => {
                            let fetched = tokio::select! {
                                biased;
                                () = cancel.cancelled() => return Err(InpaintError::Cancelled),
                                r = backend.fetch_result(&job.id) => r,
                            };
                            match fetched {
                                Ok(image) => {
                                    trace_info!(
                                        job_id = %job.id,
                                        polls,
                                        bytes = image.len(),
                                        "Job completed"
                                    );
                                    observer.on_event(&JobEvent::Completed {
                                        job_id: job.id.clone(),
                                        bytes: image.len(),
                                    });
                                    return Ok(JobOutcome {
                                        job,
                                        image,
                                        polls,
                                        elapsed: start.elapsed(),
                                    });
                                },
                                Err(e) if e.is_transient() => e,
                                Err(e) => return Err(e),
                            }
                        },
                        JobStatus::Failed => {
                            let message = job
                                .error
                                .clone()
                                .filter(|m| !m.is_empty())
                                .unwrap_or_else(|| GENERIC_JOB_FAILURE.to_string());
                            trace_warn!(job_id = %job.id, error = %message, "Job failed");
                            return Err(InpaintError::backend_job(message));
                        },
                        JobStatus::Queued | JobStatus::Processing | JobStatus::Unknown => continue,
                    }
                },
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            failures += 1;
            if self.policy.is_exhausted(failures) {
                log::error!(
                    "Giving up on job {} after {} consecutive failures",
                    job.id,
                    failures
                );
                return Err(InpaintError::PollBudgetExhausted {
                    failures,
                    last_error: transient.to_string(),
                });
            }

            log::warn!(
                "Polling error for job {} ({}/{}): {}",
                job.id,
                failures,
                self.policy.max_consecutive_failures,
                transient
            );
            observer.on_event(&JobEvent::RetryScheduled {
                job_id: job.id.clone(),
                failures,
                delay: self.policy.backoff_interval + self.policy.poll_interval,
                error: transient.to_string(),
            });
            sleep_or_cancel(self.policy.backoff_interval, cancel).await?;
        }
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(InpaintError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingObserver, ScriptedBackend};

    fn request() -> EditRequest {
        EditRequest {
            image: ImagePayload::png("photo.png", vec![1, 2, 3]),
            mask: ImagePayload::png("mask.png", vec![4, 5, 6]),
            quality: QualityPreset::Balanced,
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.poll_interval, Duration::from_secs(2));
        assert_eq!(policy.backoff_interval, Duration::from_secs(5));
        assert!(!policy.is_exhausted(150));
        assert!(policy.is_exhausted(151));
    }

    #[test]
    fn test_status_parsing() {
        let resp: StatusResponse =
            serde_json::from_str(r#"{"status":"failed","error":"CUDA out of memory"}"#).unwrap();
        assert_eq!(resp.status, JobStatus::Failed);
        assert_eq!(resp.error.as_deref(), Some("CUDA out of memory"));

        let resp: StatusResponse = serde_json::from_str(r#"{"status":"warming_up"}"#).unwrap();
        assert_eq!(resp.status, JobStatus::Unknown);
        assert!(!resp.status.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_fetches_once() {
        let backend = ScriptedBackend::new("job-1")
            .then_status(JobStatus::Queued)
            .then_status(JobStatus::Processing)
            .then_status(JobStatus::Completed)
            .with_result(vec![9, 9, 9]);
        let observer = RecordingObserver::default();

        let outcome = JobOrchestrator::default()
            .run(&backend, &request(), &CancellationToken::new(), &observer)
            .await
            .unwrap();

        assert_eq!(outcome.image, vec![9, 9, 9]);
        assert_eq!(outcome.polls, 3);
        assert_eq!(backend.fetch_count(), 1);
        assert_eq!(backend.poll_count(), 3);
        assert!(matches!(observer.events().last(), Some(JobEvent::Completed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_surfaces_backend_message() {
        let backend = ScriptedBackend::new("job-2")
            .then_status(JobStatus::Processing)
            .then_response(StatusResponse::failed(Some("CUDA out of memory")));

        let err = JobOrchestrator::default()
            .run(&backend, &request(), &CancellationToken::new(), &NoOpObserver)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Backend job failed: CUDA out of memory");
        assert_eq!(backend.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_without_message_is_generic() {
        let backend =
            ScriptedBackend::new("job-3").then_response(StatusResponse::failed(None::<String>));

        let err = JobOrchestrator::default()
            .run(&backend, &request(), &CancellationToken::new(), &NoOpObserver)
            .await
            .unwrap_err();

        assert!(matches!(err, InpaintError::BackendJob(ref m) if m == GENERIC_JOB_FAILURE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_reset_after_success() {
        let policy = RetryPolicy {
            max_consecutive_failures: 2,
            ..RetryPolicy::default()
        };
        let backend = ScriptedBackend::new("job-4")
            .then_transient_failures(2)
            .then_status(JobStatus::Processing)
            .then_transient_failures(2)
            .then_status(JobStatus::Completed);

        let outcome = JobOrchestrator::new(policy)
            .run(&backend, &request(), &CancellationToken::new(), &NoOpObserver)
            .await
            .unwrap();
        assert_eq!(outcome.polls, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_interval_after_failure() {
        let backend = ScriptedBackend::new("job-5")
            .then_transient_failures(1)
            .then_status(JobStatus::Completed);
        let start = tokio::time::Instant::now();

        JobOrchestrator::default()
            .run(&backend, &request(), &CancellationToken::new(), &NoOpObserver)
            .await
            .unwrap();

        // 2s before the first poll, then 5s backoff plus the regular 2s
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_event_reports_full_wait() {
        let backend = ScriptedBackend::new("job-5b")
            .then_transient_failures(2)
            .then_status(JobStatus::Completed);
        let observer = RecordingObserver::default();
        let start = tokio::time::Instant::now();

        JobOrchestrator::default()
            .run(&backend, &request(), &CancellationToken::new(), &observer)
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(2 + 7 + 7));
        let delays: Vec<Duration> = observer
            .events()
            .iter()
            .filter_map(|event| match event {
                JobEvent::RetryScheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![Duration::from_secs(7); 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let backend = ScriptedBackend::new("job-6").repeat_status(JobStatus::Processing);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();

        let orchestrator = JobOrchestrator::default();
        let req = request();
        let run = orchestrator.run(&backend, &req, &cancel, &NoOpObserver);
        let stop = async {
            tokio::time::sleep(Duration::from_secs(7)).await;
            canceller.cancel();
        };
        let (result, ()) = tokio::join!(run, stop);

        assert!(matches!(result, Err(InpaintError::Cancelled)));
        assert_eq!(backend.poll_count(), 3);
        assert_eq!(backend.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_error_is_not_retried() {
        let backend = ScriptedBackend::new("job-7").failing_submit();

        let err = JobOrchestrator::default()
            .run(&backend, &request(), &CancellationToken::new(), &NoOpObserver)
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(backend.poll_count(), 0);
    }
}
