//! Progress reporting for backend jobs
//!
//! Keeps presentation out of the poll loop: the orchestrator emits
//! [`JobEvent`]s and frontends decide how to show them.

use crate::orchestrator::{JobEvent, JobObserver, JobStatus};
use instant::Instant;
use std::sync::Mutex;

/// Short label for a job status
#[must_use]
pub fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "Queued",
        JobStatus::Processing => "Processing",
        JobStatus::Completed => "Completed",
        JobStatus::Failed => "Failed",
        JobStatus::Unknown => "Waiting",
    }
}

/// Observer that logs each event
pub struct ConsoleObserver {
    verbose: bool,
    started: Mutex<Option<Instant>>,
}

impl ConsoleObserver {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            started: Mutex::new(None),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started
            .lock()
            .ok()
            .and_then(|s| *s)
            .map_or(0, |s| s.elapsed().as_millis() as u64)
    }
}

impl JobObserver for ConsoleObserver {
    fn on_event(&self, event: &JobEvent) {
        match event {
            JobEvent::Submitted { job_id } => {
                if let Ok(mut started) = self.started.lock() {
                    *started = Some(Instant::now());
                }
                log::info!("Job {} submitted", job_id);
            },
            JobEvent::StatusPolled { job_id, status } => {
                if self.verbose {
                    log::info!(
                        "Job {}: {} ({}ms elapsed)",
                        job_id,
                        status_label(*status),
                        self.elapsed_ms()
                    );
                } else {
                    log::debug!("Job {}: {}", job_id, status_label(*status));
                }
            },
            JobEvent::RetryScheduled {
                failures, delay, error, ..
            } => {
                log::warn!("Poll failed ({}), retry #{} in {}s", error, failures, delay.as_secs());
            },
            JobEvent::Completed { job_id, bytes } => {
                log::info!("Job {} completed in {}ms ({} bytes)", job_id, self.elapsed_ms(), bytes);
            },
            JobEvent::Failed { error, .. } => {
                log::error!("Job failed: {}", error);
            },
        }
    }
}

/// Terminal spinner driven by job events
#[cfg(feature = "cli")]
pub struct SpinnerObserver {
    bar: indicatif::ProgressBar,
    failure_budget: u32,
}

#[cfg(feature = "cli")]
impl SpinnerObserver {
    #[must_use]
    pub fn new(label: &str, failure_budget: u32) -> Self {
        let bar = indicatif::ProgressBar::new_spinner();
        if let Ok(style) = indicatif::ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {prefix} {msg}")
        {
            bar.set_style(style);
        }
        bar.set_prefix(label.to_string());
        bar.set_message("Uploading...");
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { bar, failure_budget }
    }
}

#[cfg(feature = "cli")]
impl JobObserver for SpinnerObserver {
    fn on_event(&self, event: &JobEvent) {
        match event {
            JobEvent::Submitted { job_id } => self.bar.set_message(format!("Submitted {}", job_id)),
            JobEvent::StatusPolled { status, .. } => self.bar.set_message(status_label(*status)),
            JobEvent::RetryScheduled {
                job_id,
                failures,
                delay,
                ..
            } => {
                self.bar.set_message(format!(
                    "Connection problem, retry #{} in {}s",
                    failures,
                    delay.as_secs()
                ));
                crate::tracing_config::events::poll_retry(
                    job_id.as_str(),
                    *failures,
                    self.failure_budget,
                    delay.as_secs(),
                );
            },
            JobEvent::Completed { .. } => self.bar.finish_with_message("Done"),
            JobEvent::Failed { error, .. } => {
                self.bar.abandon_with_message(format!("Failed: {}", error));
            },
        }
    }
}

/// Pick an observer for the CLI
#[cfg(feature = "cli")]
#[must_use]
pub fn create_cli_observer(
    show_progress: bool,
    verbose: bool,
    label: &str,
    failure_budget: u32,
) -> Box<dyn JobObserver> {
    if show_progress {
        Box::new(SpinnerObserver::new(label, failure_budget))
    } else {
        Box::new(ConsoleObserver::new(verbose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::JobId;
    use std::time::Duration;

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(JobStatus::Processing), "Processing");
        assert_eq!(status_label(JobStatus::Unknown), "Waiting");
    }

    #[test]
    fn test_console_observer_tracks_start() {
        let observer = ConsoleObserver::new(true);
        assert_eq!(observer.elapsed_ms(), 0);

        let job_id = JobId::from("abc");
        observer.on_event(&JobEvent::Submitted {
            job_id: job_id.clone(),
        });
        observer.on_event(&JobEvent::RetryScheduled {
            job_id: job_id.clone(),
            failures: 1,
            delay: Duration::from_secs(5),
            error: "timeout".into(),
        });
        observer.on_event(&JobEvent::Completed { job_id, bytes: 10 });
        assert!(observer.started.lock().unwrap().is_some());
    }
}
