//! Deadline-and-retry supervision of a unit of work.

use crate::error::AgentError;
use crate::supervisor::worker::{WaitOutcome, Worker};
use std::time::{Duration, Instant};

/// Terminal state of a supervised job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus<T> {
    Completed(T),
    /// Every attempt overran the deadline and was terminated.
    TimedOutExhausted,
    /// A worker finished with an error, or could not be launched.
    Failed(AgentError),
}

/// What `execute` did.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport<T> {
    pub status: JobStatus<T>,
    pub attempts: u32,
    pub terminations: u32,
    pub elapsed: Duration,
    pub deadline: Duration,
}

impl<T> ExecutionReport<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, JobStatus::Completed(_))
    }

    pub fn into_result(self) -> Result<T, AgentError> {
        match self.status {
            JobStatus::Completed(value) => Ok(value),
            JobStatus::TimedOutExhausted => Err(AgentError::TimedOutExhausted {
                attempts: self.attempts,
                deadline: self.deadline,
            }),
            JobStatus::Failed(e) => Err(e),
        }
    }
}

/// Runs work in isolated workers with a deadline, terminating and
/// relaunching overrunning attempts.
///
/// Only one worker is alive per `execute` call: an attempt is terminated
/// and dropped before the next one is launched.
#[derive(Debug, Clone)]
pub struct JobRetrySupervisor {
    settle_delay: Duration,
}

impl JobRetrySupervisor {
    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Launch up to `max_attempts` workers, each given `deadline` to finish.
    ///
    /// `launch` receives the 1-based attempt number and must build a fresh
    /// worker; nothing carries over between attempts. A worker that finishes
    /// with an error ends the job as `Failed` without a retry.
    pub fn execute<T, L>(
        &self,
        job: &str,
        mut launch: L,
        deadline: Duration,
        max_attempts: u32,
    ) -> ExecutionReport<T>
    where
        L: FnMut(u32) -> Result<Box<dyn Worker<T>>, AgentError>,
    {
        let started = Instant::now();
        let report = |status, attempts, terminations| ExecutionReport {
            status,
            attempts,
            terminations,
            elapsed: started.elapsed(),
            deadline,
        };

        if deadline.is_zero() || max_attempts == 0 {
            return report(
                JobStatus::Failed(AgentError::InvalidJob(
                    "deadline and attempt budget must be > 0".to_string(),
                )),
                0,
                0,
            );
        }

        let mut terminations = 0;
        for attempt in 1..=max_attempts {
            let mut worker = match launch(attempt) {
                Ok(worker) => worker,
                Err(e) => {
                    tracing::error!(job, attempt, error = %e, "worker launch failed");
                    return report(JobStatus::Failed(e), attempt, terminations);
                }
            };
            tracing::info!(job, attempt, worker = worker.id(), "worker launched");

            match worker.wait(deadline) {
                WaitOutcome::Finished(Ok(value)) => {
                    tracing::info!(job, attempt, worker = worker.id(), "worker completed");
                    return report(JobStatus::Completed(value), attempt, terminations);
                }
                WaitOutcome::Finished(Err(e)) => {
                    tracing::warn!(job, attempt, worker = worker.id(), error = %e, "worker failed");
                    return report(JobStatus::Failed(e), attempt, terminations);
                }
                WaitOutcome::StillRunning => {
                    tracing::warn!(
                        job,
                        attempt,
                        max_attempts,
                        worker = worker.id(),
                        deadline_secs = deadline.as_secs_f64(),
                        "worker overran its deadline, terminating"
                    );
                    worker.terminate();
                    drop(worker);
                    terminations += 1;

                    // Give the device time to drop the killed session.
                    if !self.settle_delay.is_zero() {
                        std::thread::sleep(self.settle_delay);
                    }
                }
            }
        }

        tracing::error!(job, attempts = max_attempts, "all attempts timed out");
        report(JobStatus::TimedOutExhausted, max_attempts, terminations)
    }
}

impl Default for JobRetrySupervisor {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::supervisor::worker::ThreadWorker;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn supervisor() -> JobRetrySupervisor {
        JobRetrySupervisor::new(Duration::ZERO)
    }

    fn hanging(_attempt: u32) -> Result<Box<dyn Worker<()>>, AgentError> {
        let worker = ThreadWorker::spawn("hang", |cancel: &CancelToken| {
            cancel.sleep(Duration::from_secs(3600));
            Ok(())
        })?;
        Ok(Box::new(worker))
    }

    #[test]
    fn test_completes_first_attempt() {
        let report = supervisor().execute(
            "quick",
            |_| Ok(Box::new(ThreadWorker::spawn("quick", |_c| Ok(7u32))?) as Box<dyn Worker<u32>>),
            Duration::from_secs(1),
            3,
        );
        assert_eq!(report.status, JobStatus::Completed(7));
        assert_eq!(report.attempts, 1);
        assert_eq!(report.terminations, 0);
    }

    #[test]
    fn test_hanging_work_exhausts_attempts() {
        let report = supervisor().execute("hang", hanging, Duration::from_millis(100), 3);

        assert_eq!(report.status, JobStatus::TimedOutExhausted);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.terminations, 3);
        assert!(report.elapsed >= Duration::from_millis(300));
        assert!(matches!(
            report.into_result(),
            Err(AgentError::TimedOutExhausted { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_retry_after_timeout_then_success() {
        let launches = Arc::new(AtomicU32::new(0));
        let counter = launches.clone();
        let report = supervisor().execute(
            "flaky",
            move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt == 1 {
                    let worker = ThreadWorker::spawn("flaky", |cancel: &CancelToken| {
                        cancel.sleep(Duration::from_secs(3600));
                        Ok(0u32)
                    })?;
                    Ok(Box::new(worker) as Box<dyn Worker<u32>>)
                } else {
                    let worker = ThreadWorker::spawn("flaky", move |_c| Ok(attempt))?;
                    Ok(Box::new(worker) as Box<dyn Worker<u32>>)
                }
            },
            Duration::from_millis(100),
            3,
        );

        assert_eq!(report.status, JobStatus::Completed(2));
        assert_eq!(report.terminations, 1);
        assert_eq!(launches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_worker_error_is_not_retried() {
        let launches = Arc::new(AtomicU32::new(0));
        let counter = launches.clone();
        let report: ExecutionReport<()> = supervisor().execute(
            "broken",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                let worker = ThreadWorker::<()>::spawn("broken", |_c| {
                    Err(AgentError::DeviceUnavailable("no dongle".into()))
                })?;
                Ok(Box::new(worker) as Box<dyn Worker<()>>)
            },
            Duration::from_secs(1),
            3,
        );

        assert!(matches!(report.status, JobStatus::Failed(AgentError::DeviceUnavailable(_))));
        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_launch_failure_is_reported() {
        let report: ExecutionReport<()> = supervisor().execute(
            "nolaunch",
            |_| Err(AgentError::Worker("no binary".into())),
            Duration::from_secs(1),
            3,
        );
        assert!(matches!(report.status, JobStatus::Failed(AgentError::Worker(_))));
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn test_zero_budget_is_rejected() {
        let report = supervisor().execute("none", hanging, Duration::from_secs(1), 0);
        assert!(matches!(report.status, JobStatus::Failed(AgentError::InvalidJob(_))));
        assert_eq!(report.attempts, 0);
    }

    #[test]
    fn test_settle_delay_applies_after_kill() {
        let supervisor = JobRetrySupervisor::new(Duration::from_millis(150));
        let report = supervisor.execute("hang", hanging, Duration::from_millis(50), 1);
        assert_eq!(report.terminations, 1);
        assert!(report.elapsed >= Duration::from_millis(200));
    }
}
