//! Narrow interface to the long-running job wrapper.
//!
//! The store polls [`JobControl::check_cancelled_or_paused`] between entity-level
//! operations. A termination request surfaces as [`StrataError::BatchTerminated`];
//! a pause blocks inside the hook until the job resumes or terminates.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{StrataError, StrataResult};

#[async_trait]
pub trait JobControl: Send + Sync {
    async fn check_cancelled_or_paused(&self) -> StrataResult<()>;

    fn report_progress(&self, processed: usize, total: usize, current_entity: &str, message: &str);
}

/// Job control for callers without an outer job wrapper.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopJobControl;

#[async_trait]
impl JobControl for NoopJobControl {
    async fn check_cancelled_or_paused(&self) -> StrataResult<()> {
        Ok(())
    }

    fn report_progress(&self, _: usize, _: usize, _: &str, _: &str) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Running,
    Paused,
    Terminated,
}

/// Watch-channel backed job switch; clone the handle to drive it from elsewhere.
#[derive(Clone, Debug)]
pub struct JobSignal {
    tx: Arc<watch::Sender<JobState>>,
}

impl JobSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(JobState::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn pause(&self) {
        self.tx.send_replace(JobState::Paused);
    }

    pub fn resume(&self) {
        self.tx.send_replace(JobState::Running);
    }

    pub fn terminate(&self) {
        self.tx.send_replace(JobState::Terminated);
    }

    pub fn state(&self) -> JobState {
        *self.tx.borrow()
    }
}

impl Default for JobSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobControl for JobSignal {
    async fn check_cancelled_or_paused(&self) -> StrataResult<()> {
        let mut rx = self.tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                JobState::Running => return Ok(()),
                JobState::Terminated => return Err(StrataError::terminated("job terminated")),
                JobState::Paused => {
                    if rx.changed().await.is_err() {
                        return Err(StrataError::terminated("job control dropped"));
                    }
                }
            }
        }
    }

    fn report_progress(&self, processed: usize, total: usize, current_entity: &str, message: &str) {
        log::debug!("progress {processed}/{total} {current_entity}: {message}");
    }
}

/// Forwards progress to an inner [`JobControl`] at most every `every` entities or
/// `interval`, whichever comes first. The final report always goes through.
pub struct ProgressThrottle<'a> {
    inner: &'a dyn JobControl,
    every: usize,
    interval: Duration,
    last: Mutex<(usize, Instant)>,
}

impl<'a> ProgressThrottle<'a> {
    pub fn new(inner: &'a dyn JobControl, every: usize, interval: Duration) -> Self {
        Self {
            inner,
            every: every.max(1),
            interval,
            last: Mutex::new((0, Instant::now())),
        }
    }

    pub async fn checkpoint(&self) -> StrataResult<()> {
        self.inner.check_cancelled_or_paused().await
    }

    pub fn report(&self, processed: usize, total: usize, current_entity: &str, message: &str) {
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let due = processed >= total
            || processed.saturating_sub(last.0) >= self.every
            || last.1.elapsed() >= self.interval;
        if due {
            *last = (processed, Instant::now());
            drop(last);
            self.inner
                .report_progress(processed, total, current_entity, message);
        }
    }
}
