// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interval job scheduler.
//!
//! Each job runs in its own tokio task on a fixed interval. A job's
//! failure is logged and the next tick happens anyway -- one misbehaving
//! job can never stop the others. Cancellation stops every job task and
//! `run` returns only after all of them have exited, so shutdown leaves
//! no tick executing.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ferry_core::FerryError;

type TaskFn = Box<dyn Fn() -> BoxFuture<'static, Result<(), FerryError>> + Send + Sync>;

/// A named periodic task.
pub struct Job {
    name: &'static str,
    interval: Duration,
    task: TaskFn,
}

impl Job {
    pub fn new<F>(name: &'static str, interval: Duration, task: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<(), FerryError>> + Send + Sync + 'static,
    {
        Self {
            name,
            interval,
            task: Box::new(task),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Runs a set of jobs until cancelled.
pub struct Scheduler {
    jobs: Vec<Job>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn add(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Run all jobs until the token is cancelled, then join every task.
    pub async fn run(self, cancel: CancellationToken) {
        info!(jobs = self.jobs.len(), "scheduler starting");

        let mut handles = Vec::with_capacity(self.jobs.len());
        for job in self.jobs {
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(job.interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // Skip the immediate first tick; jobs start one interval in.
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let started = Instant::now();
                            match (job.task)().await {
                                Ok(()) => debug!(
                                    job = job.name,
                                    elapsed_ms = started.elapsed().as_millis() as u64,
                                    "job tick complete"
                                ),
                                Err(e) => warn!(
                                    job = job.name,
                                    error = %e,
                                    "job tick failed"
                                ),
                            }
                        }
                        _ = cancel.cancelled() => {
                            info!(job = job.name, "job shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }
}
