//! Periodic task scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::types::{PeriodicTask, TaskSchedule, TickOutcome};
use crate::metrics::{TASK_TICKS, TASK_TICK_DURATION};

/// A task with its reentrancy guard and tick deadline.
pub struct GuardedTask {
    task: Arc<dyn PeriodicTask>,
    schedule: TaskSchedule,
    guard: Arc<Mutex<()>>,
}

impl GuardedTask {
    pub fn new(task: Arc<dyn PeriodicTask>, schedule: TaskSchedule) -> Self {
        Self {
            task,
            schedule,
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.task.name()
    }

    pub fn schedule(&self) -> TaskSchedule {
        self.schedule
    }

    /// Run one tick now, unless one is already in flight.
    pub async fn run_now(&self) -> TickOutcome {
        let name = self.task.name();
        let Ok(_permit) = self.guard.clone().try_lock_owned() else {
            warn!(task = name, "Previous tick still running, skipping");
            TASK_TICKS.with_label_values(&[name, "skipped"]).inc();
            return TickOutcome::Skipped;
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.schedule.deadline, self.task.run_tick()).await
        {
            Ok(Ok(())) => TickOutcome::Completed,
            Ok(Err(e)) => {
                warn!(task = name, "Tick failed: {}", e);
                TickOutcome::Failed
            }
            Err(_) => {
                warn!(
                    task = name,
                    deadline_secs = self.schedule.deadline.as_secs_f64(),
                    "Tick exceeded its deadline, abandoned"
                );
                TickOutcome::TimedOut
            }
        };

        TASK_TICK_DURATION
            .with_label_values(&[name])
            .observe(started.elapsed().as_secs_f64());
        TASK_TICKS.with_label_values(&[name, outcome.as_str()]).inc();
        outcome
    }
}

/// Runs each registered task on its own interval until stopped.
pub struct Scheduler {
    tasks: Vec<Arc<GuardedTask>>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: StdMutex::new(Vec::new()),
        }
    }

    /// Register a task. Returns the guarded handle for manual runs.
    pub fn add(&mut self, task: Arc<dyn PeriodicTask>, schedule: TaskSchedule) -> Arc<GuardedTask> {
        let guarded = Arc::new(GuardedTask::new(task, schedule));
        self.tasks.push(Arc::clone(&guarded));
        guarded
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Spawn one loop per task. The first tick of each runs immediately.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for task in &self.tasks {
            handles.push(self.spawn_loop(Arc::clone(task)));
        }
        info!("Scheduler started with {} tasks", self.tasks.len());
    }

    fn spawn_loop(&self, task: Arc<GuardedTask>) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let name = task.name();
            let mut interval = tokio::time::interval(task.schedule().interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(task = name, "Task loop started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(task = name, "Task loop received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        // Ticks run detached so a slow one meets the guard
                        // instead of delaying the schedule.
                        let tick = Arc::clone(&task);
                        tokio::spawn(async move {
                            tick.run_now().await;
                        });
                    }
                }
            }
            info!(task = name, "Task loop stopped");
        })
    }

    /// Signal every loop to stop and wait for them to exit. Ticks already
    /// in flight finish within their deadline.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping scheduler");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Task loop ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}
