//! In-process job scheduler.
//!
//! Each registered task gets its own timer loop. A task never runs twice at
//! once: a firing that comes due while the previous one is still running is
//! skipped and counted, and `run_now` on a busy task returns `TaskBusy`.
//! Failures and panics in a task body are caught, logged and recorded on the
//! task's status; they never take down the loop or other tasks.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// When a task fires. Calendar schedules are evaluated in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Every(Duration),
    Hourly { minute: u32 },
    Daily { hours: Vec<u32>, minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    date.and_hms_opt(hour, minute, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

impl Schedule {
    fn validate(&self) -> Result<()> {
        let ok = match self {
            Schedule::Every(period) => !period.is_zero(),
            Schedule::Hourly { minute } => *minute < 60,
            Schedule::Daily { hours, minute } => {
                !hours.is_empty() && *minute < 60 && hours.iter().all(|h| *h < 24)
            }
            Schedule::Weekly { hour, minute, .. } => *hour < 24 && *minute < 60,
        };
        if ok {
            Ok(())
        } else {
            Err(EngineError::Config(format!("invalid schedule: {self}")))
        }
    }

    /// The first firing strictly after `now`. `None` only for schedules that
    /// fail validation.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.date_naive();
        match self {
            Schedule::Every(period) => {
                let step = ChronoDuration::from_std(*period).ok()?;
                (step > ChronoDuration::zero()).then(|| now + step)
            }
            Schedule::Hourly { minute } => {
                let candidate = at(today, now.hour(), *minute)?;
                Some(if candidate > now {
                    candidate
                } else {
                    candidate + ChronoDuration::hours(1)
                })
            }
            Schedule::Daily { hours, minute } => {
                let mut hours = hours.clone();
                hours.sort_unstable();
                let next = (0..=1)
                    .filter_map(|offset| today.checked_add_signed(ChronoDuration::days(offset)))
                    .flat_map(|date| hours.iter().filter_map(move |h| at(date, *h, *minute)))
                    .find(|candidate| *candidate > now);
                next
            }
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => (0..=7)
                .filter_map(|offset| today.checked_add_signed(ChronoDuration::days(offset)))
                .filter(|date| date.weekday() == *weekday)
                .filter_map(|date| at(date, *hour, *minute))
                .find(|candidate| *candidate > now),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Every(period) => write!(f, "every {period:?}"),
            Schedule::Hourly { minute } => write!(f, "hourly at :{minute:02}"),
            Schedule::Daily { hours, minute } => {
                let times: Vec<String> = hours.iter().map(|h| format!("{h:02}:{minute:02}")).collect();
                write!(f, "daily at {} UTC", times.join(", "))
            }
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => write!(f, "weekly {weekday} {hour:02}:{minute:02} UTC"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Free-form result of one firing, surfaced by `run_now` and the ops API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TaskReport(pub serde_json::Value);

impl TaskReport {
    pub fn of(value: &impl Serialize) -> Result<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }
}

#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self) -> Result<TaskReport>;
}

struct FnTask<F>(F);

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskReport>> + Send,
{
    async fn run(&self) -> Result<TaskReport> {
        (self.0)().await
    }
}

/// Wrap an async closure as a task.
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn Task>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskReport>> + Send + 'static,
{
    Arc::new(FnTask(f))
}

// ---------------------------------------------------------------------------
// Task state
// ---------------------------------------------------------------------------

/// Operator view of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub schedule: String,
    pub running: bool,
    pub fired: u64,
    pub skipped: u64,
    pub failed: u64,
    pub last_started: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct TaskState {
    fired: u64,
    skipped: u64,
    failed: u64,
    last_started: Option<DateTime<Utc>>,
    last_finished: Option<DateTime<Utc>>,
    last_error: Option<String>,
    next_run: Option<DateTime<Utc>>,
}

struct TaskEntry {
    name: String,
    schedule: Schedule,
    task: Arc<dyn Task>,
    running: AtomicBool,
    state: Mutex<TaskState>,
}

/// Holds the task's running flag; dropping it releases the flag even if the
/// body panicked.
struct RunningGuard {
    entry: Arc<TaskEntry>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.entry.running.store(false, Ordering::Release);
    }
}

impl TaskEntry {
    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_begin(self: &Arc<Self>) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard {
                entry: Arc::clone(self),
            })
    }

    fn status(&self) -> TaskStatus {
        let state = self.state();
        TaskStatus {
            name: self.name.clone(),
            schedule: self.schedule.to_string(),
            running: self.running.load(Ordering::Acquire),
            fired: state.fired,
            skipped: state.skipped,
            failed: state.failed,
            last_started: state.last_started,
            last_finished: state.last_finished,
            last_error: state.last_error.clone(),
            next_run: state.next_run,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run one firing. The caller must hold the entry's `RunningGuard`.
async fn execute(entry: &TaskEntry, trigger: &'static str) -> Result<TaskReport> {
    let firing = Uuid::new_v4();
    {
        let mut state = entry.state();
        state.fired += 1;
        state.last_started = Some(Utc::now());
    }
    info!(task = %entry.name, %firing, trigger, "Task started");
    let started = Instant::now();

    let outcome = match AssertUnwindSafe(entry.task.run()).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(EngineError::TaskPanicked(format!(
            "{}: {}",
            entry.name,
            panic_message(panic.as_ref())
        ))),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let mut state = entry.state();
    state.last_finished = Some(Utc::now());
    match &outcome {
        Ok(_) => {
            state.last_error = None;
            info!(task = %entry.name, %firing, elapsed_ms, "Task finished");
        }
        Err(e) => {
            state.failed += 1;
            state.last_error = Some(e.to_string());
            error!(task = %entry.name, %firing, elapsed_ms, error = %e, "Task failed");
        }
    }
    outcome
}

async fn timer_loop(entry: Arc<TaskEntry>, mut shutdown: watch::Receiver<bool>) {
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let now = Utc::now();
        let Some(next) = entry.schedule.next_after(now) else {
            error!(task = %entry.name, schedule = %entry.schedule, "Schedule has no next firing");
            break;
        };
        entry.state().next_run = Some(next);
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match entry.try_begin() {
            Some(guard) => {
                let firing_entry = Arc::clone(&entry);
                in_flight = Some(tokio::spawn(async move {
                    let _guard = guard;
                    let _ = execute(&firing_entry, "schedule").await;
                }));
            }
            None => {
                entry.state().skipped += 1;
                warn!(task = %entry.name, "Previous firing still running, skipping");
            }
        }
    }

    entry.state().next_run = None;
    if let Some(handle) = in_flight.take() {
        let _ = handle.await;
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Returned by [`JobScheduler::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    name: String,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct JobScheduler {
    tasks: RwLock<BTreeMap<String, Arc<TaskEntry>>>,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            shutdown,
            loops: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    fn entry(&self, name: &str) -> Result<Arc<TaskEntry>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTask(name.to_string()))
    }

    /// Register a task. Tasks must be registered before [`start`](Self::start).
    pub fn register(&self, name: &str, schedule: Schedule, task: Arc<dyn Task>) -> Result<TaskHandle> {
        schedule.validate()?;
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if tasks.contains_key(name) {
            return Err(EngineError::DuplicateTask(name.to_string()));
        }
        info!(task = name, schedule = %schedule, "Task registered");
        tasks.insert(
            name.to_string(),
            Arc::new(TaskEntry {
                name: name.to_string(),
                schedule,
                task,
                running: AtomicBool::new(false),
                state: Mutex::new(TaskState::default()),
            }),
        );
        Ok(TaskHandle {
            name: name.to_string(),
        })
    }

    /// Spawn one timer loop per registered task. A second call is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("Scheduler already started");
            return;
        }
        let entries: Vec<Arc<TaskEntry>> = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut loops = self.loops.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in entries {
            loops.push(tokio::spawn(timer_loop(entry, self.shutdown.subscribe())));
        }
        info!(tasks = loops.len(), "Scheduler started");
    }

    /// Signal every timer loop and wait for them to exit. Firings already in
    /// progress run to completion first. The scheduler can be started again.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let loops: Vec<JoinHandle<()>> = {
            let mut guard = self.loops.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for handle in loops {
            if let Err(e) = handle.await {
                error!(error = %e, "Timer loop ended abnormally");
            }
        }
        self.shutdown.send_replace(false);
        self.started.store(false, Ordering::Release);
        info!("Scheduler stopped");
    }

    /// Run a task now on the caller's task. Returns `TaskBusy` if a firing
    /// of the same task is in progress.
    pub async fn run_now(&self, name: &str) -> Result<TaskReport> {
        let entry = self.entry(name)?;
        let Some(_guard) = entry.try_begin() else {
            return Err(EngineError::TaskBusy(name.to_string()));
        };
        execute(&entry, "manual").await
    }

    pub fn statuses(&self) -> Vec<TaskStatus> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.status())
            .collect()
    }

    pub fn status(&self, name: &str) -> Result<TaskStatus> {
        Ok(self.entry(name)?.status())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
