use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Task body; receives the driver's cancellation token on every run
pub type TaskFunc = Arc<dyn Fn(CancellationToken) -> TaskFuture + Send + Sync>;

/// A named unit of work run on a fixed interval
#[derive(Clone)]
pub struct Task {
    pub name: String,
    pub interval: Duration,
    function: TaskFunc,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).field("interval", &self.interval).finish()
    }
}

enum State {
    Idle,
    Running { token: CancellationToken, drivers: Vec<(String, JoinHandle<()>)> },
    Stopped,
}

/// Runs every registered task on its own timer until stopped
///
/// Tasks can only be added before [`Scheduler::start`]. Each task gets an
/// independent driver, so a slow or failing task never delays another one,
/// and a task never overlaps with itself.
pub struct Scheduler {
    tasks: Vec<Task>,
    state: State,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { tasks: Vec::new(), state: State::Idle }
    }

    /// Register a task; rejected once the scheduler has been started
    pub fn add_task<F, Fut>(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        function: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        if !matches!(self.state, State::Idle) {
            warn!(task = %name, "Refusing to add task to a started scheduler");
            return Err(SchedulerError::AlreadyStarted);
        }
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval { name });
        }

        let function: TaskFunc = Arc::new(move |token: CancellationToken| Box::pin(function(token)) as TaskFuture);
        self.tasks.push(Task { name, interval, function });
        Ok(())
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// Spawn one driver per task and return immediately
    ///
    /// Drivers observe a child of `parent`, so cancelling `parent` stops them
    /// as well.
    pub fn start(&mut self, parent: &CancellationToken) -> Result<(), SchedulerError> {
        if !matches!(self.state, State::Idle) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let token = parent.child_token();
        let drivers = self
            .tasks
            .iter()
            .cloned()
            .map(|task| {
                let name = task.name.clone();
                (name, tokio::spawn(run_task(task, token.clone())))
            })
            .collect();

        info!(tasks = self.tasks.len(), "Scheduler started");
        self.state = State::Running { token, drivers };
        Ok(())
    }

    /// Cancel every driver, then wait for in-flight runs to finish
    ///
    /// Calling it again is a no-op.
    pub async fn stop(&mut self) {
        match std::mem::replace(&mut self.state, State::Stopped) {
            State::Running { token, drivers } => {
                token.cancel();
                for (name, driver) in drivers {
                    if let Err(e) = driver.await {
                        error!(task = %name, "Task driver exited abnormally: {}", e);
                    }
                }
                info!("Scheduler stopped");
            }
            State::Idle => info!("Scheduler stopped before it was started"),
            State::Stopped => debug!("Scheduler already stopped"),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let State::Running { token, .. } = &self.state {
            token.cancel();
        }
    }
}

async fn run_task(task: Task, token: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + task.interval, task.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(task = %task.name, "Stopping task...");
                return;
            }
            _ = ticker.tick() => execute_task(&task, &token).await,
        }
    }
}

/// Run the task body once; errors and panics are logged, never propagated
async fn execute_task(task: &Task, token: &CancellationToken) {
    let started = Instant::now();
    let run = AssertUnwindSafe(async { (task.function)(token.clone()).await }).catch_unwind();

    match run.await {
        Ok(Ok(())) => debug!(task = %task.name, elapsed_ms = started.elapsed().as_millis() as u64, "Task finished"),
        Ok(Err(e)) => error!(task = %task.name, "Task failed: {:#}", e),
        Err(panic) => error!(task = %task.name, "Task panicked: {}", panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts runs and the highest observed self-concurrency
    #[derive(Default)]
    struct RunTracker {
        runs: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RunTracker {
        async fn run(&self, hold: Duration) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(hold).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    fn explode() -> anyhow::Result<()> {
        panic!("task blew up")
    }

    fn add_probe(scheduler: &mut Scheduler, name: &str, every_ms: u64, hold_ms: u64) -> Arc<RunTracker> {
        let probe = Arc::new(RunTracker::default());
        let handle = probe.clone();
        scheduler
            .add_task(name, Duration::from_millis(every_ms), move |_token| {
                let probe = handle.clone();
                async move {
                    probe.run(Duration::from_millis(hold_ms)).await;
                    Ok(())
                }
            })
            .unwrap();
        probe
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_intervals() {
        let mut scheduler = Scheduler::new();
        let a = add_probe(&mut scheduler, "a", 50, 0);
        let b = add_probe(&mut scheduler, "b", 70, 0);

        scheduler.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(210)).await;
        scheduler.stop().await;

        assert!(a.runs() >= 2, "a ran {} times", a.runs());
        assert!(b.runs() >= 2, "b ran {} times", b.runs());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_never_overlaps_itself() {
        let mut scheduler = Scheduler::new();
        let slow = add_probe(&mut scheduler, "slow", 30, 80);

        scheduler.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        scheduler.stop().await;

        assert!(slow.runs() >= 2);
        assert_eq!(slow.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_does_not_delay_others() {
        let mut scheduler = Scheduler::new();
        let _slow = add_probe(&mut scheduler, "slow", 10, 1_000);
        let fast = add_probe(&mut scheduler, "fast", 20, 0);

        scheduler.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(205)).await;
        let fast_runs = fast.runs();
        scheduler.stop().await;

        assert!(fast_runs >= 9, "fast ran {} times", fast_runs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_and_panicking_tasks_keep_running() {
        let mut scheduler = Scheduler::new();
        let failures = Arc::new(AtomicUsize::new(0));
        let panics = Arc::new(AtomicUsize::new(0));

        let counter = failures.clone();
        scheduler
            .add_task("failing", Duration::from_millis(20), move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("storage unavailable"))
                }
            })
            .unwrap();

        let counter = panics.clone();
        scheduler
            .add_task("panicking", Duration::from_millis(20), move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    explode()
                }
            })
            .unwrap();

        let healthy = add_probe(&mut scheduler, "healthy", 20, 0);

        scheduler.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(105)).await;
        scheduler.stop().await;

        assert!(failures.load(Ordering::SeqCst) >= 3);
        assert!(panics.load(Ordering::SeqCst) >= 3);
        assert!(healthy.runs() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_run() {
        let mut scheduler = Scheduler::new();
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        scheduler
            .add_task("long", Duration::from_millis(50), move |_| {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        scheduler.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!finished.load(Ordering::SeqCst));

        let stopping = Instant::now();
        scheduler.stop().await;

        assert!(finished.load(Ordering::SeqCst));
        assert!(stopping.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_sees_cancellation() {
        let mut scheduler = Scheduler::new();
        let observed = Arc::new(AtomicBool::new(false));

        let flag = observed.clone();
        scheduler
            .add_task("cooperative", Duration::from_millis(10), move |token| {
                let flag = flag.clone();
                async move {
                    token.cancelled().await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        scheduler.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        scheduler.stop().await;

        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_no_tasks_start_stop() {
        let mut scheduler = Scheduler::new();
        scheduler.start(&CancellationToken::new()).unwrap();
        assert!(scheduler.is_running());

        tokio::time::timeout(Duration::from_secs(1), scheduler.stop()).await.unwrap();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let mut scheduler = Scheduler::new();
        assert_eq!(
            scheduler.add_task("zero", Duration::ZERO, |_| async { Ok(()) }),
            Err(SchedulerError::InvalidInterval { name: "zero".into() })
        );

        scheduler.start(&CancellationToken::new()).unwrap();
        assert_eq!(
            scheduler.add_task("late", Duration::from_secs(1), |_| async { Ok(()) }),
            Err(SchedulerError::AlreadyStarted)
        );
        assert_eq!(scheduler.start(&CancellationToken::new()), Err(SchedulerError::AlreadyStarted));
        assert!(scheduler.tasks().is_empty());

        scheduler.stop().await;
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_drivers() {
        let mut scheduler = Scheduler::new();
        let probe = add_probe(&mut scheduler, "child", 20, 0);
        let parent = CancellationToken::new();

        scheduler.start(&parent).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let runs_at_cancel = probe.runs();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(probe.runs(), runs_at_cancel);

        scheduler.stop().await;
    }
}
