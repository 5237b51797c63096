//! Fixed-interval scheduler that drives every registered [`Tickable`].
//!
//! Each pass takes a snapshot of the registered set, so registrations made
//! while a pass is running only become visible on the next pass. Tickables
//! are polled concurrently within a pass but each one is ticked at most once
//! per pass, so per-session work stays ordered from one tick to the next.
//!
//! A failing or panicking tickable is logged and never affects the others
//! or the loop itself.

use crate::error::ServerError;
use crate::supervisor::{ServiceTask, Subsystem};
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub type TickError = Box<dyn std::error::Error + Send + Sync>;

/// What the scheduler should do with a tickable after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Unregister the tickable.
    Retire,
}

#[async_trait]
pub trait Tickable: Send + Sync {
    /// Key the tickable is registered under.
    fn tick_id(&self) -> u64;

    fn name(&self) -> &str;

    async fn tick(&self) -> Result<TickOutcome, TickError>;

    /// Called once when the tickable leaves the scheduler.
    fn on_unregistered(&self) {}
}

/// Counters for one scheduler pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub ticked: usize,
    pub faults: usize,
    pub retired: usize,
}

/// Lower bound on how long a single tick may run before it is abandoned.
const MIN_TICK_BUDGET: Duration = Duration::from_secs(1);

pub struct Heartbeat {
    interval: Duration,
    tick_budget: Duration,
    tickables: RwLock<HashMap<u64, Arc<dyn Tickable>>>,
    ticks: AtomicU64,
    task: ServiceTask,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            tick_budget: interval.max(MIN_TICK_BUDGET),
            tickables: RwLock::new(HashMap::new()),
            ticks: AtomicU64::new(0),
            task: ServiceTask::default(),
        }
    }

    /// Overrides how long one tickable's tick may take.
    pub fn with_tick_budget(mut self, budget: Duration) -> Self {
        self.tick_budget = budget;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of completed passes.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Adds a tickable. Returns false if its key is already registered.
    pub async fn register(&self, tickable: Arc<dyn Tickable>) -> bool {
        let mut tickables = self.tickables.write().await;
        let id = tickable.tick_id();
        if tickables.contains_key(&id) {
            return false;
        }
        debug!("Registering {} with the heartbeat", tickable.name());
        tickables.insert(id, tickable);
        true
    }

    /// Removes a tickable. Returns false if it was not registered.
    pub async fn unregister(&self, id: u64) -> bool {
        let removed = self.tickables.write().await.remove(&id);
        match removed {
            Some(tickable) => {
                debug!(
                    "Unregistered {} from the heartbeat ({} remaining)",
                    tickable.name(),
                    self.len().await
                );
                tickable.on_unregistered();
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.tickables.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.tickables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tickables.read().await.is_empty()
    }

    async fn snapshot(&self) -> Vec<Arc<dyn Tickable>> {
        self.tickables.read().await.values().cloned().collect()
    }

    /// Runs one pass over a snapshot of the registered tickables.
    ///
    /// Each tick is bounded by the tick budget so one stalled peer cannot
    /// hold up the pass.
    pub async fn tick_once(&self) -> TickReport {
        let snapshot = self.snapshot().await;
        let budget = self.tick_budget;

        let results = join_all(snapshot.iter().map(|tickable| async move {
            let tick = AssertUnwindSafe(tickable.tick()).catch_unwind();
            let result = tokio::time::timeout(budget, tick).await;
            (tickable, result)
        }))
        .await;

        let mut report = TickReport {
            ticked: snapshot.len(),
            ..TickReport::default()
        };
        let mut retiring = Vec::new();

        for (tickable, result) in results {
            match result {
                Ok(Ok(Ok(TickOutcome::Continue))) => {}
                Ok(Ok(Ok(TickOutcome::Retire))) => retiring.push(tickable.tick_id()),
                Ok(Ok(Err(e))) => {
                    report.faults += 1;
                    warn!("Tick fault in {}: {}", tickable.name(), e);
                }
                Ok(Err(panic)) => {
                    report.faults += 1;
                    error!(
                        "Tick panicked in {}: {}",
                        tickable.name(),
                        panic_message(panic.as_ref())
                    );
                    retiring.push(tickable.tick_id());
                }
                Err(_) => {
                    report.faults += 1;
                    warn!("Tick in {} exceeded {:?}", tickable.name(), budget);
                }
            }
        }

        for id in retiring {
            if self.unregister(id).await {
                report.retired += 1;
            }
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
        report
    }

    /// Ticks at the configured interval until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        timer.tick().await;

        info!("Heartbeat ticking every {:?}", self.interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            match AssertUnwindSafe(self.tick_once()).catch_unwind().await {
                Ok(report) => {
                    if report.ticked > 0 {
                        debug!(
                            "Heartbeat ticked {} objects ({} faults, {} retired)",
                            report.ticked, report.faults, report.retired
                        );
                    }
                }
                Err(panic) => {
                    error!("Heartbeat pass panicked: {}", panic_message(panic.as_ref()));
                }
            }
        }
        info!("Heartbeat stopped after {} ticks", self.ticks());
    }
}

#[async_trait]
impl Subsystem for Heartbeat {
    fn name(&self) -> &str {
        "Heartbeat"
    }

    async fn start(self: Arc<Self>) -> Result<(), ServerError> {
        let me = Arc::clone(&self);
        self.task.spawn(self.name(), move |cancel| me.run(cancel))
    }

    async fn stop(self: Arc<Self>) -> Result<(), ServerError> {
        self.task.stop(self.name()).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
