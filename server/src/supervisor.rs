//! Start/stop orchestration for the server's long-running subsystems.
//!
//! Subsystems start in registration order. If any fails to start, the ones
//! that did start are stopped again and the supervisor is left `Errored`.
//! Stopping runs in reverse start order, so with the default wiring the
//! acceptor stops taking connections before the heartbeat stops ticking.

use crate::error::ServerError;
use async_trait::async_trait;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Coarse lifecycle of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Default,
    Starting,
    Running,
    Stopping,
    Stopped,
    Errored,
}

impl ServiceStatus {
    pub fn can_start(self) -> bool {
        matches!(
            self,
            ServiceStatus::Default | ServiceStatus::Stopped | ServiceStatus::Errored
        )
    }
}

/// A long-running part of the server that can be started and stopped.
#[async_trait]
pub trait Subsystem: Send + Sync {
    fn name(&self) -> &str;

    async fn start(self: Arc<Self>) -> Result<(), ServerError>;

    async fn stop(self: Arc<Self>) -> Result<(), ServerError>;
}

/// The background task behind a subsystem.
///
/// Every `spawn` gets a fresh cancellation scope; `stop` cancels it, waits
/// for the task and forgets the scope so it is never reused.
#[derive(Default)]
pub struct ServiceTask {
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ServiceTask {
    pub fn spawn<F, Fut>(&self, name: &str, run: F) -> Result<(), ServerError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(ServerError::AlreadyRunning(name.to_string()));
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(cancel.clone()));
        *running = Some((cancel, handle));
        Ok(())
    }

    pub async fn stop(&self, name: &str) -> Result<(), ServerError> {
        let Some((cancel, handle)) = self.running.lock().take() else {
            return Err(ServerError::NotRunning(name.to_string()));
        };

        cancel.cancel();
        handle.await.map_err(|e| ServerError::TaskFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }
}

pub struct Supervisor {
    subsystems: Vec<Arc<dyn Subsystem>>,
    running: tokio::sync::Mutex<Vec<Arc<dyn Subsystem>>>,
    status: Mutex<ServiceStatus>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            subsystems: Vec::new(),
            running: tokio::sync::Mutex::new(Vec::new()),
            status: Mutex::new(ServiceStatus::Default),
        }
    }

    pub fn with(mut self, subsystem: Arc<dyn Subsystem>) -> Self {
        self.add(subsystem);
        self
    }

    pub fn add(&mut self, subsystem: Arc<dyn Subsystem>) {
        self.subsystems.push(subsystem);
    }

    pub fn status(&self) -> ServiceStatus {
        *self.status.lock()
    }

    /// Names of the subsystems currently running, in start order.
    pub async fn running(&self) -> Vec<String> {
        self.running
            .lock()
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    fn transition(
        &self,
        allowed: impl Fn(ServiceStatus) -> bool,
        next: ServiceStatus,
    ) -> Result<(), ServerError> {
        let mut status = self.status.lock();
        if !allowed(*status) {
            return Err(ServerError::InvalidStatus(*status));
        }
        *status = next;
        Ok(())
    }

    fn set_status(&self, next: ServiceStatus) {
        *self.status.lock() = next;
    }

    /// Starts every subsystem in registration order.
    ///
    /// On any failure the subsystems that did start are stopped again and
    /// the supervisor ends up `Errored`.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.transition(ServiceStatus::can_start, ServiceStatus::Starting)?;
        info!("Starting {} subsystems", self.subsystems.len());

        let mut failed = Vec::new();
        {
            let mut running = self.running.lock().await;
            for subsystem in &self.subsystems {
                match Arc::clone(subsystem).start().await {
                    Ok(()) => {
                        info!("Started {}", subsystem.name());
                        running.push(Arc::clone(subsystem));
                    }
                    Err(e) => {
                        error!("Failed to start {} [{}]: {}", subsystem.name(), e.as_label(), e);
                        failed.push(subsystem.name().to_string());
                    }
                }
            }
        }

        if failed.is_empty() {
            self.set_status(ServiceStatus::Running);
            return Ok(());
        }

        warn!("Rolling back after start failure of {:?}", failed);
        self.stop_running().await;
        self.set_status(ServiceStatus::Errored);
        Err(ServerError::StartFailed { failed })
    }

    /// Stops every running subsystem in reverse start order.
    ///
    /// A no-op when nothing was started. A failure to stop one subsystem
    /// does not keep the rest running; it leaves the supervisor `Errored`.
    pub async fn stop(&self) -> Result<(), ServerError> {
        {
            let mut status = self.status.lock();
            match *status {
                ServiceStatus::Default | ServiceStatus::Stopped => return Ok(()),
                ServiceStatus::Starting | ServiceStatus::Stopping => {
                    return Err(ServerError::InvalidStatus(*status))
                }
                ServiceStatus::Running | ServiceStatus::Errored => {
                    *status = ServiceStatus::Stopping;
                }
            }
        }

        let failed = self.stop_running().await;
        if failed.is_empty() {
            self.set_status(ServiceStatus::Stopped);
            info!("All subsystems stopped");
            Ok(())
        } else {
            self.set_status(ServiceStatus::Errored);
            Err(ServerError::StopFailed { failed })
        }
    }

    async fn stop_running(&self) -> Vec<String> {
        let mut running = self.running.lock().await;
        let mut failed = Vec::new();
        while let Some(subsystem) = running.pop() {
            let name = subsystem.name().to_string();
            match subsystem.stop().await {
                Ok(()) => info!("Stopped {}", name),
                Err(e) => {
                    error!("Failed to stop {} [{}]: {}", name, e.as_label(), e);
                    failed.push(name);
                }
            }
        }
        failed
    }
}
