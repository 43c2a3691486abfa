//! Polling coordinator: owns the heater cache, refreshes it on a fixed cadence, and
//! forwards commands to the vendor client.
//!
//! All vendor calls are blocking and run on tokio's blocking pool. The cache is an
//! `Arc<HeaterMap>` held in a `watch` channel; every successful refresh swaps in a new
//! `Arc`, so readers see either the old or the new snapshot, never a mix. Two refreshes
//! that overlap (periodic tick and a command's follow-up) race; whichever finishes last
//! wins.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::client::{ApiError, ClientError, HeaterClient};
use crate::models::termoweb::{HeaterId, HeaterMap};

pub const UPDATE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum UpdateError {
    /// Credentials were rejected; nothing retries until they are re-entered.
    #[error("Authentication failed: {0}")]
    AuthFailed(#[source] ClientError),
    /// Any other failure; the next scheduled refresh retries.
    #[error("Error communicating with API: {0}")]
    UpdateFailed(#[source] ClientError),
}

impl UpdateError {
    fn classify(err: ClientError) -> Self {
        if err.is_auth() {
            UpdateError::AuthFailed(err)
        } else {
            UpdateError::UpdateFailed(err)
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoordinatorStatus {
    Ok,
    UpdateFailed,
    ReauthRequired,
}

pub struct Coordinator {
    name: String,
    client: Arc<dyn HeaterClient>,
    update_interval: Duration,
    data: watch::Sender<Arc<HeaterMap>>,
    status: watch::Sender<CoordinatorStatus>,
    last_update_success: AtomicBool,
    last_update_success_time: Mutex<Option<DateTime<Utc>>>,
    reauth_prompts: AtomicU64,
}

impl Coordinator {
    pub fn new(name: impl Into<String>, client: Arc<dyn HeaterClient>, update_interval: Duration) -> Self {
        let (data, _) = watch::channel(Arc::new(HeaterMap::new()));
        let (status, _) = watch::channel(CoordinatorStatus::Ok);
        Coordinator {
            name: name.into(),
            client,
            update_interval,
            data,
            status,
            last_update_success: AtomicBool::new(true),
            last_update_success_time: Mutex::new(None),
            reauth_prompts: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Current snapshot; empty until the first successful refresh.
    pub fn data(&self) -> Arc<HeaterMap> {
        self.data.borrow().clone()
    }

    /// Notified with each new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<HeaterMap>> {
        self.data.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.subscribe()
    }

    /// False after a failed refresh, and for as long as re-authentication is required.
    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst) && !self.requires_reauth()
    }

    pub fn last_update_success_time(&self) -> Option<DateTime<Utc>> {
        *self.last_update_success_time.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn requires_reauth(&self) -> bool {
        *self.status.borrow() == CoordinatorStatus::ReauthRequired
    }

    /// How many times the coordinator has entered the re-authentication state.
    pub fn reauth_prompts(&self) -> u64 {
        self.reauth_prompts.load(Ordering::SeqCst)
    }

    /// Run a blocking client call on the blocking pool. Once dispatched it runs to
    /// completion; dropping the returned future does not stop it.
    async fn dispatch<T, F>(&self, call: F) -> Result<T, ClientError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HeaterClient) -> Result<T, ClientError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || call(client.as_ref()))
            .await
            .map_err(|e| ClientError::Api(ApiError::Worker(e.to_string())))?
    }

    /// Refresh used during setup; the caller aborts setup on error.
    pub async fn first_refresh(&self) -> Result<Arc<HeaterMap>, UpdateError> {
        self.refresh().await
    }

    /// Fetch every heater and replace the cache. On error the previous snapshot stays.
    pub async fn refresh(&self) -> Result<Arc<HeaterMap>, UpdateError> {
        match self.dispatch(|c| c.get_devices()).await {
            Ok(heaters) => {
                let snapshot = Arc::new(heaters);
                self.data.send_replace(Arc::clone(&snapshot));
                *self.last_update_success_time.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
                // Fresh data does not clear a pending re-auth; entities stay unavailable.
                if self.requires_reauth() {
                    debug!("Fetched {} data while re-authentication is pending", self.name);
                } else {
                    if !self.last_update_success.swap(true, Ordering::SeqCst) {
                        info!("Fetching {} data recovered", self.name);
                    }
                    self.set_status(CoordinatorStatus::Ok);
                }
                debug!("Finished fetching {} data: {} heater(s)", self.name, snapshot.len());
                Ok(snapshot)
            }
            Err(err) => {
                let err = UpdateError::classify(err);
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Forward a command, then refresh once so the cache picks up the change as soon
    /// as the vendor reports it.
    pub async fn set_heater(&self, id: HeaterId, mode: &str, target_temp: f64) -> Result<(), UpdateError> {
        let mode = mode.to_string();
        if let Err(err) = self.dispatch(move |c| c.set_heater(id, &mode, target_temp)).await {
            let err = UpdateError::classify(err);
            if let UpdateError::AuthFailed(_) = err {
                self.enter_reauth();
            }
            warn!("Command for heater {} failed: {}", id, err);
            return Err(err);
        }

        if let Err(err) = self.refresh().await {
            debug!("Refresh after command for heater {} failed: {}", id, err);
        }
        Ok(())
    }

    fn record_failure(&self, err: &UpdateError) {
        let was_ok = self.last_update_success.swap(false, Ordering::SeqCst);
        match err {
            UpdateError::AuthFailed(_) => self.enter_reauth(),
            UpdateError::UpdateFailed(_) => {
                if was_ok {
                    error!("Error fetching {} data: {}", self.name, err);
                } else {
                    debug!("Error fetching {} data: {}", self.name, err);
                }
                self.set_status(CoordinatorStatus::UpdateFailed);
            }
        }
    }

    fn enter_reauth(&self) {
        self.last_update_success.store(false, Ordering::SeqCst);
        let entered = self.status.send_if_modified(|s| {
            if *s == CoordinatorStatus::ReauthRequired {
                false
            } else {
                *s = CoordinatorStatus::ReauthRequired;
                true
            }
        });
        if entered {
            self.reauth_prompts.fetch_add(1, Ordering::SeqCst);
            error!(
                "{}: credentials were rejected; polling is paused until they are re-entered",
                self.name
            );
        }
    }

    fn set_status(&self, status: CoordinatorStatus) {
        // Only fresh credentials (a new coordinator) leave the re-auth state.
        self.status.send_if_modified(|s| {
            if *s == status || *s == CoordinatorStatus::ReauthRequired {
                false
            } else {
                *s = status;
                true
            }
        });
    }

    /// Refresh driven by the scheduler. Errors are recorded on the coordinator, never
    /// returned.
    pub async fn scheduled_refresh(&self) {
        if self.requires_reauth() {
            debug!("Skipping {} refresh: re-authentication required", self.name);
            return;
        }
        if let Err(err) = self.refresh().await {
            debug!("Scheduled {} refresh failed: {}", self.name, err);
        }
    }

    /// Start the periodic refresh task. The first refresh is expected to have already run.
    pub fn spawn_polling(self: &Arc<Self>) -> PollingHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(polling_task(Arc::clone(self), cancel.clone()));
        PollingHandle { cancel, task }
    }
}

async fn polling_task(coordinator: Arc<Coordinator>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(coordinator.update_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => coordinator.scheduled_refresh().await,
        }
    }
    debug!("{} polling stopped", coordinator.name);
}

/// Owns the periodic refresh task.
pub struct PollingHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollingHandle {
    /// Stop polling. A refresh already waiting on the vendor finishes first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Polling task ended abnormally: {}", e);
        }
    }
}
