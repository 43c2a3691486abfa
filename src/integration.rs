//! Setup and teardown of one Termoweb account: connect, prime the cache, create one
//! climate entity per heater, and start polling.

use log::info;
use std::sync::Arc;
use thiserror::Error;

use crate::client::{ApiError, ClientError, HeaterClient, TermowebClient};
use crate::climate::TermowebClimate;
use crate::config::Config;
use crate::coordinator::{Coordinator, PollingHandle, UPDATE_INTERVAL, UpdateError};

pub const NAME: &str = "termoweb";

/// Setup did not complete; the whole setup should be retried later.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(#[source] ClientError),
    #[error("Unable to connect to Termoweb: {0}")]
    CannotConnect(#[source] ClientError),
    #[error("Initial refresh failed: {0}")]
    FirstRefresh(#[source] UpdateError),
}

pub struct Integration {
    coordinator: Arc<Coordinator>,
    entities: Vec<Arc<TermowebClimate>>,
    polling: PollingHandle,
}

impl Integration {
    pub async fn from_config(config: &Config) -> Result<Self, SetupError> {
        let client = TermowebClient::new(
            config.email.clone(),
            config.password.clone(),
            config.base_url.clone(),
            config.http_timeout,
        );
        Self::setup(Arc::new(client)).await
    }

    pub async fn setup(client: Arc<dyn HeaterClient>) -> Result<Self, SetupError> {
        let connect_client = Arc::clone(&client);
        tokio::task::spawn_blocking(move || connect_client.connect())
            .await
            .map_err(|e| SetupError::CannotConnect(ApiError::Worker(e.to_string()).into()))?
            .map_err(|e| match e {
                ClientError::Authentication(_) => SetupError::AuthenticationFailed(e),
                ClientError::Api(_) => SetupError::CannotConnect(e),
            })?;

        let coordinator = Arc::new(Coordinator::new(NAME, client, UPDATE_INTERVAL));
        Self::start(coordinator).await
    }

    /// Prime the cache, create entities, and begin polling on the coordinator's interval.
    pub(crate) async fn start(coordinator: Arc<Coordinator>) -> Result<Self, SetupError> {
        let heaters = coordinator.first_refresh().await.map_err(SetupError::FirstRefresh)?;

        let entities = heaters
            .values()
            .map(|heater| Arc::new(TermowebClimate::new(Arc::clone(&coordinator), heater)))
            .collect::<Vec<_>>();
        info!(
            "Termoweb set up with {} heater(s); refreshing every {}s",
            entities.len(),
            coordinator.update_interval().as_secs()
        );

        let polling = coordinator.spawn_polling();
        Ok(Integration {
            coordinator,
            entities,
            polling,
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn entities(&self) -> &[Arc<TermowebClimate>] {
        &self.entities
    }

    /// Stop polling and drop the cache.
    pub async fn unload(self) {
        let Integration {
            coordinator,
            entities,
            polling,
        } = self;
        polling.shutdown().await;
        drop(entities);
        info!("{} unloaded", coordinator.name());
    }
}
