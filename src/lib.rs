pub mod models {
    pub mod termoweb;
}

pub mod client;
pub mod climate;
pub mod config;
pub mod coordinator;
pub mod integration;
pub mod mode;

#[cfg(test)]
mod testing;

pub use client::{ApiError, ClientError, HeaterClient, TermowebClient};
pub use climate::{ClimateEntity, HvacMode, ServiceValidationError, TermowebClimate};
pub use config::Config;
pub use coordinator::{Coordinator, UPDATE_INTERVAL, UpdateError};
pub use integration::{Integration, SetupError};
pub use models::termoweb::{HeaterId, HeaterMap, HeaterState, Reading};
