//! Climate entities: one per heater, read-through over the coordinator's cache.

use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use strum::{Display, EnumIter};
use thiserror::Error;

use crate::coordinator::{Coordinator, UpdateError};
use crate::mode::{self, DEFAULT_TARGET_TEMPERATURE, FALLBACK_HEATER_MODE};
use crate::models::termoweb::{HeaterId, HeaterState};

pub const DOMAIN: &str = "termoweb";
pub const MANUFACTURER: &str = "Termoweb";
pub const MODEL: &str = "Radiator";

/// HVAC modes of the automation host.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    HeatCool,
    Auto,
    Dry,
    FanOnly,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ClimateEntityFeature {
    TargetTemperature,
    TurnOn,
    TurnOff,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum TemperatureUnit {
    #[strum(serialize = "°C")]
    Celsius,
}

/// Device registry entry for a heater.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceInfo {
    pub fn for_heater(heater: &HeaterState) -> Self {
        DeviceInfo {
            identifiers: vec![(DOMAIN.to_string(), heater.id.to_string())],
            name: heater
                .name
                .clone()
                .unwrap_or_else(|| format!("Radiator {}", heater.id)),
            manufacturer: MANUFACTURER.to_string(),
            model: MODEL.to_string(),
        }
    }
}

/// A user command the entity refused. Always raised before or instead of a silent no-op.
#[derive(Debug, Error)]
pub enum ServiceValidationError {
    #[error("Temperature is required")]
    TemperatureRequired,
    #[error("Unsupported HVAC mode: {0}")]
    UnsupportedHvacMode(HvacMode),
    #[error("Failed to set temperature: {0}")]
    SetTemperature(#[source] UpdateError),
    #[error("Failed to set HVAC mode: {0}")]
    SetHvacMode(#[source] UpdateError),
}

/// What the automation host needs from a climate entity.
#[async_trait]
pub trait ClimateEntity: Send + Sync {
    fn unique_id(&self) -> &str;

    fn device_info(&self) -> &DeviceInfo;

    fn temperature_unit(&self) -> TemperatureUnit;

    fn supported_features(&self) -> &'static [ClimateEntityFeature];

    fn hvac_modes(&self) -> Vec<HvacMode>;

    fn current_temperature(&self) -> Option<f64>;

    fn target_temperature(&self) -> Option<f64>;

    fn hvac_mode(&self) -> HvacMode;

    fn available(&self) -> bool;

    async fn set_temperature(&self, temperature: Option<f64>) -> Result<(), ServiceValidationError>;

    async fn set_hvac_mode(&self, mode: HvacMode) -> Result<(), ServiceValidationError>;

    async fn turn_on(&self) -> Result<(), ServiceValidationError> {
        self.set_hvac_mode(HvacMode::Heat).await
    }

    async fn turn_off(&self) -> Result<(), ServiceValidationError> {
        self.set_hvac_mode(HvacMode::Off).await
    }
}

/// A Termoweb radiator.
///
/// Holds no state of its own beyond its id; every property reads the coordinator's
/// current snapshot, so a heater that drops out of the vendor response simply becomes
/// unavailable.
pub struct TermowebClimate {
    coordinator: Arc<Coordinator>,
    heater_id: HeaterId,
    unique_id: String,
    device_info: DeviceInfo,
}

impl TermowebClimate {
    const FEATURES: &'static [ClimateEntityFeature] = &[
        ClimateEntityFeature::TargetTemperature,
        ClimateEntityFeature::TurnOn,
        ClimateEntityFeature::TurnOff,
    ];

    pub fn new(coordinator: Arc<Coordinator>, heater: &HeaterState) -> Self {
        TermowebClimate {
            coordinator,
            heater_id: heater.id,
            unique_id: heater.id.to_string(),
            device_info: DeviceInfo::for_heater(heater),
        }
    }

    pub fn heater_id(&self) -> HeaterId {
        self.heater_id
    }

    fn with_heater<T>(&self, f: impl FnOnce(&HeaterState) -> Option<T>) -> Option<T> {
        self.coordinator.data().get(&self.heater_id).and_then(f)
    }

    fn vendor_mode(&self) -> Option<String> {
        self.with_heater(|h| h.mode.clone())
    }
}

#[async_trait]
impl ClimateEntity for TermowebClimate {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    fn temperature_unit(&self) -> TemperatureUnit {
        TemperatureUnit::Celsius
    }

    fn supported_features(&self) -> &'static [ClimateEntityFeature] {
        Self::FEATURES
    }

    fn hvac_modes(&self) -> Vec<HvacMode> {
        mode::supported_hvac_modes()
    }

    fn current_temperature(&self) -> Option<f64> {
        self.with_heater(|h| h.room_temp.as_ref().and_then(|r| r.celsius()))
    }

    fn target_temperature(&self) -> Option<f64> {
        self.with_heater(|h| h.target_temp.as_ref().and_then(|r| r.celsius()))
    }

    fn hvac_mode(&self) -> HvacMode {
        mode::to_hvac_mode(self.vendor_mode().as_deref())
    }

    fn available(&self) -> bool {
        self.coordinator.last_update_success() && self.coordinator.data().contains_key(&self.heater_id)
    }

    async fn set_temperature(&self, temperature: Option<f64>) -> Result<(), ServiceValidationError> {
        let temperature = temperature.ok_or(ServiceValidationError::TemperatureRequired)?;

        let vendor_mode = match self.vendor_mode() {
            Some(m) if mode::is_known_vendor_mode(&m) => m,
            current => {
                debug!(
                    "Heater {} is in unmapped mode {:?}; sending {:?} with the new temperature",
                    self.heater_id, current, FALLBACK_HEATER_MODE
                );
                FALLBACK_HEATER_MODE.to_string()
            }
        };

        info!("Setting heater {} target temperature to {}", self.heater_id, temperature);
        self.coordinator
            .set_heater(self.heater_id, &vendor_mode, temperature)
            .await
            .map_err(ServiceValidationError::SetTemperature)
    }

    async fn set_hvac_mode(&self, hvac_mode: HvacMode) -> Result<(), ServiceValidationError> {
        let vendor_mode = mode::to_vendor_mode(hvac_mode).ok_or(ServiceValidationError::UnsupportedHvacMode(hvac_mode))?;
        // A zero set-point counts as unset.
        let target = self
            .target_temperature()
            .filter(|t| *t != 0.0)
            .unwrap_or(DEFAULT_TARGET_TEMPERATURE);

        info!("Setting heater {} HVAC mode to {}", self.heater_id, hvac_mode);
        self.coordinator
            .set_heater(self.heater_id, vendor_mode, target)
            .await
            .map_err(ServiceValidationError::SetHvacMode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiError;
    use crate::client::ClientError;
    use crate::models::termoweb::Reading;
    use crate::testing::{FakeClient, heater};
    use std::error::Error;
    use std::time::Duration;

    async fn entity_for(client: Arc<FakeClient>, id: i64) -> TermowebClimate {
        let coordinator = Arc::new(Coordinator::new("test", client, Duration::from_secs(300)));
        coordinator.first_refresh().await.unwrap();
        let state = coordinator
            .data()
            .get(&HeaterId(id))
            .cloned()
            .unwrap_or_else(|| HeaterState::new(HeaterId(id)));
        TermowebClimate::new(coordinator, &state)
    }

    #[tokio::test]
    async fn reads_through_the_cache() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, Some("21.5"), Some("19"), Some("manual"))]));
        let entity = entity_for(client, 5).await;

        assert_eq!(entity.current_temperature(), Some(21.5));
        assert_eq!(entity.target_temperature(), Some(19.0));
        assert_eq!(entity.hvac_mode(), HvacMode::Heat);
        assert!(entity.available());
    }

    #[tokio::test]
    async fn absent_heater_is_unavailable() {
        let client = Arc::new(FakeClient::with_heaters([]));
        let entity = entity_for(client, 5).await;

        assert!(!entity.available());
        assert_eq!(entity.current_temperature(), None);
        assert_eq!(entity.target_temperature(), None);
        assert_eq!(entity.hvac_mode(), HvacMode::Off);
    }

    #[tokio::test]
    async fn heater_disappearing_makes_entity_unavailable() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, Some("20"), Some("20"), Some("off"))]));
        let entity = entity_for(client.clone(), 5).await;
        assert!(entity.available());

        client.remove_heater(HeaterId(5));
        entity.coordinator.refresh().await.unwrap();
        assert!(!entity.available());
    }

    #[tokio::test]
    async fn failed_refresh_makes_entity_unavailable_but_keeps_values() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, Some("20.5"), Some("21"), Some("manual"))]));
        let entity = entity_for(client.clone(), 5).await;

        client.fail_next_fetch(ApiError::Transport("timeout".into()).into());
        assert!(entity.coordinator.refresh().await.is_err());
        assert!(!entity.available());
        assert_eq!(entity.current_temperature(), Some(20.5));
    }

    #[tokio::test]
    async fn malformed_readings_are_unknown() {
        let mut state = heater(5, Some("not-a-number"), None, None);
        state.target_temp = Some(Reading::Text(String::new()));
        let client = Arc::new(FakeClient::with_heaters([state]));
        let entity = entity_for(client, 5).await;

        assert_eq!(entity.current_temperature(), None);
        assert_eq!(entity.target_temperature(), None);
        assert_eq!(entity.hvac_mode(), HvacMode::Off);
        assert!(entity.available());
    }

    #[tokio::test]
    async fn unmapped_vendor_mode_shows_as_off() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, None, None, Some("auto"))]));
        let entity = entity_for(client, 5).await;
        assert_eq!(entity.hvac_mode(), HvacMode::Off);
    }

    #[tokio::test]
    async fn device_info_and_static_properties() {
        let mut named = heater(7, None, None, None);
        named.name = Some("Bedroom".into());
        let client = Arc::new(FakeClient::with_heaters([named, heater(8, None, None, None)]));
        let bedroom = entity_for(client.clone(), 7).await;
        let unnamed = entity_for(client, 8).await;

        assert_eq!(bedroom.unique_id(), "7");
        assert_eq!(bedroom.device_info().name, "Bedroom");
        assert_eq!(bedroom.device_info().identifiers, vec![("termoweb".to_string(), "7".to_string())]);
        assert_eq!(bedroom.device_info().manufacturer, "Termoweb");
        assert_eq!(unnamed.device_info().name, "Radiator 8");
        assert_eq!(bedroom.temperature_unit().to_string(), "°C");
        assert_eq!(bedroom.hvac_modes(), vec![HvacMode::Off, HvacMode::Heat]);
        assert_eq!(bedroom.supported_features().len(), 3);
    }

    #[tokio::test]
    async fn set_temperature_requires_a_value() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, None, None, Some("manual"))]));
        let entity = entity_for(client.clone(), 5).await;

        let err = entity.set_temperature(None).await.unwrap_err();
        assert!(matches!(err, ServiceValidationError::TemperatureRequired));
        assert!(client.commands().is_empty());
    }

    #[tokio::test]
    async fn set_temperature_keeps_known_mode() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, None, Some("19"), Some("off"))]));
        let entity = entity_for(client.clone(), 5).await;

        entity.set_temperature(Some(22.5)).await.unwrap();
        assert_eq!(client.commands(), vec![(HeaterId(5), "off".to_string(), 22.5)]);
        assert_eq!(entity.target_temperature(), Some(22.5));
    }

    #[tokio::test]
    async fn set_temperature_falls_back_for_unmapped_mode() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, None, None, Some("auto"))]));
        let entity = entity_for(client.clone(), 5).await;

        entity.set_temperature(Some(18.0)).await.unwrap();
        assert_eq!(client.commands(), vec![(HeaterId(5), FALLBACK_HEATER_MODE.to_string(), 18.0)]);

        let absent = entity_for(client.clone(), 9).await;
        absent.set_temperature(Some(18.0)).await.unwrap_err();
        assert_eq!(client.commands().last().unwrap().1, FALLBACK_HEATER_MODE);
    }

    #[tokio::test]
    async fn unsupported_mode_is_rejected_before_any_call() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, None, None, Some("manual"))]));
        let entity = entity_for(client.clone(), 5).await;

        let err = entity.set_hvac_mode(HvacMode::Cool).await.unwrap_err();
        assert!(matches!(err, ServiceValidationError::UnsupportedHvacMode(HvacMode::Cool)));
        assert!(err.to_string().contains("cool"), "{err}");
        assert!(client.commands().is_empty());
    }

    #[tokio::test]
    async fn set_hvac_mode_sends_cached_target_or_default() {
        let client = Arc::new(FakeClient::with_heaters([
            heater(5, None, Some("19"), Some("off")),
            heater(6, None, Some("garbage"), Some("manual")),
        ]));
        let with_target = entity_for(client.clone(), 5).await;
        let without_target = entity_for(client.clone(), 6).await;

        with_target.set_hvac_mode(HvacMode::Heat).await.unwrap();
        without_target.set_hvac_mode(HvacMode::Off).await.unwrap();

        assert_eq!(
            client.commands(),
            vec![
                (HeaterId(5), "manual".to_string(), 19.0),
                (HeaterId(6), "off".to_string(), DEFAULT_TARGET_TEMPERATURE),
            ]
        );
        assert_eq!(with_target.hvac_mode(), HvacMode::Heat);
        assert_eq!(without_target.hvac_mode(), HvacMode::Off);
    }

    #[tokio::test]
    async fn set_hvac_mode_replaces_zero_target_with_default() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, None, Some("0"), Some("off"))]));
        let entity = entity_for(client.clone(), 5).await;
        assert_eq!(entity.target_temperature(), Some(0.0));

        entity.set_hvac_mode(HvacMode::Heat).await.unwrap();
        assert_eq!(
            client.commands(),
            vec![(HeaterId(5), "manual".to_string(), DEFAULT_TARGET_TEMPERATURE)]
        );
    }

    #[tokio::test]
    async fn turn_on_and_off_delegate_to_set_hvac_mode() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, None, Some("21"), Some("off"))]));
        let entity = entity_for(client.clone(), 5).await;

        entity.turn_on().await.unwrap();
        entity.turn_off().await.unwrap();

        let modes: Vec<String> = client.commands().into_iter().map(|(_, m, _)| m).collect();
        assert_eq!(modes, vec!["manual", "off"]);
    }

    #[tokio::test]
    async fn command_failures_surface_as_validation_errors() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, None, Some("21"), Some("manual"))]));
        let entity = entity_for(client.clone(), 5).await;

        client.fail_next_command(ApiError::Http {
            status: 500,
            message: "boom".into(),
        }
        .into());
        let err = entity.set_temperature(Some(23.0)).await.unwrap_err();
        assert!(matches!(err, ServiceValidationError::SetTemperature(UpdateError::UpdateFailed(_))));
        assert!(err.to_string().starts_with("Failed to set temperature:"), "{err}");
        assert!(err.source().is_some());

        client.fail_next_command(ClientError::Authentication("expired".into()));
        let err = entity.set_hvac_mode(HvacMode::Off).await.unwrap_err();
        assert!(matches!(err, ServiceValidationError::SetHvacMode(UpdateError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn pending_reauth_keeps_entity_unavailable_after_later_success() {
        let client = Arc::new(FakeClient::with_heaters([heater(5, None, Some("21"), Some("manual"))]));
        let entity = entity_for(client.clone(), 5).await;

        client.fail_next_command(ClientError::Authentication("expired".into()));
        entity.set_hvac_mode(HvacMode::Off).await.unwrap_err();
        entity.set_hvac_mode(HvacMode::Off).await.unwrap();

        assert!(entity.coordinator.requires_reauth());
        assert!(!entity.available());
        assert_eq!(entity.hvac_mode(), HvacMode::Off);
    }
}
