//! In-memory `HeaterClient` for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::client::{ApiError, ClientError, HeaterClient};
use crate::models::termoweb::{HeaterId, HeaterMap, HeaterState, Reading};

pub(crate) fn heater(id: i64, room_temp: Option<&str>, target_temp: Option<&str>, mode: Option<&str>) -> HeaterState {
    HeaterState {
        id: HeaterId(id),
        name: None,
        room_temp: room_temp.map(Reading::from),
        target_temp: target_temp.map(Reading::from),
        mode: mode.map(str::to_string),
    }
}

/// Serves a mutable heater map. Successful commands are applied to it, so the next
/// fetch reflects them. Failures are scripted one call at a time.
#[derive(Default)]
pub(crate) struct FakeClient {
    heaters: Mutex<HeaterMap>,
    fetch_failures: Mutex<VecDeque<ClientError>>,
    command_failures: Mutex<VecDeque<ClientError>>,
    connect_failure: Mutex<Option<ClientError>>,
    commands: Mutex<Vec<(HeaterId, String, f64)>>,
    connects: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakeClient {
    pub(crate) fn with_heaters(heaters: impl IntoIterator<Item = HeaterState>) -> Self {
        let client = FakeClient::default();
        *client.heaters.lock().unwrap() = heaters.into_iter().map(|h| (h.id, h)).collect();
        client
    }

    pub(crate) fn remove_heater(&self, id: HeaterId) {
        self.heaters.lock().unwrap().remove(&id);
    }

    pub(crate) fn fail_next_fetch(&self, err: ClientError) {
        self.fetch_failures.lock().unwrap().push_back(err);
    }

    pub(crate) fn fail_next_command(&self, err: ClientError) {
        self.command_failures.lock().unwrap().push_back(err);
    }

    pub(crate) fn fail_connect(&self, err: ClientError) {
        *self.connect_failure.lock().unwrap() = Some(err);
    }

    /// Every `set_heater` call received, including rejected ones.
    pub(crate) fn commands(&self) -> Vec<(HeaterId, String, f64)> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl HeaterClient for FakeClient {
    fn connect(&self) -> Result<(), ClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.connect_failure.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn get_devices(&self) -> Result<HeaterMap, ClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fetch_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.heaters.lock().unwrap().clone())
    }

    fn set_heater(&self, id: HeaterId, mode: &str, target_temp: f64) -> Result<(), ClientError> {
        self.commands.lock().unwrap().push((id, mode.to_string(), target_temp));
        if let Some(err) = self.command_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut heaters = self.heaters.lock().unwrap();
        let heater = heaters.get_mut(&id).ok_or(ApiError::UnknownHeater(id))?;
        heater.mode = Some(mode.to_string());
        heater.target_temp = Some(Reading::Number(target_temp));
        Ok(())
    }
}
