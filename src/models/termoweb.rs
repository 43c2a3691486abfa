//! Models for the Termoweb cloud API and the per-heater state cached from it.
//!
//! Notes
//! - Wire types mirror only the fields this crate reads or writes; unknown fields are ignored.
//! - Numeric readings arrive either as JSON numbers or as strings (e.g. `"21.5"`), so they are
//!   kept raw as [`Reading`] and parsed on access.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =====================
// Scalar ID newtype wrappers
// =====================

/// Heater node address; unique within the cache.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaterId(pub i64);

impl fmt::Display for HeaterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gateway ("dev") identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevId(pub String);

// =====================
// Cached heater state
// =====================

/// A raw numeric field exactly as the vendor returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Number(f64),
    Text(String),
    /// Any other JSON shape; always reads as unknown.
    Other(serde_json::Value),
}

impl Reading {
    /// Temperature in degrees Celsius, or `None` when the value is not a finite number.
    pub fn celsius(&self) -> Option<f64> {
        let value = match self {
            Reading::Number(v) => *v,
            Reading::Text(s) => s.trim().parse::<f64>().ok()?,
            Reading::Other(_) => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for Reading {
    fn from(value: f64) -> Self {
        Reading::Number(value)
    }
}

impl From<&str> for Reading {
    fn from(value: &str) -> Self {
        Reading::Text(value.to_string())
    }
}

/// Last-known state of one heater. Replaced wholesale on every refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaterState {
    pub id: HeaterId,
    pub name: Option<String>,
    pub room_temp: Option<Reading>,
    pub target_temp: Option<Reading>,
    /// Vendor mode, e.g. `"off"`, `"manual"`, `"auto"`.
    pub mode: Option<String>,
}

impl HeaterState {
    pub fn new(id: HeaterId) -> Self {
        HeaterState {
            id,
            name: None,
            room_temp: None,
            target_temp: None,
            mode: None,
        }
    }
}

/// Full snapshot of all heaters keyed by id.
pub type HeaterMap = BTreeMap<HeaterId, HeaterState>;

// =====================
// Wire types
// =====================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevsResponse {
    #[serde(default)]
    pub devs: Vec<Dev>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dev {
    pub dev_id: DevId,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodesResponse {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub addr: HeaterId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub installed: Option<bool>,
}

impl Node {
    pub const HEATER_TYPE: &'static str = "htr";

    pub fn is_heater(&self) -> bool {
        self.node_type.eq_ignore_ascii_case(Self::HEATER_TYPE) && self.installed != Some(false)
    }
}

/// `GET /api/v2/devs/{dev}/htr/{addr}/settings`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeaterSettings {
    #[serde(default)]
    pub mode: Option<String>,
    /// Heating activity, e.g. `"active"` or `"off"`.
    #[serde(default)]
    pub state: Option<String>,
    /// Set-point temperature.
    #[serde(default)]
    pub stemp: Option<Reading>,
    /// Measured temperature.
    #[serde(default)]
    pub mtemp: Option<Reading>,
    #[serde(default)]
    pub units: Option<String>,
}

impl HeaterSettings {
    pub fn into_state(self, id: HeaterId, name: Option<String>) -> HeaterState {
        HeaterState {
            id,
            name,
            room_temp: self.mtemp,
            target_temp: self.stemp,
            mode: self.mode,
        }
    }
}

/// `POST /api/v2/devs/{dev}/htr/{addr}/settings`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsUpdate {
    pub mode: String,
    pub stemp: String,
    pub units: String,
}

impl SettingsUpdate {
    pub fn celsius(mode: &str, target_temp: f64) -> Self {
        SettingsUpdate {
            mode: mode.to_string(),
            stemp: format!("{:.1}", target_temp),
            units: "C".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_parses_numbers_and_numeric_strings() {
        assert_eq!(Reading::Number(19.0).celsius(), Some(19.0));
        assert_eq!(Reading::from("21.5").celsius(), Some(21.5));
        assert_eq!(Reading::from(" 19 ").celsius(), Some(19.0));
    }

    #[test]
    fn reading_rejects_garbage() {
        assert_eq!(Reading::from("not-a-number").celsius(), None);
        assert_eq!(Reading::from("").celsius(), None);
        assert_eq!(Reading::from("NaN").celsius(), None);
        assert_eq!(Reading::Number(f64::INFINITY).celsius(), None);
    }

    #[test]
    fn settings_decode_with_mixed_field_types() {
        let json = r#"{"mode":"manual","state":"active","stemp":"19.0","mtemp":21.5,"units":"C","extra":1}"#;
        let settings: HeaterSettings = serde_json::from_str(json).unwrap();
        let state = settings.into_state(HeaterId(2), Some("Kitchen".into()));
        assert_eq!(state.mode.as_deref(), Some("manual"));
        assert_eq!(state.target_temp.and_then(|r| r.celsius()), Some(19.0));
        assert_eq!(state.room_temp.and_then(|r| r.celsius()), Some(21.5));
    }

    #[test]
    fn settings_decode_tolerates_non_numeric_readings() {
        let json = r#"{"mode":"manual","stemp":"19.0","mtemp":true}"#;
        let settings: HeaterSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.mtemp, Some(Reading::Other(serde_json::Value::Bool(true))));
        let state = settings.into_state(HeaterId(2), None);
        assert_eq!(state.room_temp.and_then(|r| r.celsius()), None);
        assert_eq!(state.target_temp.and_then(|r| r.celsius()), Some(19.0));

        let json = r#"{"stemp":{"value":19},"mtemp":[21.5],"units":"C"}"#;
        let settings: HeaterSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.stemp.and_then(|r| r.celsius()), None);
        assert_eq!(settings.mtemp.and_then(|r| r.celsius()), None);
    }

    #[test]
    fn only_installed_heater_nodes_count() {
        let json = r#"{"nodes":[
            {"addr":1,"name":"Hall","type":"htr","installed":true},
            {"addr":2,"name":"Store","type":"acm","installed":true},
            {"addr":3,"name":"Spare","type":"htr","installed":false},
            {"addr":4,"type":"HTR"}
        ]}"#;
        let nodes: NodesResponse = serde_json::from_str(json).unwrap();
        let heaters: Vec<i64> = nodes.nodes.iter().filter(|n| n.is_heater()).map(|n| n.addr.0).collect();
        assert_eq!(heaters, vec![1, 4]);
    }

    #[test]
    fn settings_update_formats_one_decimal_celsius() {
        let body = serde_json::to_value(SettingsUpdate::celsius("manual", 19.46)).unwrap();
        assert_eq!(body, serde_json::json!({"mode": "manual", "stemp": "19.5", "units": "C"}));
        assert_eq!(SettingsUpdate::celsius("off", 20.0).stemp, "20.0");
    }
}
