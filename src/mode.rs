//! Translation between Termoweb heater modes and host HVAC modes.
//!
//! Only two vendor modes have a host counterpart. Anything else the vendor reports
//! (e.g. `"auto"`, `"self_learn"`) is shown as [`HvacMode::Off`].

use crate::climate::HvacMode;

/// Vendor mode to host mode. The inverse direction is derived from the same table.
const VENDOR_TO_HVAC: [(&str, HvacMode); 2] = [("off", HvacMode::Off), ("manual", HvacMode::Heat)];

/// Vendor mode sent with a temperature-only change when the heater's current mode is not
/// in [`VENDOR_TO_HVAC`].
///
/// This value is not itself a member of the table, so the next refresh reports such a
/// heater as OFF if the vendor echoes it back unchanged. Kept separate so it can be
/// replaced with `"manual"` once the vendor's handling of it is confirmed.
pub const FALLBACK_HEATER_MODE: &str = "heat";

/// Target temperature sent with a mode change when none is cached, in degrees Celsius.
pub const DEFAULT_TARGET_TEMPERATURE: f64 = 20.0;

/// Map a vendor mode to the host vocabulary; unknown or absent modes are OFF.
pub fn to_hvac_mode(vendor_mode: Option<&str>) -> HvacMode {
    vendor_mode
        .and_then(|m| VENDOR_TO_HVAC.iter().find(|(v, _)| *v == m))
        .map(|(_, h)| *h)
        .unwrap_or(HvacMode::Off)
}

/// Map a host mode to the vendor vocabulary; `None` for modes the heaters do not support.
pub fn to_vendor_mode(mode: HvacMode) -> Option<&'static str> {
    VENDOR_TO_HVAC.iter().find(|(_, h)| *h == mode).map(|(v, _)| *v)
}

pub fn is_known_vendor_mode(vendor_mode: &str) -> bool {
    VENDOR_TO_HVAC.iter().any(|(v, _)| *v == vendor_mode)
}

/// Host modes a heater can be put into.
pub fn supported_hvac_modes() -> Vec<HvacMode> {
    VENDOR_TO_HVAC.iter().map(|(_, h)| *h).collect()
}
