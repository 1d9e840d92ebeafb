//! Fan curve evaluation: current temperature band to per-fan targets.
//!
//! Pure functions over the configured zones; the band is re-derived from
//! the live temperature on every poll, with no debounce on the temperature
//! itself.

use std::collections::BTreeMap;

use crate::config::types::{FanOverride, FanZone};
use crate::vendor::FanTarget;

/// Target shared by every fan without an active override: the highest zone
/// whose threshold is at or below the current temperature, or the quiet
/// (lowest) zone when the temperature sits below the whole curve.
/// `None` when no zones are configured (monitoring-only server).
pub fn zone_target(current_temp_c: f64, zones: &[FanZone]) -> Option<FanTarget> {
    let sorted = sorted_zones(zones)?;
    let zone = sorted
        .iter()
        .rev()
        .find(|z| z.temp_threshold_c <= current_temp_c)
        .unwrap_or(&sorted[0]);
    Some(FanTarget::from_rpm(zone.target_rpm))
}

/// Per-fan targets for one poll. Overrides apply only while the temperature
/// is below the first zone's threshold; above it every fan follows the zone
/// table. Output covers every observed fan plus every override-named fan.
pub fn evaluate(
    current_temp_c: f64,
    zones: &[FanZone],
    overrides: &[FanOverride],
    fan_readings: &BTreeMap<String, u32>,
) -> BTreeMap<String, FanTarget> {
    let Some(base) = zone_target(current_temp_c, zones) else {
        return BTreeMap::new();
    };
    let overrides_active = sorted_zones(zones)
        .map(|sorted| current_temp_c < sorted[0].temp_threshold_c)
        .unwrap_or(false);

    let mut targets: BTreeMap<String, FanTarget> = fan_readings
        .keys()
        .map(|fan| (fan.clone(), base))
        .collect();
    for fan_override in overrides {
        let target = if overrides_active {
            FanTarget::from_rpm(fan_override.override_rpm)
        } else {
            base
        };
        targets.insert(fan_override.fan_identifier.clone(), target);
    }
    targets
}

fn sorted_zones(zones: &[FanZone]) -> Option<Vec<FanZone>> {
    if zones.is_empty() {
        return None;
    }
    let mut sorted = zones.to_vec();
    sorted.sort_by(|a, b| {
        a.temp_threshold_c
            .partial_cmp(&b.temp_threshold_c)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Some(sorted)
}
