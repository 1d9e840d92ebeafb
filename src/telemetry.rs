//! Per-poll telemetry structures handed to the persistence sink and the
//! alert tracker. Nothing here outlives the tick that produced it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Parsed SDR readings from one sensor query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SensorReadings {
    pub temperatures_c: BTreeMap<String, f64>,
    pub fan_rpms: BTreeMap<String, u32>,
}

impl SensorReadings {
    /// Pick the temperature that drives the fan curve: the hottest
    /// CPU-labelled sensor, falling back to the hottest reading overall
    /// when the SDR carries no CPU label.
    pub fn cpu_temp_c(&self) -> Option<f64> {
        let cpu_max = self
            .temperatures_c
            .iter()
            .filter(|(name, _)| name.to_ascii_lowercase().contains("cpu"))
            .map(|(_, temp)| *temp)
            .fold(f64::NEG_INFINITY, f64::max);
        if cpu_max.is_finite() {
            return Some(cpu_max);
        }

        let overall = self
            .temperatures_c
            .values()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        overall.is_finite().then_some(overall)
    }
}

/// Raw health flags from one status query. `Some` carries the offending
/// SDR rows so alert messages can quote the hardware's own words.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusFlags {
    pub intrusion: Option<String>,
    pub memory_error: Option<String>,
    pub power_supply_fault: Option<String>,
    pub voltage_fault: Option<String>,
}

/// One poll cycle's worth of telemetry for a single server.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySample {
    pub server_id: i64,
    pub taken_at: DateTime<Utc>,
    pub readings: SensorReadings,
    pub cpu_temp_c: Option<f64>,
    pub flags: Option<StatusFlags>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(pairs: &[(&str, f64)]) -> SensorReadings {
        SensorReadings {
            temperatures_c: pairs
                .iter()
                .map(|(name, temp)| (name.to_string(), *temp))
                .collect(),
            fan_rpms: BTreeMap::new(),
        }
    }

    #[test]
    fn prefers_cpu_labelled_sensors() {
        let r = readings(&[("CPU1 Temp", 52.0), ("CPU2 Temp", 58.0), ("Inlet Temp", 71.0)]);
        assert_eq!(r.cpu_temp_c(), Some(58.0));
    }

    #[test]
    fn falls_back_to_hottest_reading() {
        let r = readings(&[("Inlet Temp", 31.0), ("Exhaust Temp", 44.0)]);
        assert_eq!(r.cpu_temp_c(), Some(44.0));
    }

    #[test]
    fn empty_readings_have_no_temperature() {
        assert_eq!(SensorReadings::default().cpu_temp_c(), None);
    }
}
