use crate::meter_client::{MultiSensor, SensorReading};
use serde_derive::Deserialize;
use std::collections::HashMap;
use strum::Display;

/// Measurement types a multi-sensor meter reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SensorType {
    ActivePower,
    ApparentEnergy,
    ApparentPower,
    Current,
    ForwardActiveEnergy,
    ForwardReactiveEnergy,
    Frequency,
    ReactivePower,
    ReverseActiveEnergy,
    ReverseReactiveEnergy,
    Voltage,
}

/// Builds the lookup key for a channel, e.g. `voltage_1` or `activePower_0`.
pub fn measurement_key(kind: SensorType, channel: u8) -> String {
    format!("{kind}_{channel}")
}

/// A single channel reading. Channel 0 is the aggregate, 1..=3 are phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub kind: SensorType,
    pub channel: u8,
    pub raw_value: i64,
}

impl Measurement {
    pub fn key(&self) -> String {
        measurement_key(self.kind, self.channel)
    }
}

impl From<SensorReading> for Measurement {
    fn from(reading: SensorReading) -> Self {
        Self {
            kind: reading.kind,
            channel: reading.id,
            raw_value: reading.value,
        }
    }
}

/// All measurements from one successful poll, keyed by [`measurement_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    measurements: HashMap<String, Measurement>,
}

impl Snapshot {
    /// Reshapes a raw `/state` payload. A repeated type and channel keeps the last entry.
    pub fn from_payload(payload: &MultiSensor) -> Self {
        let measurements = payload
            .sensors
            .iter()
            .map(|reading| {
                let measurement = Measurement::from(*reading);
                (measurement.key(), measurement)
            })
            .collect();
        Self { measurements }
    }

    pub fn get(&self, key: &str) -> Option<&Measurement> {
        self.measurements.get(key)
    }

    pub fn raw_value(&self, key: &str) -> Option<i64> {
        self.get(key).map(|measurement| measurement.raw_value)
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Measurement)> {
        self.measurements
            .iter()
            .map(|(key, measurement)| (key.as_str(), measurement))
    }
}
