use crate::coordinator::{Coordinator, Subscription};
use crate::snapshot::{measurement_key, SensorType};
use crate::DEFAULT_NAME;
use std::fmt;
use std::sync::Arc;

/// How a raw device value maps onto the reported value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitConversion {
    Identity,
    /// Decivolts to volts
    DivideBy10,
    /// Watt-hours to kilowatt-hours
    DivideBy1000,
}

impl UnitConversion {
    pub fn apply(self, raw: i64) -> f64 {
        match self {
            UnitConversion::Identity => raw as f64,
            UnitConversion::DivideBy10 => raw as f64 / 10.0,
            UnitConversion::DivideBy1000 => raw as f64 / 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Volt,
    Milliampere,
    Watt,
    KilowattHour,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Volt => "V",
            Unit::Milliampere => "mA",
            Unit::Watt => "W",
            Unit::KilowattHour => "kWh",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Voltage,
    Current,
    Power,
    Energy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateClass {
    Measurement,
    /// Only decreases when the device resets its counter
    TotalIncreasing,
}

impl DeviceClass {
    pub fn conversion(self) -> UnitConversion {
        match self {
            DeviceClass::Voltage => UnitConversion::DivideBy10,
            DeviceClass::Current | DeviceClass::Power => UnitConversion::Identity,
            DeviceClass::Energy => UnitConversion::DivideBy1000,
        }
    }

    pub fn unit(self) -> Unit {
        match self {
            DeviceClass::Voltage => Unit::Volt,
            DeviceClass::Current => Unit::Milliampere,
            DeviceClass::Power => Unit::Watt,
            DeviceClass::Energy => Unit::KilowattHour,
        }
    }

    pub fn state_class(self) -> StateClass {
        match self {
            DeviceClass::Energy => StateClass::TotalIncreasing,
            _ => StateClass::Measurement,
        }
    }

    pub fn display_precision(self) -> Option<u8> {
        match self {
            DeviceClass::Voltage => Some(1),
            DeviceClass::Energy => Some(3),
            DeviceClass::Current | DeviceClass::Power => None,
        }
    }
}

/// Static description of one exposed data point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPointDescriptor {
    pub key: String,
    pub name: String,
    pub device_class: DeviceClass,
    pub conversion: UnitConversion,
    pub unit: Unit,
    pub state_class: StateClass,
    pub display_precision: Option<u8>,
}

struct Family {
    kind: SensorType,
    label: &'static str,
    device_class: DeviceClass,
    channels: &'static [u8],
}

const PHASES: &[u8] = &[1, 2, 3];
const PHASES_AND_TOTAL: &[u8] = &[1, 2, 3, 0];

static FAMILIES: [Family; 5] = [
    Family {
        kind: SensorType::Voltage,
        label: "Voltage",
        device_class: DeviceClass::Voltage,
        channels: PHASES,
    },
    Family {
        kind: SensorType::Current,
        label: "Current",
        device_class: DeviceClass::Current,
        channels: PHASES,
    },
    Family {
        kind: SensorType::ActivePower,
        label: "Active Power",
        device_class: DeviceClass::Power,
        channels: PHASES_AND_TOTAL,
    },
    Family {
        kind: SensorType::ForwardActiveEnergy,
        label: "Forward Active Energy",
        device_class: DeviceClass::Energy,
        channels: PHASES_AND_TOTAL,
    },
    Family {
        kind: SensorType::ReverseActiveEnergy,
        label: "Reverse Active Energy",
        device_class: DeviceClass::Energy,
        channels: PHASES_AND_TOTAL,
    },
];

/// Every data point registered for one meter.
pub fn catalog() -> Vec<DataPointDescriptor> {
    FAMILIES
        .iter()
        .flat_map(|family| {
            family.channels.iter().map(move |&channel| {
                let name = match channel {
                    0 => format!("{} Total", family.label),
                    n => format!("{} {n}", family.label),
                };
                DataPointDescriptor {
                    key: measurement_key(family.kind, channel),
                    name,
                    device_class: family.device_class,
                    conversion: family.device_class.conversion(),
                    unit: family.device_class.unit(),
                    state_class: family.device_class.state_class(),
                    display_precision: family.device_class.display_precision(),
                }
            })
        })
        .collect()
}

/// What a data point currently reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataPointState {
    /// The last poll failed
    Unavailable,
    /// The meter never reported this channel
    Unknown,
    Value(f64),
}

impl fmt::Display for DataPointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataPointState::Unavailable => f.write_str("unavailable"),
            DataPointState::Unknown => f.write_str("unknown"),
            DataPointState::Value(value) => write!(f, "{value}"),
        }
    }
}

/// A read view binding one descriptor to a coordinator.
#[derive(Clone)]
pub struct DataPoint {
    descriptor: DataPointDescriptor,
    unique_id: String,
    coordinator: Arc<Coordinator>,
}

impl DataPoint {
    pub fn new(
        entry_id: &str,
        descriptor: DataPointDescriptor,
        coordinator: Arc<Coordinator>,
    ) -> Self {
        let unique_id = format!("{entry_id}_{}", descriptor.key);
        Self {
            descriptor,
            unique_id,
            coordinator,
        }
    }

    pub fn descriptor(&self) -> &DataPointDescriptor {
        &self.descriptor
    }

    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn name(&self) -> String {
        format!("{DEFAULT_NAME} {}", self.descriptor.name)
    }

    pub fn state(&self) -> DataPointState {
        if !self.coordinator.is_available() {
            return DataPointState::Unavailable;
        }
        match self.coordinator.current_value(&self.descriptor.key) {
            Some(raw) => DataPointState::Value(self.descriptor.conversion.apply(raw)),
            None => DataPointState::Unknown,
        }
    }

    /// Calls `on_update` with the fresh state after every poll.
    pub fn subscribe(
        &self,
        on_update: impl Fn(&DataPoint, DataPointState) + Send + Sync + 'static,
    ) -> Subscription {
        // Hold the coordinator weakly so the registry does not keep it alive
        let coordinator = Arc::downgrade(&self.coordinator);
        let descriptor = self.descriptor.clone();
        let unique_id = self.unique_id.clone();
        self.coordinator.subscribe(move || {
            if let Some(coordinator) = coordinator.upgrade() {
                let point = DataPoint {
                    descriptor: descriptor.clone(),
                    unique_id: unique_id.clone(),
                    coordinator,
                };
                on_update(&point, point.state());
            }
        })
    }
}

impl fmt::Debug for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPoint")
            .field("unique_id", &self.unique_id)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
