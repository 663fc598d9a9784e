//! Pstryk Energy Meter Library
//!
//! This library polls the local HTTP API of a Pstryk multi-sensor energy meter
//! and exposes its per-phase voltage, current, power and energy readings as
//! individually addressable data points that update on every poll.

pub mod config;
pub mod config_flow;
pub mod coordinator;
pub mod data_point;
pub mod error;
pub mod integration;
pub mod meter_client;
pub mod snapshot;

pub const DOMAIN: &str = "pstryk_energy_meter";
pub const MANUFACTURER: &str = "Pstryk";
pub const DEFAULT_NAME: &str = "Pstryk Energy Meter";
pub const HOME_URL: &str = "https://pstryk.pl/";

// Re-export commonly used types for easier access
pub use config::{ConfigEntry, ConfigStore, EntryData, EntryOptions};
pub use config_flow::{ConfigFlow, FlowResult, OptionsFlow, SetupForm};
pub use coordinator::{Coordinator, Subscription};
pub use data_point::{DataPoint, DataPointState};
pub use error::{ErrorKind, MeterError};
pub use integration::{Hub, Integration};
pub use meter_client::{ClientSettings, DeviceInfo, MeterClient};
pub use snapshot::{Snapshot, SensorType};
