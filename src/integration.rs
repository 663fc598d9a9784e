use crate::config::ConfigEntry;
use crate::coordinator::Coordinator;
use crate::data_point::{catalog, DataPoint};
use crate::error::MeterError;
use crate::meter_client::{ClientSettings, DeviceInfo, MeterClient};
use crate::{DEFAULT_NAME, DOMAIN, HOME_URL, MANUFACTURER};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Device registry record for a meter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// `(domain, serial)`
    pub identifier: (String, String),
    pub name: String,
    pub manufacturer: String,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    pub configuration_url: String,
}

impl From<&DeviceInfo> for DeviceEntry {
    fn from(device: &DeviceInfo) -> Self {
        Self {
            identifier: (DOMAIN.to_string(), device.serial.clone()),
            name: DEFAULT_NAME.to_string(),
            manufacturer: MANUFACTURER.to_string(),
            model: device.hardware_version.clone(),
            sw_version: device.firmware_version.clone(),
            configuration_url: HOME_URL.to_string(),
        }
    }
}

/// One set-up meter: its coordinator and the data points reading from it.
pub struct Integration {
    entry: ConfigEntry,
    device: DeviceEntry,
    coordinator: Arc<Coordinator>,
    data_points: Vec<DataPoint>,
}

impl Integration {
    /// Reads the device identity, performs the first poll, and registers the data points.
    ///
    /// Any failure aborts the whole setup.
    pub async fn setup(entry: ConfigEntry, settings: ClientSettings) -> Result<Self, MeterError> {
        info!(entry_id = %entry.entry_id, host = %entry.data.host, "Setting up meter");

        let client = MeterClient::new(entry.data.host.clone(), settings);
        let device = client.fetch_info().await?;
        device.ensure_supported()?;
        if device.serial != entry.unique_id {
            warn!(
                expected = %entry.unique_id,
                found = %device.serial,
                "Meter serial differs from the configured one"
            );
        }
        let device_entry = DeviceEntry::from(&device);

        debug!(entry_id = %entry.entry_id, "Awaiting coordinator first refresh");
        let coordinator = Arc::new(
            Coordinator::initialize(client, device, entry.options.update_interval()).await?,
        );

        let data_points: Vec<DataPoint> = catalog()
            .into_iter()
            .map(|descriptor| DataPoint::new(&entry.entry_id, descriptor, coordinator.clone()))
            .collect();
        debug!(count = data_points.len(), "Registered data points");

        Ok(Self {
            entry,
            device: device_entry,
            coordinator,
            data_points,
        })
    }

    pub fn entry(&self) -> &ConfigEntry {
        &self.entry
    }

    pub fn device(&self) -> &DeviceEntry {
        &self.device
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn data_points(&self) -> &[DataPoint] {
        &self.data_points
    }

    pub fn data_point(&self, key: &str) -> Option<&DataPoint> {
        self.data_points.iter().find(|point| point.key() == key)
    }

    /// Stops polling. Outstanding subscriptions become no-ops.
    pub async fn unload(self) {
        info!(entry_id = %self.entry.entry_id, "Unloading meter");
        self.coordinator.shutdown().await;
    }
}

/// Every running integration, keyed by config entry id.
pub struct Hub {
    settings: ClientSettings,
    integrations: HashMap<String, Integration>,
}

impl Hub {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            integrations: HashMap::new(),
        }
    }

    /// Sets up an entry, replacing a running one with the same id.
    pub async fn setup_entry(&mut self, entry: ConfigEntry) -> Result<&Integration, MeterError> {
        let entry_id = entry.entry_id.clone();
        self.unload_entry(&entry_id).await;

        let integration = Integration::setup(entry, self.settings).await?;
        Ok(&*self.integrations.entry(entry_id).or_insert(integration))
    }

    pub fn get(&self, entry_id: &str) -> Option<&Integration> {
        self.integrations.get(entry_id)
    }

    pub fn integrations(&self) -> impl Iterator<Item = &Integration> {
        self.integrations.values()
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }

    /// Returns whether an integration was running under this id.
    pub async fn unload_entry(&mut self, entry_id: &str) -> bool {
        match self.integrations.remove(entry_id) {
            Some(integration) => {
                integration.unload().await;
                true
            }
            None => false,
        }
    }

    pub async fn unload_all(&mut self) {
        for (_, integration) in self.integrations.drain() {
            integration.unload().await;
        }
    }
}
