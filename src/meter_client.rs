use crate::error::MeterError;
use crate::snapshot::SensorType;
use serde_derive::Deserialize;
use serde_with::serde_as;
use std::time::Duration;
use tracing::{debug, instrument};

/// Product name reported by `/info` on supported devices.
pub const PRODUCT_NAME: &str = "PstrykEnergyMeter";
/// Device type reported by `/info` on supported devices.
pub const MULTI_SENSOR_TYPE: &str = "multiSensor";

/// Per-endpoint request timeouts.
///
/// The identity check uses a short explicit timeout, the periodic state poll
/// falls back to the HTTP client default unless one is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    pub info_timeout: Duration,
    pub state_timeout: Option<Duration>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            info_timeout: Duration::from_secs(2),
            state_timeout: None,
        }
    }
}

/// HTTP client for the meter's local API.
#[derive(Clone)]
pub struct MeterClient {
    host: String,
    settings: ClientSettings,
    client: reqwest::Client,
}

impl MeterClient {
    pub fn new(host: impl Into<String>, settings: ClientSettings) -> Self {
        Self {
            host: host.into(),
            settings,
            client: reqwest::Client::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn settings(&self) -> ClientSettings {
        self.settings
    }

    /// Reads the device identity from `GET /info`.
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn fetch_info(&self) -> Result<DeviceInfo, MeterError> {
        let body = self.get("info", Some(self.settings.info_timeout)).await?;
        let response: InfoResponse =
            serde_json::from_str(&body).map_err(MeterError::MalformedPayload)?;
        DeviceInfo::try_from(response.device.unwrap_or_default())
    }

    /// Reads the current measurements from `GET /state`.
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn fetch_state(&self) -> Result<MultiSensor, MeterError> {
        let body = self.get("state", self.settings.state_timeout).await?;
        let response: StateResponse =
            serde_json::from_str(&body).map_err(MeterError::MalformedPayload)?;
        response
            .multi_sensor
            .ok_or_else(|| MeterError::Validation("state is missing `multiSensor`".into()))
    }

    async fn get(&self, path: &str, timeout: Option<Duration>) -> Result<String, MeterError> {
        let url = format!("http://{}/{}", self.host, path);
        debug!(%url, "calling meter");
        let mut request = self.client.get(&url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let body = request.send().await?.error_for_status()?.text().await?;
        debug!(%url, %body, "received");
        Ok(body)
    }
}

/// Identity of a meter, discovered once at setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub product: Option<String>,
    pub sensor_type: Option<String>,
    pub hardware_version: Option<String>,
    pub firmware_version: Option<String>,
}

impl DeviceInfo {
    pub fn is_energy_meter(&self) -> bool {
        self.product.as_deref() == Some(PRODUCT_NAME)
    }

    pub fn is_multi_sensor(&self) -> bool {
        self.sensor_type.as_deref() == Some(MULTI_SENSOR_TYPE)
    }

    /// Rejects devices that are not a Pstryk multi-sensor energy meter.
    pub fn ensure_supported(&self) -> Result<(), MeterError> {
        if !self.is_energy_meter() {
            return Err(MeterError::Validation(format!(
                "not a Pstryk Energy Meter (product {:?})",
                self.product
            )));
        }
        if !self.is_multi_sensor() {
            return Err(MeterError::Validation(format!(
                "not a multi sensor (type {:?})",
                self.sensor_type
            )));
        }
        Ok(())
    }
}

impl TryFrom<RawDevice> for DeviceInfo {
    type Error = MeterError;

    fn try_from(raw: RawDevice) -> Result<Self, Self::Error> {
        let serial = raw
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| MeterError::Validation("info is missing `device.id`".into()))?;
        Ok(Self {
            serial,
            product: raw.product,
            sensor_type: raw.kind,
            hardware_version: raw.hv,
            firmware_version: raw.fv,
        })
    }
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    device: Option<RawDevice>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDevice {
    id: Option<String>,
    product: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    hv: Option<String>,
    fv: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateResponse {
    multi_sensor: Option<MultiSensor>,
}

/// The `multiSensor` block of a `/state` response.
#[serde_as]
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct MultiSensor {
    /// Entries with an unknown sensor type or a malformed shape are dropped.
    #[serde_as(as = "serde_with::VecSkipError<_>")]
    #[serde(default)]
    pub sensors: Vec<SensorReading>,
}

/// One raw channel reading, in device-native units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "type")]
    pub kind: SensorType,
    pub id: u8,
    pub value: i64,
}
