use crate::config::{
    update_interval_in_range, ConfigEntry, ConfigStore, EntryData, EntryOptions,
    MAX_UPDATE_INTERVAL_SECS, MIN_UPDATE_INTERVAL_SECS,
};
use crate::error::ErrorKind;
use crate::meter_client::{ClientSettings, MeterClient};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// Field key for errors not tied to a single field.
pub const BASE: &str = "base";

/// A problem shown next to a form field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("This field is required")]
    Required,
    #[error("Error connecting to meter: {0}")]
    CannotConnect(String),
    #[error("Unexpected response from meter: {0}")]
    InvalidResponse(String),
    #[error("Not a Pstryk Energy Meter?")]
    NotEnergyMeter,
    #[error("Not a multi sensor?")]
    NotMultiSensor,
    #[error("Must be between {min} and {max}")]
    OutOfRange { min: u64, max: u64 },
}

/// Errors keyed by form field name, or [`BASE`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors(BTreeMap<&'static str, FormError>);

impl FormErrors {
    pub fn insert(&mut self, field: &'static str, error: FormError) {
        self.0.insert(field, error);
    }

    pub fn get(&self, field: &str) -> Option<&FormError> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FormError)> {
        self.0.iter().map(|(field, error)| (*field, error))
    }
}

/// Input of the setup form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupForm {
    pub name: String,
    pub host: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    AlreadyConfigured,
}

#[derive(Debug)]
pub enum FlowResult {
    CreateEntry(ConfigEntry),
    /// Show the form again with these errors
    ShowForm(FormErrors),
    Abort(AbortReason),
}

/// Validates a new meter against its `/info` endpoint.
pub struct ConfigFlow {
    settings: ClientSettings,
}

impl ConfigFlow {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }

    pub async fn submit(&self, form: SetupForm, store: &ConfigStore) -> FlowResult {
        let name = form.name.trim().to_string();
        let host = form.host.trim().to_string();

        let mut errors = FormErrors::default();
        if name.is_empty() {
            errors.insert("name", FormError::Required);
        }
        if host.is_empty() {
            errors.insert("host", FormError::Required);
        }
        if !errors.is_empty() {
            return FlowResult::ShowForm(errors);
        }

        let client = MeterClient::new(host.clone(), self.settings);
        let device = match client.fetch_info().await {
            Ok(device) => device,
            Err(err) => {
                warn!(%host, error = %err, "Meter validation failed");
                let error = match err.kind() {
                    ErrorKind::Connection | ErrorKind::Protocol => {
                        FormError::CannotConnect(err.to_string())
                    }
                    ErrorKind::Validation => FormError::InvalidResponse(err.to_string()),
                };
                errors.insert(BASE, error);
                return FlowResult::ShowForm(errors);
            }
        };

        if !device.is_energy_meter() {
            errors.insert(BASE, FormError::NotEnergyMeter);
        } else if !device.is_multi_sensor() {
            errors.insert(BASE, FormError::NotMultiSensor);
        }
        if !errors.is_empty() {
            return FlowResult::ShowForm(errors);
        }

        if store.contains_unique_id(&device.serial) {
            info!(serial = %device.serial, "Meter is already configured");
            return FlowResult::Abort(AbortReason::AlreadyConfigured);
        }

        let title = device.product.clone().unwrap_or_default();
        FlowResult::CreateEntry(ConfigEntry::new(title, device.serial, EntryData { name, host }))
    }
}

/// Validates the options form.
pub struct OptionsFlow;

impl OptionsFlow {
    pub fn submit(update_interval: i64) -> Result<EntryOptions, FormErrors> {
        let in_range = u64::try_from(update_interval)
            .ok()
            .filter(|secs| update_interval_in_range(*secs));
        match in_range {
            Some(update_interval) => Ok(EntryOptions { update_interval }),
            None => {
                let mut errors = FormErrors::default();
                errors.insert(
                    "update_interval",
                    FormError::OutOfRange {
                        min: MIN_UPDATE_INTERVAL_SECS,
                        max: MAX_UPDATE_INTERVAL_SECS,
                    },
                );
                Err(errors)
            }
        }
    }
}
