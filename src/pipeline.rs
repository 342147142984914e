//! Decode → validate → resolve device → persist.
//!
//! Every failure ends with the message being logged and dropped; nothing is
//! retried here. Device registration and the record insert are separate
//! writes, so a failure between them leaves a device without records.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    decoder::{self, DecodeError},
    repository::{DeviceRepository, RepositoryError},
    telemetry::{Device, TelemetryRecord},
};

pub const SENSOR_DATA_TOPIC: &str = "sensor_data";
pub const LED_CONTROL_TOPIC: &str = "led_control";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("payload carries no serial number")]
    MissingSerial,

    #[error("failed to auto-register device {serial}: {source}")]
    Register {
        serial: String,
        source: RepositoryError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct Pipeline {
    repository: Arc<dyn DeviceRepository>,
}

impl Pipeline {
    pub fn new(repository: Arc<dyn DeviceRepository>) -> Self {
        Self { repository }
    }

    /// Entry point for every broker message. Never fails: errors are logged.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let payload = String::from_utf8_lossy(payload);
        log::debug!("{} <- {}", topic, payload);

        match topic {
            SENSOR_DATA_TOPIC => match self.ingest(&payload).await {
                Ok(record) => log::info!(
                    "logged data for device {} (device id {})",
                    record.serial_number,
                    record.device_id
                ),
                Err(e @ (IngestError::Decode(_) | IngestError::MissingSerial)) => {
                    log::warn!("dropping payload: {}; raw message: {}", e, payload)
                }
                Err(e) => log::error!("failed to process device data: {}", e),
            },
            LED_CONTROL_TOPIC => {
                log::info!("LED control message ignored: {}", payload);
            }
            other => log::debug!("no handler for topic {}", other),
        }
    }

    /// Ingests one `sensor_data` payload and returns the stored record.
    pub async fn ingest(&self, raw: &str) -> Result<TelemetryRecord, IngestError> {
        let mut record = decoder::decode(raw)?;
        if record.serial_number.is_empty() {
            return Err(IngestError::MissingSerial);
        }

        let device = self.resolve_device(&record.serial_number).await?;
        record.device_id = device.id;

        self.repository.create_telemetry_record(&record).await?;
        Ok(record)
    }

    async fn resolve_device(&self, serial: &str) -> Result<Device, IngestError> {
        if let Some(device) = self.repository.find_device_by_serial(serial).await? {
            return Ok(device);
        }

        let register_error = |source| IngestError::Register {
            serial: serial.to_string(),
            source,
        };

        match self
            .repository
            .create_device(Device::auto_registered(serial))
            .await
        {
            Ok(device) => {
                log::info!("auto-registered device {} with id {}", serial, device.id);
                Ok(device)
            }
            // another message registered it between our lookup and insert
            Err(e @ RepositoryError::DuplicateSerial(_)) => {
                match self.repository.find_device_by_serial(serial).await? {
                    Some(device) => Ok(device),
                    None => Err(register_error(e)),
                }
            }
            Err(e) => Err(register_error(e)),
        }
    }
}
