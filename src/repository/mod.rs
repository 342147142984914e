pub mod memory;
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

use crate::telemetry::{Device, TelemetryRecord};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("a device with serial number {0:?} already exists")]
    DuplicateSerial(String),

    #[error("redis: {0}")]
    Redis(#[from] fred::error::RedisError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Device and telemetry storage.
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// `Ok(None)` when no device has this serial number.
    async fn find_device_by_serial(&self, serial: &str)
        -> Result<Option<Device>, RepositoryError>;

    /// Stores `device` and returns it with its assigned id.
    async fn create_device(&self, device: Device) -> Result<Device, RepositoryError>;

    /// Appends one record to the device's telemetry log.
    async fn create_telemetry_record(&self, record: &TelemetryRecord)
        -> Result<(), RepositoryError>;

    /// All records for a serial number, newest first.
    async fn records_by_serial(&self, serial: &str)
        -> Result<Vec<TelemetryRecord>, RepositoryError>;

    async fn latest_record(&self, serial: &str)
        -> Result<Option<TelemetryRecord>, RepositoryError> {
        Ok(self.records_by_serial(serial).await?.into_iter().next())
    }
}
