use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DeviceRepository, RepositoryError};
use crate::telemetry::{Device, TelemetryRecord};

#[derive(Default)]
struct Store {
    devices: HashMap<String, Device>,
    records: Vec<TelemetryRecord>,
}

/// In-process store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryRepository {
    store: RwLock<Store>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn device_count(&self) -> usize {
        self.store.read().await.devices.len()
    }

    pub async fn record_count(&self) -> usize {
        self.store.read().await.records.len()
    }
}

#[async_trait]
impl DeviceRepository for MemoryRepository {
    async fn find_device_by_serial(
        &self,
        serial: &str,
    ) -> Result<Option<Device>, RepositoryError> {
        Ok(self.store.read().await.devices.get(serial).cloned())
    }

    async fn create_device(&self, mut device: Device) -> Result<Device, RepositoryError> {
        let mut store = self.store.write().await;
        if store.devices.contains_key(&device.serial_number) {
            return Err(RepositoryError::DuplicateSerial(device.serial_number));
        }

        device.id = store.devices.len() as i64 + 1;
        store
            .devices
            .insert(device.serial_number.clone(), device.clone());

        Ok(device)
    }

    async fn create_telemetry_record(
        &self,
        record: &TelemetryRecord,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        let mut record = record.clone();
        record.id = Some(store.records.len() as i64 + 1);
        store.records.push(record);

        Ok(())
    }

    async fn records_by_serial(
        &self,
        serial: &str,
    ) -> Result<Vec<TelemetryRecord>, RepositoryError> {
        let store = self.store.read().await;
        let mut records: Vec<_> = store
            .records
            .iter()
            .filter(|r| r.serial_number == serial)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        records.reverse();

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(serial: &str, minute: u32) -> TelemetryRecord {
        TelemetryRecord {
            serial_number: serial.to_string(),
            ..TelemetryRecord::captured_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap())
        }
    }

    #[tokio::test]
    async fn create_assigns_ids_and_rejects_duplicates() {
        let repo = MemoryRepository::new();

        let first = repo.create_device(Device::auto_registered("a")).await.unwrap();
        let second = repo.create_device(Device::auto_registered("b")).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        let err = repo
            .create_device(Device::auto_registered("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::DuplicateSerial(s) if s == "a"));
        assert_eq!(repo.device_count().await, 2);
    }

    #[tokio::test]
    async fn find_by_serial() {
        let repo = MemoryRepository::new();
        repo.create_device(Device::auto_registered("a")).await.unwrap();

        assert_eq!(
            repo.find_device_by_serial("a").await.unwrap().map(|d| d.id),
            Some(1)
        );
        assert!(repo.find_device_by_serial("zz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn records_are_returned_newest_first() {
        let repo = MemoryRepository::new();
        repo.create_telemetry_record(&record("a", 1)).await.unwrap();
        repo.create_telemetry_record(&record("b", 2)).await.unwrap();
        repo.create_telemetry_record(&record("a", 3)).await.unwrap();

        let records = repo.records_by_serial("a").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, Some(3));
        assert_eq!(records[1].id, Some(1));

        let latest = repo.latest_record("a").await.unwrap().unwrap();
        assert_eq!(latest.id, Some(3));
        assert!(repo.latest_record("c").await.unwrap().is_none());
    }
}
