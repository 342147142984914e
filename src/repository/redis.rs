//! Redis-backed storage.
//!
//! Layout:
//! - `device:{serial}` hash per device, ids drawn from `devices:seq`
//! - `telemetry:{serial}` append-only list of JSON records, ids from `telemetry:seq`
//! - `{reading}:{serial}` RedisTimeSeries per numeric reading

use std::{
    collections::{HashMap, HashSet},
    future::Future,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fred::{
    prelude::*,
    types::{DuplicatePolicy, Encoding, Timestamp},
};
use futures_util::future::try_join_all;
use tokio::sync::Mutex;

use super::{DeviceRepository, RepositoryError};
use crate::telemetry::{Device, TelemetryRecord};

const DEVICE_SEQ: &str = "devices:seq";
const RECORD_SEQ: &str = "telemetry:seq";
const RETENTION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

pub struct RedisRepository {
    client: RedisClient,
    known_series: Mutex<HashSet<String>>,
}

impl RedisRepository {
    pub async fn connect(url: &str) -> Result<Self, RepositoryError> {
        let config = RedisConfig::from_url(url)?;
        let client = Builder::from_config(config).build()?;
        client.init().await?;

        Ok(Self {
            client,
            known_series: Mutex::new(HashSet::new()),
        })
    }

    async fn ensure_series(&self, serial: &str, reading: &str) -> Result<String, RepositoryError> {
        let key = series_key(reading, serial);

        if self.known_series.lock().await.contains(&key) {
            return Ok(key);
        }
        let exists: bool = self.client.exists(&key).await?;
        if !exists {
            log::info!("creating timeseries {}", key);
            let labels = HashMap::from([("serial", serial), ("reading", reading)]);
            let created: Result<(), RedisError> = self
                .client
                .ts_create(
                    &key,
                    Some(RETENTION_MS),
                    Some(Encoding::Compressed),
                    None,
                    Some(DuplicatePolicy::Last),
                    labels,
                )
                .await;
            // another task may have created it in the meantime
            if let Err(e) = created {
                let exists: bool = self.client.exists(&key).await?;
                if !exists {
                    return Err(e.into());
                }
            }
        }
        self.known_series.lock().await.insert(key.clone());

        Ok(key)
    }

    async fn add_samples(&self, record: &TelemetryRecord) -> Result<(), RepositoryError> {
        let readings = readings(record);
        let keys = try_join_all(
            readings
                .iter()
                .map(|(reading, _)| self.ensure_series(&record.serial_number, reading)),
        )
        .await?;

        let ts = Timestamp::from(record.timestamp.timestamp_millis());
        let samples: Vec<(RedisKey, Timestamp, f64)> = keys
            .into_iter()
            .zip(readings)
            .map(|(key, (_, value))| (RedisKey::from(key), ts.clone(), value))
            .collect();

        let _: () = self.client.ts_madd(samples).await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceRepository for RedisRepository {
    async fn find_device_by_serial(
        &self,
        serial: &str,
    ) -> Result<Option<Device>, RepositoryError> {
        let fields: HashMap<String, String> = self.client.hgetall(device_key(serial)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        Ok(Some(device_from_fields(serial, &fields)))
    }

    async fn create_device(&self, mut device: Device) -> Result<Device, RepositoryError> {
        let key = device_key(&device.serial_number);
        let id: i64 = self.client.incr(DEVICE_SEQ).await?;

        let claimed: bool = self.client.hsetnx(&key, "id", id).await?;
        if !claimed {
            return Err(RepositoryError::DuplicateSerial(device.serial_number));
        }

        device.id = id;
        let _: () = self.client.hset(&key, device_fields(&device)).await?;

        Ok(device)
    }

    async fn create_telemetry_record(
        &self,
        record: &TelemetryRecord,
    ) -> Result<(), RepositoryError> {
        let mut record = record.clone();
        let id: i64 = self.client.incr(RECORD_SEQ).await?;
        record.id = Some(id);

        let body = serde_json::to_string(&record)?;
        let append = async {
            let _: () = self
                .client
                .rpush(telemetry_key(&record.serial_number), body)
                .await?;
            Ok::<(), RepositoryError>(())
        };

        append_then_index(&record.serial_number, append, self.add_samples(&record)).await
    }

    async fn records_by_serial(
        &self,
        serial: &str,
    ) -> Result<Vec<TelemetryRecord>, RepositoryError> {
        let bodies: Vec<String> = self.client.lrange(telemetry_key(serial), 0, -1).await?;
        let mut records = bodies
            .iter()
            .map(|body| serde_json::from_str::<TelemetryRecord>(body))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|r| r.timestamp);
        records.reverse();

        Ok(records)
    }
}

/// The list append is the record of truth: once it succeeds the record is
/// stored, and a failed time-series write is only logged.
async fn append_then_index<A, I>(serial: &str, append: A, index: I) -> Result<(), RepositoryError>
where
    A: Future<Output = Result<(), RepositoryError>>,
    I: Future<Output = Result<(), RepositoryError>>,
{
    append.await?;
    if let Err(e) = index.await {
        log::warn!("stored record for {} but failed to update its time series: {}", serial, e);
    }
    Ok(())
}

fn device_key(serial: &str) -> String {
    format!("device:{}", serial)
}

fn telemetry_key(serial: &str) -> String {
    format!("telemetry:{}", serial)
}

fn series_key(reading: &str, serial: &str) -> String {
    format!("{}:{}", reading, serial)
}

fn readings(record: &TelemetryRecord) -> Vec<(&'static str, f64)> {
    vec![
        ("supply_voltage", record.supply_voltage),
        ("supply_current", record.supply_current),
        ("battery_voltage", record.battery_voltage),
        ("panel_voltage", record.panel_voltage),
        ("panel_current", record.panel_current),
        ("temp_room", record.temp_room),
        ("temp_battery", record.temp_battery),
        ("humidity", record.humidity),
    ]
}

fn device_fields(device: &Device) -> HashMap<&'static str, String> {
    HashMap::from([
        ("id", device.id.to_string()),
        ("device_type", device.device_type.clone()),
        ("serial_number", device.serial_number.clone()),
        ("name", device.name.clone()),
        ("description", device.description.clone()),
        ("status", device.status.clone()),
        ("created_at", device.created_at.to_rfc3339()),
    ])
}

fn device_from_fields(serial: &str, fields: &HashMap<String, String>) -> Device {
    let text = |name: &str| fields.get(name).cloned().unwrap_or_default();

    Device {
        id: fields.get("id").and_then(|v| v.parse().ok()).unwrap_or_default(),
        device_type: text("device_type"),
        serial_number: serial.to_string(),
        name: text("name"),
        description: text("description"),
        status: text("status"),
        created_at: fields
            .get("created_at")
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default(),
    }
}
