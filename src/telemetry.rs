use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device type assigned to units registered on first-seen telemetry.
pub const AUTO_REGISTERED: &str = "auto_registered";

/// One decoded device report, appended once to storage and never updated.
///
/// Every reading defaults to zero or empty, so a record is always complete
/// even when the device sent only part of it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TelemetryRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub device_id: i64,
    pub serial_number: String,
    pub timestamp: DateTime<Utc>,

    pub imei: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    // volts / amps
    pub supply_voltage: f64,
    pub supply_current: f64,
    pub battery_voltage: f64,
    pub panel_voltage: f64,
    pub panel_current: f64,

    // °C / %
    pub temp_room: f64,
    pub temp_battery: f64,
    pub humidity: f64,

    pub network_strength: String,
    pub sd_log_status: i64,
    pub firmware_version: String,
    pub main_loop_count: i64,

    pub latitude: f64,
    pub longitude: f64,

    pub door_open_counter: i64,
    pub is_door_sense: i64,
    pub is_ds8: i64,
    pub is_dht22: i64,

    pub sensor1: [f64; 2],
    pub sensor2: [f64; 2],
    pub sensor3: [f64; 2],

    pub created_at: DateTime<Utc>,
}

impl TelemetryRecord {
    /// Empty record captured at `now`.
    pub fn captured_at(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            created_at: now,
            ..Self::default()
        }
    }
}

/// A physical unit, keyed by its unique serial number.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Device {
    pub id: i64,
    pub device_type: String,
    pub serial_number: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Device {
    pub fn auto_registered(serial_number: &str) -> Self {
        Self {
            id: 0,
            device_type: AUTO_REGISTERED.to_string(),
            serial_number: serial_number.to_string(),
            name: String::new(),
            description: String::new(),
            status: String::from("active"),
            created_at: Utc::now(),
        }
    }
}
