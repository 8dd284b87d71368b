//! Sensor node representation
//!
//! A single physical node may produce several sensor records, one per
//! cluster fingerprint. Green-power switches are endpoint-less and keyed
//! by their 32-bit source id widened into the extended address slot.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::util::make_etag;

/// Deleted-state of a sensor record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorLifecycle {
    Normal,
    Deleted,
}

/// Sensor classification.
///
/// Each variant knows the condition addresses valid for rules referencing
/// a sensor of that type (the `/state` and `/config` suffixes beyond the
/// universal set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorType {
    #[serde(rename = "ZGPSwitch")]
    ZgpSwitch,
    #[serde(rename = "ZHASwitch")]
    ZhaSwitch,
    #[serde(rename = "ZHALight")]
    ZhaLight,
    #[serde(rename = "ZHAPresence")]
    ZhaPresence,
    #[serde(rename = "CLIPOpenClose")]
    ClipOpenClose,
    #[serde(rename = "CLIPPresence")]
    ClipPresence,
    #[serde(rename = "CLIPTemperature")]
    ClipTemperature,
    #[serde(rename = "CLIPHumidity")]
    ClipHumidity,
    #[serde(rename = "CLIPGenericFlag")]
    ClipGenericFlag,
    #[serde(rename = "CLIPGenericStatus")]
    ClipGenericStatus,
    #[serde(rename = "Daylight")]
    DaylightSensor,
}

impl SensorType {
    /// External type tag as it appears in REST payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::ZgpSwitch => "ZGPSwitch",
            SensorType::ZhaSwitch => "ZHASwitch",
            SensorType::ZhaLight => "ZHALight",
            SensorType::ZhaPresence => "ZHAPresence",
            SensorType::ClipOpenClose => "CLIPOpenClose",
            SensorType::ClipPresence => "CLIPPresence",
            SensorType::ClipTemperature => "CLIPTemperature",
            SensorType::ClipHumidity => "CLIPHumidity",
            SensorType::ClipGenericFlag => "CLIPGenericFlag",
            SensorType::ClipGenericStatus => "CLIPGenericStatus",
            SensorType::DaylightSensor => "Daylight",
        }
    }

    /// Type-specific condition address suffixes, beyond the universal
    /// `/config/reachable`, `/config/on`, `/config/battery` and
    /// `/state/lastupdated`.
    #[must_use]
    pub fn condition_suffixes(&self) -> &'static [&'static str] {
        match self {
            SensorType::ZgpSwitch | SensorType::ZhaSwitch => &["/state/buttonevent"],
            SensorType::ZhaLight => &["/state/illuminance"],
            SensorType::ZhaPresence | SensorType::ClipPresence => &["/state/presence"],
            SensorType::ClipOpenClose => &["/state/open"],
            SensorType::ClipTemperature => &["/state/temperature"],
            SensorType::ClipHumidity => &["/state/humidity"],
            SensorType::ClipGenericFlag => &["/state/flag"],
            SensorType::ClipGenericStatus => &["/state/status"],
            SensorType::DaylightSensor => &[
                "/state/daylight",
                "/config/long",
                "/config/lat",
                "/config/sunriseoffset",
                "/config/sunsetoffset",
            ],
        }
    }
}

/// The tuple identifying one logical sensor on a node.
///
/// Green-power devices carry no endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorFingerprint {
    pub endpoint: Option<u8>,
    pub profile_id: u16,
    pub device_id: u16,
    #[serde(default)]
    pub in_clusters: Vec<u16>,
    #[serde(default)]
    pub out_clusters: Vec<u16>,
}

impl SensorFingerprint {
    #[must_use]
    pub fn has_in_cluster(&self, cluster_id: u16) -> bool {
        self.in_clusters.contains(&cluster_id)
    }
}

/// Sensor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub on: bool,
    pub reachable: bool,
    /// 0..100, 255 when unknown
    pub battery: u8,
    /// Occupied-to-unoccupied delay in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sunriseoffset: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sunsetoffset: Option<i32>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            on: true,
            reachable: true,
            battery: 255,
            duration: None,
            long: None,
            lat: None,
            sunriseoffset: None,
            sunsetoffset: None,
        }
    }
}

/// Sensor state as exposed over REST
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorState {
    /// UTC timestamp of the last state change, `yyyy-MM-ddTHH:mm:ss`
    #[serde(default)]
    pub lastupdated: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buttonevent: Option<u32>,
    /// Lux value; 0xFFFF marks an invalid reading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lux: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daylight: Option<bool>,
}

impl SensorState {
    /// Stamp `lastupdated` with the current UTC time.
    pub fn update_time(&mut self) {
        self.lastupdated = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    }
}

/// A sensor on the mesh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    pub id: String,
    pub name: String,
    pub ext_addr: u64,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub fingerprint: SensorFingerprint,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub sw_version: String,
    pub unique_id: String,
    pub config: SensorConfig,
    pub state: SensorState,
    pub deleted_state: SensorLifecycle,
    pub etag: String,

    #[serde(skip)]
    pub reachable: bool,
    #[serde(skip)]
    pub pending_reads: u32,
    #[serde(skip)]
    pub last_read: u64,
    #[serde(skip)]
    pub last_attribute_report_bind: u64,
    #[serde(skip)]
    pub next_read_time: Option<Instant>,
}

impl Sensor {
    #[must_use]
    pub fn new(ext_addr: u64, sensor_type: SensorType, fingerprint: SensorFingerprint) -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            ext_addr,
            sensor_type,
            fingerprint,
            manufacturer: String::new(),
            model_id: String::new(),
            sw_version: String::new(),
            unique_id: String::new(),
            config: SensorConfig::default(),
            state: SensorState::default(),
            deleted_state: SensorLifecycle::Normal,
            etag: make_etag(),
            reachable: true,
            pending_reads: 0,
            last_read: 0,
            last_attribute_report_bind: 0,
            next_read_time: None,
        }
    }

    pub fn touch_etag(&mut self) {
        self.etag = make_etag();
    }

    /// Available for rule evaluation: reachable and not deleted.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.reachable && self.deleted_state == SensorLifecycle::Normal
    }

    #[must_use]
    pub fn is_green_power(&self) -> bool {
        self.fingerprint.endpoint.is_none()
    }

    #[must_use]
    pub fn must_read(&self, flags: u32) -> bool {
        (self.pending_reads & flags) != 0
    }

    pub fn enable_read(&mut self, flags: u32) {
        self.pending_reads |= flags;
    }

    pub fn clear_read(&mut self, flags: u32) {
        self.pending_reads &= !flags;
    }

    #[must_use]
    pub fn read_due(&self) -> bool {
        match self.next_read_time {
            Some(t) => t <= Instant::now(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gp_fingerprint() -> SensorFingerprint {
        SensorFingerprint {
            endpoint: None,
            profile_id: zcl_protocol::cluster::profile::GREEN_POWER,
            device_id: 0x02,
            in_clusters: vec![],
            out_clusters: vec![zcl_protocol::cluster::id::GREEN_POWER],
        }
    }

    #[test]
    fn test_green_power_detection() {
        let sensor = Sensor::new(0x0155_4400, SensorType::ZgpSwitch, gp_fingerprint());
        assert!(sensor.is_green_power());
    }

    #[test]
    fn test_condition_suffixes() {
        assert_eq!(SensorType::ZgpSwitch.condition_suffixes(), &["/state/buttonevent"]);
        assert!(SensorType::DaylightSensor
            .condition_suffixes()
            .contains(&"/config/sunriseoffset"));
    }

    #[test]
    fn test_deleted_sensor_unavailable() {
        let mut sensor = Sensor::new(1, SensorType::ZhaLight, SensorFingerprint {
            endpoint: Some(2),
            profile_id: 0x0104,
            device_id: 0x0106,
            in_clusters: vec![zcl_protocol::cluster::id::ILLUMINANCE_MEASUREMENT],
            out_clusters: vec![],
        });
        assert!(sensor.is_available());
        sensor.deleted_state = SensorLifecycle::Deleted;
        assert!(!sensor.is_available());
    }
}
