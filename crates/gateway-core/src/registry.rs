//! Node registry
//!
//! Sole owner of the lights, sensors, groups and scenes known to the
//! gateway, plus the radio-side node table. Every cross-reference between
//! entities is a weak id resolved through a lookup here.

use std::collections::HashMap;

use tracing::{debug, info};
use zcl_protocol::cluster::{device, id, profile};
use zcl_protocol::green_power::GpCommissioning;
use zcl_protocol::{format_ext_addr, format_unique_id, SimpleDescriptor};

use crate::group::{Group, GroupState};
use crate::light::LightNode;
use crate::node::NodeInfo;
use crate::persistence::dirty;
use crate::sensor::{Sensor, SensorFingerprint, SensorLifecycle, SensorType};
use crate::util::{next_free_id, read_flags};

/// Known manufacturer codes
pub mod vendor {
    pub const DDEL: u16 = 0x1135;
    pub const ATMEL: u16 = 0x1014;
    pub const OSRAM: u16 = 0x110C;
    pub const OSRAM_STACK: u16 = 0xBBAA;
    pub const PHILIPS: u16 = 0x100B;
    pub const UBISYS: u16 = 0x10F2;
    pub const BUSCH_JAEGER: u16 = 0x112E;
    pub const BEGA: u16 = 0x1105;
}

/// Reads scheduled when a light is first seen or comes back
const LIGHT_DISCOVERY_READS: u32 = read_flags::VENDOR_NAME
    | read_flags::MODEL_ID
    | read_flags::SWBUILD_ID
    | read_flags::COLOR
    | read_flags::LEVEL
    | read_flags::ON_OFF
    | read_flags::GROUPS
    | read_flags::SCENES
    | read_flags::BINDING_TABLE;

/// The registry of all gateway-owned entities
#[derive(Default)]
pub struct Registry {
    pub lights: Vec<LightNode>,
    pub sensors: Vec<Sensor>,
    pub groups: Vec<Group>,
    nodes: HashMap<u64, NodeInfo>,
    /// Dirty persistence categories, see [`crate::persistence::dirty`]
    pub dirty: u32,
    /// Remaining seconds of the permit-join window
    pub permit_join: u64,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&mut self, categories: u32) {
        self.dirty |= categories;
    }

    // --- node table ---

    pub fn upsert_node(&mut self, node: NodeInfo) {
        self.nodes.insert(node.ext_addr, node);
    }

    #[must_use]
    pub fn node(&self, ext_addr: u64) -> Option<&NodeInfo> {
        self.nodes.get(&ext_addr)
    }

    pub fn node_mut(&mut self, ext_addr: u64) -> Option<&mut NodeInfo> {
        self.nodes.get_mut(&ext_addr)
    }

    /// Number of application endpoints a node exposes; group capacity is
    /// consumed once per endpoint when a node joins a group.
    #[must_use]
    pub fn endpoint_count(&self, ext_addr: u64) -> u8 {
        self.nodes
            .get(&ext_addr)
            .map_or(1, |n| n.active_endpoints.len().max(1) as u8)
    }

    // --- lookups ---

    #[must_use]
    pub fn light_for_id(&self, id: &str) -> Option<&LightNode> {
        self.lights.iter().find(|l| l.id == id)
    }

    pub fn light_for_id_mut(&mut self, id: &str) -> Option<&mut LightNode> {
        self.lights.iter_mut().find(|l| l.id == id)
    }

    #[must_use]
    pub fn light_for_address(&self, ext_addr: u64, endpoint: u8) -> Option<&LightNode> {
        self.lights
            .iter()
            .find(|l| l.ext_addr == ext_addr && l.endpoint == endpoint)
    }

    pub fn light_for_address_mut(&mut self, ext_addr: u64, endpoint: u8) -> Option<&mut LightNode> {
        self.lights
            .iter_mut()
            .find(|l| l.ext_addr == ext_addr && l.endpoint == endpoint)
    }

    /// Any light record on the extended address, endpoint ignored.
    #[must_use]
    pub fn first_light_for_ext(&self, ext_addr: u64) -> Option<&LightNode> {
        self.lights.iter().find(|l| l.ext_addr == ext_addr)
    }

    #[must_use]
    pub fn sensor_for_id(&self, id: &str) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.id == id)
    }

    pub fn sensor_for_id_mut(&mut self, id: &str) -> Option<&mut Sensor> {
        self.sensors.iter_mut().find(|s| s.id == id)
    }

    /// First sensor on the extended address (green-power lookups).
    #[must_use]
    pub fn sensor_for_address(&self, ext_addr: u64) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.ext_addr == ext_addr)
    }

    pub fn sensor_for_address_mut(&mut self, ext_addr: u64) -> Option<&mut Sensor> {
        self.sensors.iter_mut().find(|s| s.ext_addr == ext_addr)
    }

    #[must_use]
    pub fn sensor_for_fingerprint(
        &self,
        ext_addr: u64,
        fingerprint: &SensorFingerprint,
        sensor_type: SensorType,
    ) -> Option<usize> {
        self.sensors.iter().position(|s| {
            s.ext_addr == ext_addr
                && s.sensor_type == sensor_type
                && s.fingerprint == *fingerprint
        })
    }

    #[must_use]
    pub fn group_for_address(&self, address: u16) -> Option<&Group> {
        self.groups.iter().find(|g| g.address == address)
    }

    pub fn group_for_address_mut(&mut self, address: u16) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.address == address)
    }

    #[must_use]
    pub fn group_for_id(&self, id: &str) -> Option<&Group> {
        id.parse().ok().and_then(|addr| self.group_for_address(addr))
    }

    pub fn group_for_id_mut(&mut self, id: &str) -> Option<&mut Group> {
        match id.parse() {
            Ok(addr) => self.group_for_address_mut(addr),
            Err(_) => None,
        }
    }

    #[must_use]
    pub fn free_light_id(&self) -> String {
        next_free_id(self.lights.iter().map(|l| l.id.as_str()))
    }

    #[must_use]
    pub fn free_sensor_id(&self) -> String {
        next_free_id(self.sensors.iter().map(|s| s.id.as_str()))
    }

    // --- light admission ---

    /// Whether a simple descriptor describes a device admitted as a light.
    ///
    /// The ZLL color controller needs both a color and a level cluster on
    /// endpoint 0x01 to be taken as a light (detects a vendor 4-key switch
    /// which announces that device id).
    #[must_use]
    fn admit_light(sd: &SimpleDescriptor) -> bool {
        if sd.in_clusters.is_empty() {
            return false;
        }

        match sd.profile_id {
            profile::HOME_AUTOMATION => match sd.device_id {
                device::MAINS_POWER_OUTLET
                | device::HA_ONOFF_LIGHT
                | device::ONOFF_OUTPUT
                | device::HA_DIMMABLE_LIGHT
                | device::HA_COLOR_DIMMABLE_LIGHT
                | device::ZLL_ONOFF_PLUGIN_UNIT
                | device::ZLL_ONOFF_SENSOR
                | device::ZLL_DIMMABLE_PLUGIN_UNIT
                | device::ZLL_COLOR_LIGHT
                | device::ZLL_EXTENDED_COLOR_LIGHT
                | device::ZLL_COLOR_TEMPERATURE_LIGHT => true,
                device::ZLL_COLOR_CONTROLLER => {
                    sd.endpoint == 0x01
                        && sd.has_in_cluster(id::COLOR_CONTROL)
                        && sd.has_in_cluster(id::LEVEL_CONTROL)
                }
                _ => {
                    debug!("Unsupported HA deviceId {:#06X}", sd.device_id);
                    false
                }
            },
            profile::ZLL => matches!(
                sd.device_id,
                device::ZLL_COLOR_LIGHT
                    | device::ZLL_EXTENDED_COLOR_LIGHT
                    | device::ZLL_COLOR_TEMPERATURE_LIGHT
                    | device::ZLL_DIMMABLE_LIGHT
                    | device::ZLL_DIMMABLE_PLUGIN_UNIT
                    | device::ZLL_ONOFF_LIGHT
                    | device::ZLL_ONOFF_PLUGIN_UNIT
                    | device::ZLL_ONOFF_SENSOR
            ),
            _ => false,
        }
    }

    /// Add or refresh light records for every admitted endpoint of a node.
    ///
    /// Returns the ids of lights that were created or refreshed.
    pub fn add_light_node(&mut self, node: &NodeInfo, idle_counter: u64) -> Vec<String> {
        let mut touched = Vec::new();

        for sd in &node.simple_descriptors {
            if let Some(light) = self.light_for_address_mut(node.ext_addr, sd.endpoint) {
                light.manufacturer_code = node.manufacturer_code;

                if !light.reachable {
                    // the node existed before, refresh all with new values
                    info!("LightNode {}: {} updated", light.id, light.name);
                    light.reachable = true;
                    light.enable_read(LIGHT_DISCOVERY_READS);
                    light.last_read = idle_counter;
                    light.touch_etag();
                }

                if light.unique_id.is_empty() || light.unique_id.starts_with("0x") {
                    light.unique_id = format_unique_id(light.ext_addr, light.endpoint);
                    light.touch_etag();
                }

                touched.push(light.id.clone());
                continue;
            }

            if !Self::admit_light(sd) {
                continue;
            }

            let mut light = LightNode::new(node.ext_addr, sd.endpoint, sd.profile_id, sd.device_id);
            light.manufacturer_code = node.manufacturer_code;
            light.unique_id = format_unique_id(node.ext_addr, sd.endpoint);
            light.id = self.free_light_id();
            light.name = format!("Light {}", light.id);
            if sd.device_id == device::ZLL_COLOR_CONTROLLER {
                light.on = true;
            }
            light.enable_read(LIGHT_DISCOVERY_READS);
            light.last_read = idle_counter;
            light.last_attribute_report_bind = idle_counter;

            info!("LightNode {}: {} added", light.id, light.name);
            touched.push(light.id.clone());
            self.lights.push(light);
            self.mark_dirty(dirty::LIGHTS);
        }

        touched
    }

    // --- sensor admission ---

    /// Scan a node's descriptors for sensor fingerprints and admit them.
    pub fn add_sensor_node(&mut self, node: &NodeInfo, idle_counter: u64) {
        for sd in &node.simple_descriptors {
            let mut fp_switch = SensorFingerprint {
                endpoint: Some(sd.endpoint),
                profile_id: sd.profile_id,
                device_id: sd.device_id,
                in_clusters: Vec::new(),
                out_clusters: Vec::new(),
            };
            let mut fp_light = fp_switch.clone();
            let mut fp_presence = fp_switch.clone();

            for &cluster in &sd.out_clusters {
                if matches!(cluster, id::ON_OFF | id::LEVEL_CONTROL | id::SCENES) {
                    fp_switch.out_clusters.push(cluster);
                }
            }

            for &cluster in &sd.in_clusters {
                match cluster {
                    id::BASIC | id::COMMISSIONING | id::ON_OFF_SWITCH_CONFIG => {
                        fp_switch.in_clusters.push(cluster);
                    }
                    id::OCCUPANCY_SENSING => fp_presence.in_clusters.push(cluster),
                    id::ILLUMINANCE_MEASUREMENT | id::ILLUMINANCE_LEVEL_SENSING => {
                        fp_light.in_clusters.push(cluster);
                    }
                    _ => {}
                }
            }

            if fp_switch.has_in_cluster(id::ON_OFF_SWITCH_CONFIG) || !fp_switch.out_clusters.is_empty()
            {
                self.admit_sensor(node, fp_switch, SensorType::ZhaSwitch, idle_counter);
            }

            if !fp_light.in_clusters.is_empty() {
                self.admit_sensor(node, fp_light, SensorType::ZhaLight, idle_counter);
            }

            if !fp_presence.in_clusters.is_empty() {
                let idx = self.admit_sensor(node, fp_presence, SensorType::ZhaPresence, idle_counter);
                let sensor = &mut self.sensors[idx];
                if !sensor.must_read(read_flags::OCCUPANCY_CONFIG) {
                    sensor.enable_read(read_flags::OCCUPANCY_CONFIG);
                    sensor.last_read = idle_counter;
                }
            }
        }
    }

    fn admit_sensor(
        &mut self,
        node: &NodeInfo,
        fingerprint: SensorFingerprint,
        sensor_type: SensorType,
        idle_counter: u64,
    ) -> usize {
        if let Some(idx) = self.sensor_for_fingerprint(node.ext_addr, &fingerprint, sensor_type) {
            self.check_sensor_reachable(idx, idle_counter);
            return idx;
        }

        let mut sensor = Sensor::new(node.ext_addr, sensor_type, fingerprint);
        sensor.unique_id = format_ext_addr(node.ext_addr);
        sensor.manufacturer = manufacturer_name(node.manufacturer_code).to_string();
        sensor.id = self.free_sensor_id();
        sensor.name = match sensor_type {
            SensorType::ZhaSwitch => format!("Switch {}", sensor.id),
            other => format!("{} {}", other.as_str(), sensor.id),
        };

        sensor.enable_read(read_flags::BINDING_TABLE);
        sensor.last_read = idle_counter;
        for &cluster in &sensor.fingerprint.in_clusters.clone() {
            match cluster {
                id::OCCUPANCY_SENSING => sensor.enable_read(read_flags::OCCUPANCY_CONFIG),
                id::COMMISSIONING => sensor.enable_read(read_flags::GROUP_IDENTIFIERS),
                id::BASIC => sensor.enable_read(read_flags::MODEL_ID | read_flags::VENDOR_NAME),
                _ => {}
            }
        }

        info!("SensorNode {}: {} added", sensor.id, sensor.name);
        sensor.touch_etag();
        self.sensors.push(sensor);
        self.mark_dirty(dirty::SENSORS);
        self.sensors.len() - 1
    }

    /// Admit a green-power switch from a commissioning frame.
    ///
    /// Only the on/off switch device id is accepted. A deleted record is
    /// revived in place.
    pub fn add_gp_sensor(&mut self, gpd_src_id: u32, commissioning: &GpCommissioning) {
        let fingerprint = SensorFingerprint {
            endpoint: None,
            profile_id: profile::GREEN_POWER,
            device_id: u16::from(commissioning.device_id),
            in_clusters: Vec::new(),
            out_clusters: vec![id::GREEN_POWER],
        };

        let ext_addr = u64::from(gpd_src_id);

        if let Some(idx) =
            self.sensor_for_fingerprint(ext_addr, &fingerprint, SensorType::ZgpSwitch)
        {
            let sensor = &mut self.sensors[idx];
            if sensor.deleted_state == SensorLifecycle::Deleted {
                sensor.deleted_state = SensorLifecycle::Normal;
                info!("SensorNode {}: {} reactivated", sensor.id, sensor.name);
                sensor.touch_etag();
                self.mark_dirty(dirty::SENSORS);
            } else {
                debug!("SensorNode {} already known", sensor.name);
            }
            return;
        }

        if commissioning.device_id != device::GP_ONOFF_SWITCH {
            info!("unsupported green power device {:#04X}", commissioning.device_id);
            return;
        }

        let mut sensor = Sensor::new(ext_addr, SensorType::ZgpSwitch, fingerprint);
        sensor.model_id = "ZGPSWITCH".to_string();
        sensor.manufacturer = "Philips".to_string();
        sensor.sw_version = "1.0".to_string();
        sensor.unique_id = format_ext_addr(ext_addr);
        sensor.id = self.free_sensor_id();
        sensor.name = format!("{} {}", sensor.sensor_type.as_str(), sensor.id);
        sensor.touch_etag();

        info!("SensorNode {}: {} added", sensor.id, sensor.name);
        self.sensors.push(sensor);
        self.mark_dirty(dirty::SENSORS);
    }

    // --- reachability ---

    /// Recompute a sensor's reachability from the node table.
    ///
    /// A sensor is reachable iff it has no fingerprint endpoint (green
    /// power) or its endpoint is active on a non-zombie node. Returns true
    /// when anything changed.
    pub fn check_sensor_reachable(&mut self, idx: usize, idle_counter: u64) -> bool {
        let permit_join = self.permit_join;
        let Some(sensor) = self.sensors.get(idx) else {
            return false;
        };

        let reachable = match sensor.fingerprint.endpoint {
            None => true,
            Some(ep) => self
                .nodes
                .get(&sensor.ext_addr)
                .is_some_and(|n| !n.zombie && n.has_active_endpoint(ep)),
        };

        let sensor = &mut self.sensors[idx];
        let mut updated = false;

        if sensor.config.reachable != reachable {
            sensor.config.reachable = reachable;
            updated = true;
        }

        if reachable {
            if !sensor.reachable {
                info!("SensorNode id: {} ({}) available", sensor.id, sensor.name);
                sensor.reachable = true;
                sensor.enable_read(read_flags::BINDING_TABLE);
                sensor.last_read = idle_counter;
                updated = true;
            }

            if sensor.deleted_state == SensorLifecycle::Deleted && permit_join > 0 {
                info!("Rediscovered deleted SensorNode {}", sensor.id);
                sensor.deleted_state = SensorLifecycle::Normal;
                sensor.enable_read(
                    read_flags::BINDING_TABLE
                        | read_flags::GROUP_IDENTIFIERS
                        | read_flags::MODEL_ID
                        | read_flags::VENDOR_NAME,
                );
                sensor.last_read = idle_counter;
                updated = true;
            }
        } else if sensor.reachable {
            info!("SensorNode id: {} ({}) no longer available", sensor.id, sensor.name);
            sensor.reachable = false;
            updated = true;
        }

        if updated {
            sensor.touch_etag();
            self.mark_dirty(dirty::SENSORS);
        }

        updated
    }

    /// Apply a node zombie flip to lights and sensors on that address.
    pub fn node_zombie_changed(&mut self, ext_addr: u64, zombie: bool, idle_counter: u64) {
        if let Some(node) = self.nodes.get_mut(&ext_addr) {
            node.zombie = zombie;
        }

        let endpoints: Vec<u8> = self
            .nodes
            .get(&ext_addr)
            .map(|n| n.active_endpoints.clone())
            .unwrap_or_default();

        for light in self.lights.iter_mut().filter(|l| l.ext_addr == ext_addr) {
            let mut available = !zombie;
            if available && !endpoints.contains(&light.endpoint) {
                available = false;
            }
            if light.reachable != available {
                light.reachable = available;
                light.touch_etag();
            }
        }

        let sensor_indices: Vec<usize> = self
            .sensors
            .iter()
            .enumerate()
            .filter(|(_, s)| s.ext_addr == ext_addr)
            .map(|(i, _)| i)
            .collect();
        for idx in sensor_indices {
            self.check_sensor_reachable(idx, idle_counter);
        }
    }

    /// Mark all lights of a removed node unavailable. The records stay.
    pub fn node_removed(&mut self, ext_addr: u64) {
        for light in self.lights.iter_mut().filter(|l| l.ext_addr == ext_addr) {
            info!("LightNode removed {:#018X}", ext_addr);
            light.reachable = false;
            light.touch_etag();
        }
        self.nodes.remove(&ext_addr);
    }

    /// Ensure a group reported by a device exists in the global table.
    pub fn found_group(&mut self, group_id: u16) -> &mut Group {
        if let Some(pos) = self.groups.iter().position(|g| g.address == group_id) {
            return &mut self.groups[pos];
        }

        let mut group = Group::new(group_id);
        group.name = format!("Group {group_id}");
        self.groups.push(group);
        self.mark_dirty(dirty::GROUPS);
        self.groups.last_mut().expect("just pushed")
    }
}

/// Resolve a manufacturer code into a display name, empty when unknown.
#[must_use]
pub fn manufacturer_name(code: u16) -> &'static str {
    match code {
        vendor::DDEL => "dresden elektronik",
        vendor::OSRAM | vendor::OSRAM_STACK => "OSRAM",
        vendor::PHILIPS => "Philips",
        vendor::UBISYS => "Ubisys",
        vendor::BUSCH_JAEGER => "Busch Jaeger",
        vendor::BEGA => "BEGA Gantenbrink-Leuchten KG",
        _ => "",
    }
}
