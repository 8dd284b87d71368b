//! Light node representation

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::util::make_etag;

/// Lifecycle of a light record. Lights are never removed from memory;
/// reachability toggles instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightLifecycle {
    Normal,
    Deleted,
}

/// Color mode currently steering the light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Hs,
    Xy,
    Ct,
}

/// Group membership state of a light as the gateway believes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMembership {
    InGroup,
    NotInGroup,
}

/// Pending membership actions, one bit each
pub mod group_actions {
    pub const ADD_TO_GROUP: u8 = 0x01;
    pub const REMOVE_FROM_GROUP: u8 = 0x02;
}

/// A light's view of one group: membership state, pending actions and the
/// scene bookkeeping for that group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: u16,
    pub state: GroupMembership,
    /// Bitmask of `group_actions`
    pub actions: u8,
    /// Scenes to store on the device
    #[serde(default)]
    pub add_scenes: Vec<u8>,
    /// Scenes to remove from the device
    #[serde(default)]
    pub remove_scenes: Vec<u8>,
    /// Scenes whose stored light state must be rewritten
    #[serde(default)]
    pub modify_scenes: Vec<u8>,
    /// Scene count the device reported for this group
    #[serde(default)]
    pub scene_count: u8,
}

impl GroupInfo {
    #[must_use]
    pub fn new(id: u16) -> Self {
        Self {
            id,
            state: GroupMembership::InGroup,
            actions: 0,
            add_scenes: Vec::new(),
            remove_scenes: Vec::new(),
            modify_scenes: Vec::new(),
            scene_count: 0,
        }
    }
}

/// A light (or mains outlet) on the mesh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightNode {
    pub id: String,
    pub name: String,
    pub ext_addr: u64,
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub manufacturer_code: u16,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub sw_build_id: String,
    pub unique_id: String,
    pub state: LightLifecycle,

    // cluster state
    pub on: bool,
    pub level: u8,
    pub hue: u8,
    pub enhanced_hue: u16,
    pub saturation: u8,
    pub color_x: u16,
    pub color_y: u16,
    pub color_temperature: u16,
    pub color_mode: ColorMode,
    pub color_loop_active: bool,
    pub color_loop_speed: u8,

    // capacity bookkeeping mirroring the ZCL view
    pub group_capacity: u8,
    pub group_count: u8,
    pub scene_capacity: u8,
    pub groups: Vec<GroupInfo>,

    pub reachable: bool,
    pub etag: String,

    // synchronizer bookkeeping, not persisted
    #[serde(skip)]
    pub pending_reads: u32,
    #[serde(skip)]
    pub last_read: u64,
    #[serde(skip)]
    pub last_attribute_report_bind: u64,
    #[serde(skip)]
    pub next_read_time: Option<Instant>,
}

impl LightNode {
    #[must_use]
    pub fn new(ext_addr: u64, endpoint: u8, profile_id: u16, device_id: u16) -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            ext_addr,
            endpoint,
            profile_id,
            device_id,
            manufacturer: String::new(),
            manufacturer_code: 0,
            model_id: String::new(),
            sw_build_id: String::new(),
            unique_id: String::new(),
            state: LightLifecycle::Normal,
            on: false,
            level: 0,
            hue: 0,
            enhanced_hue: 0,
            saturation: 0,
            color_x: 0,
            color_y: 0,
            color_temperature: 0,
            color_mode: ColorMode::Hs,
            color_loop_active: false,
            color_loop_speed: 15,
            group_capacity: 255,
            group_count: 0,
            scene_capacity: 255,
            groups: Vec::new(),
            reachable: true,
            etag: make_etag(),
            pending_reads: 0,
            last_read: 0,
            last_attribute_report_bind: 0,
            next_read_time: None,
        }
    }

    pub fn touch_etag(&mut self) {
        self.etag = make_etag();
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

    /// True once `next_read_time` has passed (or was never set).
    #[must_use]
    pub fn read_due(&self) -> bool {
        match self.next_read_time {
            Some(t) => t <= Instant::now(),
            None => true,
        }
    }

    #[must_use]
    pub fn group_info(&self, group_id: u16) -> Option<&GroupInfo> {
        self.groups.iter().find(|g| g.id == group_id)
    }

    pub fn group_info_mut(&mut self, group_id: u16) -> Option<&mut GroupInfo> {
        self.groups.iter_mut().find(|g| g.id == group_id)
    }

    /// True when the gateway believes the light is in the group.
    #[must_use]
    pub fn is_in_group(&self, group_id: u16) -> bool {
        self.group_info(group_id)
            .is_some_and(|g| g.state == GroupMembership::InGroup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_flags() {
        use crate::util::read_flags;

        let mut light = LightNode::new(0xAA, 1, 0x0104, 0x0100);
        assert!(!light.must_read(read_flags::ON_OFF));
        light.enable_read(read_flags::ON_OFF | read_flags::LEVEL);
        assert!(light.must_read(read_flags::ON_OFF));
        light.clear_read(read_flags::ON_OFF);
        assert!(!light.must_read(read_flags::ON_OFF));
        assert!(light.must_read(read_flags::LEVEL));
    }

    #[test]
    fn test_group_membership() {
        let mut light = LightNode::new(0xAA, 1, 0x0104, 0x0100);
        light.groups.push(GroupInfo::new(4));
        assert!(light.is_in_group(4));
        light.group_info_mut(4).unwrap().state = GroupMembership::NotInGroup;
        assert!(!light.is_in_group(4));
    }
}
