//! Groups and scenes

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::util::make_etag;

/// Group lifecycle.
///
/// `DeleteFromDb` is a terminal marker for switch-authored groups that were
/// superseded and may be purged from persistent storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Normal,
    Deleted,
    DeleteFromDb,
}

/// Scene lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneState {
    Normal,
    Deleted,
}

/// Per-light state stored in a scene
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightState {
    /// Light id
    pub lid: String,
    pub on: bool,
    pub bri: u8,
    pub x: u16,
    pub y: u16,
    pub colorloop_active: bool,
    /// Seconds for a whole colorloop cycle
    pub colorloop_time: u8,
    /// Transition time in 1/10 s units
    pub transition_time: u16,
}

/// A per-group snapshot of light states recallable by one command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: u8,
    pub group_address: u16,
    pub name: String,
    pub state: SceneState,
    #[serde(default)]
    pub lights: Vec<LightState>,
}

impl Scene {
    #[must_use]
    pub fn new(group_address: u16, id: u8) -> Self {
        Self {
            id,
            group_address,
            name: format!("Scene {id}"),
            state: SceneState::Normal,
            lights: Vec::new(),
        }
    }

    #[must_use]
    pub fn light(&self, lid: &str) -> Option<&LightState> {
        self.lights.iter().find(|l| l.lid == lid)
    }

    pub fn delete_light(&mut self, lid: &str) {
        self.lights.retain(|l| l.lid != lid);
    }
}

/// A group of lights, possibly authored by a switch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// 16-bit group address; group 0 is the broadcast group
    pub address: u16,
    pub name: String,
    pub state: GroupState,

    pub on: bool,
    pub level: u8,
    pub hue: u8,
    pub sat: u8,
    pub color_x: u16,
    pub color_y: u16,
    pub color_temperature: u16,
    pub color_loop_active: bool,

    pub scenes: Vec<Scene>,

    /// Sensor ids of the switches that authored this group
    #[serde(default)]
    pub device_memberships: Vec<String>,
    /// Light ids whose membership is pending confirmation from the device
    #[serde(default)]
    pub multi_device_ids: Vec<String>,

    pub etag: String,

    /// Group rate limiter bookkeeping
    #[serde(skip)]
    pub last_send_time: Option<Instant>,
}

impl Group {
    #[must_use]
    pub fn new(address: u16) -> Self {
        Self {
            address,
            name: String::new(),
            state: GroupState::Normal,
            on: false,
            level: 128,
            hue: 0,
            sat: 128,
            color_x: 0,
            color_y: 0,
            color_temperature: 0,
            color_loop_active: false,
            scenes: Vec::new(),
            device_memberships: Vec::new(),
            multi_device_ids: Vec::new(),
            etag: make_etag(),
            last_send_time: None,
        }
    }

    /// The REST id is the decimal group address.
    #[must_use]
    pub fn id(&self) -> String {
        self.address.to_string()
    }

    /// A switch group is one authored by at least one switch sensor.
    #[must_use]
    pub fn is_switch_group(&self) -> bool {
        !self.device_memberships.is_empty()
    }

    pub fn touch_etag(&mut self) {
        self.etag = make_etag();
    }

    #[must_use]
    pub fn scene(&self, scene_id: u8) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == scene_id)
    }

    pub fn scene_mut(&mut self, scene_id: u8) -> Option<&mut Scene> {
        self.scenes.iter_mut().find(|s| s.id == scene_id)
    }
}
