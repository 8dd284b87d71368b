//! Outbound ZCL task construction
//!
//! Each builder fills a [`TaskItem`] with the cluster command frame it
//! sends. Payload layouts are little-endian ZCL.

use zcl_protocol::cluster::{groups_cmd, id, onoff_cmd, profile, scenes_cmd};
use zcl_protocol::commands::{encode_read_attributes, encode_write_attribute, AttrValue};
use zcl_protocol::frame::ZclFrame;
use zcl_protocol::{ApsDataRequest, Destination};

use crate::group::LightState;

/// Task discrimination used for queue coalescing and confirm handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    SetOnOff,
    SetLevel,
    MoveLevel,
    SetColorTemperature,
    SetEnhancedHue,
    SetSaturation,
    SetHueAndSaturation,
    SetXyColor,
    SetColorLoop,
    Identify,
    AddToGroup,
    ViewGroup,
    RemoveFromGroup,
    GetGroupMembership,
    StoreScene,
    AddScene,
    RemoveScene,
    ViewScene,
    RecallScene,
    GetSceneMembership,
    GetGroupIdentifiers,
    ReadAttributes,
    WriteAttribute,
    Bind,
    Unbind,
}

impl TaskType {
    /// Tasks that must never be coalesced away in the ready queue.
    #[must_use]
    pub fn is_coalescable(&self) -> bool {
        !matches!(
            self,
            TaskType::GetSceneMembership
                | TaskType::GetGroupMembership
                | TaskType::GetGroupIdentifiers
                | TaskType::StoreScene
                | TaskType::RemoveScene
                | TaskType::ReadAttributes
                | TaskType::WriteAttribute
                | TaskType::ViewScene
                | TaskType::AddScene
                | TaskType::Bind
                | TaskType::Unbind
        )
    }
}

/// One outbound request: the APS primitive plus queue metadata
#[derive(Debug, Clone)]
pub struct TaskItem {
    pub ty: TaskType,
    pub req: ApsDataRequest,
    /// Fire-and-forget tasks are not tracked for confirmation
    pub fire_and_forget: bool,
}

impl TaskItem {
    fn cluster_task(
        ty: TaskType,
        dst: Destination,
        cluster_id: u16,
        frame: ZclFrame,
    ) -> Self {
        let mut req = match dst {
            Destination::Group(group) => {
                ApsDataRequest::groupcast(0, group, profile::HOME_AUTOMATION, cluster_id)
            }
            Destination::Ext { addr, endpoint } => {
                ApsDataRequest::unicast(0, addr, endpoint, profile::HOME_AUTOMATION, cluster_id)
            }
            Destination::Nwk { .. } => ApsDataRequest {
                id: 0,
                dst,
                profile_id: profile::HOME_AUTOMATION,
                cluster_id,
                src_endpoint: 0x01,
                asdu: Vec::new(),
                tx_options: zcl_protocol::tx_options::NONE,
                radius: 0,
            },
        };
        req.asdu = frame.serialize();
        Self {
            ty,
            req,
            fire_and_forget: false,
        }
    }

    /// On, off, toggle or on-with-timed-off.
    #[must_use]
    pub fn set_on_off(dst: Destination, seq: u8, cmd: u8, ontime: u16) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, cmd);
        if cmd == onoff_cmd::ON_WITH_TIMED_OFF {
            // 0x80 overwrites a running ontime (non standard)
            frame.payload.push(0x80);
            frame.payload.extend_from_slice(&ontime.to_le_bytes());
            frame.payload.extend_from_slice(&0u16.to_le_bytes()); // off wait time
        }
        Self::cluster_task(TaskType::SetOnOff, dst, id::ON_OFF, frame)
    }

    /// Move to level, optionally with on/off.
    #[must_use]
    pub fn set_level(dst: Destination, seq: u8, level: u8, transition_time: u16, with_on_off: bool) -> Self {
        let cmd = if with_on_off { 0x04 } else { 0x00 };
        let mut frame = ZclFrame::cluster_command(seq, cmd);
        frame.payload.push(level);
        frame.payload.extend_from_slice(&transition_time.to_le_bytes());
        Self::cluster_task(TaskType::SetLevel, dst, id::LEVEL_CONTROL, frame)
    }

    /// Continuous level move; a rate of zero stops the move.
    #[must_use]
    pub fn move_level(dst: Destination, seq: u8, with_on_off: bool, up: bool, rate: u8) -> Self {
        if rate == 0 {
            let frame = ZclFrame::cluster_command(seq, 0x03); // stop
            return Self::cluster_task(TaskType::MoveLevel, dst, id::LEVEL_CONTROL, frame);
        }
        let cmd = if with_on_off { 0x05 } else { 0x01 };
        let mut frame = ZclFrame::cluster_command(seq, cmd);
        frame.payload.push(u8::from(!up));
        frame.payload.push(rate);
        Self::cluster_task(TaskType::MoveLevel, dst, id::LEVEL_CONTROL, frame)
    }

    /// Move to color temperature (mired).
    #[must_use]
    pub fn set_color_temperature(dst: Destination, seq: u8, ct: u16, transition_time: u16) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, 0x0A);
        frame.payload.extend_from_slice(&ct.to_le_bytes());
        frame.payload.extend_from_slice(&transition_time.to_le_bytes());
        Self::cluster_task(TaskType::SetColorTemperature, dst, id::COLOR_CONTROL, frame)
    }

    /// Enhanced move to hue.
    #[must_use]
    pub fn set_enhanced_hue(dst: Destination, seq: u8, enhanced_hue: u16, transition_time: u16) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, 0x40);
        frame.payload.extend_from_slice(&enhanced_hue.to_le_bytes());
        frame.payload.push(0x00); // direction
        frame.payload.extend_from_slice(&transition_time.to_le_bytes());
        Self::cluster_task(TaskType::SetEnhancedHue, dst, id::COLOR_CONTROL, frame)
    }

    /// Move to saturation; 255 is clamped to the ZCL maximum of 254.
    #[must_use]
    pub fn set_saturation(dst: Destination, seq: u8, sat: u8, transition_time: u16) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, 0x03);
        frame.payload.push(sat.min(254));
        frame.payload.extend_from_slice(&transition_time.to_le_bytes());
        Self::cluster_task(TaskType::SetSaturation, dst, id::COLOR_CONTROL, frame)
    }

    /// Move to hue and saturation.
    #[must_use]
    pub fn set_hue_and_saturation(dst: Destination, seq: u8, hue: u8, sat: u8, transition_time: u16) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, 0x06);
        frame.payload.push(hue);
        frame.payload.push(sat.min(254));
        frame.payload.extend_from_slice(&transition_time.to_le_bytes());
        Self::cluster_task(TaskType::SetHueAndSaturation, dst, id::COLOR_CONTROL, frame)
    }

    /// Move to CIE xy color. Coordinates are the raw 0..65279 range.
    #[must_use]
    pub fn set_xy_color(dst: Destination, seq: u8, x: u16, y: u16, transition_time: u16) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, 0x07);
        frame.payload.extend_from_slice(&x.to_le_bytes());
        frame.payload.extend_from_slice(&y.to_le_bytes());
        frame.payload.extend_from_slice(&transition_time.to_le_bytes());
        Self::cluster_task(TaskType::SetXyColor, dst, id::COLOR_CONTROL, frame)
    }

    /// Color loop set: activate from the current hue or stop.
    #[must_use]
    pub fn set_color_loop(dst: Destination, seq: u8, active: bool, speed: u8) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, 0x44);
        let action: u8 = if active { 0x02 } else { 0x00 };
        frame.payload.push(0x07); // update action, direction and time
        frame.payload.push(action);
        frame.payload.push(0x01); // direction up
        frame.payload.extend_from_slice(&u16::from(speed).to_le_bytes());
        frame.payload.extend_from_slice(&0u16.to_le_bytes()); // start hue
        Self::cluster_task(TaskType::SetColorLoop, dst, id::COLOR_CONTROL, frame)
    }

    #[must_use]
    pub fn identify(dst: Destination, seq: u8, identify_time: u16) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, 0x00);
        frame.payload.extend_from_slice(&identify_time.to_le_bytes());
        Self::cluster_task(TaskType::Identify, dst, id::IDENTIFY, frame)
    }

    #[must_use]
    pub fn add_to_group(dst: Destination, seq: u8, group_id: u16) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, groups_cmd::ADD_GROUP);
        frame.payload.extend_from_slice(&group_id.to_le_bytes());
        frame.payload.push(0); // empty group name
        Self::cluster_task(TaskType::AddToGroup, dst, id::GROUPS, frame)
    }

    #[must_use]
    pub fn view_group(dst: Destination, seq: u8, group_id: u16) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, groups_cmd::VIEW_GROUP);
        frame.payload.extend_from_slice(&group_id.to_le_bytes());
        Self::cluster_task(TaskType::ViewGroup, dst, id::GROUPS, frame)
    }

    #[must_use]
    pub fn remove_from_group(dst: Destination, seq: u8, group_id: u16) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, groups_cmd::REMOVE_GROUP);
        frame.payload.extend_from_slice(&group_id.to_le_bytes());
        Self::cluster_task(TaskType::RemoveFromGroup, dst, id::GROUPS, frame)
    }

    /// Query which of the gateway's groups the light is a member of.
    /// An empty list asks for all memberships.
    #[must_use]
    pub fn get_group_membership(dst: Destination, seq: u8, groups: &[u16]) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, groups_cmd::GET_GROUP_MEMBERSHIP);
        frame.payload.push(groups.len() as u8);
        for g in groups {
            frame.payload.extend_from_slice(&g.to_le_bytes());
        }
        Self::cluster_task(TaskType::GetGroupMembership, dst, id::GROUPS, frame)
    }

    #[must_use]
    pub fn store_scene(dst: Destination, seq: u8, group_id: u16, scene_id: u8) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, scenes_cmd::STORE_SCENE);
        frame.payload.extend_from_slice(&group_id.to_le_bytes());
        frame.payload.push(scene_id);
        Self::cluster_task(TaskType::StoreScene, dst, id::SCENES, frame)
    }

    #[must_use]
    pub fn remove_scene(dst: Destination, seq: u8, group_id: u16, scene_id: u8) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, scenes_cmd::REMOVE_SCENE);
        frame.payload.extend_from_slice(&group_id.to_le_bytes());
        frame.payload.push(scene_id);
        Self::cluster_task(TaskType::RemoveScene, dst, id::SCENES, frame)
    }

    /// Add (rewrite) a scene with the stored light state.
    ///
    /// The transition time is stored in 1/10 s units and sent in seconds.
    #[must_use]
    pub fn add_scene(dst: Destination, seq: u8, group_id: u16, scene_id: u8, light: &LightState) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, scenes_cmd::ADD_SCENE);
        let tt_secs = light.transition_time / 10;

        frame.payload.extend_from_slice(&group_id.to_le_bytes());
        frame.payload.push(scene_id);
        frame.payload.extend_from_slice(&tt_secs.to_le_bytes());
        frame.payload.push(0); // scene name not supported

        frame.payload.extend_from_slice(&id::ON_OFF.to_le_bytes());
        frame.payload.push(1);
        frame.payload.push(u8::from(light.on));

        frame.payload.extend_from_slice(&id::LEVEL_CONTROL.to_le_bytes());
        frame.payload.push(1);
        frame.payload.push(light.bri);

        frame.payload.extend_from_slice(&id::COLOR_CONTROL.to_le_bytes());
        frame.payload.push(4);
        frame.payload.extend_from_slice(&light.x.to_le_bytes());
        frame.payload.extend_from_slice(&light.y.to_le_bytes());

        Self::cluster_task(TaskType::AddScene, dst, id::SCENES, frame)
    }

    #[must_use]
    pub fn view_scene(dst: Destination, seq: u8, group_id: u16, scene_id: u8) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, scenes_cmd::VIEW_SCENE);
        frame.payload.extend_from_slice(&group_id.to_le_bytes());
        frame.payload.push(scene_id);
        Self::cluster_task(TaskType::ViewScene, dst, id::SCENES, frame)
    }

    /// Recall a scene; always a groupcast at the broadcast endpoint.
    #[must_use]
    pub fn recall_scene(group_id: u16, seq: u8, scene_id: u8) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, scenes_cmd::RECALL_SCENE);
        frame.payload.extend_from_slice(&group_id.to_le_bytes());
        frame.payload.push(scene_id);
        Self::cluster_task(TaskType::RecallScene, Destination::Group(group_id), id::SCENES, frame)
    }

    #[must_use]
    pub fn get_scene_membership(dst: Destination, seq: u8, group_id: u16) -> Self {
        let mut frame = ZclFrame::cluster_command(seq, scenes_cmd::GET_SCENE_MEMBERSHIP);
        frame.payload.extend_from_slice(&group_id.to_le_bytes());
        Self::cluster_task(TaskType::GetSceneMembership, dst, id::SCENES, frame)
    }

    /// ZCL global read attributes.
    #[must_use]
    pub fn read_attributes(dst: Destination, seq: u8, cluster_id: u16, attributes: &[u16]) -> Self {
        let mut frame = ZclFrame::global_command(seq, zcl_protocol::cluster::global_cmd::READ_ATTRIBUTES);
        frame.payload = encode_read_attributes(attributes);
        Self::cluster_task(TaskType::ReadAttributes, dst, cluster_id, frame)
    }

    /// ZCL global write of a single attribute.
    #[must_use]
    pub fn write_attribute(
        dst: Destination,
        seq: u8,
        cluster_id: u16,
        attr_id: u16,
        data_type: u8,
        value: &AttrValue,
    ) -> Self {
        let mut frame = ZclFrame::global_command(seq, zcl_protocol::cluster::global_cmd::WRITE_ATTRIBUTES);
        frame.payload = encode_write_attribute(attr_id, data_type, value);
        Self::cluster_task(TaskType::WriteAttribute, dst, cluster_id, frame)
    }

    /// ZLL commissioning: query the group identifiers a controller uses.
    #[must_use]
    pub fn get_group_identifiers(dst: Destination, seq: u8, start_index: u8) -> Self {
        let mut frame = ZclFrame::cluster_command(
            seq,
            zcl_protocol::cluster::commissioning_cmd::GET_GROUP_IDENTIFIERS,
        );
        frame.payload.push(start_index);
        Self::cluster_task(TaskType::GetGroupIdentifiers, dst, id::COMMISSIONING, frame)
    }

    /// ZCL configure reporting for a single attribute.
    #[must_use]
    pub fn configure_reporting(
        dst: Destination,
        seq: u8,
        cluster_id: u16,
        attr_id: u16,
        data_type: u8,
        min_interval: u16,
        max_interval: u16,
    ) -> Self {
        let mut frame = ZclFrame::global_command(
            seq,
            zcl_protocol::cluster::global_cmd::CONFIGURE_REPORTING,
        );
        frame.payload.push(0x00); // direction: reported
        frame.payload.extend_from_slice(&attr_id.to_le_bytes());
        frame.payload.push(data_type);
        frame.payload.extend_from_slice(&min_interval.to_le_bytes());
        frame.payload.extend_from_slice(&max_interval.to_le_bytes());
        // no reportable change for discrete types
        Self::cluster_task(TaskType::WriteAttribute, dst, cluster_id, frame)
    }

    /// ZDP Mgmt_Bind_req: read a device's binding table.
    #[must_use]
    pub fn mgmt_bind_request(ext_addr: u64, tsn: u8, start_index: u8) -> Self {
        Self {
            ty: TaskType::ReadAttributes,
            req: ApsDataRequest {
                id: 0,
                dst: Destination::Ext { addr: ext_addr, endpoint: 0x00 },
                profile_id: profile::ZDP,
                cluster_id: zcl_protocol::zdp::clid::MGMT_BIND_REQ,
                src_endpoint: 0x00,
                asdu: vec![tsn, start_index],
                tx_options: zcl_protocol::tx_options::NONE,
                radius: 0,
            },
            fire_and_forget: false,
        }
    }

    /// ZDP bind or unbind request towards the source device.
    #[must_use]
    pub fn zdp_bind(
        unbind: bool,
        tsn: u8,
        src_ext_addr: u64,
        src_endpoint: u8,
        cluster_id: u16,
        bind_dst: &Destination,
    ) -> Self {
        let cluster = if unbind {
            zcl_protocol::zdp::clid::UNBIND_REQ
        } else {
            zcl_protocol::zdp::clid::BIND_REQ
        };

        let asdu =
            zcl_protocol::zdp::encode_bind_request(tsn, src_ext_addr, src_endpoint, cluster_id, bind_dst);

        Self {
            ty: if unbind { TaskType::Unbind } else { TaskType::Bind },
            req: ApsDataRequest {
                id: 0,
                dst: Destination::Ext { addr: src_ext_addr, endpoint: 0x00 },
                profile_id: profile::ZDP,
                cluster_id: cluster,
                src_endpoint: 0x00,
                asdu,
                tx_options: zcl_protocol::tx_options::NONE,
                radius: 0,
            },
            fire_and_forget: false,
        }
    }
}
