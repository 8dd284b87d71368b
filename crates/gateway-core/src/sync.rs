//! Model synchronizer
//!
//! Reconciles the registry with cluster state readable over the air.
//! Driven by two timers: the idle loop (~1 s) schedules stale-attribute
//! refreshes round-robin, and the attribute loop (~750 ms) turns pending
//! read flags into radio tasks, at most two ZCL operations per entity per
//! tick. Inbound indications update the attribute cache and the registry.

use std::time::{Duration, Instant};

use tracing::{debug, info};
use zcl_protocol::cluster::{
    basic_attr, color_attr, data_type, global_cmd, groups_cmd, id, illuminance_attr, level_attr,
    occupancy_attr, onoff_attr, profile, scenes_cmd,
};
use zcl_protocol::commands::{
    parse_read_attributes_response, parse_report_attributes, AttrValue, AttributeRecord,
    GetGroupMembershipResponse, GetSceneMembershipResponse, GroupResponse, SceneResponse,
    ViewSceneResponse,
};
use zcl_protocol::{ApsDataIndication, Destination, ZclFrame};

use crate::attr_cache::{AttrUpdate, AttributeCache};
use crate::config::GatewayConfig;
use crate::group::{GroupState, LightState, SceneState};
use crate::light::{group_actions, ColorMode, GroupInfo, GroupMembership};
use crate::node::NodeEvent;
use crate::persistence::dirty;
use crate::pipeline::Pipeline;
use crate::registry::{vendor, Registry};
use crate::tasks::TaskItem;
use crate::util::read_flags;

/// Reporting window after which a sensor's report binding is re-checked
const REPORT_STALE_WINDOW: Duration = Duration::from_secs(45 * 60);

/// The synchronizer
pub struct Synchronizer {
    config: GatewayConfig,
    /// Total seconds since start, advanced by the idle tick
    pub idle_total: u64,
    /// Seconds since the last external REST write
    idle_last_activity: u64,
    /// Countdown until the next idle round
    idle_limit: u64,
    light_iter: usize,
    sensor_iter: usize,
    group_membership_checked: bool,
}

impl Synchronizer {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            idle_total: 0,
            idle_last_activity: 0,
            idle_limit: 0,
            light_iter: 0,
            sensor_iter: 0,
            group_membership_checked: false,
        }
    }

    /// Record external REST activity; the idle loop backs off.
    pub fn user_activity(&mut self) {
        self.idle_last_activity = 0;
    }

    /// Whether a device's binding table may be read. Only known
    /// cooperative devices answer Mgmt_Bind_req sensibly.
    fn binding_table_allowed(manufacturer_code: u16, model_id: &str) -> bool {
        manufacturer_code == vendor::DDEL || model_id.starts_with("FLS")
    }

    // --- idle loop (1 s) ---

    /// The 1 s idle tick: walk lights and sensors round-robin and flag
    /// entities whose attributes or report bindings have gone stale.
    pub fn idle_tick(
        &mut self,
        registry: &mut Registry,
        cache: &AttributeCache,
        pipeline: &mut Pipeline,
    ) {
        self.idle_total += 1;
        self.idle_last_activity += 1;
        if self.idle_limit > 0 {
            self.idle_limit -= 1;
        }

        if self.idle_last_activity < self.config.idle_user_limit {
            return;
        }

        if !pipeline.is_connected() {
            return;
        }

        // ask one switch-authored group for its membership once, so the
        // coordinator learns about groups created on the air
        if !self.group_membership_checked {
            let switch_group = registry
                .groups
                .iter()
                .find(|g| g.is_switch_group())
                .map(|g| g.address);
            if let Some(address) = switch_group {
                let seq = pipeline.next_seq();
                if pipeline.add_task(TaskItem::view_group(Destination::Group(address), seq, address))
                {
                    self.group_membership_checked = true;
                }
            } else {
                self.group_membership_checked = true;
            }
        }

        if self.idle_limit > 0 {
            return;
        }

        let mut process_lights = false;

        if !registry.lights.is_empty() {
            if self.light_iter >= registry.lights.len() {
                self.light_iter = 0;
            }

            while self.light_iter < registry.lights.len() {
                let idx = self.light_iter;
                self.light_iter += 1;

                if !registry.lights[idx].reachable {
                    continue;
                }

                if process_lights {
                    break;
                }

                let stale_read =
                    registry.lights[idx].last_read + self.config.idle_read_limit < self.idle_total;
                if stale_read {
                    let light = &mut registry.lights[idx];
                    light.enable_read(
                        read_flags::ON_OFF
                            | read_flags::LEVEL
                            | read_flags::COLOR
                            | read_flags::GROUPS
                            | read_flags::SCENES,
                    );
                    if light.model_id.is_empty() {
                        light.enable_read(read_flags::MODEL_ID);
                        process_lights = true;
                    }
                    if light.sw_build_id.is_empty() {
                        light.enable_read(read_flags::SWBUILD_ID);
                        process_lights = true;
                    }
                    if light.manufacturer.is_empty() || light.manufacturer == "Unknown" {
                        light.enable_read(read_flags::VENDOR_NAME);
                        process_lights = true;
                    }
                    light.next_read_time = Some(Instant::now());
                    light.last_read = self.idle_total;
                    debug!("Force read attributes for node {}", light.name);
                }

                let stale_bind = registry.lights[idx].last_attribute_report_bind
                    + self.config.idle_attr_report_bind_limit
                    < self.idle_total;
                if stale_bind {
                    self.check_light_report_bindings(registry, pipeline, idx);
                    registry.lights[idx].last_attribute_report_bind = self.idle_total;
                    process_lights = true;
                }
            }
        }

        let mut process_sensors = false;

        if !registry.sensors.is_empty() {
            if self.sensor_iter >= registry.sensors.len() {
                self.sensor_iter = 0;
            }

            while self.sensor_iter < registry.sensors.len() {
                let idx = self.sensor_iter;
                self.sensor_iter += 1;

                if !registry.sensors[idx].reachable {
                    continue;
                }

                if process_sensors {
                    break;
                }

                if registry.sensors[idx].model_id.is_empty() {
                    // a light record on the same node may already know it
                    let model = registry
                        .first_light_for_ext(registry.sensors[idx].ext_addr)
                        .map(|l| l.model_id.clone());
                    match model {
                        Some(m) if !m.is_empty() => registry.sensors[idx].model_id = m,
                        _ => {
                            registry.sensors[idx].enable_read(read_flags::MODEL_ID);
                            process_sensors = true;
                        }
                    }
                }

                if registry.sensors[idx].manufacturer.is_empty() {
                    registry.sensors[idx].enable_read(read_flags::VENDOR_NAME);
                    process_sensors = true;
                }

                let stale_read = registry.sensors[idx].last_read + self.config.idle_read_limit
                    < self.idle_total;
                if stale_read {
                    let sensor = &mut registry.sensors[idx];
                    sensor.last_read = self.idle_total;
                    sensor.next_read_time = Some(Instant::now());

                    let mut check_binding_table = false;
                    for ci in sensor.fingerprint.in_clusters.clone() {
                        if !matches!(ci, id::ILLUMINANCE_MEASUREMENT | id::OCCUPANCY_SENSING) {
                            continue;
                        }
                        if Self::reports_timely(cache, sensor.ext_addr, ci, 0x0000) {
                            debug!(
                                "attribute reporting of SensorNode {} cluster {:#06X} seems to be active",
                                sensor.name, ci
                            );
                        } else {
                            check_binding_table = true;
                        }
                        if ci == id::OCCUPANCY_SENSING
                            && !sensor.must_read(read_flags::OCCUPANCY_CONFIG)
                        {
                            sensor.enable_read(read_flags::OCCUPANCY_CONFIG);
                            process_sensors = true;
                        }
                    }

                    if check_binding_table && !sensor.must_read(read_flags::BINDING_TABLE) {
                        sensor.enable_read(read_flags::BINDING_TABLE);
                        process_sensors = true;
                    }
                    debug!("Force read attributes for SensorNode {}", sensor.name);
                }

                let stale_bind = registry.sensors[idx].last_attribute_report_bind
                    + self.config.idle_attr_report_bind_limit
                    < self.idle_total;
                if stale_bind {
                    self.check_sensor_report_bindings(registry, pipeline, idx);
                    registry.sensors[idx].last_attribute_report_bind = self.idle_total;
                    process_sensors = true;
                }
            }
        }

        if process_lights || process_sensors {
            self.idle_limit = 1;
        } else {
            self.idle_limit = self.config.idle_limit;
        }
    }

    /// (Re)install attribute reporting for a light's on/off and level
    /// clusters. Only known-cooperative devices are configured.
    fn check_light_report_bindings(
        &mut self,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
        idx: usize,
    ) {
        let light = &registry.lights[idx];
        if !Self::binding_table_allowed(light.manufacturer_code, &light.model_id) {
            return;
        }

        let dst = Destination::Ext { addr: light.ext_addr, endpoint: light.endpoint };
        debug!("Force binding of attribute reporting for node {}", light.name);
        let seq = pipeline.next_seq();
        pipeline.add_task(TaskItem::configure_reporting(
            dst, seq, id::ON_OFF, onoff_attr::ON_OFF, data_type::BOOLEAN, 1, 300,
        ));
        let seq = pipeline.next_seq();
        pipeline.add_task(TaskItem::configure_reporting(
            dst, seq, id::LEVEL_CONTROL, level_attr::CURRENT_LEVEL, data_type::UINT8, 1, 300,
        ));
    }

    /// (Re)install attribute reporting for a sensor's measurement
    /// clusters when no report arrived in a timely manner.
    fn check_sensor_report_bindings(
        &mut self,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
        idx: usize,
    ) {
        let sensor = &registry.sensors[idx];
        let Some(endpoint) = sensor.fingerprint.endpoint else {
            return; // green power devices report unsolicited
        };

        let dst = Destination::Ext { addr: sensor.ext_addr, endpoint };
        let clusters = sensor.fingerprint.in_clusters.clone();

        for cluster in clusters {
            match cluster {
                id::ILLUMINANCE_MEASUREMENT => {
                    let seq = pipeline.next_seq();
                    pipeline.add_task(TaskItem::configure_reporting(
                        dst,
                        seq,
                        cluster,
                        illuminance_attr::MEASURED_VALUE,
                        data_type::UINT16,
                        10,
                        300,
                    ));
                }
                id::OCCUPANCY_SENSING => {
                    let seq = pipeline.next_seq();
                    pipeline.add_task(TaskItem::configure_reporting(
                        dst,
                        seq,
                        cluster,
                        occupancy_attr::OCCUPANCY,
                        data_type::BITMAP8,
                        1,
                        300,
                    ));
                }
                _ => {}
            }
        }
    }

    // --- attribute loop (750 ms) ---

    /// The attribute-processing tick: turn pending read flags into radio
    /// tasks, at most two ZCL operations per entity.
    pub fn attr_tick(
        &mut self,
        registry: &mut Registry,
        cache: &mut AttributeCache,
        pipeline: &mut Pipeline,
    ) {
        if !pipeline.is_connected() {
            return;
        }

        for idx in 0..registry.lights.len() {
            self.process_light_attributes(registry, pipeline, idx);
        }
        for idx in 0..registry.sensors.len() {
            self.process_sensor_attributes(registry, cache, pipeline, idx);
        }
    }

    fn process_light_attributes(
        &mut self,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
        idx: usize,
    ) {
        {
            let light = &registry.lights[idx];
            if !light.reachable || !light.read_due() || light.pending_reads == 0 {
                return;
            }
        }

        let mut processed = 0;
        let (ext_addr, endpoint) = {
            let light = &registry.lights[idx];
            (light.ext_addr, light.endpoint)
        };
        let dst = Destination::Ext { addr: ext_addr, endpoint };

        if processed < 2 && registry.lights[idx].must_read(read_flags::BINDING_TABLE) {
            let allowed = {
                let light = &registry.lights[idx];
                Self::binding_table_allowed(light.manufacturer_code, &light.model_id)
            };
            if allowed {
                let tsn = pipeline.next_seq();
                if pipeline.add_task(TaskItem::mgmt_bind_request(ext_addr, tsn, 0)) {
                    // the binding table is per node, not per endpoint
                    for light in registry.lights.iter_mut().filter(|l| l.ext_addr == ext_addr) {
                        light.clear_read(read_flags::BINDING_TABLE);
                    }
                    processed += 1;
                }
            } else {
                registry.lights[idx].clear_read(read_flags::BINDING_TABLE);
            }
        }

        let basic_reads: &[(u32, u16)] = &[
            (read_flags::VENDOR_NAME, basic_attr::MANUFACTURER_NAME),
            (read_flags::MODEL_ID, basic_attr::MODEL_IDENTIFIER),
            (read_flags::SWBUILD_ID, basic_attr::SW_BUILD_ID),
        ];
        for &(flag, attr) in basic_reads {
            if processed >= 2 {
                return;
            }
            if registry.lights[idx].must_read(flag) {
                let seq = pipeline.next_seq();
                if pipeline.add_task(TaskItem::read_attributes(dst, seq, id::BASIC, &[attr])) {
                    registry.lights[idx].clear_read(flag);
                    processed += 1;
                }
            }
        }

        if processed < 2 && registry.lights[idx].must_read(read_flags::ON_OFF) {
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::read_attributes(dst, seq, id::ON_OFF, &[onoff_attr::ON_OFF]))
            {
                registry.lights[idx].clear_read(read_flags::ON_OFF);
                processed += 1;
            }
        }

        if processed < 2 && registry.lights[idx].must_read(read_flags::LEVEL) {
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::read_attributes(
                dst,
                seq,
                id::LEVEL_CONTROL,
                &[level_attr::CURRENT_LEVEL],
            )) {
                registry.lights[idx].clear_read(read_flags::LEVEL);
                processed += 1;
            }
        }

        if processed < 2 && registry.lights[idx].must_read(read_flags::COLOR) {
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::read_attributes(
                dst,
                seq,
                id::COLOR_CONTROL,
                &[
                    color_attr::CURRENT_HUE,
                    color_attr::CURRENT_SATURATION,
                    color_attr::CURRENT_X,
                    color_attr::CURRENT_Y,
                    color_attr::COLOR_TEMPERATURE,
                    color_attr::COLOR_MODE,
                    color_attr::ENHANCED_CURRENT_HUE,
                    color_attr::COLOR_LOOP_ACTIVE,
                ],
            )) {
                registry.lights[idx].clear_read(read_flags::COLOR);
                processed += 1;
            }
        }

        if processed < 2 && registry.lights[idx].must_read(read_flags::GROUPS) {
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::get_group_membership(dst, seq, &[])) {
                registry.lights[idx].clear_read(read_flags::GROUPS);
                processed += 1;
            }
        }

        if processed < 2 && registry.lights[idx].must_read(read_flags::SCENES) {
            let group_id = registry.lights[idx]
                .groups
                .iter()
                .find(|g| g.state == GroupMembership::InGroup)
                .map(|g| g.id);
            if let Some(group_id) = group_id {
                let seq = pipeline.next_seq();
                if pipeline.add_task(TaskItem::get_scene_membership(dst, seq, group_id)) {
                    registry.lights[idx].clear_read(read_flags::SCENES);
                    processed += 1;
                }
            } else {
                registry.lights[idx].clear_read(read_flags::SCENES);
            }
        }

        if processed < 2 && registry.lights[idx].must_read(read_flags::SCENE_DETAILS) {
            let light_id = registry.lights[idx].id.clone();
            let group_ids: Vec<u16> = registry.lights[idx]
                .groups
                .iter()
                .filter(|g| g.state == GroupMembership::InGroup)
                .map(|g| g.id)
                .collect();

            let mut target = None;
            'outer: for gid in group_ids {
                if let Some(group) = registry.group_for_address(gid) {
                    for scene in &group.scenes {
                        if scene.state == SceneState::Normal && scene.light(&light_id).is_none() {
                            target = Some((gid, scene.id));
                            break 'outer;
                        }
                    }
                }
            }

            match target {
                Some((gid, sid)) => {
                    let seq = pipeline.next_seq();
                    if pipeline.add_task(TaskItem::view_scene(dst, seq, gid, sid)) {
                        processed += 1;
                    }
                }
                None => registry.lights[idx].clear_read(read_flags::SCENE_DETAILS),
            }
        }

        let _ = processed;
    }

    fn process_sensor_attributes(
        &mut self,
        registry: &mut Registry,
        cache: &mut AttributeCache,
        pipeline: &mut Pipeline,
        idx: usize,
    ) {
        {
            let sensor = &registry.sensors[idx];
            if !sensor.reachable || !sensor.read_due() || sensor.pending_reads == 0 {
                return;
            }
        }

        let Some(endpoint) = registry.sensors[idx].fingerprint.endpoint else {
            // nothing to read from a green power device
            registry.sensors[idx].pending_reads = 0;
            return;
        };

        let ext_addr = registry.sensors[idx].ext_addr;
        let dst = Destination::Ext { addr: ext_addr, endpoint };
        let mut processed = 0;

        if registry.sensors[idx].must_read(read_flags::BINDING_TABLE) {
            let tsn = pipeline.next_seq();
            if pipeline.add_task(TaskItem::mgmt_bind_request(ext_addr, tsn, 0)) {
                registry.sensors[idx].clear_read(read_flags::BINDING_TABLE);
                processed += 1;
            }
        }

        let basic_reads: &[(u32, u16)] = &[
            (read_flags::VENDOR_NAME, basic_attr::MANUFACTURER_NAME),
            (read_flags::MODEL_ID, basic_attr::MODEL_IDENTIFIER),
            (read_flags::SWBUILD_ID, basic_attr::SW_BUILD_ID),
        ];
        for &(flag, attr) in basic_reads {
            if processed >= 2 {
                return;
            }
            if registry.sensors[idx].must_read(flag) {
                let seq = pipeline.next_seq();
                if pipeline.add_task(TaskItem::read_attributes(dst, seq, id::BASIC, &[attr])) {
                    registry.sensors[idx].clear_read(flag);
                    processed += 1;
                }
            }
        }

        if processed < 2 && registry.sensors[idx].must_read(read_flags::GROUP_IDENTIFIERS) {
            let seq = pipeline.next_seq();
            let task = TaskItem::get_group_identifiers(dst, seq, 0);
            if pipeline.add_task(task) {
                registry.sensors[idx].clear_read(read_flags::GROUP_IDENTIFIERS);
                processed += 1;
            }
        }

        if processed < 2 && registry.sensors[idx].must_read(read_flags::OCCUPANCY_CONFIG) {
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::read_attributes(
                dst,
                seq,
                id::OCCUPANCY_SENSING,
                &[occupancy_attr::OCCUPIED_TO_UNOCCUPIED_DELAY],
            )) {
                cache.mark_read_request(
                    ext_addr,
                    id::OCCUPANCY_SENSING,
                    occupancy_attr::OCCUPIED_TO_UNOCCUPIED_DELAY,
                );
                registry.sensors[idx].clear_read(read_flags::OCCUPANCY_CONFIG);
                processed += 1;
            }
        }

        if processed < 2 && registry.sensors[idx].must_read(read_flags::WRITE_OCCUPANCY_CONFIG) {
            let duration = registry.sensors[idx].config.duration.unwrap_or(0);
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::write_attribute(
                dst,
                seq,
                id::OCCUPANCY_SENSING,
                occupancy_attr::OCCUPIED_TO_UNOCCUPIED_DELAY,
                data_type::UINT16,
                &AttrValue::U16(duration),
            )) {
                registry.sensors[idx].clear_read(read_flags::WRITE_OCCUPANCY_CONFIG);
            }
        }
    }

    // --- node events ---

    /// Apply a driver node event to the registry.
    pub fn handle_node_event(&mut self, registry: &mut Registry, event: NodeEvent) {
        match event {
            NodeEvent::Added(node) | NodeEvent::UpdatedDescriptors(node) => {
                registry.upsert_node(node.clone());
                registry.add_light_node(&node, self.idle_total);
                registry.add_sensor_node(&node, self.idle_total);
            }
            NodeEvent::ZombieChanged { ext_addr, zombie } => {
                info!("Node zombie state changed {:#018X}", ext_addr);
                registry.node_zombie_changed(ext_addr, zombie, self.idle_total);
            }
            NodeEvent::Removed { ext_addr } => {
                registry.node_removed(ext_addr);
            }
            NodeEvent::PowerDescriptor { ext_addr, battery } => {
                let indices: Vec<usize> = registry
                    .sensors
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.ext_addr == ext_addr)
                    .map(|(i, _)| i)
                    .collect();
                for i in indices {
                    if registry.sensors[i].config.battery != battery {
                        registry.sensors[i].config.battery = battery;
                        registry.sensors[i].touch_etag();
                        registry.mark_dirty(dirty::SENSORS);
                    }
                }
            }
        }
    }

    // --- indication consumption ---

    /// Consume an inbound APS indication.
    pub fn handle_indication(
        &mut self,
        registry: &mut Registry,
        cache: &mut AttributeCache,
        pipeline: &mut Pipeline,
        ind: &ApsDataIndication,
    ) {
        if ind.profile_id == profile::ZDP {
            match ind.cluster_id {
                zcl_protocol::zdp::clid::BIND_RSP | zcl_protocol::zdp::clid::UNBIND_RSP => {
                    if let Ok(rsp) = zcl_protocol::zdp::BindResponse::parse(&ind.asdu) {
                        pipeline.handle_bind_response(rsp.tsn, rsp.is_success(), registry);
                    }
                }
                _ => {}
            }
            return;
        }

        if ind.profile_id != profile::HOME_AUTOMATION && ind.profile_id != profile::ZLL {
            return;
        }

        let Ok(frame) = ZclFrame::parse(&ind.asdu) else {
            return;
        };

        if frame.is_default_response() {
            return;
        }

        match ind.cluster_id {
            id::GROUPS => self.handle_group_cluster(registry, ind, &frame),
            id::SCENES => self.handle_scene_cluster(registry, ind, &frame),
            _ => {
                if frame.is_profile_wide() {
                    let records = match frame.command_id {
                        global_cmd::READ_ATTRIBUTES_RESPONSE => {
                            parse_read_attributes_response(&frame.payload).unwrap_or_default()
                        }
                        global_cmd::REPORT_ATTRIBUTES => {
                            parse_report_attributes(&frame.payload).unwrap_or_default()
                        }
                        _ => Vec::new(),
                    };

                    if records.is_empty() {
                        return;
                    }

                    let update_type = if frame.command_id == global_cmd::REPORT_ATTRIBUTES {
                        AttrUpdate::ByReport
                    } else {
                        AttrUpdate::ByRead
                    };

                    for record in &records {
                        cache.set(
                            ind.src_ext_addr,
                            ind.cluster_id,
                            record.attr_id,
                            record.value.clone(),
                            update_type,
                        );
                    }

                    self.apply_attribute_records(registry, ind, &records);
                }
            }
        }
    }

    /// Fold decoded attribute records into the registry.
    fn apply_attribute_records(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        records: &[AttributeRecord],
    ) {
        match ind.cluster_id {
            id::ON_OFF | id::LEVEL_CONTROL | id::COLOR_CONTROL | id::BASIC => {
                self.apply_light_records(registry, ind, records);
                if ind.cluster_id == id::BASIC {
                    self.apply_sensor_basic_records(registry, ind, records);
                }
            }
            id::ILLUMINANCE_MEASUREMENT => self.apply_illuminance(registry, ind, records),
            id::OCCUPANCY_SENSING => self.apply_occupancy(registry, ind, records),
            _ => {}
        }
    }

    fn apply_light_records(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        records: &[AttributeRecord],
    ) {
        let Some(light) = registry
            .lights
            .iter_mut()
            .find(|l| l.ext_addr == ind.src_ext_addr && l.endpoint == ind.src_endpoint)
        else {
            return;
        };

        let mut changed = false;

        for record in records {
            match (ind.cluster_id, record.attr_id) {
                (id::ON_OFF, onoff_attr::ON_OFF) => {
                    if let Some(on) = record.value.as_bool() {
                        if light.on != on {
                            light.on = on;
                            changed = true;
                        }
                    }
                }
                (id::LEVEL_CONTROL, level_attr::CURRENT_LEVEL) => {
                    if let AttrValue::U8(level) = record.value {
                        if light.level != level {
                            light.level = level;
                            changed = true;
                        }
                    }
                }
                (id::COLOR_CONTROL, color_attr::CURRENT_HUE) => {
                    if let AttrValue::U8(hue) = record.value {
                        if light.hue != hue {
                            light.hue = hue;
                            changed = true;
                        }
                    }
                }
                (id::COLOR_CONTROL, color_attr::CURRENT_SATURATION) => {
                    if let AttrValue::U8(sat) = record.value {
                        if light.saturation != sat {
                            light.saturation = sat;
                            changed = true;
                        }
                    }
                }
                (id::COLOR_CONTROL, color_attr::CURRENT_X) => {
                    if let AttrValue::U16(x) = record.value {
                        if light.color_x != x {
                            light.color_x = x;
                            changed = true;
                        }
                    }
                }
                (id::COLOR_CONTROL, color_attr::CURRENT_Y) => {
                    if let AttrValue::U16(y) = record.value {
                        if light.color_y != y {
                            light.color_y = y;
                            changed = true;
                        }
                    }
                }
                (id::COLOR_CONTROL, color_attr::COLOR_TEMPERATURE) => {
                    if let AttrValue::U16(ct) = record.value {
                        if light.color_temperature != ct {
                            light.color_temperature = ct;
                            changed = true;
                        }
                    }
                }
                (id::COLOR_CONTROL, color_attr::COLOR_MODE) => {
                    if let AttrValue::U8(mode) = record.value {
                        let mode = match mode {
                            1 => ColorMode::Xy,
                            2 => ColorMode::Ct,
                            _ => ColorMode::Hs,
                        };
                        if light.color_mode != mode {
                            light.color_mode = mode;
                            changed = true;
                        }
                    }
                }
                (id::COLOR_CONTROL, color_attr::ENHANCED_CURRENT_HUE) => {
                    if let AttrValue::U16(hue) = record.value {
                        if light.enhanced_hue != hue {
                            light.enhanced_hue = hue;
                            changed = true;
                        }
                    }
                }
                (id::COLOR_CONTROL, color_attr::COLOR_LOOP_ACTIVE) => {
                    if let Some(active) = record.value.as_bool() {
                        if light.color_loop_active != active {
                            light.color_loop_active = active;
                            changed = true;
                        }
                    }
                }
                (id::BASIC, basic_attr::MANUFACTURER_NAME) => {
                    if let Some(s) = record.value.as_str() {
                        if !s.is_empty() && light.manufacturer != s {
                            light.manufacturer = s.to_string();
                            changed = true;
                        }
                    }
                }
                (id::BASIC, basic_attr::MODEL_IDENTIFIER) => {
                    if let Some(s) = record.value.as_str() {
                        if !s.is_empty() && light.model_id != s {
                            light.model_id = s.to_string();
                            changed = true;
                        }
                    }
                }
                (id::BASIC, basic_attr::SW_BUILD_ID) => {
                    if let Some(s) = record.value.as_str() {
                        if !s.is_empty() && light.sw_build_id != s {
                            light.sw_build_id = s.to_string();
                            changed = true;
                        }
                    }
                }
                _ => {}
            }
        }

        if changed {
            light.touch_etag();
            registry.mark_dirty(dirty::LIGHTS);
        }
    }

    fn apply_sensor_basic_records(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        records: &[AttributeRecord],
    ) {
        let mut any_changed = false;

        for idx in 0..registry.sensors.len() {
            {
                let sensor = &registry.sensors[idx];
                if sensor.ext_addr != ind.src_ext_addr
                    || sensor.fingerprint.endpoint != Some(ind.src_endpoint)
                {
                    continue;
                }
            }

            let mut changed = false;

            for record in records {
                let sensor = &mut registry.sensors[idx];
                match record.attr_id {
                    basic_attr::MODEL_IDENTIFIER => {
                        sensor.clear_read(read_flags::MODEL_ID);
                        if let Some(s) = record.value.as_str() {
                            if !s.is_empty() && sensor.model_id != s {
                                sensor.model_id = s.to_string();
                                changed = true;
                            }
                            // give the default-named switch its model name
                            let default_name = format!("Switch {}", sensor.id);
                            if sensor.name == default_name && !s.is_empty() {
                                sensor.name = format!("{} {}", s, sensor.id);
                                changed = true;
                            }
                        }
                    }
                    basic_attr::MANUFACTURER_NAME => {
                        sensor.clear_read(read_flags::VENDOR_NAME);
                        if let Some(s) = record.value.as_str() {
                            if !s.is_empty() && sensor.manufacturer != s {
                                sensor.manufacturer = s.to_string();
                                changed = true;
                            }
                        }
                    }
                    basic_attr::SW_BUILD_ID => {
                        sensor.clear_read(read_flags::SWBUILD_ID);
                        if let Some(s) = record.value.as_str() {
                            if !s.is_empty() && sensor.sw_version != s {
                                sensor.sw_version = s.to_string();
                                changed = true;
                            }
                        }
                    }
                    _ => {}
                }
            }

            if changed {
                registry.sensors[idx].touch_etag();
                any_changed = true;
            }
        }

        if any_changed {
            registry.mark_dirty(dirty::SENSORS);
        }
    }

    /// Convert a raw illuminance measurement into lux.
    ///
    /// ZCL: attribute = 10_000 * log10(lux) + 1; valid raw range is
    /// 1..=0xFFFE, 0 means too dark to measure and 0xFFFF is invalid.
    /// Stored as the 0xFFFF sentinel when invalid.
    #[must_use]
    pub fn decode_illuminance(raw: u16) -> u32 {
        if raw == 0 || raw == 0xFFFF {
            return 0xFFFF;
        }

        let lux = 10f64.powf(f64::from(raw) / 10_000.0);
        if lux >= 1.0 {
            (lux - 1.0) as u32
        } else {
            debug!("invalid lux value {raw}");
            0xFFFF
        }
    }

    fn apply_illuminance(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        records: &[AttributeRecord],
    ) {
        let Some(raw) = records
            .iter()
            .find(|r| r.attr_id == illuminance_attr::MEASURED_VALUE)
            .and_then(|r| match r.value {
                AttrValue::U16(v) => Some(v),
                _ => None,
            })
        else {
            return;
        };

        let lux = Self::decode_illuminance(raw);
        let mut changed = false;

        for sensor in registry.sensors.iter_mut() {
            if sensor.ext_addr != ind.src_ext_addr
                || sensor.fingerprint.endpoint != Some(ind.src_endpoint)
                || !sensor.fingerprint.has_in_cluster(id::ILLUMINANCE_MEASUREMENT)
            {
                continue;
            }

            sensor.state.update_time();
            if sensor.state.lux != Some(lux) {
                sensor.state.lux = Some(lux);
                sensor.touch_etag();
                changed = true;
            }
        }

        if changed {
            registry.mark_dirty(dirty::SENSORS);
        }
    }

    fn apply_occupancy(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        records: &[AttributeRecord],
    ) {
        let mut changed = false;

        for sensor in registry.sensors.iter_mut() {
            if sensor.ext_addr != ind.src_ext_addr
                || sensor.fingerprint.endpoint != Some(ind.src_endpoint)
                || !sensor.fingerprint.has_in_cluster(id::OCCUPANCY_SENSING)
            {
                continue;
            }

            for record in records {
                match record.attr_id {
                    occupancy_attr::OCCUPANCY => {
                        if let Some(v) = record.value.as_u32() {
                            let presence = v != 0;
                            sensor.state.update_time();
                            if sensor.state.presence != Some(presence) {
                                sensor.state.presence = Some(presence);
                                sensor.touch_etag();
                                changed = true;
                            }
                        }
                    }
                    occupancy_attr::OCCUPIED_TO_UNOCCUPIED_DELAY => {
                        if let AttrValue::U16(delay) = record.value {
                            match sensor.config.duration {
                                None | Some(0) => {
                                    debug!("got occupied to unoccupied delay {delay}");
                                    sensor.config.duration = Some(delay);
                                    sensor.touch_etag();
                                    changed = true;
                                }
                                Some(expected) if expected != delay => {
                                    debug!(
                                        "occupied to unoccupied delay is {delay} should be {expected}, force rewrite"
                                    );
                                    sensor.enable_read(
                                        read_flags::WRITE_OCCUPANCY_CONFIG
                                            | read_flags::OCCUPANCY_CONFIG,
                                    );
                                    sensor.next_read_time = Some(Instant::now());
                                }
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if changed {
            registry.mark_dirty(dirty::SENSORS);
        }
    }

    // --- groups / scenes ---

    fn handle_group_cluster(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        frame: &ZclFrame,
    ) {
        if registry
            .light_for_address(ind.src_ext_addr, ind.src_endpoint)
            .is_none()
        {
            return;
        }

        match frame.command_id {
            groups_cmd::GET_GROUP_MEMBERSHIP => {
                let Ok(rsp) = GetGroupMembershipResponse::parse(&frame.payload) else {
                    return;
                };
                self.apply_group_membership(registry, ind, &rsp);
            }
            groups_cmd::ADD_GROUP => {
                let Ok(rsp) = GroupResponse::parse(&frame.payload) else {
                    return;
                };
                if rsp.status == 0x00 {
                    let endpoints = registry.endpoint_count(ind.src_ext_addr);
                    if let Some(light) =
                        registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint)
                    {
                        light.group_capacity = light.group_capacity.saturating_sub(endpoints);
                        light.group_count = light.group_count.saturating_add(1);
                        debug!(
                            "Add to group response for light {}. capacity: {}",
                            light.id, light.group_capacity
                        );
                    }
                }
            }
            groups_cmd::REMOVE_GROUP => {
                let Ok(rsp) = GroupResponse::parse(&frame.payload) else {
                    return;
                };
                if rsp.status == 0x00 {
                    let endpoints = registry.endpoint_count(ind.src_ext_addr);
                    if let Some(light) =
                        registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint)
                    {
                        let scene_count = light
                            .group_info(rsp.group_id)
                            .map_or(0, |g| g.scene_count);
                        light.scene_capacity = light.scene_capacity.saturating_add(scene_count);
                        light.group_capacity = light.group_capacity.saturating_add(endpoints);
                        light.group_count = light.group_count.saturating_sub(1);
                        debug!(
                            "Remove from group response for light {}. capacity: {}",
                            light.id, light.group_capacity
                        );
                    }
                }
            }
            _ => {}
        }
    }

    fn apply_group_membership(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        rsp: &GetGroupMembershipResponse,
    ) {
        {
            let Some(light) = registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint)
            else {
                return;
            };
            light.group_capacity = rsp.capacity;
            light.group_count = rsp.count;
            debug!(
                "verified group capacity: {} and group count: {} of LightNode {:#018X}",
                rsp.capacity, rsp.count, ind.src_ext_addr
            );
        }

        for &group_id in &rsp.groups {
            registry.found_group(group_id);
            self.found_group_membership(registry, ind, group_id);
        }

        // reconcile memberships the device no longer reports
        let light_id = registry
            .light_for_address(ind.src_ext_addr, ind.src_endpoint)
            .map(|l| l.id.clone())
            .unwrap_or_default();
        let known: Vec<u16> = registry
            .light_for_address(ind.src_ext_addr, ind.src_endpoint)
            .map(|l| l.groups.iter().map(|g| g.id).collect())
            .unwrap_or_default();

        for group_id in known {
            let (group_normal, switch_group, multi_pending) = {
                match registry.group_for_address(group_id) {
                    Some(g) => (
                        g.state == GroupState::Normal,
                        g.is_switch_group(),
                        g.multi_device_ids.contains(&light_id),
                    ),
                    None => continue,
                }
            };

            if !group_normal {
                continue;
            }

            let reported = rsp.groups.contains(&group_id);
            let mut dirty_bits = 0;
            let mut remove_multi = false;

            {
                let Some(light) =
                    registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint)
                else {
                    return;
                };
                let Some(info) = light.group_info_mut(group_id) else {
                    continue;
                };

                if !switch_group {
                    if !reported && info.state == GroupMembership::InGroup {
                        // user-created group, force the device to rejoin
                        debug!("restore group {:#06X} for lightNode {}", group_id, light_id);
                        info.actions &= !group_actions::REMOVE_FROM_GROUP;
                        info.actions |= group_actions::ADD_TO_GROUP;
                        dirty_bits |= dirty::LIGHTS;
                    }
                } else if reported && info.state == GroupMembership::NotInGroup {
                    // the switch added this light on the air
                    info.state = GroupMembership::InGroup;
                    remove_multi = multi_pending;
                    dirty_bits |= dirty::LIGHTS;
                } else if !reported && info.state == GroupMembership::InGroup {
                    // the switch removed this light
                    info.state = GroupMembership::NotInGroup;
                    dirty_bits |= dirty::LIGHTS;
                }
            }

            if remove_multi {
                if let Some(group) = registry.group_for_address_mut(group_id) {
                    group.multi_device_ids.retain(|id| id != &light_id);
                    group.touch_etag();
                }
                dirty_bits |= dirty::GROUPS;
            }

            registry.mark_dirty(dirty_bits);
        }
    }

    /// Record a group membership reported by a light.
    fn found_group_membership(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        group_id: u16,
    ) {
        let (group_active, switch_group) = match registry.group_for_address(group_id) {
            Some(g) => (g.state == GroupState::Normal, g.is_switch_group()),
            None => (true, false),
        };

        let mut dirty_bits = 0;

        {
            let Some(light) = registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint)
            else {
                return;
            };

            if let Some(info) = light.group_info_mut(group_id) {
                if !group_active && !switch_group {
                    // a deleted user group the device still carries
                    info.actions &= !group_actions::ADD_TO_GROUP;
                    info.actions |= group_actions::REMOVE_FROM_GROUP;
                    if info.state != GroupMembership::NotInGroup {
                        info.state = GroupMembership::NotInGroup;
                        dirty_bits |= dirty::LIGHTS;
                    }
                }
            } else {
                let mut info = GroupInfo::new(group_id);
                if !group_active && !switch_group {
                    info.actions |= group_actions::REMOVE_FROM_GROUP;
                    info.state = GroupMembership::NotInGroup;
                } else {
                    light.enable_read(read_flags::SCENES);
                }
                light.groups.push(info);
                light.touch_etag();
                dirty_bits |= dirty::LIGHTS;
            }
        }

        registry.mark_dirty(dirty_bits);
    }

    fn handle_scene_cluster(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        frame: &ZclFrame,
    ) {
        match frame.command_id {
            scenes_cmd::GET_SCENE_MEMBERSHIP => {
                let Ok(rsp) = GetSceneMembershipResponse::parse(&frame.payload) else {
                    return;
                };
                if rsp.status != 0x00 {
                    return;
                }

                registry.found_group(rsp.group_id);

                {
                    let Some(light) =
                        registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint)
                    else {
                        return;
                    };
                    light.scene_capacity = rsp.capacity;
                    if let Some(info) = light.group_info_mut(rsp.group_id) {
                        info.scene_count = rsp.scenes.len() as u8;
                    }
                    light.enable_read(read_flags::SCENE_DETAILS);
                }

                for &scene_id in &rsp.scenes {
                    debug!("found scene {:#04X} for group {:#06X}", scene_id, rsp.group_id);
                    self.found_scene(registry, ind, rsp.group_id, scene_id);
                }
            }
            scenes_cmd::STORE_SCENE => {
                let Ok(rsp) = SceneResponse::parse(&frame.payload) else {
                    return;
                };
                self.apply_store_scene(registry, ind, &rsp);
            }
            scenes_cmd::REMOVE_SCENE => {
                let Ok(rsp) = SceneResponse::parse(&frame.payload) else {
                    return;
                };
                self.apply_remove_scene(registry, ind, &rsp);
            }
            scenes_cmd::ADD_SCENE => {
                let Ok(rsp) = SceneResponse::parse(&frame.payload) else {
                    return;
                };
                if let Some(light) =
                    registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint)
                {
                    if let Some(info) = light.group_info_mut(rsp.group_id) {
                        info.modify_scenes.retain(|s| *s != rsp.scene_id);
                    }
                }
            }
            scenes_cmd::VIEW_SCENE => {
                let Ok(rsp) = ViewSceneResponse::parse(&frame.payload) else {
                    return;
                };
                self.apply_view_scene(registry, ind, &rsp);
            }
            _ => {}
        }
    }

    /// Record a scene reported by a light. A scene previously deleted by
    /// the user is scheduled for removal on the device again.
    fn found_scene(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        group_id: u16,
        scene_id: u8,
    ) {
        let (scene_exists, scene_deleted, switch_group) = {
            match registry.group_for_address(group_id) {
                Some(g) => (
                    g.scene(scene_id).is_some(),
                    g.scene(scene_id).is_some_and(|s| s.state == SceneState::Deleted),
                    g.is_switch_group(),
                ),
                None => return,
            }
        };

        if scene_exists {
            if scene_deleted && !switch_group {
                if let Some(light) =
                    registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint)
                {
                    if let Some(info) = light.group_info_mut(group_id) {
                        if !info.remove_scenes.contains(&scene_id) {
                            debug!("Found scene {scene_id} which was deleted before, delete again");
                            info.remove_scenes.push(scene_id);
                        }
                    }
                }
            }
            return;
        }

        let group = registry
            .group_for_address_mut(group_id)
            .expect("checked above");
        group.scenes.push(crate::group::Scene::new(group_id, scene_id));
        group.touch_etag();
        registry.mark_dirty(dirty::SCENES);
    }

    fn apply_store_scene(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        rsp: &SceneResponse,
    ) {
        let snapshot = {
            let Some(light) = registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint)
            else {
                return;
            };

            let light_id_for_log = light.id.clone();
            let Some(info) = light.group_info_mut(rsp.group_id) else {
                return;
            };

            if !info.add_scenes.contains(&rsp.scene_id) {
                return;
            }
            debug!(
                "Stored scene {} in node {} response status {:#04X}",
                rsp.scene_id, light_id_for_log, rsp.status
            );
            info.add_scenes.retain(|s| *s != rsp.scene_id);

            if rsp.status != 0x00 {
                return;
            }

            LightState {
                lid: light.id.clone(),
                on: light.on,
                bri: light.level,
                x: light.color_x,
                y: light.color_y,
                colorloop_active: light.color_loop_active,
                colorloop_time: light.color_loop_speed,
                transition_time: 10,
            }
        };

        let is_new = {
            let Some(scene) = registry
                .group_for_address_mut(rsp.group_id)
                .and_then(|g| g.scene_mut(rsp.scene_id))
            else {
                return;
            };

            if let Some(existing) = scene.lights.iter_mut().find(|l| l.lid == snapshot.lid) {
                *existing = snapshot;
                false
            } else {
                scene.lights.push(snapshot);
                true
            }
        };

        if is_new {
            // capacity changes only when a new light state was created
            if let Some(light) = registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint)
            {
                light.scene_capacity = light.scene_capacity.saturating_sub(1);
                if let Some(info) = light.group_info_mut(rsp.group_id) {
                    info.scene_count = info.scene_count.saturating_add(1);
                }
            }
        }

        registry.mark_dirty(dirty::SCENES);
    }

    fn apply_remove_scene(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        rsp: &SceneResponse,
    ) {
        let light_id = {
            let Some(light) = registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint)
            else {
                return;
            };

            let light_id_for_log = light.id.clone();
            let Some(info) = light.group_info_mut(rsp.group_id) else {
                return;
            };

            if !info.remove_scenes.contains(&rsp.scene_id) {
                return;
            }
            debug!(
                "Removed scene {} from node {} status {:#04X}",
                rsp.scene_id, light_id_for_log, rsp.status
            );
            info.remove_scenes.retain(|s| *s != rsp.scene_id);

            if rsp.status != 0x00 {
                return;
            }

            light.id.clone()
        };

        if let Some(scene) = registry
            .group_for_address_mut(rsp.group_id)
            .and_then(|g| g.scene_mut(rsp.scene_id))
        {
            scene.delete_light(&light_id);
        }

        if let Some(light) = registry.light_for_address_mut(ind.src_ext_addr, ind.src_endpoint) {
            light.scene_capacity = light.scene_capacity.saturating_add(1);
            if let Some(info) = light.group_info_mut(rsp.group_id) {
                info.scene_count = info.scene_count.saturating_sub(1);
            }
        }

        registry.mark_dirty(dirty::SCENES);
    }

    fn apply_view_scene(
        &mut self,
        registry: &mut Registry,
        ind: &ApsDataIndication,
        rsp: &ViewSceneResponse,
    ) {
        if rsp.status != 0x00 {
            return;
        }

        let Some(light_id) = registry
            .light_for_address(ind.src_ext_addr, ind.src_endpoint)
            .map(|l| l.id.clone())
        else {
            return;
        };

        let Some(scene) = registry
            .group_for_address_mut(rsp.group_id)
            .and_then(|g| g.scene_mut(rsp.scene_id))
        else {
            return;
        };

        let on = rsp.on().unwrap_or(false);
        let bri = rsp.level().unwrap_or(0);
        let (x, y) = rsp.color_xy().unwrap_or((0, 0));

        if let Some(existing) = scene.lights.iter_mut().find(|l| l.lid == light_id) {
            existing.on = on;
            existing.bri = bri;
            existing.x = x;
            existing.y = y;
            existing.transition_time = rsp.transition_time;
        } else {
            scene.lights.push(LightState {
                lid: light_id,
                on,
                bri,
                x,
                y,
                colorloop_active: false,
                colorloop_time: 15,
                transition_time: rsp.transition_time,
            });
        }

        registry.mark_dirty(dirty::SCENES);
    }

    /// Whether a sensor's measurement reports have been arriving within
    /// the expected window.
    #[must_use]
    pub fn reports_timely(
        cache: &AttributeCache,
        ext_addr: u64,
        cluster_id: u16,
        attr_id: u16,
    ) -> bool {
        cache.reported_within(ext_addr, cluster_id, attr_id, REPORT_STALE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockRadio;
    use crate::sensor::{Sensor, SensorFingerprint, SensorType};
    use zcl_protocol::SimpleDescriptor;

    const EXT: u64 = 0x00212EFFFF001122;
    const EP: u8 = 0x0B;

    fn setup() -> (Synchronizer, Registry, AttributeCache, Pipeline) {
        let config = GatewayConfig::default();
        let mut pipeline = Pipeline::new(&config);
        pipeline.set_network_state(true);
        (
            Synchronizer::new(config),
            Registry::new(),
            AttributeCache::new(),
            pipeline,
        )
    }

    fn add_light(registry: &mut Registry) {
        let mut node = crate::node::NodeInfo::new(EXT, 0x4A11);
        node.upsert_simple_descriptor(SimpleDescriptor {
            endpoint: EP,
            profile_id: profile::HOME_AUTOMATION,
            device_id: zcl_protocol::cluster::device::HA_COLOR_DIMMABLE_LIGHT,
            in_clusters: vec![id::BASIC, id::ON_OFF, id::LEVEL_CONTROL, id::COLOR_CONTROL, id::GROUPS, id::SCENES],
            out_clusters: vec![],
        });
        registry.upsert_node(node.clone());
        registry.add_light_node(&node, 0);
    }

    fn lux_sensor(registry: &mut Registry) {
        let fp = SensorFingerprint {
            endpoint: Some(0x02),
            profile_id: profile::HOME_AUTOMATION,
            device_id: 0x0106,
            in_clusters: vec![id::ILLUMINANCE_MEASUREMENT],
            out_clusters: vec![],
        };
        let mut sensor = Sensor::new(EXT, SensorType::ZhaLight, fp);
        sensor.id = "7".to_string();
        registry.sensors.push(sensor);
    }

    fn report_indication(cluster_id: u16, endpoint: u8, payload: Vec<u8>) -> ApsDataIndication {
        let mut frame = ZclFrame::global_command(1, global_cmd::REPORT_ATTRIBUTES);
        frame.frame_control |= zcl_protocol::frame::FC_DIRECTION_SERVER_TO_CLIENT;
        frame.payload = payload;
        ApsDataIndication {
            src_ext_addr: EXT,
            src_nwk_addr: 0x4A11,
            src_endpoint: endpoint,
            dst_endpoint: 1,
            profile_id: profile::HOME_AUTOMATION,
            cluster_id,
            asdu: frame.serialize(),
            lqi: 255,
            rssi: -40,
        }
    }

    fn cluster_indication(cluster_id: u16, command_id: u8, payload: Vec<u8>) -> ApsDataIndication {
        let mut frame = ZclFrame::cluster_command(1, command_id);
        frame.frame_control |= zcl_protocol::frame::FC_DIRECTION_SERVER_TO_CLIENT;
        frame.payload = payload;
        ApsDataIndication {
            src_ext_addr: EXT,
            src_nwk_addr: 0x4A11,
            src_endpoint: EP,
            dst_endpoint: 1,
            profile_id: profile::HOME_AUTOMATION,
            cluster_id,
            asdu: frame.serialize(),
            lqi: 255,
            rssi: -40,
        }
    }

    #[test]
    fn test_decode_illuminance() {
        // 10^(40000/10000) - 1 = 9999 lux
        assert_eq!(Synchronizer::decode_illuminance(40_000), 9999);
        assert_eq!(Synchronizer::decode_illuminance(0), 0xFFFF);
        assert_eq!(Synchronizer::decode_illuminance(0xFFFF), 0xFFFF);
        // 10^(1/10000) is barely above 1.0: rounds down to 0 lux
        assert_eq!(Synchronizer::decode_illuminance(1), 0);
    }

    #[test]
    fn test_illuminance_report_updates_sensor_and_cache() {
        let (mut sync, mut registry, mut cache, mut pipeline) = setup();
        lux_sensor(&mut registry);

        // raw 0x4E20 = 20000 -> 10^2 - 1 = 99 lux
        let ind = report_indication(
            id::ILLUMINANCE_MEASUREMENT,
            0x02,
            vec![0x00, 0x00, 0x21, 0x20, 0x4E],
        );
        sync.handle_indication(&mut registry, &mut cache, &mut pipeline, &ind);

        let sensor = &registry.sensors[0];
        assert_eq!(sensor.state.lux, Some(99));
        assert!(!sensor.state.lastupdated.is_empty());
        assert!(cache
            .get(EXT, id::ILLUMINANCE_MEASUREMENT, illuminance_attr::MEASURED_VALUE)
            .is_some());
    }

    #[test]
    fn test_on_off_report_updates_light() {
        let (mut sync, mut registry, mut cache, mut pipeline) = setup();
        add_light(&mut registry);
        let etag_before = registry.lights[0].etag.clone();

        let ind = report_indication(id::ON_OFF, EP, vec![0x00, 0x00, 0x10, 0x01]);
        sync.handle_indication(&mut registry, &mut cache, &mut pipeline, &ind);

        assert!(registry.lights[0].on);
        assert_ne!(registry.lights[0].etag, etag_before);
    }

    #[test]
    fn test_group_membership_drift_user_group() {
        let (mut sync, mut registry, mut cache, mut pipeline) = setup();
        add_light(&mut registry);

        // user-created group 4, light believes it is a member
        registry.found_group(4);
        registry.lights[0].groups.push(GroupInfo::new(4));

        // response reports only group 1
        let ind = cluster_indication(
            id::GROUPS,
            groups_cmd::GET_GROUP_MEMBERSHIP,
            vec![10, 1, 0x01, 0x00],
        );
        sync.handle_indication(&mut registry, &mut cache, &mut pipeline, &ind);

        let light = &registry.lights[0];
        let info = light.group_info(4).unwrap();
        // membership forced back via an add action
        assert_ne!(info.actions & group_actions::ADD_TO_GROUP, 0);
        assert_eq!(info.actions & group_actions::REMOVE_FROM_GROUP, 0);
        assert_eq!(info.state, GroupMembership::InGroup);

        // group 1 was discovered and recorded
        assert!(registry.group_for_address(1).is_some());
        assert!(light.group_info(1).is_some());
    }

    #[test]
    fn test_group_membership_drift_switch_group() {
        let (mut sync, mut registry, mut cache, mut pipeline) = setup();
        add_light(&mut registry);

        registry.found_group(4).device_memberships.push("9".to_string());
        registry.lights[0].groups.push(GroupInfo::new(4));

        // switch group omitted from the response: the switch removed it
        let ind = cluster_indication(
            id::GROUPS,
            groups_cmd::GET_GROUP_MEMBERSHIP,
            vec![10, 0],
        );
        sync.handle_indication(&mut registry, &mut cache, &mut pipeline, &ind);

        let info = registry.lights[0].group_info(4).unwrap();
        assert_eq!(info.state, GroupMembership::NotInGroup);
        assert_eq!(info.actions, 0);
    }

    #[test]
    fn test_group_capacity_bookkeeping() {
        let (mut sync, mut registry, mut cache, mut pipeline) = setup();
        add_light(&mut registry);
        registry.lights[0].group_capacity = 10;
        registry.lights[0].group_count = 2;

        let ind = cluster_indication(id::GROUPS, groups_cmd::ADD_GROUP, vec![0x00, 0x04, 0x00]);
        sync.handle_indication(&mut registry, &mut cache, &mut pipeline, &ind);
        assert_eq!(registry.lights[0].group_count, 3);
        assert_eq!(registry.lights[0].group_capacity, 9);

        registry.lights[0].groups.push(GroupInfo::new(4));
        let ind = cluster_indication(id::GROUPS, groups_cmd::REMOVE_GROUP, vec![0x00, 0x04, 0x00]);
        sync.handle_indication(&mut registry, &mut cache, &mut pipeline, &ind);
        assert_eq!(registry.lights[0].group_count, 2);
        assert_eq!(registry.lights[0].group_capacity, 10);
    }

    #[test]
    fn test_scene_membership_discovery() {
        let (mut sync, mut registry, mut cache, mut pipeline) = setup();
        add_light(&mut registry);
        registry.found_group(3);
        registry.lights[0].groups.push(GroupInfo::new(3));

        let ind = cluster_indication(
            id::SCENES,
            scenes_cmd::GET_SCENE_MEMBERSHIP,
            vec![0x00, 14, 0x03, 0x00, 2, 1, 10],
        );
        sync.handle_indication(&mut registry, &mut cache, &mut pipeline, &ind);

        let group = registry.group_for_address(3).unwrap();
        assert_eq!(group.scenes.len(), 2);
        assert_eq!(group.scenes[0].name, "Scene 1");
        assert_eq!(group.scenes[1].name, "Scene 10");
        assert_eq!(registry.lights[0].scene_capacity, 14);
        assert!(registry.lights[0].must_read(read_flags::SCENE_DETAILS));
    }

    #[test]
    fn test_deleted_scene_rescheduled_for_removal() {
        let (mut sync, mut registry, mut cache, mut pipeline) = setup();
        add_light(&mut registry);
        registry.found_group(3);
        registry.lights[0].groups.push(GroupInfo::new(3));

        let group = registry.group_for_address_mut(3).unwrap();
        let mut scene = crate::group::Scene::new(3, 1);
        scene.state = SceneState::Deleted;
        group.scenes.push(scene);

        let ind = cluster_indication(
            id::SCENES,
            scenes_cmd::GET_SCENE_MEMBERSHIP,
            vec![0x00, 14, 0x03, 0x00, 1, 1],
        );
        sync.handle_indication(&mut registry, &mut cache, &mut pipeline, &ind);

        let info = registry.lights[0].group_info(3).unwrap();
        assert_eq!(info.remove_scenes, vec![1]);
    }

    #[test]
    fn test_store_scene_updates_capacity_once() {
        let (mut sync, mut registry, mut cache, mut pipeline) = setup();
        add_light(&mut registry);
        registry.lights[0].on = true;
        registry.lights[0].level = 200;
        registry.lights[0].scene_capacity = 10;
        registry.found_group(3);
        let mut info = GroupInfo::new(3);
        info.add_scenes.push(2);
        registry.lights[0].groups.push(info);
        registry
            .group_for_address_mut(3)
            .unwrap()
            .scenes
            .push(crate::group::Scene::new(3, 2));

        let ind = cluster_indication(
            id::SCENES,
            scenes_cmd::STORE_SCENE,
            vec![0x00, 0x03, 0x00, 2],
        );
        sync.handle_indication(&mut registry, &mut cache, &mut pipeline, &ind);

        let scene = registry.group_for_address(3).unwrap().scene(2).unwrap();
        let ls = scene.light("1").unwrap();
        assert!(ls.on);
        assert_eq!(ls.bri, 200);
        assert_eq!(registry.lights[0].scene_capacity, 9);
        // flag consumed
        assert!(registry.lights[0].group_info(3).unwrap().add_scenes.is_empty());
    }

    #[test]
    fn test_idle_tick_flags_stale_entities() {
        let (mut sync, mut registry, cache, mut pipeline) = setup();
        add_light(&mut registry);
        registry.lights[0].pending_reads = 0;
        registry.lights[0].model_id = "LCT001".to_string();
        registry.lights[0].sw_build_id = "1.0".to_string();
        registry.lights[0].manufacturer = "Philips".to_string();

        // run past the user-activity gate and the read limit
        let config = GatewayConfig::default();
        for _ in 0..(config.idle_user_limit + config.idle_read_limit + 2) {
            sync.idle_tick(&mut registry, &cache, &mut pipeline);
        }

        assert!(registry.lights[0].must_read(read_flags::ON_OFF));
        assert!(registry.lights[0].must_read(read_flags::GROUPS));
    }

    #[test]
    fn test_user_activity_holds_idle_loop() {
        let (mut sync, mut registry, cache, mut pipeline) = setup();
        add_light(&mut registry);
        registry.lights[0].pending_reads = 0;

        for _ in 0..200 {
            sync.user_activity();
            sync.idle_tick(&mut registry, &cache, &mut pipeline);
        }
        assert_eq!(registry.lights[0].pending_reads, 0);
    }

    #[test]
    fn test_attr_tick_enqueues_reads() {
        let (mut sync, mut registry, mut cache, mut pipeline) = setup();
        let mut radio = MockRadio::new();
        add_light(&mut registry);

        let light = &mut registry.lights[0];
        light.pending_reads = 0;
        light.enable_read(read_flags::ON_OFF | read_flags::LEVEL | read_flags::COLOR);
        light.next_read_time = Some(Instant::now());

        sync.attr_tick(&mut registry, &mut cache, &mut pipeline);
        // two ops max for the light
        assert_eq!(pipeline.task_count(), 2);
        assert!(!registry.lights[0].must_read(read_flags::ON_OFF));
        assert!(!registry.lights[0].must_read(read_flags::LEVEL));
        assert!(registry.lights[0].must_read(read_flags::COLOR));

        pipeline.process_tasks(&mut registry, &mut radio);
        assert_eq!(radio.sent.len(), 1);
    }

    #[test]
    fn test_occupancy_delay_force_rewrite() {
        let (mut sync, mut registry, mut cache, mut pipeline) = setup();
        let fp = SensorFingerprint {
            endpoint: Some(0x02),
            profile_id: profile::HOME_AUTOMATION,
            device_id: 0x0107,
            in_clusters: vec![id::OCCUPANCY_SENSING],
            out_clusters: vec![],
        };
        let mut sensor = Sensor::new(EXT, SensorType::ZhaPresence, fp);
        sensor.id = "3".to_string();
        sensor.config.duration = Some(60);
        registry.sensors.push(sensor);

        // device reports 30 where 60 is configured
        let ind = report_indication(
            id::OCCUPANCY_SENSING,
            0x02,
            vec![0x10, 0x00, 0x21, 30, 0],
        );
        sync.handle_indication(&mut registry, &mut cache, &mut pipeline, &ind);

        let sensor = &registry.sensors[0];
        assert!(sensor.must_read(read_flags::WRITE_OCCUPANCY_CONFIG));
        assert!(sensor.must_read(read_flags::OCCUPANCY_CONFIG));
        assert_eq!(sensor.config.duration, Some(60));
    }

    #[test]
    fn test_node_event_power_descriptor() {
        let (mut sync, mut registry, _cache, _pipeline) = setup();
        lux_sensor(&mut registry);

        sync.handle_node_event(
            &mut registry,
            NodeEvent::PowerDescriptor { ext_addr: EXT, battery: 66 },
        );
        assert_eq!(registry.sensors[0].config.battery, 66);
    }
}
