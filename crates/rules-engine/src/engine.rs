//! Rule evaluation and binding verification
//!
//! One rule is verified per tick, round-robin. Periodic rules are
//! evaluated against the attribute cache; green-power button events take
//! a reactive path that runs within the indication handler.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};
use zcl_protocol::cluster::{id, illuminance_attr};
use zcl_protocol::green_power::{is_button_event, GpDataIndication};
use zcl_protocol::Destination;

use gateway_core::attr_cache::{AttributeCache, Freshness};
use gateway_core::bindings::{Binding, BindingAction, BindingDestination, BindingTask};
use gateway_core::group::GroupState;
use gateway_core::persistence::dirty;
use gateway_core::pipeline::MAX_BINDING_QUEUE;
use gateway_core::util::read_flags;
use gateway_core::{GatewayConfig, Pipeline, Registry, TaskItem};

use crate::model::{Rule, RuleOperator, RuleState};
use crate::replay::{GroupsResource, LightsResource, ReplayStatus};

/// The rules engine
pub struct RulesEngine {
    pub rules: Vec<Rule>,
    verify_iter: usize,
    max_rule_attr_age: Duration,
    max_verify_delay: u64,
    groups: GroupsResource,
    lights: LightsResource,
}

impl RulesEngine {
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            rules: Vec::new(),
            verify_iter: 0,
            max_rule_attr_age: config.max_rule_attr_age,
            max_verify_delay: config.max_verify_delay,
            groups: GroupsResource,
            lights: LightsResource,
        }
    }

    /// Look up a rule by id.
    ///
    /// The primary scan only returns rules in normal state; the fallback
    /// also yields deleted rules so the delete path can find its slot.
    #[must_use]
    pub fn rule_for_id(&self, id: &str) -> Option<&Rule> {
        self.rules
            .iter()
            .find(|r| r.state == RuleState::Normal && r.id == id)
            .or_else(|| self.rules.iter().find(|r| r.id == id))
    }

    pub fn rule_for_id_mut(&mut self, id: &str) -> Option<&mut Rule> {
        let pos = self
            .rules
            .iter()
            .position(|r| r.state == RuleState::Normal && r.id == id)
            .or_else(|| self.rules.iter().position(|r| r.id == id))?;
        Some(&mut self.rules[pos])
    }

    /// The 5 s verify tick: trigger the currently pointed rule if its
    /// conditions hold, then re-verify its mesh bindings (throttled).
    pub fn verify_tick(
        &mut self,
        registry: &mut Registry,
        cache: &mut AttributeCache,
        pipeline: &mut Pipeline,
        idle_total: u64,
    ) {
        if !pipeline.is_connected() || self.rules.is_empty() {
            return;
        }

        if self.verify_iter >= self.rules.len() {
            self.verify_iter = 0;
        }

        let idx = self.verify_iter;
        self.verify_iter += 1;

        self.trigger_rule_if_needed(idx, registry, cache, pipeline);

        if pipeline.binding_queue_len() < MAX_BINDING_QUEUE {
            let rule = &self.rules[idx];
            if rule.state == RuleState::Normal
                && rule.last_verify + self.max_verify_delay < idle_total
            {
                self.rules[idx].last_verify = idle_total;
                let rule = self.rules[idx].clone();
                self.queue_check_rule_bindings(&rule, registry, pipeline);
            }
        }
    }

    /// Trigger a periodic rule's actions if all conditions are met.
    fn trigger_rule_if_needed(
        &mut self,
        idx: usize,
        registry: &mut Registry,
        cache: &mut AttributeCache,
        pipeline: &mut Pipeline,
    ) {
        {
            let rule = &self.rules[idx];

            if !rule.is_enabled() {
                return;
            }

            if rule.trigger_periodic < 0 {
                return;
            }

            if rule.trigger_periodic == 0 {
                // event driven, handled by the reactive paths
                return;
            }

            if let Some(last) = rule.last_triggered_at {
                if last.elapsed() < Duration::from_millis(rule.trigger_periodic as u64) {
                    return;
                }
            }
        }

        let conditions = self.rules[idx].conditions.clone();

        for condition in &conditions {
            let segments: Vec<&str> =
                condition.address.split('/').filter(|s| !s.is_empty()).collect();

            if segments.len() < 4 || segments[0] != "sensors" {
                return;
            }

            let Some(sensor) = registry.sensor_for_id(segments[1]) else {
                return;
            };
            if !sensor.is_available() {
                return;
            }

            match *segments.last().expect("len checked") {
                "buttonevent" => return, // reactive only
                "illuminance" => {
                    let ext_addr = sensor.ext_addr;
                    let endpoint = sensor.fingerprint.endpoint;

                    match cache.freshness(
                        ext_addr,
                        id::ILLUMINANCE_MEASUREMENT,
                        illuminance_attr::MEASURED_VALUE,
                        self.max_rule_attr_age,
                    ) {
                        Freshness::Fresh => {}
                        Freshness::ReadPending => return,
                        Freshness::Stale => {
                            // force a read, the rule is skipped this tick
                            let Some(endpoint) = endpoint else { return };
                            info!("force read illuminance value of {ext_addr:#018X}");
                            let dst = Destination::Ext { addr: ext_addr, endpoint };
                            let seq = pipeline.next_seq();
                            if pipeline.add_task(TaskItem::read_attributes(
                                dst,
                                seq,
                                id::ILLUMINANCE_MEASUREMENT,
                                &[illuminance_attr::MEASURED_VALUE],
                            )) {
                                cache.mark_read_request(
                                    ext_addr,
                                    id::ILLUMINANCE_MEASUREMENT,
                                    illuminance_attr::MEASURED_VALUE,
                                );
                            }
                            return;
                        }
                    }

                    let Ok(threshold) = condition.value.parse::<u32>() else {
                        debug!("invalid rule.condition.value {}", condition.value);
                        return;
                    };
                    let lux = sensor.state.lux.unwrap_or(0);

                    match condition.operator {
                        RuleOperator::Lt if lux < threshold => {}
                        RuleOperator::Gt if lux > threshold => {}
                        _ => return, // condition not met or unsupported
                    }
                }
                _ => return, // unsupported condition address
            }
        }

        // conditions ok, replay the actions
        let owner = self.rules[idx].owner.clone();
        let actions = self.rules[idx].actions.clone();
        let mut triggered = false;

        for action in &actions {
            if action.method != "PUT" {
                return;
            }

            let mut path: Vec<String> = vec!["api".to_string(), owner.clone()];
            path.extend(action.address.split('/').filter(|s| !s.is_empty()).map(String::from));

            if path.len() < 3 {
                return;
            }

            let body: Value = serde_json::from_str(&action.body).unwrap_or(Value::Null);

            let status = match path[2].as_str() {
                "groups" => self.groups.handle(registry, pipeline, "PUT", &path[2..], &body),
                "lights" => self.lights.handle(registry, pipeline, "PUT", &path[2..], &body),
                other => {
                    debug!("unsupported rule action address /{other}");
                    return;
                }
            };

            if status == ReplayStatus::NotHandled {
                return;
            }
            triggered = true;
        }

        if triggered {
            self.rules[idx].mark_triggered();
            registry.mark_dirty(dirty::RULES);
        }
    }

    /// Verify that the mesh bindings a rule implies are present on the
    /// source device, queueing bind or unbind tasks as needed.
    pub fn queue_check_rule_bindings(
        &self,
        rule: &Rule,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
    ) {
        let mut action = if rule.state == RuleState::Normal && rule.is_enabled() {
            BindingAction::Bind
        } else if rule.state == RuleState::Deleted || !rule.is_enabled() {
            BindingAction::Unbind
        } else {
            debug!("ignored checking of rule {}", rule.name);
            return;
        };

        // conditions carry the binding source: an eq operator selects the
        // source endpoint by value
        let mut source: Option<(u64, u8, String)> = None;

        for condition in &rule.conditions {
            if condition.operator != RuleOperator::Eq {
                continue;
            }

            let segments: Vec<&str> =
                condition.address.split('/').filter(|s| !s.is_empty()).collect();
            if segments.len() != 4
                || segments[0] != "sensors"
                || segments[2] != "state"
                || !matches!(segments[3], "buttonevent" | "illuminance" | "presence")
            {
                continue;
            }

            let Some(sensor) = registry.sensor_for_id(segments[1]) else {
                debug!("skip verify rule {} for missing sensor {}", rule.name, segments[1]);
                continue;
            };
            if !sensor.is_available() {
                debug!("skip verify rule {} for sensor {} (unavailable)", rule.name, sensor.id);
                continue;
            }

            let Some(node) = registry.node(sensor.ext_addr) else {
                continue;
            };

            let Ok(endpoint) = condition.value.parse::<u8>() else {
                continue;
            };

            if node.has_active_endpoint(endpoint) {
                let ext_addr = sensor.ext_addr;
                let sensor_id = sensor.id.clone();
                source = Some((ext_addr, endpoint, sensor_id.clone()));
                if let Some(sensor) = registry.sensor_for_id_mut(&sensor_id) {
                    sensor.enable_read(read_flags::BINDING_TABLE);
                    sensor.next_read_time = Some(std::time::Instant::now());
                }
                break;
            }
        }

        let Some((src_addr, src_endpoint, sensor_id)) = source else {
            debug!("no src addressing found for rule {}", rule.name);
            return;
        };

        // a sensor turned off must not keep its bindings active
        if action == BindingAction::Bind {
            let sensor_on = registry
                .sensor_for_id(&sensor_id)
                .is_some_and(|s| s.config.on);
            if !sensor_on {
                info!(
                    "Sensor {} is 'off', prevent rule {}: {} activation",
                    sensor_id, rule.id, rule.name
                );
                action = BindingAction::Unbind;
            }
        }

        debug!("verify rule {}: {}", rule.id, rule.name);

        for rule_action in &rule.actions {
            if rule_action.method != "BIND" {
                continue;
            }

            let segments: Vec<&str> =
                rule_action.address.split('/').filter(|s| !s.is_empty()).collect();
            if segments.len() != 3 {
                continue;
            }

            // /groups/<n>/action or /lights/<n>/state
            let dst = match segments[0] {
                "groups" => match segments[1].parse::<u16>() {
                    Ok(group) => BindingDestination::Group(group),
                    Err(_) => continue,
                },
                "lights" => match registry.light_for_id(segments[1]) {
                    Some(light) => BindingDestination::Ext {
                        addr: light.ext_addr,
                        endpoint: light.endpoint,
                    },
                    None => continue,
                },
                _ => continue, // unsupported addressing
            };

            // the body names the bound clusters
            let clusters: &[(&str, u16)] = &[
                ("on", id::ON_OFF),
                ("bri", id::LEVEL_CONTROL),
                ("scene", id::SCENES),
                ("illum", id::ILLUMINANCE_MEASUREMENT),
                ("occ", id::OCCUPANCY_SENSING),
            ];

            for (needle, cluster_id) in clusters {
                if rule_action.body.contains(needle) {
                    let binding = Binding {
                        src_ext_addr: src_addr,
                        src_endpoint,
                        cluster_id: *cluster_id,
                        dst,
                    };
                    pipeline.queue_binding_task(BindingTask::new(
                        binding,
                        action,
                        sensor_id.clone(),
                    ));
                }
            }
        }
    }

    /// Reactive green-power button path.
    ///
    /// Updates the sensor state, then triggers every rule whose
    /// conditions on that sensor hold. Returns true when any rule
    /// triggered; the caller debounces the persistence write.
    pub fn gp_button_event(
        &mut self,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
        ind: &GpDataIndication,
    ) -> bool {
        if !is_button_event(ind.gpd_command_id) {
            return false;
        }

        let (sensor_id, lastupdated_changed) = {
            let Some(sensor) = registry.sensor_for_address_mut(u64::from(ind.gpd_src_id)) else {
                return false;
            };
            if sensor.deleted_state == gateway_core::sensor::SensorLifecycle::Deleted {
                return false;
            }

            let lastupdated_old = sensor.state.lastupdated.clone();
            sensor.state.buttonevent = Some(u32::from(ind.gpd_command_id));
            sensor.state.update_time();
            sensor.touch_etag();

            (sensor.id.clone(), lastupdated_old != sensor.state.lastupdated)
        };

        let buttonevent = u32::from(ind.gpd_command_id);
        let mut any_triggered = false;

        for idx in 0..self.rules.len() {
            if self.rules[idx].state == RuleState::Deleted {
                continue;
            }

            let mut matched_any = false;
            let mut all_hold = true;

            for condition in &self.rules[idx].conditions {
                let segments: Vec<&str> =
                    condition.address.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() < 2 || segments[0] != "sensors" || segments[1] != sensor_id {
                    continue;
                }

                matched_any = true;
                let holds = if condition.address.contains("buttonevent") {
                    condition.value.parse::<u32>() == Ok(buttonevent)
                } else {
                    lastupdated_changed
                };
                if !holds {
                    all_hold = false;
                }
            }

            if !(matched_any && all_hold) {
                continue;
            }

            let actions = self.rules[idx].actions.clone();
            for action in &actions {
                let segments: Vec<String> = action
                    .address
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();

                if action.address.contains("scenes") {
                    // /groups/<gid>/scenes/<sid>
                    if segments.len() < 4 {
                        continue;
                    }
                    self.recall_scene_action(registry, pipeline, &segments[1], &segments[3]);
                } else if action.address.contains("lights") {
                    // single-light button actions are not supported yet
                    if segments.len() >= 2 {
                        debug!("unsupported lights button action for light {}", segments[1]);
                    }
                } else if action.address.contains("groups") {
                    if segments.len() < 2 {
                        continue;
                    }
                    self.group_on_off_action(registry, pipeline, &segments[1], &action.body);
                }
            }

            self.rules[idx].mark_triggered();
            registry.mark_dirty(dirty::RULES);
            any_triggered = true;
        }

        any_triggered
    }

    /// Recall a scene and reconcile the cached light states against the
    /// stored scene, fixing colorloop drift on the devices.
    fn recall_scene_action(
        &mut self,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
        group_id: &str,
        scene_id: &str,
    ) {
        let Ok(group_addr) = group_id.parse::<u16>() else {
            return;
        };
        let Ok(scene_id) = scene_id.parse::<u8>() else {
            return;
        };

        let group_usable = registry
            .group_for_address(group_addr)
            .is_some_and(|g| g.state == GroupState::Normal);
        if !group_usable {
            return;
        }

        let seq = pipeline.next_seq();
        if !pipeline.add_task(TaskItem::recall_scene(group_addr, seq, scene_id)) {
            info!("failed to call scene");
            return;
        }

        let scene_lights = registry
            .group_for_address(group_addr)
            .and_then(|g| g.scene(scene_id))
            .filter(|s| s.state == gateway_core::group::SceneState::Normal)
            .map(|s| s.lights.clone())
            .unwrap_or_default();

        let mut colorloop_deactivated = false;

        for ls in &scene_lights {
            let Some(light) = registry.light_for_id_mut(&ls.lid) else {
                continue;
            };
            if !light.reachable {
                continue;
            }

            let dst = Destination::Ext { addr: light.ext_addr, endpoint: light.endpoint };
            let mut changed = false;

            if !ls.colorloop_active && light.color_loop_active {
                // some devices keep a colorloop running across scene
                // recalls; stop it when the scene was saved without one
                light.color_loop_active = false;
                let seq = pipeline.next_seq();
                pipeline.add_task(TaskItem::set_color_loop(dst, seq, false, 15));
                changed = true;
                colorloop_deactivated = true;
            } else if ls.colorloop_active && !light.color_loop_active {
                // others do not store the colorloop in the scene at all
                light.color_loop_active = true;
                light.color_loop_speed = ls.colorloop_time;
                let seq = pipeline.next_seq();
                pipeline.add_task(TaskItem::set_color_loop(dst, seq, true, ls.colorloop_time));
                changed = true;
            }

            if ls.on != light.on {
                light.on = ls.on;
                changed = true;
            }
            if ls.bri != light.level {
                light.level = ls.bri;
                changed = true;
            }
            if changed {
                light.touch_etag();
            }
        }

        // the first recall raced the colorloop stop, apply the scene again
        if colorloop_deactivated {
            let seq = pipeline.next_seq();
            pipeline.add_task(TaskItem::recall_scene(group_addr, seq, scene_id));
        }

        if let Some(group) = registry.group_for_address_mut(group_addr) {
            if !group.on {
                group.on = true;
                group.touch_etag();
            }
        }
        registry.mark_dirty(dirty::GROUPS);
    }

    /// Broadcast an on/off body to a group, keeping the cached group and
    /// member light state in sync and stopping stray colorloops.
    fn group_on_off_action(
        &mut self,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
        group_id: &str,
        body: &str,
    ) {
        let on = if body.contains("on") && body.contains("true") {
            true
        } else if body.contains("on") && body.contains("false") {
            false
        } else {
            return;
        };

        let group_addr = if group_id == "0" {
            None
        } else {
            match registry.group_for_id(group_id) {
                Some(group) => Some(group.address),
                None => return,
            }
        };

        let dst = match group_addr {
            Some(addr) => Destination::Group(addr),
            None => Destination::Nwk { addr: 0xFFFC, endpoint: 0xFF },
        };

        let cmd = if on {
            zcl_protocol::cluster::onoff_cmd::ON
        } else {
            zcl_protocol::cluster::onoff_cmd::OFF
        };

        let seq = pipeline.next_seq();
        let mut task = TaskItem::set_on_off(dst, seq, cmd, 0);
        task.fire_and_forget = true;
        if !pipeline.add_task(task) {
            info!("failed to send {} command", if on { "on" } else { "off" });
            return;
        }

        if let Some(addr) = group_addr {
            if let Some(group) = registry.group_for_address_mut(addr) {
                group.on = on;
                group.touch_etag();
            }

            // turning a group on must stop a colorloop left running on it
            if on {
                let loop_active = registry
                    .group_for_address(addr)
                    .is_some_and(|g| g.color_loop_active);
                if loop_active {
                    let seq = pipeline.next_seq();
                    pipeline.add_task(TaskItem::set_color_loop(Destination::Group(addr), seq, false, 15));
                    if let Some(group) = registry.group_for_address_mut(addr) {
                        group.color_loop_active = false;
                    }
                }
            }
        }

        // sync member lights (all lights for the broadcast group)
        let member_ids: Vec<String> = registry
            .lights
            .iter()
            .filter(|l| match group_addr {
                Some(addr) => l.is_in_group(addr),
                None => true,
            })
            .map(|l| l.id.clone())
            .collect();

        for light_id in member_ids {
            let mut colorloop_task = None;
            if let Some(light) = registry.light_for_id_mut(&light_id) {
                light.on = on;
                if on && light.reachable && light.color_loop_active {
                    light.color_loop_active = false;
                    colorloop_task = Some(Destination::Ext {
                        addr: light.ext_addr,
                        endpoint: light.endpoint,
                    });
                }
                light.touch_etag();
            }
            if let Some(dst) = colorloop_task {
                let seq = pipeline.next_seq();
                pipeline.add_task(TaskItem::set_color_loop(dst, seq, false, 15));
            }
        }

        registry.mark_dirty(dirty::GROUPS | dirty::LIGHTS);
    }
}
