//! Internal REST replay
//!
//! Rule actions are replayed as synthesized requests against in-process
//! resource handlers. Each handler is a callable taking
//! `(method, path, body)` and returning whether it handled the request;
//! a handler must enqueue radio tasks and return, never block.

use serde_json::Value;
use tracing::debug;
use zcl_protocol::cluster::onoff_cmd;
use zcl_protocol::Destination;

use gateway_core::persistence::dirty;
use gateway_core::{Pipeline, Registry, TaskItem};

/// All-routers broadcast used for group 0
const BROADCAST_ROUTERS: u16 = 0xFFFC;

/// Outcome of an internal replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStatus {
    Handled,
    NotHandled,
}

/// Handler for `/groups/<id>` and `/groups/<id>/action`
#[derive(Default)]
pub struct GroupsResource;

/// Handler for `/lights/<id>` and `/lights/<id>/state`
#[derive(Default)]
pub struct LightsResource;

impl GroupsResource {
    /// Handle a replayed request. `path` starts at the resource segment,
    /// e.g. `["groups", "1", "action"]`.
    pub fn handle(
        &self,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
        method: &str,
        path: &[String],
        body: &Value,
    ) -> ReplayStatus {
        if method != "PUT" || path.len() < 2 || path[0] != "groups" {
            return ReplayStatus::NotHandled;
        }

        let group_id = path[1].as_str();
        let dst = if group_id == "0" {
            Destination::Nwk { addr: BROADCAST_ROUTERS, endpoint: 0xFF }
        } else {
            match registry.group_for_id(group_id) {
                Some(group) => Destination::Group(group.address),
                None => return ReplayStatus::NotHandled,
            }
        };

        let Some(map) = body.as_object() else {
            return ReplayStatus::NotHandled;
        };

        let transition_time = map
            .get("transitiontime")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u16;

        let mut handled = false;

        if let Some(on) = map.get("on").and_then(Value::as_bool) {
            let cmd = if on { onoff_cmd::ON } else { onoff_cmd::OFF };
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::set_on_off(dst, seq, cmd, 0)) {
                if let Some(group) = registry.group_for_id_mut(group_id) {
                    if group.on != on {
                        group.on = on;
                        group.touch_etag();
                    }
                    let address = group.address;
                    for light in registry.lights.iter_mut() {
                        if light.is_in_group(address) && light.on != on {
                            light.on = on;
                            light.touch_etag();
                        }
                    }
                    registry.mark_dirty(dirty::GROUPS);
                }
                handled = true;
            }
        }

        if let Some(bri) = map.get("bri").and_then(Value::as_u64) {
            let bri = bri.min(255) as u8;
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::set_level(dst, seq, bri, transition_time, false)) {
                if let Some(group) = registry.group_for_id_mut(group_id) {
                    group.level = bri;
                    group.touch_etag();
                    registry.mark_dirty(dirty::GROUPS);
                }
                handled = true;
            }
        }

        if let Some(ct) = map.get("ct").and_then(Value::as_u64) {
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::set_color_temperature(dst, seq, ct as u16, transition_time)) {
                if let Some(group) = registry.group_for_id_mut(group_id) {
                    group.color_temperature = ct as u16;
                    group.touch_etag();
                }
                handled = true;
            }
        }

        if let Some(xy) = map.get("xy").and_then(Value::as_array) {
            if xy.len() == 2 {
                let x = (xy[0].as_f64().unwrap_or(0.0).clamp(0.0, 1.0) * 65279.0) as u16;
                let y = (xy[1].as_f64().unwrap_or(0.0).clamp(0.0, 1.0) * 65279.0) as u16;
                let seq = pipeline.next_seq();
                if pipeline.add_task(TaskItem::set_xy_color(dst, seq, x, y, transition_time)) {
                    if let Some(group) = registry.group_for_id_mut(group_id) {
                        group.color_x = x;
                        group.color_y = y;
                        group.touch_etag();
                    }
                    handled = true;
                }
            }
        }

        // hue is Hue-style 0..65535; together with sat the short command
        // carries both, alone the enhanced variant keeps the resolution
        let hue = map.get("hue").and_then(Value::as_u64);
        let sat = map.get("sat").and_then(Value::as_u64);
        match (hue, sat) {
            (Some(hue), Some(sat)) => {
                let seq = pipeline.next_seq();
                let task = TaskItem::set_hue_and_saturation(
                    dst,
                    seq,
                    (hue >> 8) as u8,
                    sat.min(255) as u8,
                    transition_time,
                );
                if pipeline.add_task(task) {
                    if let Some(group) = registry.group_for_id_mut(group_id) {
                        group.hue = (hue >> 8) as u8;
                        group.sat = sat.min(255) as u8;
                        group.touch_etag();
                    }
                    handled = true;
                }
            }
            (Some(hue), None) => {
                let seq = pipeline.next_seq();
                if pipeline.add_task(TaskItem::set_enhanced_hue(dst, seq, hue as u16, transition_time)) {
                    if let Some(group) = registry.group_for_id_mut(group_id) {
                        group.hue = (hue >> 8) as u8;
                        group.touch_etag();
                    }
                    handled = true;
                }
            }
            (None, Some(sat)) => {
                let seq = pipeline.next_seq();
                if pipeline.add_task(TaskItem::set_saturation(dst, seq, sat.min(255) as u8, transition_time))
                {
                    if let Some(group) = registry.group_for_id_mut(group_id) {
                        group.sat = sat.min(255) as u8;
                        group.touch_etag();
                    }
                    handled = true;
                }
            }
            (None, None) => {}
        }

        if let Some(effect) = map.get("effect").and_then(Value::as_str) {
            let active = effect == "colorloop";
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::set_color_loop(dst, seq, active, 15)) {
                if let Some(group) = registry.group_for_id_mut(group_id) {
                    group.color_loop_active = active;
                    group.touch_etag();
                }
                handled = true;
            }
        }

        if handled {
            ReplayStatus::Handled
        } else {
            debug!("unhandled group replay body {body}");
            ReplayStatus::NotHandled
        }
    }
}

impl LightsResource {
    /// Handle a replayed request. `path` starts at the resource segment,
    /// e.g. `["lights", "8", "state"]`.
    pub fn handle(
        &self,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
        method: &str,
        path: &[String],
        body: &Value,
    ) -> ReplayStatus {
        if method != "PUT" || path.len() < 2 || path[0] != "lights" {
            return ReplayStatus::NotHandled;
        }

        let Some((dst, light_id)) = registry
            .light_for_id(&path[1])
            .map(|l| (Destination::Ext { addr: l.ext_addr, endpoint: l.endpoint }, l.id.clone()))
        else {
            return ReplayStatus::NotHandled;
        };

        let Some(map) = body.as_object() else {
            return ReplayStatus::NotHandled;
        };

        let transition_time = map
            .get("transitiontime")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u16;

        let mut handled = false;

        if let Some(on) = map.get("on").and_then(Value::as_bool) {
            let cmd = if on { onoff_cmd::ON } else { onoff_cmd::OFF };
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::set_on_off(dst, seq, cmd, 0)) {
                if let Some(light) = registry.light_for_id_mut(&light_id) {
                    if light.on != on {
                        light.on = on;
                        light.touch_etag();
                        registry.mark_dirty(dirty::LIGHTS);
                    }
                }
                handled = true;
            }
        }

        if let Some(bri) = map.get("bri").and_then(Value::as_u64) {
            let bri = bri.min(255) as u8;
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::set_level(dst, seq, bri, transition_time, false)) {
                if let Some(light) = registry.light_for_id_mut(&light_id) {
                    light.level = bri;
                    light.touch_etag();
                    registry.mark_dirty(dirty::LIGHTS);
                }
                handled = true;
            }
        }

        // "alert": "select" blinks the light once via identify
        if let Some(alert) = map.get("alert").and_then(Value::as_str) {
            let identify_time = match alert {
                "select" => 2,
                "lselect" => 15,
                _ => 0,
            };
            let seq = pipeline.next_seq();
            if pipeline.add_task(TaskItem::identify(dst, seq, identify_time)) {
                handled = true;
            }
        }

        if handled {
            ReplayStatus::Handled
        } else {
            debug!("unhandled light replay body {body}");
            ReplayStatus::NotHandled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::GatewayConfig;
    use serde_json::json;

    fn setup() -> (Registry, Pipeline) {
        let mut registry = Registry::new();
        registry.found_group(1);
        let mut pipeline = Pipeline::new(&GatewayConfig::default());
        pipeline.set_network_state(true);
        (registry, pipeline)
    }

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_group_on_updates_state_and_enqueues() {
        let (mut registry, mut pipeline) = setup();
        let groups = GroupsResource;

        let status = groups.handle(
            &mut registry,
            &mut pipeline,
            "PUT",
            &path(&["groups", "1"]),
            &json!({"on": true}),
        );

        assert_eq!(status, ReplayStatus::Handled);
        assert!(registry.group_for_address(1).unwrap().on);
        assert_eq!(pipeline.task_count(), 1);
    }

    #[test]
    fn test_unknown_group_not_handled() {
        let (mut registry, mut pipeline) = setup();
        let groups = GroupsResource;

        let status = groups.handle(
            &mut registry,
            &mut pipeline,
            "PUT",
            &path(&["groups", "9"]),
            &json!({"on": true}),
        );
        assert_eq!(status, ReplayStatus::NotHandled);
        assert_eq!(pipeline.task_count(), 0);
    }

    #[test]
    fn test_post_not_handled() {
        let (mut registry, mut pipeline) = setup();
        let groups = GroupsResource;
        let status = groups.handle(
            &mut registry,
            &mut pipeline,
            "POST",
            &path(&["groups", "1"]),
            &json!({"on": true}),
        );
        assert_eq!(status, ReplayStatus::NotHandled);
    }

    #[test]
    fn test_group_colorloop_effect() {
        let (mut registry, mut pipeline) = setup();
        let groups = GroupsResource;

        let status = groups.handle(
            &mut registry,
            &mut pipeline,
            "PUT",
            &path(&["groups", "1", "action"]),
            &json!({"effect": "colorloop"}),
        );
        assert_eq!(status, ReplayStatus::Handled);
        assert!(registry.group_for_address(1).unwrap().color_loop_active);
    }

    #[test]
    fn test_group_hue_and_sat() {
        let (mut registry, mut pipeline) = setup();
        let groups = GroupsResource;

        let status = groups.handle(
            &mut registry,
            &mut pipeline,
            "PUT",
            &path(&["groups", "1", "action"]),
            &json!({"hue": 12800, "sat": 200}),
        );
        assert_eq!(status, ReplayStatus::Handled);
        let group = registry.group_for_address(1).unwrap();
        assert_eq!(group.hue, 50);
        assert_eq!(group.sat, 200);
        assert_eq!(pipeline.task_count(), 1);
    }

    #[test]
    fn test_light_bri_task() {
        let (mut registry, mut pipeline) = setup();
        let mut light = gateway_core::LightNode::new(0xAA, 0x0B, 0x0104, 0x0100);
        light.id = "8".to_string();
        registry.lights.push(light);

        let lights = LightsResource;
        let status = lights.handle(
            &mut registry,
            &mut pipeline,
            "PUT",
            &path(&["lights", "8", "state"]),
            &json!({"bri": 128, "transitiontime": 10}),
        );

        assert_eq!(status, ReplayStatus::Handled);
        assert_eq!(registry.lights[0].level, 128);
        assert_eq!(pipeline.task_count(), 1);
    }
}
