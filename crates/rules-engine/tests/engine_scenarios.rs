//! End-to-end rule engine scenarios against a mock radio

use serde_json::json;

use gateway_core::attr_cache::{AttrUpdate, AttributeCache};
use gateway_core::driver::{MockRadio, RadioDriver};
use gateway_core::light::{group_actions, GroupInfo, LightNode};
use gateway_core::node::NodeInfo;
use gateway_core::sensor::{Sensor, SensorFingerprint, SensorType};
use gateway_core::{GatewayConfig, Pipeline, Registry, Synchronizer};
use rules_engine::RulesEngine;
use zcl_protocol::cluster::{id, profile, scenes_cmd};
use zcl_protocol::commands::AttrValue;
use zcl_protocol::green_power::{gp_cmd, GpDataIndication};
use zcl_protocol::{Destination, SimpleDescriptor, ZclFrame};

struct Harness {
    engine: RulesEngine,
    registry: Registry,
    cache: AttributeCache,
    pipeline: Pipeline,
    radio: MockRadio,
}

fn harness() -> Harness {
    let config = GatewayConfig::default();
    let mut pipeline = Pipeline::new(&config);
    pipeline.set_network_state(true);
    Harness {
        engine: RulesEngine::new(&config),
        registry: Registry::new(),
        cache: AttributeCache::new(),
        pipeline,
        radio: MockRadio::new(),
    }
}

const GP_SRC_ID: u32 = 0x0155_4400;
const LUX_EXT: u64 = 0xBB01;
const SWITCH_EXT: u64 = 0xCC01;
const LIGHT_EXT: u64 = 0xDD01;

fn add_gp_switch(registry: &mut Registry, sensor_id: &str) {
    let fp = SensorFingerprint {
        endpoint: None,
        profile_id: profile::GREEN_POWER,
        device_id: 0x02,
        in_clusters: vec![],
        out_clusters: vec![id::GREEN_POWER],
    };
    let mut sensor = Sensor::new(u64::from(GP_SRC_ID), SensorType::ZgpSwitch, fp);
    sensor.id = sensor_id.to_string();
    registry.sensors.push(sensor);
}

fn add_lux_sensor(registry: &mut Registry, sensor_id: &str) {
    let fp = SensorFingerprint {
        endpoint: Some(2),
        profile_id: profile::HOME_AUTOMATION,
        device_id: 0x0106,
        in_clusters: vec![id::ILLUMINANCE_MEASUREMENT],
        out_clusters: vec![],
    };
    let mut sensor = Sensor::new(LUX_EXT, SensorType::ZhaLight, fp);
    sensor.id = sensor_id.to_string();
    registry.sensors.push(sensor);
}

fn add_zha_switch(registry: &mut Registry, sensor_id: &str, endpoint: u8) {
    let fp = SensorFingerprint {
        endpoint: Some(endpoint),
        profile_id: profile::HOME_AUTOMATION,
        device_id: 0x0104,
        in_clusters: vec![id::ON_OFF_SWITCH_CONFIG],
        out_clusters: vec![id::ON_OFF, id::LEVEL_CONTROL],
    };
    let mut sensor = Sensor::new(SWITCH_EXT, SensorType::ZhaSwitch, fp);
    sensor.id = sensor_id.to_string();
    registry.sensors.push(sensor);

    let mut node = NodeInfo::new(SWITCH_EXT, 0x1234);
    node.active_endpoints = vec![endpoint];
    registry.upsert_node(node);
}

fn add_light(registry: &mut Registry, light_id: &str) {
    let mut light = LightNode::new(LIGHT_EXT, 0x0B, profile::HOME_AUTOMATION, 0x0101);
    light.id = light_id.to_string();
    light.name = format!("Light {light_id}");
    registry.lights.push(light);
}

#[test]
fn button_press_recalls_scene() {
    let mut h = harness();
    add_gp_switch(&mut h.registry, "5");
    h.registry.found_group(3);
    h.registry
        .group_for_address_mut(3)
        .unwrap()
        .scenes
        .push(gateway_core::group::Scene::new(3, 10));

    let body = json!({
        "name": "Scene on button",
        "conditions": [
            {"address": "/sensors/5/state/buttonevent", "operator": "eq", "value": "16"}
        ],
        "actions": [
            {"address": "/groups/3/scenes/10", "method": "PUT", "body": {}}
        ]
    });
    let rsp = h
        .engine
        .create_rule("abcd", &body, &mut h.registry, &mut h.pipeline);
    assert_eq!(rsp.status, 200);

    let ind = GpDataIndication {
        gpd_src_id: GP_SRC_ID,
        gpd_command_id: gp_cmd::SCENE_0,
        payload: vec![],
    };
    let triggered = h.engine.gp_button_event(&mut h.registry, &mut h.pipeline, &ind);
    assert!(triggered);
    assert_eq!(h.engine.rules[0].times_triggered, 1);

    // sensor state reflects the press
    let sensor = h.registry.sensor_for_id("5").unwrap();
    assert_eq!(sensor.state.buttonevent, Some(16));
    assert!(!sensor.state.lastupdated.is_empty());

    // the recall travels to group 3 on the scenes cluster
    h.pipeline.process_tasks(&mut h.registry, &mut h.radio);
    assert_eq!(h.radio.sent.len(), 1);
    let sent = &h.radio.sent[0];
    assert_eq!(sent.dst, Destination::Group(3));
    assert_eq!(sent.cluster_id, id::SCENES);
    let frame = ZclFrame::parse(&sent.asdu).unwrap();
    assert_eq!(frame.command_id, scenes_cmd::RECALL_SCENE);
    assert_eq!(frame.payload, vec![0x03, 0x00, 10]);

    // the group is assumed on after a scene recall
    assert!(h.registry.group_for_address(3).unwrap().on);
}

#[test]
fn illuminance_threshold_turns_group_on() {
    let mut h = harness();
    add_lux_sensor(&mut h.registry, "7");
    h.registry.found_group(1);

    let body = json!({
        "name": "Dark means light",
        "periodic": 30000,
        "conditions": [
            {"address": "/sensors/7/state/illuminance", "operator": "lt", "value": "200"}
        ],
        "actions": [
            {"address": "/groups/1", "method": "PUT", "body": {"on": true}}
        ]
    });
    h.engine
        .create_rule("abcd", &body, &mut h.registry, &mut h.pipeline);

    // fresh lux reading below the threshold
    h.cache.set(
        LUX_EXT,
        id::ILLUMINANCE_MEASUREMENT,
        0x0000,
        AttrValue::U16(20_000),
        AttrUpdate::ByReport,
    );
    h.registry.sensor_for_id_mut("7").unwrap().state.lux = Some(150);

    h.engine
        .verify_tick(&mut h.registry, &mut h.cache, &mut h.pipeline, 0);

    assert_eq!(h.engine.rules[0].times_triggered, 1);
    assert!(h.registry.group_for_address(1).unwrap().on);

    h.pipeline.process_tasks(&mut h.registry, &mut h.radio);
    assert_eq!(h.radio.sent.len(), 1);
    assert_eq!(h.radio.sent[0].dst, Destination::Group(1));
    assert_eq!(h.radio.sent[0].cluster_id, id::ON_OFF);
}

#[test]
fn illuminance_condition_not_met_leaves_group() {
    let mut h = harness();
    add_lux_sensor(&mut h.registry, "7");
    h.registry.found_group(1);

    let body = json!({
        "name": "Dark means light",
        "periodic": 30000,
        "conditions": [
            {"address": "/sensors/7/state/illuminance", "operator": "lt", "value": "200"}
        ],
        "actions": [
            {"address": "/groups/1", "method": "PUT", "body": {"on": true}}
        ]
    });
    h.engine
        .create_rule("abcd", &body, &mut h.registry, &mut h.pipeline);

    h.cache.set(
        LUX_EXT,
        id::ILLUMINANCE_MEASUREMENT,
        0x0000,
        AttrValue::U16(40_000),
        AttrUpdate::ByReport,
    );
    h.registry.sensor_for_id_mut("7").unwrap().state.lux = Some(9999);

    h.engine
        .verify_tick(&mut h.registry, &mut h.cache, &mut h.pipeline, 0);

    assert_eq!(h.engine.rules[0].times_triggered, 0);
    assert!(!h.registry.group_for_address(1).unwrap().on);
}

#[test]
fn stale_illuminance_forces_read() {
    let mut h = harness();
    add_lux_sensor(&mut h.registry, "7");
    h.registry.found_group(1);

    let body = json!({
        "name": "Dark means light",
        "periodic": 30000,
        "conditions": [
            {"address": "/sensors/7/state/illuminance", "operator": "lt", "value": "200"}
        ],
        "actions": [
            {"address": "/groups/1", "method": "PUT", "body": {"on": true}}
        ]
    });
    h.engine
        .create_rule("abcd", &body, &mut h.registry, &mut h.pipeline);

    // reading from a minute ago
    h.cache.set(
        LUX_EXT,
        id::ILLUMINANCE_MEASUREMENT,
        0x0000,
        AttrValue::U16(20_000),
        AttrUpdate::ByReport,
    );
    h.cache
        .age_entry(LUX_EXT, id::ILLUMINANCE_MEASUREMENT, 0x0000, std::time::Duration::from_secs(60));
    h.registry.sensor_for_id_mut("7").unwrap().state.lux = Some(150);

    h.engine
        .verify_tick(&mut h.registry, &mut h.cache, &mut h.pipeline, 0);

    // no action, a forced read instead
    assert_eq!(h.engine.rules[0].times_triggered, 0);
    assert!(!h.registry.group_for_address(1).unwrap().on);

    h.pipeline.process_tasks(&mut h.registry, &mut h.radio);
    assert_eq!(h.radio.sent.len(), 1);
    let sent = &h.radio.sent[0];
    assert_eq!(sent.cluster_id, id::ILLUMINANCE_MEASUREMENT);
    let frame = ZclFrame::parse(&sent.asdu).unwrap();
    assert!(frame.is_profile_wide());
    assert_eq!(frame.payload, vec![0x00, 0x00]); // attr 0x0000

    // a second tick within the read window does not re-issue the read
    h.radio.clear();
    h.engine
        .verify_tick(&mut h.registry, &mut h.cache, &mut h.pipeline, 0);
    h.pipeline.process_tasks(&mut h.registry, &mut h.radio);
    assert!(h.radio.sent.is_empty());
}

#[test]
fn bind_action_installs_and_deletion_reverses() {
    let mut h = harness();
    add_zha_switch(&mut h.registry, "12", 2);
    add_light(&mut h.registry, "8");

    let body = json!({
        "name": "Dimmer binding",
        "conditions": [
            {"address": "/sensors/12/state/buttonevent", "operator": "eq", "value": "2"}
        ],
        "actions": [
            {"address": "/lights/8/state", "method": "BIND", "body": {"bri": 128}}
        ]
    });
    let rsp = h
        .engine
        .create_rule("abcd", &body, &mut h.registry, &mut h.pipeline);
    assert_eq!(rsp.status, 200);

    assert_eq!(h.pipeline.binding_queue_len(), 1);
    let rule = h.engine.rules[0].clone();

    // re-queueing the same work is de-duplicated
    h.engine
        .queue_check_rule_bindings(&rule, &mut h.registry, &mut h.pipeline);
    assert_eq!(h.pipeline.binding_queue_len(), 1);

    // the queued bind targets the level cluster from the sensor endpoint
    h.pipeline.process_binding_queue(&mut h.registry);
    h.pipeline.process_tasks(&mut h.registry, &mut h.radio);
    assert_eq!(h.radio.sent.len(), 1);
    let sent = &h.radio.sent[0];
    assert_eq!(sent.cluster_id, zcl_protocol::zdp::clid::BIND_REQ);
    assert_eq!(sent.dst.ext_addr(), Some(SWITCH_EXT));
    // src address, endpoint and cluster inside the ZDP payload
    assert_eq!(&sent.asdu[1..9], &SWITCH_EXT.to_le_bytes());
    assert_eq!(sent.asdu[9], 2);
    assert_eq!(&sent.asdu[10..12], &id::LEVEL_CONTROL.to_le_bytes());
    // unicast destination: ext mode, light address, light endpoint
    assert_eq!(sent.asdu[12], 0x03);
    assert_eq!(&sent.asdu[13..21], &LIGHT_EXT.to_le_bytes());
    assert_eq!(sent.asdu[21], 0x0B);

    // complete the bind so the queue drains
    let tsn = sent.asdu[0];
    let req_id = sent.id;
    h.pipeline.handle_bind_response(tsn, true, &mut h.registry);
    h.pipeline.process_binding_queue(&mut h.registry);
    assert_eq!(h.pipeline.binding_queue_len(), 0);

    // the APS confirm releases the destination for later requests
    let conf = zcl_protocol::ApsDataConfirm {
        id: req_id,
        dst: Destination::Ext { addr: SWITCH_EXT, endpoint: 0 },
        status: zcl_protocol::ApsStatus::Success,
    };
    h.pipeline.confirm(&conf, &mut h.registry);

    // deleting the rule queues the reverse operation
    h.engine.delete_rule("1", &mut h.registry, &mut h.pipeline);
    assert_eq!(h.pipeline.binding_queue_len(), 1);
    h.pipeline.process_binding_queue(&mut h.registry);
    h.radio.clear();
    h.pipeline.process_tasks(&mut h.registry, &mut h.radio);
    assert_eq!(h.radio.sent[0].cluster_id, zcl_protocol::zdp::clid::UNBIND_REQ);
}

#[test]
fn sensor_config_off_forces_unbind() {
    let mut h = harness();
    add_zha_switch(&mut h.registry, "12", 2);
    add_light(&mut h.registry, "8");
    h.registry.sensor_for_id_mut("12").unwrap().config.on = false;

    let body = json!({
        "name": "Dimmer binding",
        "conditions": [
            {"address": "/sensors/12/state/buttonevent", "operator": "eq", "value": "2"}
        ],
        "actions": [
            {"address": "/lights/8/state", "method": "BIND", "body": {"bri": 128}}
        ]
    });
    h.engine
        .create_rule("abcd", &body, &mut h.registry, &mut h.pipeline);

    assert_eq!(h.pipeline.binding_queue_len(), 1);
    h.pipeline.process_binding_queue(&mut h.registry);
    h.pipeline.process_tasks(&mut h.registry, &mut h.radio);
    assert_eq!(h.radio.sent[0].cluster_id, zcl_protocol::zdp::clid::UNBIND_REQ);
}

#[test]
fn group_membership_drift_rejoins_via_group_tick() {
    let config = GatewayConfig::default();
    let mut registry = Registry::new();
    let mut pipeline = Pipeline::new(&config);
    pipeline.set_network_state(true);
    let mut radio = MockRadio::new();
    let mut sync = Synchronizer::new(config);

    // a reachable light that believes it is in user group 4
    let mut node = NodeInfo::new(LIGHT_EXT, 0x2222);
    node.upsert_simple_descriptor(SimpleDescriptor {
        endpoint: 0x0B,
        profile_id: profile::HOME_AUTOMATION,
        device_id: 0x0101,
        in_clusters: vec![id::BASIC, id::ON_OFF, id::GROUPS, id::SCENES],
        out_clusters: vec![],
    });
    registry.upsert_node(node.clone());
    registry.add_light_node(&node, 0);
    registry.found_group(4);
    registry.lights[0].groups.push(GroupInfo::new(4));

    // the device reports no group membership at all
    let mut frame = ZclFrame::cluster_command(1, zcl_protocol::cluster::groups_cmd::GET_GROUP_MEMBERSHIP);
    frame.frame_control |= zcl_protocol::frame::FC_DIRECTION_SERVER_TO_CLIENT;
    frame.payload = vec![10, 0];
    let ind = zcl_protocol::ApsDataIndication {
        src_ext_addr: LIGHT_EXT,
        src_nwk_addr: 0x2222,
        src_endpoint: 0x0B,
        dst_endpoint: 1,
        profile_id: profile::HOME_AUTOMATION,
        cluster_id: id::GROUPS,
        asdu: frame.serialize(),
        lqi: 200,
        rssi: -50,
    };
    let mut cache = AttributeCache::new();
    sync.handle_indication(&mut registry, &mut cache, &mut pipeline, &ind);

    let info = registry.lights[0].group_info(4).unwrap();
    assert_ne!(info.actions & group_actions::ADD_TO_GROUP, 0);

    // the next group-task tick emits the add-to-group request
    pipeline.process_group_tasks(&mut registry);
    pipeline.process_tasks(&mut registry, &mut radio);
    assert_eq!(radio.sent.len(), 1);
    let sent = &radio.sent[0];
    assert_eq!(sent.cluster_id, id::GROUPS);
    let frame = ZclFrame::parse(&sent.asdu).unwrap();
    assert_eq!(frame.command_id, zcl_protocol::cluster::groups_cmd::ADD_GROUP);
    assert_eq!(&frame.payload[..2], &[0x04, 0x00]);
    assert_eq!(registry.lights[0].group_info(4).unwrap().actions, 0);
}

#[test]
fn group_on_button_kills_member_colorloops() {
    let mut h = harness();
    add_gp_switch(&mut h.registry, "5");
    h.registry.found_group(3);
    add_light(&mut h.registry, "8");
    {
        let light = h.registry.light_for_id_mut("8").unwrap();
        light.groups.push(GroupInfo::new(3));
        light.color_loop_active = true;
    }

    let body = json!({
        "name": "Group on",
        "conditions": [
            {"address": "/sensors/5/state/buttonevent", "operator": "eq", "value": "33"}
        ],
        "actions": [
            {"address": "/groups/3", "method": "PUT", "body": {"on": true}}
        ]
    });
    h.engine
        .create_rule("abcd", &body, &mut h.registry, &mut h.pipeline);

    // command id 0x21 (On) == 33
    let ind = GpDataIndication {
        gpd_src_id: GP_SRC_ID,
        gpd_command_id: gp_cmd::ON,
        payload: vec![],
    };
    let triggered = h.engine.gp_button_event(&mut h.registry, &mut h.pipeline, &ind);
    assert!(triggered);

    assert!(h.registry.group_for_address(3).unwrap().on);
    let light = h.registry.light_for_id("8").unwrap();
    assert!(light.on);
    assert!(!light.color_loop_active);

    // on/off broadcast plus the colorloop stop for the member light
    assert_eq!(h.pipeline.task_count(), 2);
}

#[test]
fn unrelated_button_does_not_trigger() {
    let mut h = harness();
    add_gp_switch(&mut h.registry, "5");
    h.registry.found_group(3);
    h.registry
        .group_for_address_mut(3)
        .unwrap()
        .scenes
        .push(gateway_core::group::Scene::new(3, 10));

    let body = json!({
        "name": "Scene on button",
        "conditions": [
            {"address": "/sensors/5/state/buttonevent", "operator": "eq", "value": "16"}
        ],
        "actions": [
            {"address": "/groups/3/scenes/10", "method": "PUT", "body": {}}
        ]
    });
    h.engine
        .create_rule("abcd", &body, &mut h.registry, &mut h.pipeline);

    let ind = GpDataIndication {
        gpd_src_id: GP_SRC_ID,
        gpd_command_id: gp_cmd::SCENE_15, // 0x1F != 16
        payload: vec![],
    };
    let triggered = h.engine.gp_button_event(&mut h.registry, &mut h.pipeline, &ind);
    assert!(!triggered);
    assert_eq!(h.engine.rules[0].times_triggered, 0);
    assert_eq!(h.pipeline.task_count(), 0);
}

#[test]
fn scene_recall_reconciles_colorloop_state() {
    let mut h = harness();
    add_gp_switch(&mut h.registry, "5");
    h.registry.found_group(3);
    add_light(&mut h.registry, "8");
    {
        let light = h.registry.light_for_id_mut("8").unwrap();
        light.groups.push(GroupInfo::new(3));
        light.color_loop_active = true; // drifted on the device
        light.level = 10;
    }
    {
        let group = h.registry.group_for_address_mut(3).unwrap();
        let mut scene = gateway_core::group::Scene::new(3, 10);
        scene.lights.push(gateway_core::group::LightState {
            lid: "8".to_string(),
            on: true,
            bri: 200,
            x: 0,
            y: 0,
            colorloop_active: false,
            colorloop_time: 15,
            transition_time: 10,
        });
        group.scenes.push(scene);
    }

    let body = json!({
        "name": "Scene on button",
        "conditions": [
            {"address": "/sensors/5/state/buttonevent", "operator": "eq", "value": "16"}
        ],
        "actions": [
            {"address": "/groups/3/scenes/10", "method": "PUT", "body": {}}
        ]
    });
    h.engine
        .create_rule("abcd", &body, &mut h.registry, &mut h.pipeline);

    let ind = GpDataIndication {
        gpd_src_id: GP_SRC_ID,
        gpd_command_id: gp_cmd::SCENE_0,
        payload: vec![],
    };
    h.engine.gp_button_event(&mut h.registry, &mut h.pipeline, &ind);

    let light = h.registry.light_for_id("8").unwrap();
    assert!(!light.color_loop_active);
    assert!(light.on);
    assert_eq!(light.level, 200);

    // recall plus colorloop stop; the second recall coalesces with the
    // still-queued first one
    assert_eq!(h.pipeline.task_count(), 2);
}

#[test]
fn second_button_press_increments_trigger_count() {
    let mut h = harness();
    add_gp_switch(&mut h.registry, "5");
    h.registry.found_group(3);
    h.registry
        .group_for_address_mut(3)
        .unwrap()
        .scenes
        .push(gateway_core::group::Scene::new(3, 10));

    let body = json!({
        "name": "Scene on button",
        "conditions": [
            {"address": "/sensors/5/state/buttonevent", "operator": "eq", "value": "16"}
        ],
        "actions": [
            {"address": "/groups/3/scenes/10", "method": "PUT", "body": {}}
        ]
    });
    h.engine
        .create_rule("abcd", &body, &mut h.registry, &mut h.pipeline);

    let ind = GpDataIndication {
        gpd_src_id: GP_SRC_ID,
        gpd_command_id: gp_cmd::SCENE_0,
        payload: vec![],
    };
    h.engine.gp_button_event(&mut h.registry, &mut h.pipeline, &ind);
    h.engine.gp_button_event(&mut h.registry, &mut h.pipeline, &ind);

    // each event counts even though the db write is debounced
    assert_eq!(h.engine.rules[0].times_triggered, 2);
}

#[test]
fn network_drop_rejects_rule_tasks() {
    let mut h = harness();
    add_lux_sensor(&mut h.registry, "7");
    h.registry.found_group(1);

    let body = json!({
        "name": "Dark means light",
        "periodic": 30000,
        "conditions": [
            {"address": "/sensors/7/state/illuminance", "operator": "lt", "value": "200"}
        ],
        "actions": [
            {"address": "/groups/1", "method": "PUT", "body": {"on": true}}
        ]
    });
    h.engine
        .create_rule("abcd", &body, &mut h.registry, &mut h.pipeline);

    h.cache.set(
        LUX_EXT,
        id::ILLUMINANCE_MEASUREMENT,
        0x0000,
        AttrValue::U16(20_000),
        AttrUpdate::ByReport,
    );
    h.registry.sensor_for_id_mut("7").unwrap().state.lux = Some(150);

    h.radio.connected = false;
    h.pipeline.set_network_state(false);

    h.engine
        .verify_tick(&mut h.registry, &mut h.cache, &mut h.pipeline, 0);
    assert_eq!(h.engine.rules[0].times_triggered, 0);
    assert_eq!(h.pipeline.task_count(), 0);
    assert!(!h.radio.in_network());
}
