//! Outbound request pipeline
//!
//! Three ordered collections: the ready queue (bounded, coalescing), the
//! running set awaiting confirms (per-destination serialized) and the
//! binding queue. Dispatch happens on a ~100 ms tick, at most one send per
//! tick; group addresses are additionally rate limited.

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, info};

use crate::bindings::{BindingAction, BindingState, BindingTask};
use crate::config::GatewayConfig;
use crate::driver::{RadioDriver, RadioError};
use crate::persistence::dirty;
use crate::registry::Registry;
use crate::tasks::{TaskItem, TaskType};
use crate::util::read_flags;
use zcl_protocol::{ApsDataConfirm, Destination};

/// Binding queue backpressure threshold for rule verification
pub const MAX_BINDING_QUEUE: usize = 16;

/// The outbound pipeline
pub struct Pipeline {
    tasks: VecDeque<TaskItem>,
    running: Vec<TaskItem>,
    binding_queue: VecDeque<BindingTask>,
    connected: bool,
    next_req_id: u8,
    zcl_seq: u8,
    zdp_tsn: u8,
    group_task_iter: usize,
    max_tasks: usize,
    max_running: usize,
    max_group_tasks: usize,
    group_send_delay: std::time::Duration,
    read_long_delay: std::time::Duration,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            tasks: VecDeque::new(),
            running: Vec::new(),
            binding_queue: VecDeque::new(),
            connected: false,
            next_req_id: 1,
            zcl_seq: 1,
            zdp_tsn: 1,
            group_task_iter: 0,
            max_tasks: config.max_tasks,
            max_running: config.max_running_tasks,
            max_group_tasks: config.max_group_tasks,
            group_send_delay: config.group_send_delay,
            read_long_delay: config.read_long_delay,
        }
    }

    /// Next ZCL transaction sequence number for task builders.
    pub fn next_seq(&mut self) -> u8 {
        let seq = self.zcl_seq;
        self.zcl_seq = self.zcl_seq.wrapping_add(1);
        seq
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Track the network state. A drop clears both task collections
    /// unconditionally.
    pub fn set_network_state(&mut self, connected: bool) {
        if self.connected && !connected {
            info!(
                "Not in network, cleanup {} tasks",
                self.tasks.len() + self.running.len()
            );
            self.tasks.clear();
            self.running.clear();
        }
        self.connected = connected;
    }

    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    #[must_use]
    pub fn binding_queue_len(&self) -> usize {
        self.binding_queue.len()
    }

    /// Number of queued plus running tasks for one destination address.
    #[must_use]
    pub fn task_count_for_address(&self, dst: &Destination) -> usize {
        self.tasks
            .iter()
            .chain(self.running.iter())
            .filter(|t| t.req.dst.same_address(dst))
            .count()
    }

    /// Enqueue a task.
    ///
    /// Coalescable task types replace an already queued task with the same
    /// shape (type, destination, endpoints, profile, cluster, tx options
    /// and payload size) instead of appending. Returns false when the
    /// queue is full or the radio is not in a network.
    pub fn add_task(&mut self, mut task: TaskItem) -> bool {
        if !self.connected {
            return false;
        }

        task.req.id = self.next_req_id;
        self.next_req_id = self.next_req_id.wrapping_add(1).max(1);

        if task.ty.is_coalescable() {
            for queued in &mut self.tasks {
                if queued.ty == task.ty
                    && queued.req.dst == task.req.dst
                    && queued.req.src_endpoint == task.req.src_endpoint
                    && queued.req.profile_id == task.req.profile_id
                    && queued.req.cluster_id == task.req.cluster_id
                    && queued.req.tx_options == task.req.tx_options
                    && queued.req.asdu.len() == task.req.asdu.len()
                {
                    debug!(
                        "Replace task in queue cluster {:#06X} with newer task of same type",
                        task.req.cluster_id
                    );
                    *queued = task;
                    return true;
                }
            }
        }

        if self.tasks.len() < self.max_tasks {
            self.tasks.push_back(task);
            return true;
        }

        false
    }

    /// Fire the next request. Called on the ~100 ms tick and after each
    /// confirm; sends at most one task per invocation.
    pub fn process_tasks(&mut self, registry: &mut Registry, driver: &mut dyn RadioDriver) {
        if self.tasks.is_empty() {
            return;
        }

        if !driver.in_network() {
            self.set_network_state(false);
            return;
        }

        if self.running.len() > self.max_running {
            debug!("{} running tasks, wait", self.running.len());
            return;
        }

        let mut idx = 0;
        while idx < self.tasks.len() {
            let task = &self.tasks[idx];

            // drop dead unicasts
            if let Destination::Ext { addr, endpoint } = task.req.dst {
                if let Some(light) = registry.light_for_address(addr, endpoint) {
                    if !light.reachable {
                        debug!("drop request to zombie");
                        self.tasks.remove(idx);
                        return;
                    }
                }
            }

            // strict per-destination serialization
            if self
                .running
                .iter()
                .any(|r| r.req.dst.same_address(&task.req.dst))
            {
                debug!("delay sending request {} (destination busy)", task.req.id);
                idx += 1;
                continue;
            }

            // group rate limit
            if let Some(group_id) = task.req.dst.group() {
                if let Some(group) = registry.group_for_address(group_id) {
                    if let Some(last) = group.last_send_time {
                        if last.elapsed() < self.group_send_delay {
                            debug!("delayed group sending");
                            idx += 1;
                            continue;
                        }
                    }
                }
            }

            match driver.aps_request(&self.tasks[idx].req) {
                Ok(()) => {
                    let task = self.tasks.remove(idx).expect("index in bounds");
                    if let Some(group_id) = task.req.dst.group() {
                        if let Some(group) = registry.group_for_address_mut(group_id) {
                            group.last_send_time = Some(Instant::now());
                        }
                    }
                    if !task.fire_and_forget {
                        self.running.push(task);
                    }
                    return;
                }
                Err(RadioError::NodeIsZombie) => {
                    debug!("drop request to zombie");
                    self.tasks.remove(idx);
                    return;
                }
                Err(RadioError::NotInNetwork) => {
                    self.set_network_state(false);
                    return;
                }
                Err(e) => {
                    debug!("enqueue APS request failed: {e}");
                    idx += 1;
                }
            }
        }
    }

    /// Correlate a radio confirm with its running task.
    ///
    /// A NoAck on a group-identifiers query reschedules the read with a
    /// long delay; other failures are logged and left to the next
    /// synchronizer pass. Returns the completed task, if any matched.
    pub fn confirm(&mut self, conf: &ApsDataConfirm, registry: &mut Registry) -> Option<TaskItem> {
        let pos = self.running.iter().position(|t| t.req.id == conf.id)?;
        let task = self.running.remove(pos);

        if !conf.status.is_success() {
            info!("error APSDE-DATA.confirm: {:?} on task", conf.status);

            if conf.status == zcl_protocol::ApsStatus::NoAck
                && task.ty == TaskType::GetGroupIdentifiers
            {
                if let Some(addr) = task.req.dst.ext_addr() {
                    let delay = self.read_long_delay;
                    if let Some(sensor) = registry.sensor_for_address_mut(addr) {
                        if sensor.is_available() {
                            sensor.next_read_time = Some(Instant::now() + delay);
                            sensor.enable_read(read_flags::GROUP_IDENTIFIERS);
                        }
                    }
                }
            }
        }

        debug!("erase task request id: {}", task.req.id);
        Some(task)
    }

    /// Group task tick (~250 ms): walk lights round-robin and flush at
    /// most one pending group membership change or scene store/remove/
    /// modify for one light per invocation.
    pub fn process_group_tasks(&mut self, registry: &mut Registry) {
        if registry.lights.is_empty() || !self.connected {
            return;
        }

        if self.tasks.len() > self.max_group_tasks {
            return;
        }

        if self.group_task_iter >= registry.lights.len() {
            self.group_task_iter = 0;
        }

        let light_idx = self.group_task_iter;
        self.group_task_iter += 1;

        let light = &registry.lights[light_idx];
        if !light.reachable {
            return;
        }

        let dst = Destination::Ext {
            addr: light.ext_addr,
            endpoint: light.endpoint,
        };
        let light_id = light.id.clone();

        for gi in 0..registry.lights[light_idx].groups.len() {
            let (group_id, actions) = {
                let info = &registry.lights[light_idx].groups[gi];
                (info.id, info.actions)
            };

            use crate::light::group_actions;

            if (actions & group_actions::ADD_TO_GROUP) != 0 {
                let seq = self.next_seq();
                if self.add_task(TaskItem::add_to_group(dst, seq, group_id)) {
                    registry.lights[light_idx].groups[gi].actions &= !group_actions::ADD_TO_GROUP;
                }
                return;
            }

            if (actions & group_actions::REMOVE_FROM_GROUP) != 0 {
                let seq = self.next_seq();
                if self.add_task(TaskItem::remove_from_group(dst, seq, group_id)) {
                    registry.lights[light_idx].groups[gi].actions &=
                        !group_actions::REMOVE_FROM_GROUP;
                }
                return;
            }

            if let Some(&scene_id) = registry.lights[light_idx].groups[gi].add_scenes.first() {
                let seq = self.next_seq();
                self.add_task(TaskItem::store_scene(dst, seq, group_id, scene_id));
                return;
            }

            if let Some(&scene_id) = registry.lights[light_idx].groups[gi].remove_scenes.first() {
                let seq = self.next_seq();
                self.add_task(TaskItem::remove_scene(dst, seq, group_id, scene_id));
                return;
            }

            if let Some(&scene_id) = registry.lights[light_idx].groups[gi].modify_scenes.first() {
                let light_state = registry
                    .group_for_address(group_id)
                    .and_then(|g| g.scene(scene_id))
                    .and_then(|s| s.light(&light_id))
                    .cloned();
                if let Some(state) = light_state {
                    let seq = self.next_seq();
                    if self.add_task(TaskItem::add_scene(dst, seq, group_id, scene_id, &state)) {
                        registry.lights[light_idx].groups[gi]
                            .modify_scenes
                            .retain(|s| *s != scene_id);
                    }
                } else {
                    registry.lights[light_idx].groups[gi]
                        .modify_scenes
                        .retain(|s| *s != scene_id);
                }
                return;
            }
        }
    }

    // --- binding queue ---

    /// Queue a binding task, discarding duplicate entries.
    pub fn queue_binding_task(&mut self, task: BindingTask) {
        if !self.connected {
            return;
        }

        if self.binding_queue.iter().any(|t| t.same_work(&task)) {
            debug!("discard double entry in binding queue");
            return;
        }

        debug!(
            "queue binding task for {:#018X}, cluster {:#06X}",
            task.binding.src_ext_addr, task.binding.cluster_id
        );
        self.binding_queue.push_back(task);
    }

    /// Walk the binding queue: drop finished entries, then advance the
    /// first actionable task through its state machine.
    pub fn process_binding_queue(&mut self, registry: &mut Registry) {
        self.binding_queue.retain(|t| t.state != BindingState::Finished);

        let Some(pos) = self
            .binding_queue
            .iter()
            .position(|t| matches!(t.state, BindingState::Idle | BindingState::Check))
        else {
            return;
        };

        let task = &self.binding_queue[pos];

        // revalidate the weak sensor back-reference
        let Some(sensor) = registry.sensor_for_id(&task.sensor_id) else {
            self.binding_queue.remove(pos);
            return;
        };

        // an offline source retains the task until the device can confirm
        if !sensor.reachable && !sensor.is_green_power() {
            return;
        }

        let tsn = self.zdp_tsn;
        self.zdp_tsn = self.zdp_tsn.wrapping_add(1).max(1);

        let task = &mut self.binding_queue[pos];
        let unbind = task.action == BindingAction::Unbind;
        let aps_task = TaskItem::zdp_bind(
            unbind,
            tsn,
            task.binding.src_ext_addr,
            task.binding.src_endpoint,
            task.binding.cluster_id,
            &task.binding.dst.to_destination(),
        );

        task.tsn = Some(tsn);
        task.attempts = task.attempts.saturating_add(1);
        task.state = BindingState::InProgress;

        if !self.add_task(aps_task) {
            // queue full, try again next pass
            let task = &mut self.binding_queue[pos];
            task.state = BindingState::Check;
            task.tsn = None;
        }
    }

    /// Complete the binding task matching a ZDP bind/unbind response.
    pub fn handle_bind_response(&mut self, tsn: u8, success: bool, registry: &mut Registry) {
        if let Some(task) = self
            .binding_queue
            .iter_mut()
            .find(|t| t.state == BindingState::InProgress && t.tsn == Some(tsn))
        {
            if success {
                debug!(
                    "binding {:?} confirmed for {:#018X} cluster {:#06X}",
                    task.action, task.binding.src_ext_addr, task.binding.cluster_id
                );
                task.state = BindingState::Finished;
                registry.mark_dirty(dirty::RULES);
            } else {
                // retried on a later pass
                task.state = BindingState::Check;
                task.tsn = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{Binding, BindingDestination};
    use crate::driver::MockRadio;
    use crate::light::{group_actions, GroupInfo, LightNode};
    use crate::sensor::{SensorFingerprint, SensorType};
    use zcl_protocol::cluster::{id, onoff_cmd};
    use zcl_protocol::ApsStatus;

    fn pipeline() -> Pipeline {
        let mut p = Pipeline::new(&GatewayConfig::default());
        p.set_network_state(true);
        p
    }

    fn unicast(addr: u64) -> Destination {
        Destination::Ext { addr, endpoint: 0x0B }
    }

    #[test]
    fn test_queue_bound_rejects_twenty_first() {
        let mut p = pipeline();
        for i in 0u64..20 {
            // distinct destinations so nothing coalesces
            let task = TaskItem::set_on_off(unicast(0x1000 + i), i as u8, onoff_cmd::ON, 0);
            assert!(p.add_task(task));
        }
        assert_eq!(p.task_count(), 20);
        let task = TaskItem::set_on_off(unicast(0x9999), 21, onoff_cmd::ON, 0);
        assert!(!p.add_task(task));
    }

    #[test]
    fn test_coalescing_replaces_same_shape() {
        let mut p = pipeline();
        let t1 = TaskItem::set_on_off(unicast(0xAA), 1, onoff_cmd::ON, 0);
        let t2 = TaskItem::set_on_off(unicast(0xAA), 2, onoff_cmd::OFF, 0);
        assert!(p.add_task(t1));
        assert!(p.add_task(t2));
        assert_eq!(p.task_count(), 1);

        // non-coalescable types append
        let r1 = TaskItem::read_attributes(unicast(0xAA), 3, id::ON_OFF, &[0x0000]);
        let r2 = TaskItem::read_attributes(unicast(0xAA), 4, id::ON_OFF, &[0x0000]);
        assert!(p.add_task(r1));
        assert!(p.add_task(r2));
        assert_eq!(p.task_count(), 3);
    }

    #[test]
    fn test_per_destination_serialization() {
        let mut p = pipeline();
        let mut registry = Registry::new();
        let mut radio = MockRadio::new();

        p.add_task(TaskItem::set_on_off(unicast(0xAA), 1, onoff_cmd::ON, 0));
        p.add_task(TaskItem::set_level(unicast(0xAA), 2, 100, 0, false));
        p.add_task(TaskItem::set_on_off(unicast(0xBB), 3, onoff_cmd::ON, 0));

        p.process_tasks(&mut registry, &mut radio);
        assert_eq!(radio.sent.len(), 1);

        // 0xAA is busy, the next tick picks 0xBB
        p.process_tasks(&mut registry, &mut radio);
        assert_eq!(radio.sent.len(), 2);
        assert_eq!(radio.sent[1].dst.ext_addr(), Some(0xBB));

        // both destinations busy now
        p.process_tasks(&mut registry, &mut radio);
        assert_eq!(radio.sent.len(), 2);

        // invariant: no two running tasks share a destination
        for (i, a) in p.running.iter().enumerate() {
            for b in p.running.iter().skip(i + 1) {
                assert!(!a.req.dst.same_address(&b.req.dst));
            }
        }
    }

    #[test]
    fn test_confirm_correlation() {
        let mut p = pipeline();
        let mut registry = Registry::new();
        let mut radio = MockRadio::new();

        p.add_task(TaskItem::set_on_off(unicast(0xAA), 1, onoff_cmd::ON, 0));
        p.process_tasks(&mut registry, &mut radio);
        assert_eq!(p.running_count(), 1);

        let req_id = radio.sent[0].id;
        let conf = ApsDataConfirm {
            id: req_id,
            dst: unicast(0xAA),
            status: ApsStatus::Success,
        };
        assert!(p.confirm(&conf, &mut registry).is_some());
        assert_eq!(p.running_count(), 0);

        // a second confirm with the same id matches nothing
        assert!(p.confirm(&conf, &mut registry).is_none());
    }

    #[test]
    fn test_noack_group_identifiers_reschedules_read() {
        let mut p = pipeline();
        let mut registry = Registry::new();
        let mut radio = MockRadio::new();

        let fp = SensorFingerprint {
            endpoint: Some(0x01),
            profile_id: 0x0104,
            device_id: 0x0104,
            in_clusters: vec![id::COMMISSIONING],
            out_clusters: vec![],
        };
        let mut sensor = crate::sensor::Sensor::new(0xAA, SensorType::ZhaSwitch, fp);
        sensor.id = "1".to_string();
        registry.sensors.push(sensor);

        let mut task = TaskItem::get_group_membership(unicast(0xAA), 1, &[]);
        task.ty = TaskType::GetGroupIdentifiers;
        p.add_task(task);
        p.process_tasks(&mut registry, &mut radio);

        let conf = ApsDataConfirm {
            id: radio.sent[0].id,
            dst: unicast(0xAA),
            status: ApsStatus::NoAck,
        };
        p.confirm(&conf, &mut registry);

        let sensor = &registry.sensors[0];
        assert!(sensor.must_read(read_flags::GROUP_IDENTIFIERS));
        assert!(sensor.next_read_time.is_some());
        assert!(!sensor.read_due());
    }

    #[test]
    fn test_network_drop_clears_queues() {
        let mut p = pipeline();
        let mut registry = Registry::new();
        let mut radio = MockRadio::new();

        p.add_task(TaskItem::set_on_off(unicast(0xAA), 1, onoff_cmd::ON, 0));
        p.add_task(TaskItem::set_on_off(unicast(0xBB), 2, onoff_cmd::ON, 0));
        p.process_tasks(&mut registry, &mut radio);
        assert_eq!(p.running_count(), 1);
        assert_eq!(p.task_count(), 1);

        p.set_network_state(false);
        assert_eq!(p.running_count(), 0);
        assert_eq!(p.task_count(), 0);
        assert!(!p.add_task(TaskItem::set_on_off(unicast(0xCC), 3, onoff_cmd::ON, 0)));
    }

    #[test]
    fn test_group_rate_limit_defers() {
        let mut p = pipeline();
        let mut registry = Registry::new();
        let mut radio = MockRadio::new();
        registry.found_group(4).last_send_time = Some(Instant::now());

        p.add_task(TaskItem::set_on_off(Destination::Group(4), 1, onoff_cmd::ON, 0));
        p.process_tasks(&mut registry, &mut radio);
        // within the send-delay window, deferred but kept
        assert!(radio.sent.is_empty());
        assert_eq!(p.task_count(), 1);

        registry.group_for_address_mut(4).unwrap().last_send_time =
            Some(Instant::now() - std::time::Duration::from_secs(1));
        p.process_tasks(&mut registry, &mut radio);
        assert_eq!(radio.sent.len(), 1);
    }

    #[test]
    fn test_group_task_tick_emits_add_to_group() {
        let mut p = pipeline();
        let mut registry = Registry::new();

        let mut light = LightNode::new(0xAA, 0x0B, 0x0104, 0x0100);
        light.id = "1".to_string();
        let mut info = GroupInfo::new(4);
        info.actions = group_actions::ADD_TO_GROUP;
        light.groups.push(info);
        registry.lights.push(light);
        registry.found_group(4);

        p.process_group_tasks(&mut registry);
        assert_eq!(p.task_count(), 1);
        assert_eq!(registry.lights[0].groups[0].actions, 0);
    }

    #[test]
    fn test_group_task_backpressure() {
        let mut p = pipeline();
        let mut registry = Registry::new();

        let mut light = LightNode::new(0xAA, 0x0B, 0x0104, 0x0100);
        light.id = "1".to_string();
        let mut info = GroupInfo::new(4);
        info.actions = group_actions::ADD_TO_GROUP;
        light.groups.push(info);
        registry.lights.push(light);

        for i in 0..5 {
            p.add_task(TaskItem::set_on_off(unicast(0x1000 + i), i as u8, onoff_cmd::ON, 0));
        }
        p.process_group_tasks(&mut registry);
        // queue above MaxGroupTasks, nothing flushed
        assert_eq!(registry.lights[0].groups[0].actions, group_actions::ADD_TO_GROUP);
    }

    #[test]
    fn test_binding_queue_dedup() {
        let mut p = pipeline();
        let binding = Binding {
            src_ext_addr: 0xAA,
            src_endpoint: 2,
            cluster_id: id::ON_OFF,
            dst: BindingDestination::Group(4),
        };
        p.queue_binding_task(BindingTask::new(binding, BindingAction::Bind, "5".into()));
        p.queue_binding_task(BindingTask::new(binding, BindingAction::Bind, "5".into()));
        assert_eq!(p.binding_queue_len(), 1);

        p.queue_binding_task(BindingTask::new(binding, BindingAction::Unbind, "5".into()));
        assert_eq!(p.binding_queue_len(), 2);
    }

    #[test]
    fn test_binding_state_machine() {
        let mut p = pipeline();
        let mut registry = Registry::new();
        let mut radio = MockRadio::new();

        let fp = SensorFingerprint {
            endpoint: Some(2),
            profile_id: 0x0104,
            device_id: 0x0104,
            in_clusters: vec![],
            out_clusters: vec![id::ON_OFF],
        };
        let mut sensor = crate::sensor::Sensor::new(0xAA, SensorType::ZhaSwitch, fp);
        sensor.id = "5".to_string();
        registry.sensors.push(sensor);

        let binding = Binding {
            src_ext_addr: 0xAA,
            src_endpoint: 2,
            cluster_id: id::ON_OFF,
            dst: BindingDestination::Group(4),
        };
        p.queue_binding_task(BindingTask::new(binding, BindingAction::Bind, "5".into()));

        p.process_binding_queue(&mut registry);
        assert_eq!(p.binding_queue[0].state, BindingState::InProgress);
        let tsn = p.binding_queue[0].tsn.unwrap();

        // the ZDP request went through the task queue
        p.process_tasks(&mut registry, &mut radio);
        assert_eq!(radio.sent.len(), 1);
        assert_eq!(radio.sent[0].cluster_id, zcl_protocol::zdp::clid::BIND_REQ);

        p.handle_bind_response(tsn, true, &mut registry);
        assert_eq!(p.binding_queue[0].state, BindingState::Finished);
        p.process_binding_queue(&mut registry);
        assert_eq!(p.binding_queue_len(), 0);
    }

    #[test]
    fn test_binding_retained_while_sensor_offline() {
        let mut p = pipeline();
        let mut registry = Registry::new();

        let fp = SensorFingerprint {
            endpoint: Some(2),
            profile_id: 0x0104,
            device_id: 0x0104,
            in_clusters: vec![],
            out_clusters: vec![id::ON_OFF],
        };
        let mut sensor = crate::sensor::Sensor::new(0xAA, SensorType::ZhaSwitch, fp);
        sensor.id = "5".to_string();
        sensor.reachable = false;
        registry.sensors.push(sensor);

        let binding = Binding {
            src_ext_addr: 0xAA,
            src_endpoint: 2,
            cluster_id: id::ON_OFF,
            dst: BindingDestination::Group(4),
        };
        p.queue_binding_task(BindingTask::new(binding, BindingAction::Unbind, "5".into()));
        p.process_binding_queue(&mut registry);

        // retained, nothing sent
        assert_eq!(p.binding_queue_len(), 1);
        assert_eq!(p.binding_queue[0].state, BindingState::Check);
        assert_eq!(p.task_count(), 0);
    }

    #[test]
    fn test_fire_and_forget_not_tracked() {
        let mut p = pipeline();
        let mut registry = Registry::new();
        let mut radio = MockRadio::new();

        let mut task = TaskItem::set_on_off(Destination::Group(4), 1, onoff_cmd::ON, 0);
        task.fire_and_forget = true;
        registry.found_group(4);
        p.add_task(task);
        p.process_tasks(&mut registry, &mut radio);

        assert_eq!(radio.sent.len(), 1);
        assert_eq!(p.running_count(), 0);
    }
}
