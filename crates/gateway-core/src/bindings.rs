//! Mesh source bindings
//!
//! A binding is a routing entry on a source device: when the named
//! endpoint emits the named cluster, forward to the destination. The
//! rules engine constructs binding tasks; the pipeline owns the queue
//! and walks each task through its state machine.

use serde::{Deserialize, Serialize};
use zcl_protocol::Destination;

/// One source-binding entry as it exists on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub src_ext_addr: u64,
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub dst: BindingDestination,
}

/// Binding destination: a group address or a unicast endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingDestination {
    Group(u16),
    Ext { addr: u64, endpoint: u8 },
}

impl BindingDestination {
    #[must_use]
    pub fn to_destination(self) -> Destination {
        match self {
            BindingDestination::Group(g) => Destination::Group(g),
            BindingDestination::Ext { addr, endpoint } => Destination::Ext { addr, endpoint },
        }
    }
}

/// What a binding task is trying to achieve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingAction {
    Bind,
    Unbind,
}

/// Progress of a binding task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Queued, nothing sent yet
    Idle,
    /// Revalidating the sensor back-reference before sending
    Check,
    /// Request sent, waiting for the ZDP response
    InProgress,
    /// Completed; removed from the queue on the next pass
    Finished,
}

/// A pending bind or unbind against a source device.
///
/// `sensor_id` is a weak back-reference; it must be revalidated against
/// the registry before the task is dispatched.
#[derive(Debug, Clone)]
pub struct BindingTask {
    pub binding: Binding,
    pub action: BindingAction,
    pub state: BindingState,
    pub sensor_id: String,
    /// ZDP transaction sequence number of the in-flight request
    pub tsn: Option<u8>,
    /// Send attempts so far
    pub attempts: u8,
}

impl BindingTask {
    #[must_use]
    pub fn new(binding: Binding, action: BindingAction, sensor_id: String) -> Self {
        Self {
            binding,
            action,
            state: BindingState::Check,
            sensor_id,
            tsn: None,
            attempts: 0,
        }
    }

    /// Tasks are duplicates when binding, action and owner match.
    #[must_use]
    pub fn same_work(&self, other: &BindingTask) -> bool {
        self.binding == other.binding
            && self.action == other.action
            && self.sensor_id == other.sensor_id
    }
}
