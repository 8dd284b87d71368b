//! Gateway core
//!
//! This crate owns the in-memory model of the mesh (lights, sensors,
//! groups, scenes), the per-node attribute cache, the outbound radio task
//! pipeline and the synchronizer that reconciles the model with cluster
//! state readable over the air.

pub mod attr_cache;
pub mod bindings;
pub mod config;
pub mod driver;
pub mod error;
pub mod group;
pub mod light;
pub mod node;
pub mod persistence;
pub mod pipeline;
pub mod registry;
pub mod sensor;
pub mod sync;
pub mod tasks;
pub mod util;

pub use attr_cache::{AttrUpdate, AttributeCache, NodeValue};
pub use bindings::{Binding, BindingAction, BindingDestination, BindingState, BindingTask};
pub use config::GatewayConfig;
pub use driver::{RadioDriver, RadioEvent};
pub use error::CoreError;
pub use group::{Group, GroupState, LightState, Scene, SceneState};
pub use light::{GroupInfo, GroupMembership, LightNode};
pub use node::{NodeEvent, NodeInfo};
pub use pipeline::Pipeline;
pub use registry::Registry;
pub use sensor::{Sensor, SensorConfig, SensorFingerprint, SensorState, SensorType};
pub use sync::Synchronizer;
pub use tasks::{TaskItem, TaskType};
