//! Rules engine
//!
//! The declarative rules store with its REST surface, the periodic
//! condition evaluator, the green-power button path and the binding
//! manager that maps rule topology onto mesh source bindings.

pub mod engine;
pub mod error;
pub mod handlers;
pub mod model;
pub mod replay;
pub mod validation;

pub use engine::RulesEngine;
pub use error::{ApiError, ApiResponse};
pub use model::{Rule, RuleAction, RuleCondition, RuleOperator, RuleState, RuleStatus};
