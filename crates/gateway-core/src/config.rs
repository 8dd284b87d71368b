//! Gateway configuration

use std::time::Duration;

/// Configuration threaded through construction of the core components.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway display name
    pub name: String,
    /// Stable gateway UUID
    pub uuid: String,
    /// Minimum interval between two messages to the same group address
    pub group_send_delay: Duration,
    /// Upper bound of the ready task queue
    pub max_tasks: usize,
    /// Dispatch pauses while more than this many confirms are outstanding
    pub max_running_tasks: usize,
    /// Group task tick backpressure threshold
    pub max_group_tasks: usize,
    /// Seconds of REST inactivity before the idle loop starts working
    pub idle_user_limit: u64,
    /// Seconds between full attribute refreshes of an entity
    pub idle_read_limit: u64,
    /// Seconds between attribute-report rebind passes for an entity
    pub idle_attr_report_bind_limit: u64,
    /// Seconds of idle ticks between two rounds once caught up
    pub idle_limit: u64,
    /// Maximum age of a cached attribute for rule evaluation
    pub max_rule_attr_age: Duration,
    /// Seconds between binding verifications of the same rule
    pub max_verify_delay: u64,
    /// Delay before a rescheduled read after a NoAck confirm
    pub read_long_delay: Duration,
    /// Remaining seconds of the permit-join window
    pub permit_join_duration: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "Gateway".to_string(),
            uuid: String::new(),
            group_send_delay: Duration::from_millis(50),
            max_tasks: 20,
            max_running_tasks: 4,
            max_group_tasks: 4,
            idle_user_limit: 20,
            idle_read_limit: 120,
            idle_attr_report_bind_limit: 240,
            idle_limit: 30,
            max_rule_attr_age: Duration::from_secs(15),
            max_verify_delay: 300,
            read_long_delay: Duration::from_secs(5),
            permit_join_duration: 0,
        }
    }
}
