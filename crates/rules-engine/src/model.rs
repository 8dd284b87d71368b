//! Rule data model

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use gateway_core::util::{etag_unquoted, make_etag};

/// Upper bound on conditions and actions per rule
pub const MAX_CONDITIONS: usize = 8;
/// Upper bound on actions per rule
pub const MAX_ACTIONS: usize = 8;
/// Longest accepted rule name
pub const MAX_RULE_NAME_LENGTH: usize = 64;
/// Declared capacity of the rule engine. Enforcement at POST time is
/// intentionally absent; deleted rules would count against it.
pub const MAX_RULES_COUNT: usize = 500;

/// Rule lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    Normal,
    Deleted,
}

/// Whether the rule may trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Enabled,
    Disabled,
}

impl RuleStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Enabled => "enabled",
            RuleStatus::Disabled => "disabled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enabled" => Some(RuleStatus::Enabled),
            "disabled" => Some(RuleStatus::Disabled),
            _ => None,
        }
    }
}

/// Condition operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOperator {
    Eq,
    Lt,
    Gt,
    /// Delta-exchange: matches on any change of the referenced
    /// attribute's lastupdated timestamp; no value allowed.
    Dx,
}

impl RuleOperator {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOperator::Eq => "eq",
            RuleOperator::Lt => "lt",
            RuleOperator::Gt => "gt",
            RuleOperator::Dx => "dx",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(RuleOperator::Eq),
            "lt" => Some(RuleOperator::Lt),
            "gt" => Some(RuleOperator::Gt),
            "dx" => Some(RuleOperator::Dx),
            _ => None,
        }
    }
}

/// One rule condition: a sensor attribute address, an operator and an
/// optional value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub address: String,
    pub operator: RuleOperator,
    #[serde(default)]
    pub value: String,
}

impl RuleCondition {
    /// External representation; the value key is omitted when empty.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = json!({
            "address": self.address,
            "operator": self.operator.as_str(),
        });
        if !self.value.is_empty() {
            map["value"] = Value::String(self.value.clone());
        }
        map
    }
}

/// One rule action: an internal resource address, a method and a JSON
/// body kept in serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    pub address: String,
    pub method: String,
    pub body: String,
}

impl RuleAction {
    /// External representation with the body parsed back to an object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let body = serde_json::from_str(&self.body).unwrap_or(Value::Null);
        json!({
            "address": self.address,
            "method": self.method,
            "body": body,
        })
    }
}

/// A declarative rule coupling sensor conditions to actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    /// The api key that created the rule
    pub owner: String,
    pub status: RuleStatus,
    pub state: RuleState,
    /// -1 disables triggering, 0 is event driven, > 0 a period in ms
    pub trigger_periodic: i64,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<RuleAction>,
    /// UTC creation time, `yyyy-MM-ddTHH:mm:ss`
    pub created: String,
    pub last_triggered: String,
    pub times_triggered: u64,
    pub etag: String,

    /// Idle-counter value of the last binding verification
    #[serde(skip)]
    pub last_verify: u64,
    #[serde(skip)]
    pub last_triggered_at: Option<Instant>,
}

impl Rule {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            owner: String::new(),
            status: RuleStatus::Enabled,
            state: RuleState::Normal,
            trigger_periodic: 0,
            conditions: Vec::new(),
            actions: Vec::new(),
            created: String::new(),
            last_triggered: "none".to_string(),
            times_triggered: 0,
            etag: make_etag(),
            last_verify: 0,
            last_triggered_at: None,
        }
    }

    pub fn touch_etag(&mut self) {
        self.etag = make_etag();
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.status == RuleStatus::Enabled && self.state == RuleState::Normal
    }

    /// Record a successful trigger.
    pub fn mark_triggered(&mut self) {
        self.last_triggered = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        self.times_triggered += 1;
        self.last_triggered_at = Some(Instant::now());
    }

    /// External representation for GET responses.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "lasttriggered": self.last_triggered,
            "created": self.created,
            "timestriggered": self.times_triggered,
            "owner": self.owner,
            "status": self.status.as_str(),
            "conditions": self.conditions.iter().map(RuleCondition::to_json).collect::<Vec<_>>(),
            "actions": self.actions.iter().map(RuleAction::to_json).collect::<Vec<_>>(),
            "periodic": self.trigger_periodic,
            "etag": etag_unquoted(&self.etag),
        })
    }
}

impl Default for Rule {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_json_omits_empty_value() {
        let c = RuleCondition {
            address: "/sensors/5/state/lastupdated".to_string(),
            operator: RuleOperator::Dx,
            value: String::new(),
        };
        let json = c.to_json();
        assert!(json.get("value").is_none());
        assert_eq!(json["operator"], "dx");
    }

    #[test]
    fn test_action_json_parses_body() {
        let a = RuleAction {
            address: "/groups/1".to_string(),
            method: "PUT".to_string(),
            body: r#"{"on":true}"#.to_string(),
        };
        assert_eq!(a.to_json()["body"]["on"], true);
    }

    #[test]
    fn test_rule_json_etag_unquoted() {
        let rule = Rule::new();
        let json = rule.to_json();
        let etag = json["etag"].as_str().unwrap();
        assert!(!etag.contains('"'));
        assert_eq!(json["lasttriggered"], "none");
    }

    #[test]
    fn test_mark_triggered() {
        let mut rule = Rule::new();
        rule.mark_triggered();
        assert_eq!(rule.times_triggered, 1);
        assert_ne!(rule.last_triggered, "none");
        assert!(rule.last_triggered_at.is_some());
    }
}
