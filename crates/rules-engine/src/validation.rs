//! Rule action and condition validation
//!
//! Actions are checked syntactically (resource prefix, method, JSON
//! body, no duplicate addresses). Conditions are checked against the set
//! of currently present sensor attributes and the per-attribute operator
//! matrix.

use serde_json::Value;

use gateway_core::Registry;

use crate::error::{code, error_map};
use crate::model::{RuleAction, RuleCondition, RuleOperator};

/// Value categories accepted by condition attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueCategory {
    None,
    Numbers,
    Boolean,
}

/// Validate an action list and convert it into typed actions.
///
/// On failure the offending error map is returned for the response list.
pub fn check_actions(actions: &[Value]) -> Result<Vec<RuleAction>, Value> {
    let mut seen_addresses: Vec<String> = Vec::new();
    let mut checked = Vec::with_capacity(actions.len());

    for action in actions {
        let address = action["address"].as_str().unwrap_or_default().to_string();
        let method = action["method"].as_str().unwrap_or_default().to_string();

        let valid_prefix = ["/lights", "/groups", "/scenes", "/schedules", "/sensors"]
            .iter()
            .any(|p| address.starts_with(p));

        if !valid_prefix || seen_addresses.contains(&address) {
            return Err(error_map(
                code::ACTION_ERROR,
                &address,
                "Rule actions contain errors or multiple actions with the same resource address or an action on a unsupported resource",
            ));
        }
        seen_addresses.push(address.clone());

        if !matches!(method.as_str(), "PUT" | "POST" | "DELETE" | "BIND") {
            return Err(error_map(
                code::INVALID_VALUE,
                "rules/method",
                &format!("invalid value, {method}, for parameter, method"),
            ));
        }

        // the body must be JSON; it is stored serialized
        let body = match &action["body"] {
            Value::Object(map) => serde_json::to_string(map).unwrap_or_default(),
            Value::String(s) if serde_json::from_str::<Value>(s).is_ok() => s.clone(),
            _ => {
                return Err(error_map(
                    code::INVALID_JSON,
                    "/rules/",
                    "body contains invalid JSON",
                ));
            }
        };

        checked.push(RuleAction { address, method, body });
    }

    Ok(checked)
}

/// The operator set and value category valid for a condition address.
fn operator_matrix(suffix: &str) -> (&'static [RuleOperator], ValueCategory) {
    use RuleOperator::{Dx, Eq, Gt, Lt};

    match suffix {
        "/state/lastupdated" | "/config/long" | "/config/lat" => (&[Dx], ValueCategory::None),
        "/state/illuminance" | "/state/presence" => {
            (&[Dx, Eq, Lt, Gt], ValueCategory::Numbers)
        }
        "/config/reachable" | "/config/on" | "/state/open" | "/state/flag"
        | "/state/daylight" => (&[Dx, Eq], ValueCategory::Boolean),
        "/config/battery" | "/state/buttonevent" | "/state/temperature"
        | "/state/humidity" => (&[Dx, Eq, Gt, Lt], ValueCategory::Numbers),
        "/config/sunriseoffset" | "/config/sunsetoffset" => {
            (&[Eq, Gt, Lt], ValueCategory::Numbers)
        }
        _ => (&[], ValueCategory::None),
    }
}

/// A positive integer without leading zeros.
fn is_positive_number(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if ('1'..='9').contains(&c) => chars.all(|c| c.is_ascii_digit()),
        _ => false,
    }
}

fn is_boolean(value: &str) -> bool {
    value == "true" || value == "false"
}

/// Validate a condition list against the sensors currently present.
pub fn check_conditions(
    conditions: &[Value],
    registry: &Registry,
) -> Result<Vec<RuleCondition>, Value> {
    // the set of valid and present sensor attribute addresses
    let mut valid_addresses: Vec<String> = Vec::new();
    for sensor in &registry.sensors {
        let base = format!("/sensors/{}", sensor.id);
        valid_addresses.push(format!("{base}/config/reachable"));
        valid_addresses.push(format!("{base}/config/on"));
        valid_addresses.push(format!("{base}/config/battery"));
        valid_addresses.push(format!("{base}/state/lastupdated"));
        for suffix in sensor.sensor_type.condition_suffixes() {
            valid_addresses.push(format!("{base}{suffix}"));
        }
    }

    let mut checked = Vec::with_capacity(conditions.len());

    for condition in conditions {
        let address = condition["address"].as_str().unwrap_or_default().to_string();
        let operator_str = condition["operator"].as_str().unwrap_or_default();
        let value = condition["value"].as_str().unwrap_or_default().to_string();

        if !valid_addresses.contains(&address) {
            return Err(error_map(
                code::RESOURCE_NOT_AVAILABLE,
                &address,
                &format!("Resource, {address}, not available"),
            ));
        }

        let suffix = address
            .find("/config")
            .or_else(|| address.find("/state"))
            .map(|pos| &address[pos..])
            .unwrap_or_default();

        let (operators, category) = operator_matrix(suffix);

        let Some(operator) = RuleOperator::parse(operator_str) else {
            return Err(error_map(
                code::INVALID_VALUE,
                "/rules/operator",
                &format!("invalid value, {operator_str}, for parameter, operator"),
            ));
        };

        if !operators.contains(&operator) {
            return Err(error_map(
                code::INVALID_VALUE,
                "/rules/operator",
                &format!("invalid value, {operator_str}, for parameter, operator"),
            ));
        }

        if operator == RuleOperator::Dx {
            if !value.is_empty() {
                return Err(error_map(
                    code::INVALID_VALUE,
                    "/rules/conditions",
                    "parameter, value, is not modifiable",
                ));
            }
        } else {
            let value_ok = match category {
                ValueCategory::Numbers => is_positive_number(&value),
                ValueCategory::Boolean => is_boolean(&value),
                ValueCategory::None => true,
            };
            if !value_ok {
                return Err(error_map(
                    code::INVALID_VALUE,
                    "/rules/conditions",
                    &format!("invalid value, {value}, for parameter, value"),
                ));
            }
        }

        checked.push(RuleCondition { address, operator, value });
    }

    Ok(checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::sensor::{Sensor, SensorFingerprint, SensorType};
    use serde_json::json;

    fn registry_with_sensors() -> Registry {
        let mut registry = Registry::new();

        let gp = SensorFingerprint {
            endpoint: None,
            profile_id: zcl_protocol::cluster::profile::GREEN_POWER,
            device_id: 0x02,
            in_clusters: vec![],
            out_clusters: vec![],
        };
        let mut switch = Sensor::new(0x0155_4400, SensorType::ZgpSwitch, gp);
        switch.id = "5".to_string();
        registry.sensors.push(switch);

        let fp = SensorFingerprint {
            endpoint: Some(2),
            profile_id: 0x0104,
            device_id: 0x0106,
            in_clusters: vec![zcl_protocol::cluster::id::ILLUMINANCE_MEASUREMENT],
            out_clusters: vec![],
        };
        let mut lux = Sensor::new(0xBB, SensorType::ZhaLight, fp);
        lux.id = "7".to_string();
        registry.sensors.push(lux);

        registry
    }

    #[test]
    fn test_action_prefix_whitelist() {
        let actions = vec![json!({"address": "/outlets/1", "method": "PUT", "body": {}})];
        let err = check_actions(&actions).unwrap_err();
        assert_eq!(err["error"]["type"], code::ACTION_ERROR);
    }

    #[test]
    fn test_duplicate_action_address_rejected() {
        let actions = vec![
            json!({"address": "/groups/1", "method": "PUT", "body": {"on": true}}),
            json!({"address": "/groups/1", "method": "PUT", "body": {"on": false}}),
        ];
        let err = check_actions(&actions).unwrap_err();
        assert_eq!(err["error"]["type"], code::ACTION_ERROR);
    }

    #[test]
    fn test_invalid_method_rejected() {
        let actions = vec![json!({"address": "/groups/1", "method": "PATCH", "body": {}})];
        let err = check_actions(&actions).unwrap_err();
        assert_eq!(err["error"]["type"], code::INVALID_VALUE);
    }

    #[test]
    fn test_bind_method_accepted() {
        let actions =
            vec![json!({"address": "/lights/8/state", "method": "BIND", "body": {"bri": 128}})];
        let checked = check_actions(&actions).unwrap();
        assert_eq!(checked[0].method, "BIND");
        assert_eq!(checked[0].body, r#"{"bri":128}"#);
    }

    #[test]
    fn test_condition_unknown_sensor_rejected() {
        let registry = registry_with_sensors();
        let conditions =
            vec![json!({"address": "/sensors/99/state/buttonevent", "operator": "eq", "value": "16"})];
        let err = check_conditions(&conditions, &registry).unwrap_err();
        assert_eq!(err["error"]["type"], code::RESOURCE_NOT_AVAILABLE);
    }

    #[test]
    fn test_condition_operator_matrix() {
        let registry = registry_with_sensors();

        // lt on buttonevent is allowed (numbers), lt on lastupdated is not
        let ok = vec![json!({"address": "/sensors/5/state/buttonevent", "operator": "lt", "value": "3"})];
        assert!(check_conditions(&ok, &registry).is_ok());

        let bad = vec![json!({"address": "/sensors/5/state/lastupdated", "operator": "lt", "value": "3"})];
        let err = check_conditions(&bad, &registry).unwrap_err();
        assert_eq!(err["error"]["type"], code::INVALID_VALUE);
    }

    #[test]
    fn test_dx_forbids_value() {
        let registry = registry_with_sensors();
        let bad = vec![json!({"address": "/sensors/5/state/lastupdated", "operator": "dx", "value": "1"})];
        let err = check_conditions(&bad, &registry).unwrap_err();
        assert_eq!(err["error"]["description"], "parameter, value, is not modifiable");

        let ok = vec![json!({"address": "/sensors/5/state/lastupdated", "operator": "dx"})];
        assert!(check_conditions(&ok, &registry).is_ok());
    }

    #[test]
    fn test_number_validation() {
        assert!(is_positive_number("16"));
        assert!(!is_positive_number("0"));
        assert!(!is_positive_number("016"));
        assert!(!is_positive_number(""));
        assert!(!is_positive_number("-3"));
        assert!(!is_positive_number("1.5"));
    }

    #[test]
    fn test_illuminance_condition() {
        let registry = registry_with_sensors();
        let ok = vec![json!({"address": "/sensors/7/state/illuminance", "operator": "lt", "value": "200"})];
        let checked = check_conditions(&ok, &registry).unwrap();
        assert_eq!(checked[0].operator, RuleOperator::Lt);
    }
}
