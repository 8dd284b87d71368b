//! Rules REST surface
//!
//! `GET/POST /rules`, `GET/PUT/DELETE /rules/<id>`. Bodies arrive as
//! parsed JSON; the HTTP layer rejects unparseable payloads with
//! `ERR_INVALID_JSON` before reaching these handlers.

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use gateway_core::persistence::dirty;
use gateway_core::util::next_free_id;
use gateway_core::{Pipeline, Registry};

use crate::engine::RulesEngine;
use crate::error::{code, error_map, ApiResponse};
use crate::model::{
    Rule, RuleState, RuleStatus, MAX_ACTIONS, MAX_CONDITIONS, MAX_RULE_NAME_LENGTH,
};
use crate::validation::{check_actions, check_conditions};

impl RulesEngine {
    /// `GET /api/<apikey>/rules`
    #[must_use]
    pub fn get_all_rules(&self) -> ApiResponse {
        let mut map = Map::new();
        for rule in &self.rules {
            if rule.state == RuleState::Deleted {
                continue;
            }
            map.insert(rule.id.clone(), rule.to_json());
        }
        ApiResponse::ok(Value::Object(map))
    }

    /// `GET /api/<apikey>/rules/<id>`
    #[must_use]
    pub fn get_rule(&self, id: &str) -> ApiResponse {
        match self.rule_for_id(id) {
            Some(rule) if rule.state != RuleState::Deleted => ApiResponse::ok(rule.to_json()),
            _ => ApiResponse::not_found(&format!("/rules/{id}")),
        }
    }

    /// `POST /api/<apikey>/rules`
    ///
    /// A rule whose condition and action sets exactly equal an existing
    /// rule's replaces that rule in place (same slot, new id).
    pub fn create_rule(
        &mut self,
        apikey: &str,
        body: &Value,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
    ) -> ApiResponse {
        let Some(map) = body.as_object() else {
            return ApiResponse::bad_request(vec![error_map(
                code::INVALID_JSON,
                "/rules",
                "body contains invalid JSON",
            )]);
        };

        let conditions_list = map
            .get("conditions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let actions_list = map
            .get("actions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut errors = Vec::new();

        if !map.contains_key("name") {
            errors.push(error_map(
                code::MISSING_PARAMETER,
                "/rules/name",
                "invalid/missing parameters in body",
            ));
        }
        if conditions_list.is_empty() {
            errors.push(error_map(
                code::MISSING_PARAMETER,
                "/rules/conditions",
                "invalid/missing parameters in body",
            ));
        }
        if actions_list.is_empty() {
            errors.push(error_map(
                code::MISSING_PARAMETER,
                "/rules/actions",
                "invalid/missing parameters in body",
            ));
        }
        if conditions_list.len() > MAX_CONDITIONS {
            errors.push(error_map(
                code::TOO_MANY_ITEMS,
                "/rules/conditions",
                "too many items in list",
            ));
        }
        if actions_list.len() > MAX_ACTIONS {
            errors.push(error_map(
                code::TOO_MANY_ITEMS,
                "/rules/actions",
                "too many items in list",
            ));
        }

        let mut status = RuleStatus::Enabled;
        if let Some(status_value) = map.get("status") {
            let status_str = status_value.as_str().unwrap_or_default();
            match RuleStatus::parse(status_str) {
                Some(s) => status = s,
                None => errors.push(error_map(
                    code::INVALID_VALUE,
                    "/rules/status",
                    &format!("invalid value, {status_str}, for parameter, status"),
                )),
            }
        }

        let mut periodic = 0i64;
        if let Some(periodic_value) = map.get("periodic") {
            match periodic_value.as_i64() {
                Some(p) => periodic = p,
                None => errors.push(error_map(
                    code::INVALID_VALUE,
                    "/rules/periodic",
                    &format!("invalid value, {periodic_value}, for parameter, periodic"),
                )),
            }
        }

        if !errors.is_empty() {
            return ApiResponse::bad_request(errors);
        }

        let name = map.get("name").and_then(Value::as_str).unwrap_or_default();
        if name.is_empty() {
            return ApiResponse::bad_request(vec![error_map(
                code::INVALID_JSON,
                "/rules",
                "body contains invalid JSON",
            )]);
        }

        let actions = match check_actions(&actions_list) {
            Ok(actions) => actions,
            Err(err) => return ApiResponse::bad_request(vec![err]),
        };
        let conditions = match check_conditions(&conditions_list, registry) {
            Ok(conditions) => conditions,
            Err(err) => return ApiResponse::bad_request(vec![err]),
        };

        let mut rule = Rule::new();
        rule.id = next_free_id(self.rules.iter().map(|r| r.id.as_str()));
        rule.name = name.to_string();
        rule.owner = apikey.to_string();
        rule.status = status;
        rule.trigger_periodic = periodic;
        rule.created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        rule.actions = actions;
        rule.conditions = conditions;
        rule.touch_etag();

        let id = rule.id.clone();

        // identical condition and action sets replace the existing rule
        let slot = self
            .rules
            .iter()
            .position(|r| r.actions == rule.actions && r.conditions == rule.conditions);

        match slot {
            Some(pos) => {
                info!("replace existing rule with newly created one");
                self.rules[pos] = rule;
                let replaced = self.rules[pos].clone();
                self.queue_check_rule_bindings(&replaced, registry, pipeline);
            }
            None => {
                self.rules.push(rule);
                let added = self.rules.last().expect("just pushed").clone();
                self.queue_check_rule_bindings(&added, registry, pipeline);
            }
        }

        registry.mark_dirty(dirty::RULES);

        ApiResponse::ok(json!([{ "success": { "id": id } }]))
    }

    /// `PUT /api/<apikey>/rules/<id>`
    pub fn update_rule(
        &mut self,
        id: &str,
        body: &Value,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
    ) -> ApiResponse {
        let Some(map) = body.as_object() else {
            return ApiResponse::bad_request(vec![error_map(
                code::INVALID_JSON,
                "/rules",
                "body contains invalid JSON",
            )]);
        };

        for key in map.keys() {
            if !matches!(key.as_str(), "name" | "status" | "actions" | "conditions" | "periodic") {
                return ApiResponse::bad_request(vec![error_map(
                    code::PARAMETER_NOT_AVAILABLE,
                    &format!("/rules/{id}/{key}"),
                    &format!("parameter, {key}, not available"),
                )]);
            }
        }

        let mut errors = Vec::new();

        let mut name = String::new();
        if let Some(name_value) = map.get("name") {
            match name_value.as_str() {
                Some(n) if !n.is_empty() && n.len() <= MAX_RULE_NAME_LENGTH => {
                    name = n.to_string();
                }
                _ => {
                    let shown = map.get("name").cloned().unwrap_or(Value::Null);
                    errors.push(error_map(
                        code::INVALID_VALUE,
                        &format!("/rules/{id}/name"),
                        &format!("invalid value, {shown}, for parameter, /rules/{id}/name"),
                    ));
                }
            }
        }

        let conditions_list = map.get("conditions").and_then(Value::as_array).cloned();
        if let Some(list) = &conditions_list {
            if list.is_empty() {
                errors.push(error_map(
                    code::MISSING_PARAMETER,
                    "/rules/conditions",
                    "invalid/missing parameters in body",
                ));
            }
            if list.len() > MAX_CONDITIONS {
                errors.push(error_map(
                    code::TOO_MANY_ITEMS,
                    "/rules/conditions",
                    "too many items in list",
                ));
            }
        }

        let actions_list = map.get("actions").and_then(Value::as_array).cloned();
        if let Some(list) = &actions_list {
            if list.is_empty() {
                errors.push(error_map(
                    code::MISSING_PARAMETER,
                    "/rules/actions",
                    "invalid/missing parameters in body",
                ));
            }
            if list.len() > MAX_ACTIONS {
                errors.push(error_map(
                    code::TOO_MANY_ITEMS,
                    "/rules/actions",
                    "too many items in list",
                ));
            }
        }

        let mut status = None;
        if let Some(status_value) = map.get("status") {
            let status_str = status_value.as_str().unwrap_or_default();
            match RuleStatus::parse(status_str) {
                Some(s) => status = Some(s),
                None => errors.push(error_map(
                    code::INVALID_VALUE,
                    "/rules/status",
                    &format!("invalid value, {status_str}, for parameter, status"),
                )),
            }
        }

        let mut periodic = None;
        if let Some(periodic_value) = map.get("periodic") {
            match periodic_value.as_i64() {
                Some(p) => periodic = Some(p),
                None => errors.push(error_map(
                    code::INVALID_VALUE,
                    "/rules/periodic",
                    &format!("invalid value, {periodic_value}, for parameter, periodic"),
                )),
            }
        }

        if !errors.is_empty() {
            return ApiResponse::bad_request(errors);
        }

        let Some(pos) = self
            .rules
            .iter()
            .position(|r| r.state == RuleState::Normal && r.id == id)
        else {
            // unknown ids fall through with an empty result
            return ApiResponse::ok(Value::Array(Vec::new()));
        };

        let mut response_items = Vec::new();
        let mut changed = false;

        // a topology change first reverses the existing bindings
        if actions_list.is_some() || conditions_list.is_some() {
            self.rules[pos].status = RuleStatus::Disabled;
            let rule = self.rules[pos].clone();
            self.queue_check_rule_bindings(&rule, registry, pipeline);
        }

        if !name.is_empty() {
            response_items.push(json!({
                "success": { format!("/rules/{id}/name"): name }
            }));
            if self.rules[pos].name != name {
                changed = true;
                self.rules[pos].name = name;
            }
        }

        if let Some(status) = status {
            response_items.push(json!({
                "success": { format!("/rules/{id}/status"): status.as_str() }
            }));
            if self.rules[pos].status != status {
                changed = true;
                self.rules[pos].status = status;
            }
        }

        if let Some(periodic) = periodic {
            if self.rules[pos].trigger_periodic != periodic {
                changed = true;
                self.rules[pos].trigger_periodic = periodic;
            }
        }

        if let Some(list) = &actions_list {
            changed = true;
            match check_actions(list) {
                Ok(actions) => {
                    self.rules[pos].actions = actions;
                    response_items.push(json!({
                        "success": { format!("/rules/{id}/actions"): list }
                    }));
                }
                Err(err) => return ApiResponse::bad_request(vec![err]),
            }
        }

        if let Some(list) = &conditions_list {
            changed = true;
            match check_conditions(list, registry) {
                Ok(conditions) => {
                    self.rules[pos].conditions = conditions;
                    response_items.push(json!({
                        "success": { format!("/rules/{id}/conditions"): list }
                    }));
                }
                Err(err) => return ApiResponse::bad_request(vec![err]),
            }
        }

        if !map.contains_key("status") {
            self.rules[pos].status = RuleStatus::Enabled;
        }

        debug!("force verify of rule {}: {}", id, self.rules[pos].name);
        self.rules[pos].last_verify = 0;

        if changed {
            self.rules[pos].touch_etag();
            registry.mark_dirty(dirty::RULES);
        }

        ApiResponse::ok(Value::Array(response_items))
    }

    /// `DELETE /api/<apikey>/rules/<id>`
    pub fn delete_rule(
        &mut self,
        id: &str,
        registry: &mut Registry,
        pipeline: &mut Pipeline,
    ) -> ApiResponse {
        let deleted_already = match self.rule_for_id(id) {
            None => true,
            Some(rule) => rule.state == RuleState::Deleted,
        };
        if deleted_already {
            return ApiResponse::not_found(&format!("/rules/{id}"));
        }

        if let Some(rule) = self.rule_for_id_mut(id) {
            rule.state = RuleState::Deleted;
            rule.status = RuleStatus::Disabled;
            let rule = rule.clone();
            self.queue_check_rule_bindings(&rule, registry, pipeline);
        }

        registry.mark_dirty(dirty::RULES);

        ApiResponse::ok(json!([{ "success": { "id": id } }]))
    }
}
