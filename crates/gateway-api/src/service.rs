//! The gateway event loop
//!
//! One task owns every piece of mutable state: the registry, the
//! attribute cache, the pipeline, the synchronizer and the rules engine.
//! Timers and I/O events are multiplexed with `select!`; external callers
//! reach the loop through an mpsc command channel and get their answer on
//! a oneshot.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use gateway_core::driver::{RadioDriver, RadioError};
use gateway_core::group::Group;
use gateway_core::light::LightNode;
use gateway_core::persistence::{self, dirty};
use gateway_core::sensor::Sensor;
use gateway_core::{
    AttributeCache, GatewayConfig, Pipeline, RadioEvent, Registry, Synchronizer,
};
use rules_engine::replay::{GroupsResource, LightsResource, ReplayStatus};
use rules_engine::{ApiResponse, Rule, RulesEngine};
use zcl_protocol::green_power::gp_cmd;
use zcl_protocol::{ApsDataRequest, GpCommissioning};

/// Debounce for rule trigger metadata writes
const RULE_SAVE_DELAY: Duration = Duration::from_secs(3);
/// Coalescing delay for ordinary entity writes
const SHORT_SAVE_DELAY: Duration = Duration::from_secs(1);

/// A request forwarded from the HTTP layer into the event loop
pub struct ApiCommand {
    pub apikey: String,
    pub method: String,
    /// Path segments below `/api/<apikey>/`
    pub path: Vec<String>,
    pub body: Value,
    pub reply: oneshot::Sender<ApiResponse>,
}

/// Placeholder driver until a radio transport is attached.
///
/// Reports the network as down, which keeps the pipeline and the
/// synchronizer idle.
pub struct OfflineRadio;

impl RadioDriver for OfflineRadio {
    fn in_network(&self) -> bool {
        false
    }

    fn aps_request(&mut self, _req: &ApsDataRequest) -> Result<(), RadioError> {
        Err(RadioError::NotInNetwork)
    }
}

/// The single owner of all gateway state
pub struct GatewayService {
    config: GatewayConfig,
    registry: Registry,
    cache: AttributeCache,
    pipeline: Pipeline,
    sync: Synchronizer,
    engine: RulesEngine,
    groups_resource: GroupsResource,
    lights_resource: LightsResource,
    driver: Box<dyn RadioDriver + Send>,
    data_dir: PathBuf,
    save_due: Option<Instant>,
    rule_save_due: Option<Instant>,
}

impl GatewayService {
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        driver: Box<dyn RadioDriver + Send>,
        data_dir: PathBuf,
    ) -> Self {
        let pipeline = Pipeline::new(&config);
        let sync = Synchronizer::new(config.clone());
        let engine = RulesEngine::new(&config);

        Self {
            config,
            registry: Registry::new(),
            cache: AttributeCache::new(),
            pipeline,
            sync,
            engine,
            groups_resource: GroupsResource,
            lights_resource: LightsResource,
            driver,
            data_dir,
            save_due: None,
            rule_save_due: None,
        }
    }

    /// Load persisted entities from the data directory.
    pub async fn load(&mut self) {
        let lights: Vec<LightNode> =
            persistence::load_entities(&self.data_dir.join("lights.json")).await;
        self.registry.lights = lights;

        let groups: Vec<Group> =
            persistence::load_entities(&self.data_dir.join("groups.json")).await;
        self.registry.groups = groups;

        let sensors: Vec<Sensor> =
            persistence::load_entities(&self.data_dir.join("sensors.json")).await;
        self.registry.sensors = sensors;

        let rules: Vec<Rule> =
            persistence::load_entities(&self.data_dir.join("rules.json")).await;
        self.engine.rules = rules;

        info!(
            "gateway '{}' loaded: {} lights, {} groups, {} sensors, {} rules",
            self.config.name,
            self.registry.lights.len(),
            self.registry.groups.len(),
            self.registry.sensors.len(),
            self.engine.rules.len()
        );
    }

    /// Run the event loop until all channels close.
    pub async fn run(
        mut self,
        mut api_rx: mpsc::Receiver<ApiCommand>,
        mut radio_rx: mpsc::Receiver<RadioEvent>,
    ) {
        let mut task_timer = tokio::time::interval(Duration::from_millis(100));
        let mut group_timer = tokio::time::interval(Duration::from_millis(250));
        let mut attr_timer = tokio::time::interval(Duration::from_millis(750));
        let mut idle_timer = tokio::time::interval(Duration::from_secs(1));
        let mut verify_timer = tokio::time::interval(Duration::from_secs(5));

        self.pipeline.set_network_state(self.driver.in_network());

        loop {
            tokio::select! {
                _ = task_timer.tick() => {
                    self.pipeline.set_network_state(self.driver.in_network());
                    self.pipeline.process_tasks(&mut self.registry, self.driver.as_mut());
                }
                _ = group_timer.tick() => {
                    self.pipeline.process_group_tasks(&mut self.registry);
                    self.pipeline.process_binding_queue(&mut self.registry);
                }
                _ = attr_timer.tick() => {
                    self.sync.attr_tick(&mut self.registry, &mut self.cache, &mut self.pipeline);
                }
                _ = idle_timer.tick() => {
                    self.sync.idle_tick(&mut self.registry, &self.cache, &mut self.pipeline);
                    self.registry.permit_join = self.registry.permit_join.saturating_sub(1);
                    self.flush_saves().await;
                }
                _ = verify_timer.tick() => {
                    self.engine.verify_tick(
                        &mut self.registry,
                        &mut self.cache,
                        &mut self.pipeline,
                        self.sync.idle_total,
                    );
                }
                Some(cmd) = api_rx.recv() => {
                    self.handle_api(cmd);
                }
                Some(event) = radio_rx.recv() => {
                    self.handle_radio(event);
                }
                else => break,
            }

            if self.registry.dirty != 0 && self.save_due.is_none() {
                self.save_due = Some(Instant::now() + SHORT_SAVE_DELAY);
            }
        }

        // flush on shutdown
        self.registry.mark_dirty(dirty::LIGHTS | dirty::GROUPS | dirty::SENSORS | dirty::RULES);
        self.save_due = Some(Instant::now());
        self.rule_save_due = Some(Instant::now());
        self.flush_saves().await;
        info!("gateway event loop stopped");
    }

    fn handle_radio(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Indication(ind) => {
                self.sync.handle_indication(
                    &mut self.registry,
                    &mut self.cache,
                    &mut self.pipeline,
                    &ind,
                );
            }
            RadioEvent::Confirm(conf) => {
                self.pipeline.confirm(&conf, &mut self.registry);
                // fire the next request right away
                self.pipeline.process_tasks(&mut self.registry, self.driver.as_mut());
            }
            RadioEvent::Node(node_event) => {
                self.sync.handle_node_event(&mut self.registry, node_event);
            }
            RadioEvent::GreenPower(ind) => {
                if ind.gpd_command_id == gp_cmd::COMMISSIONING {
                    match GpCommissioning::parse(&ind.payload) {
                        Ok(commissioning) => {
                            self.registry.add_gp_sensor(ind.gpd_src_id, &commissioning);
                        }
                        Err(e) => debug!("bad green power commissioning frame: {e}"),
                    }
                } else if self.engine.gp_button_event(&mut self.registry, &mut self.pipeline, &ind)
                {
                    // restart the debounce window on every trigger
                    self.rule_save_due = Some(Instant::now() + RULE_SAVE_DELAY);
                }
            }
            RadioEvent::NetworkState { connected } => {
                info!("network state changed: connected={connected}");
                self.pipeline.set_network_state(connected);
            }
        }
    }

    fn handle_api(&mut self, cmd: ApiCommand) {
        let response = self.route_api(&cmd);
        if cmd.reply.send(response).is_err() {
            debug!("api caller went away");
        }
    }

    fn route_api(&mut self, cmd: &ApiCommand) -> ApiResponse {
        let resource = cmd.path.first().map(String::as_str).unwrap_or_default();
        let id = cmd.path.get(1).map(String::as_str);

        if cmd.method != "GET" {
            self.sync.user_activity();
        }

        match (resource, cmd.method.as_str()) {
            ("rules", "GET") => match id {
                Some(id) => self.engine.get_rule(id),
                None => self.engine.get_all_rules(),
            },
            ("rules", "POST") if id.is_none() => self.engine.create_rule(
                &cmd.apikey,
                &cmd.body,
                &mut self.registry,
                &mut self.pipeline,
            ),
            ("rules", "PUT") => match id {
                Some(id) => {
                    self.engine
                        .update_rule(id, &cmd.body, &mut self.registry, &mut self.pipeline)
                }
                None => ApiResponse::not_found("/rules"),
            },
            ("rules", "DELETE") => match id {
                Some(id) => self
                    .engine
                    .delete_rule(id, &mut self.registry, &mut self.pipeline),
                None => ApiResponse::not_found("/rules"),
            },
            ("groups" | "lights", "PUT") => {
                let status = if resource == "groups" {
                    self.groups_resource.handle(
                        &mut self.registry,
                        &mut self.pipeline,
                        "PUT",
                        &cmd.path,
                        &cmd.body,
                    )
                } else {
                    self.lights_resource.handle(
                        &mut self.registry,
                        &mut self.pipeline,
                        "PUT",
                        &cmd.path,
                        &cmd.body,
                    )
                };
                match status {
                    ReplayStatus::Handled => {
                        ApiResponse::ok(serde_json::json!([{ "success": cmd.body.clone() }]))
                    }
                    ReplayStatus::NotHandled => {
                        ApiResponse::not_found(&format!("/{}", cmd.path.join("/")))
                    }
                }
            }
            _ => ApiResponse::not_found(&format!("/{}", cmd.path.join("/"))),
        }
    }

    /// Flush dirty entity categories once their coalescing delay passed.
    async fn flush_saves(&mut self) {
        let now = Instant::now();

        let rules_due = self.rule_save_due.is_some_and(|due| due <= now);
        if rules_due {
            self.rule_save_due = None;
            self.registry.mark_dirty(dirty::RULES);
        }

        let due = self.save_due.is_some_and(|due| due <= now);
        if !due || self.registry.dirty == 0 {
            return;
        }
        self.save_due = None;

        let mask = self.registry.dirty;
        self.registry.dirty = 0;

        if mask & dirty::LIGHTS != 0 {
            let path = self.data_dir.join("lights.json");
            if let Err(e) = persistence::save_entities(&path, &self.registry.lights).await {
                warn!("failed to save lights: {e}");
            }
        }
        if mask & (dirty::GROUPS | dirty::SCENES) != 0 {
            let path = self.data_dir.join("groups.json");
            if let Err(e) = persistence::save_entities(&path, &self.registry.groups).await {
                warn!("failed to save groups: {e}");
            }
        }
        if mask & dirty::SENSORS != 0 {
            let path = self.data_dir.join("sensors.json");
            if let Err(e) = persistence::save_entities(&path, &self.registry.sensors).await {
                warn!("failed to save sensors: {e}");
            }
        }
        if mask & dirty::RULES != 0 {
            let path = self.data_dir.join("rules.json");
            if let Err(e) = persistence::save_entities(&path, &self.engine.rules).await {
                warn!("failed to save rules: {e}");
            }
        }
    }
}
