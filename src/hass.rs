//! Pushes sensor states to the Home Assistant REST API.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, trace};

use crate::sensors::{render_state, sensor_descriptions, SensorDescription};
use crate::types::{Observation, StationModel};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HassPublisher {
    http: reqwest::Client,
    base_url: String,
    token: String,
    entry_id: Option<String>,
    sensors: Vec<SensorDescription>,
}

impl HassPublisher {
    /// Publisher for the sensors enabled by default on `model`.
    pub fn new(base_url: &str, token: impl Into<String>, model: StationModel) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let sensors = sensor_descriptions(model)
            .into_iter()
            .filter(|s| s.enabled_by_default)
            .collect();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            entry_id: None,
            sensors,
        })
    }

    /// Adds `unique_id` attributes derived from `entry_id`.
    pub fn entry_id(mut self, entry_id: impl Into<String>) -> Self {
        self.entry_id = Some(entry_id.into());
        self
    }

    pub fn sensors(&self) -> &[SensorDescription] {
        &self.sensors
    }

    /// Writes one state per enabled sensor. Stops at the first failed request.
    pub async fn publish(&self, data: &Observation) -> Result<usize> {
        let values = match data.to_json() {
            Value::Object(map) => map,
            _ => return Err(Error::Parse("observation did not serialize to a map".into())),
        };

        for sensor in &self.sensors {
            let url = format!("{}/api/states/{}", self.base_url, sensor.entity_id());
            let mut body = state_body(sensor, values.get(&sensor.key));
            if let Some(entry_id) = &self.entry_id {
                body["attributes"]["unique_id"] = json!(sensor.unique_id(entry_id));
            }
            trace!(url = %url, %body, "posting state");
            self.http
                .post(&url)
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
        }
        debug!(count = self.sensors.len(), "published sensor states");
        Ok(self.sensors.len())
    }
}

pub(crate) fn state_body(sensor: &SensorDescription, value: Option<&Value>) -> Value {
    let mut attributes = Map::new();
    attributes.insert("friendly_name".into(), json!(sensor.name));
    if let Some(unit) = sensor.unit {
        attributes.insert("unit_of_measurement".into(), json!(unit));
    }
    if let Some(class) = sensor.device_class {
        attributes.insert("device_class".into(), json!(class));
    }
    if let Some(class) = sensor.state_class {
        attributes.insert("state_class".into(), json!(class));
    }
    if let Some(icon) = sensor.icon {
        attributes.insert("icon".into(), json!(icon));
    }
    if let Some(options) = sensor.options {
        attributes.insert("options".into(), json!(options));
    }
    json!({
        "state": render_state(sensor.platform, value),
        "attributes": attributes,
    })
}
