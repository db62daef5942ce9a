//! Station services callable with a JSON body such as
//! `{"service": "set_yearly_rain", "rain_clicks": 1200}`.

use chrono::{Local, NaiveDateTime, TimeZone};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::error;

use crate::client::VantageClient;
use crate::types::{ArchivePeriod, RainCollector};
use crate::{Error, Result};

pub const SERVICE_SET_DAVIS_TIME: &str = "set_davis_time";
pub const SERVICE_GET_DAVIS_TIME: &str = "get_davis_time";
pub const SERVICE_GET_RAW_DATA: &str = "get_raw_data";
pub const SERVICE_GET_INFO: &str = "get_info";
pub const SERVICE_SET_YEARLY_RAIN: &str = "set_yearly_rain";
pub const SERVICE_SET_ARCHIVE_PERIOD: &str = "set_archive_period";
pub const SERVICE_SET_RAIN_COLLECTOR: &str = "set_rain_collector";

pub const DAVIS_TIME_ERROR: &str = "Couldn't get davis time, please try again later";
pub const INFO_ERROR: &str = "Couldn't get firmware information from Davis weather station";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum ServiceCall {
    SetDavisTime,
    GetDavisTime,
    GetRawData,
    GetInfo,
    SetYearlyRain { rain_clicks: i64 },
    SetArchivePeriod { archive_period: String },
    SetRainCollector { rain_collector: String },
}

impl ServiceCall {
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::InvalidArgument(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServiceCall::SetDavisTime => SERVICE_SET_DAVIS_TIME,
            ServiceCall::GetDavisTime => SERVICE_GET_DAVIS_TIME,
            ServiceCall::GetRawData => SERVICE_GET_RAW_DATA,
            ServiceCall::GetInfo => SERVICE_GET_INFO,
            ServiceCall::SetYearlyRain { .. } => SERVICE_SET_YEARLY_RAIN,
            ServiceCall::SetArchivePeriod { .. } => SERVICE_SET_ARCHIVE_PERIOD,
            ServiceCall::SetRainCollector { .. } => SERVICE_SET_RAIN_COLLECTOR,
        }
    }
}

/// A service call with its arguments checked.
enum Validated {
    SetDavisTime,
    GetDavisTime,
    GetRawData,
    GetInfo,
    SetYearlyRain(u16),
    SetArchivePeriod(ArchivePeriod),
    SetRainCollector(RainCollector),
}

fn validate(call: ServiceCall) -> Result<Validated> {
    Ok(match call {
        ServiceCall::SetDavisTime => Validated::SetDavisTime,
        ServiceCall::GetDavisTime => Validated::GetDavisTime,
        ServiceCall::GetRawData => Validated::GetRawData,
        ServiceCall::GetInfo => Validated::GetInfo,
        ServiceCall::SetYearlyRain { rain_clicks } => {
            let clicks = u16::try_from(rain_clicks).map_err(|_| {
                Error::InvalidArgument(format!("rain_clicks {rain_clicks} out of range"))
            })?;
            Validated::SetYearlyRain(clicks)
        }
        ServiceCall::SetArchivePeriod { archive_period } => {
            Validated::SetArchivePeriod(archive_period.parse()?)
        }
        ServiceCall::SetRainCollector { rain_collector } => {
            Validated::SetRainCollector(rain_collector.parse()?)
        }
    })
}

/// Console time as an ISO 8601 string in the local time zone.
pub fn davis_time_iso(time: NaiveDateTime) -> String {
    match Local.from_local_datetime(&time).earliest() {
        Some(local) => local.to_rfc3339(),
        None => time.format("%Y-%m-%dT%H:%M:%S").to_string(),
    }
}

/// Runs a service. Query services return a response body, setters return `None`.
///
/// Invalid arguments are rejected before the station is contacted.
pub async fn handle(client: &Mutex<VantageClient>, call: ServiceCall) -> Result<Option<Value>> {
    let call = validate(call)?;
    let mut client = client.lock().await;

    match call {
        Validated::SetDavisTime => {
            client.set_davis_time(Local::now().naive_local()).await?;
            Ok(None)
        }
        Validated::GetDavisTime => Ok(Some(match client.davis_time().await {
            Ok(time) => json!({ "davis_time": davis_time_iso(time) }),
            Err(e) => {
                error!(error = %e, "couldn't get davis time");
                json!({ "error": DAVIS_TIME_ERROR })
            }
        })),
        Validated::GetRawData => Ok(Some(client.raw_data())),
        Validated::GetInfo => Ok(Some(match client.info().await {
            Ok(info) => serde_json::to_value(info).unwrap_or(Value::Null),
            Err(e) => {
                error!(error = %e, "couldn't get firmware info");
                json!({ "error": INFO_ERROR })
            }
        })),
        Validated::SetYearlyRain(clicks) => {
            client.set_yearly_rain(clicks).await?;
            Ok(None)
        }
        Validated::SetArchivePeriod(period) => {
            client.set_archive_period(period).await?;
            Ok(None)
        }
        Validated::SetRainCollector(collector) => {
            client.set_rain_collector(collector).await?;
            Ok(None)
        }
    }
}
