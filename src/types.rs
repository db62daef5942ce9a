use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Tipping bucket resolution of the rain collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RainCollector {
    #[serde(rename = "0.01\"")]
    Imperial,
    #[serde(rename = "0.2 mm")]
    Metric,
    #[serde(rename = "0.1 mm")]
    MetricTenth,
}

impl RainCollector {
    pub const ALL: [RainCollector; 3] = [
        RainCollector::Imperial,
        RainCollector::Metric,
        RainCollector::MetricTenth,
    ];

    const SETUP_MASK: u8 = 0x30;

    pub const fn label(&self) -> &'static str {
        match self {
            RainCollector::Imperial => "0.01\"",
            RainCollector::Metric => "0.2 mm",
            RainCollector::MetricTenth => "0.1 mm",
        }
    }

    /// Decode the collector from the console setup bits.
    pub fn from_setup_bits(bits: u8) -> Option<Self> {
        match bits & Self::SETUP_MASK {
            0x00 => Some(RainCollector::Imperial),
            0x10 => Some(RainCollector::Metric),
            0x20 => Some(RainCollector::MetricTenth),
            _ => None,
        }
    }

    /// Replace the collector bits of `bits`, keeping every other setup flag.
    pub fn apply_to_setup_bits(&self, bits: u8) -> u8 {
        let code = match self {
            RainCollector::Imperial => 0x00,
            RainCollector::Metric => 0x10,
            RainCollector::MetricTenth => 0x20,
        };
        (bits & !Self::SETUP_MASK) | code
    }

    /// Factor turning values computed for 0.01" clicks into inches.
    pub fn inch_factor(&self) -> f64 {
        match self {
            RainCollector::Imperial => 1.0,
            RainCollector::Metric => 2.0 / 2.54,
            RainCollector::MetricTenth => 1.0 / 2.54,
        }
    }
}

impl fmt::Display for RainCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RainCollector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RainCollector::ALL
            .into_iter()
            .find(|rc| rc.label() == s)
            .ok_or_else(|| Error::InvalidRainCollector(s.to_string()))
    }
}

/// Archive interval in minutes, restricted to the values the console accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchivePeriod(u16);

impl ArchivePeriod {
    pub const ALLOWED: [u16; 7] = [1, 5, 10, 15, 30, 60, 120];

    pub fn new(minutes: u16) -> crate::Result<Self> {
        if Self::ALLOWED.contains(&minutes) {
            Ok(Self(minutes))
        } else {
            Err(Error::InvalidArchivePeriod(minutes))
        }
    }

    pub fn minutes(&self) -> u16 {
        self.0
    }
}

impl FromStr for ArchivePeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let minutes = s
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::InvalidArgument(format!("archive period {s:?}")))?;
        ArchivePeriod::new(minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarTrend {
    FallingRapidly,
    FallingSlowly,
    Steady,
    RisingSlowly,
    RisingRapidly,
}

impl BarTrend {
    pub const OPTIONS: [&'static str; 5] = [
        "falling_rapidly",
        "falling_slowly",
        "steady",
        "rising_slowly",
        "rising_rapidly",
    ];

    /// Accepts both the signed value and its unsigned byte form (196 is -60).
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            -60 | 196 => Some(BarTrend::FallingRapidly),
            -20 | 236 => Some(BarTrend::FallingSlowly),
            0 => Some(BarTrend::Steady),
            20 => Some(BarTrend::RisingSlowly),
            60 => Some(BarTrend::RisingRapidly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BarTrend::FallingRapidly => "falling_rapidly",
            BarTrend::FallingSlowly => "falling_slowly",
            BarTrend::Steady => "steady",
            BarTrend::RisingSlowly => "rising_slowly",
            BarTrend::RisingRapidly => "rising_rapidly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindRose {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl WindRose {
    pub const OPTIONS: [&'static str; 8] = ["n", "ne", "e", "se", "s", "sw", "w", "nw"];

    const ORDER: [WindRose; 8] = [
        WindRose::N,
        WindRose::NE,
        WindRose::E,
        WindRose::SE,
        WindRose::S,
        WindRose::SW,
        WindRose::W,
        WindRose::NW,
    ];

    /// Nearest of the eight compass points. Exact halves round to even.
    pub fn from_bearing(bearing: f64) -> Self {
        let index = (bearing / 45.0).round_ties_even().rem_euclid(8.0) as usize;
        Self::ORDER[index]
    }

    pub fn as_str(&self) -> &'static str {
        Self::OPTIONS[Self::ORDER.iter().position(|r| r == self).unwrap_or(0)]
    }
}

/// How the station is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkProtocol {
    #[default]
    #[serde(alias = "network", alias = "tcp")]
    Network,
    #[serde(alias = "serial")]
    Serial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StationModel {
    #[default]
    #[serde(rename = "Vantage Pro2")]
    VantagePro2,
    #[serde(rename = "Vantage Pro2 Plus")]
    VantagePro2Plus,
    #[serde(rename = "Vantage Vue")]
    VantageVue,
}

impl StationModel {
    pub fn name(&self) -> &'static str {
        match self {
            StationModel::VantagePro2 => "Vantage Pro2",
            StationModel::VantagePro2Plus => "Vantage Pro2 Plus",
            StationModel::VantageVue => "Vantage Vue",
        }
    }

    /// Only the Plus ships UV and solar radiation sensors.
    pub fn has_solar_sensors(&self) -> bool {
        matches!(self, StationModel::VantagePro2Plus)
    }
}

/// Receiver statistics reported by `RXCHECK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Diagnostics {
    pub total_received: u32,
    pub total_missed: u32,
    pub resyncs: u32,
    pub max_in_row: u32,
    pub crc_errors: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: i32,
}

/// Firmware and timing details returned by the info service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationDetails {
    pub version: String,
    pub date: String,
    pub diagnostics: Diagnostics,
    pub archive_period: u16,
}

/// Values cached at startup and reused for every poll.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StationInfo {
    pub firmware_version: Option<String>,
    pub archive_period: Option<u16>,
    pub location: Location,
}

/// One poll's worth of normalized station data, in station units
/// (°F, inHg, mph, inches).
///
/// Field names serialize to the keys used by sensor descriptions.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Observation {
    pub datetime: Option<DateTime<Local>>,
    pub last_success_time: Option<DateTime<Local>>,
    pub last_error_time: Option<DateTime<Local>>,
    pub last_error: String,
    pub last_readout_duration: Option<f64>,
    pub archive_interval: Option<u16>,

    pub temp_out: Option<f64>,
    pub temp_out_hi_day: Option<f64>,
    pub temp_out_hi_time: Option<NaiveTime>,
    pub temp_out_low_day: Option<f64>,
    pub temp_out_low_time: Option<NaiveTime>,
    pub temp_in: Option<f64>,
    pub heat_index: Option<f64>,
    pub wind_chill: Option<f64>,
    pub feels_like: Option<f64>,
    pub dew_point: Option<f64>,
    pub dew_point_hi_day: Option<f64>,
    pub dew_point_hi_time: Option<NaiveTime>,
    pub dew_point_low_day: Option<f64>,
    pub dew_point_low_time: Option<NaiveTime>,

    pub barometer: Option<f64>,
    pub barometer_hi_day: Option<f64>,
    pub barometer_hi_time: Option<NaiveTime>,
    pub barometer_low_day: Option<f64>,
    pub barometer_lo_time: Option<NaiveTime>,
    pub bar_trend: Option<BarTrend>,

    pub hum_in: Option<u8>,
    pub hum_out: Option<u8>,

    pub wind_speed: Option<f64>,
    pub wind_speed_10_min: Option<f64>,
    pub wind_speed_avg: Option<f64>,
    pub wind_gust: Option<f64>,
    pub wind_gust_day: Option<f64>,
    pub wind_gust_time: Option<NaiveTime>,
    pub wind_dir: Option<u16>,
    pub wind_avg_dir: Option<f64>,
    pub wind_dir_rose: Option<WindRose>,
    pub wind_avg_dir_rose: Option<WindRose>,
    pub wind_speed_bft: Option<u8>,

    pub rain_day: Option<f64>,
    pub rain_month: Option<f64>,
    pub rain_year: Option<f64>,
    pub rain_rate: Option<f64>,
    pub rain_rate_day: Option<f64>,
    pub rain_rate_time: Option<NaiveTime>,
    pub rain_storm: Option<f64>,
    pub storm_start_date: Option<NaiveDate>,
    pub is_raining: Option<bool>,
    pub rain_collector: Option<RainCollector>,

    #[serde(rename = "ETDay")]
    pub et_day: Option<f64>,
    #[serde(rename = "ETMonth")]
    pub et_month: Option<f64>,
    #[serde(rename = "ETYear")]
    pub et_year: Option<f64>,

    #[serde(rename = "UV")]
    pub uv: Option<f64>,
    #[serde(rename = "UVDay")]
    pub uv_day: Option<f64>,
    #[serde(rename = "UVTime")]
    pub uv_time: Option<NaiveTime>,
    pub solar_rad: Option<f64>,
    pub solar_rad_day: Option<f64>,
    pub solar_rad_time: Option<NaiveTime>,

    pub battery_status: Option<u8>,
    pub battery_volts: Option<f64>,
    pub forecast_icon: Option<u8>,
    pub forecast_rule_no: Option<u8>,
    pub forecast: Option<String>,
    pub sun_rise: Option<NaiveTime>,
    pub sun_set: Option<NaiveTime>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<i32>,

    /// Per-probe values such as `ExtraTemps01` or `HumExtra03`.
    #[serde(flatten)]
    pub probes: BTreeMap<String, Option<f64>>,
}

impl Observation {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Value for a sensor key, `None` when missing.
    pub fn value(&self, key: &str) -> Option<serde_json::Value> {
        match self.to_json() {
            serde_json::Value::Object(mut map) => map.remove(key).filter(|v| !v.is_null()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    OutsideTemperatureChanged { temp_f: f64 },
    RainStarted,
    RainStopped,
    BarTrendChanged { trend: Option<BarTrend> },
    ForecastChanged { rule: u8, text: String },
    StationError { message: String },
    StationRecovered,
    Numeric { key: String, value: f64 },
    Text { key: String, value: String },
    Bool { key: String, value: bool },
}
