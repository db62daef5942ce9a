//! Sensor catalog and state rendering for Home Assistant.

use serde_json::Value;
use uuid::Uuid;

use crate::types::{BarTrend, Observation, RainCollector, StationModel, WindRose};

pub const DEFAULT_NAME: &str = "Davis Vantage";

const RAIN_COLLECTOR_OPTIONS: [&str; 3] = [
    RainCollector::Imperial.label(),
    RainCollector::Metric.label(),
    RainCollector::MetricTenth.label(),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Sensor,
    BinarySensor,
}

impl Platform {
    pub fn domain(&self) -> &'static str {
        match self {
            Platform::Sensor => "sensor",
            Platform::BinarySensor => "binary_sensor",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorDescription {
    pub platform: Platform,
    /// Observation key the state is read from.
    pub key: String,
    pub name: String,
    pub device_class: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub icon: Option<&'static str>,
    pub diagnostic: bool,
    pub enabled_by_default: bool,
    pub precision: Option<u8>,
    pub options: Option<&'static [&'static str]>,
}

impl SensorDescription {
    fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            platform: Platform::Sensor,
            key: key.into(),
            name: name.into(),
            device_class: None,
            state_class: None,
            unit: None,
            icon: None,
            diagnostic: false,
            enabled_by_default: true,
            precision: None,
            options: None,
        }
    }

    fn binary(key: &str, name: &str) -> Self {
        Self {
            platform: Platform::BinarySensor,
            ..Self::new(key, name)
        }
    }

    fn device_class(mut self, class: &'static str) -> Self {
        self.device_class = Some(class);
        self
    }

    fn measurement(mut self) -> Self {
        self.state_class = Some("measurement");
        self
    }

    fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    fn icon(mut self, icon: &'static str) -> Self {
        self.icon = Some(icon);
        self
    }

    fn diagnostic(mut self) -> Self {
        self.diagnostic = true;
        self
    }

    fn enabled(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    fn precision(mut self, digits: u8) -> Self {
        self.precision = Some(digits);
        self
    }

    fn options(mut self, options: &'static [&'static str]) -> Self {
        self.device_class = Some("enum");
        self.options = Some(options);
        self
    }

    fn temperature(self) -> Self {
        self.device_class("temperature").measurement().unit("°F").precision(1)
    }

    fn pressure(self) -> Self {
        self.device_class("pressure").measurement().unit("inHg").precision(2)
    }

    fn wind_speed(self) -> Self {
        self.device_class("wind_speed")
            .measurement()
            .unit("mph")
            .precision(1)
            .icon("mdi:weather-windy")
    }

    fn wind_direction(self) -> Self {
        let mut desc = self
            .device_class("wind_direction")
            .unit("°")
            .precision(0)
            .icon("mdi:compass-outline");
        desc.state_class = Some("measurement_angle");
        desc
    }

    fn rain(self) -> Self {
        self.device_class("precipitation")
            .measurement()
            .unit("in")
            .precision(2)
            .icon("mdi:water-outline")
    }

    fn rain_rate(self) -> Self {
        self.device_class("precipitation_intensity")
            .measurement()
            .unit("in/h")
            .precision(2)
            .icon("mdi:water-outline")
    }

    fn time_of_day(self) -> Self {
        self.icon("mdi:clock-in")
    }

    fn timestamp(self) -> Self {
        self.device_class("timestamp").icon("mdi:clock-outline").diagnostic()
    }

    /// `sensor.davis_vantage_<name>` with the name slugified.
    pub fn entity_id(&self) -> String {
        format!(
            "{}.{}",
            self.platform.domain(),
            slugify(&format!("{DEFAULT_NAME} {}", self.name))
        )
    }

    pub fn unique_id(&self, entry_id: &str) -> String {
        format!("{entry_id}-{DEFAULT_NAME} {}", self.name)
    }

    /// Current value of this sensor, `None` when unavailable.
    pub fn value(&self, data: &Observation) -> Option<Value> {
        data.value(&self.key)
    }
}

/// Lowercase, runs of anything but ASCII letters and digits become one `_`.
pub fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    for c in s.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

/// Fresh identifier for a station entry.
pub fn new_entry_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn sensor_descriptions(model: StationModel) -> Vec<SensorDescription> {
    use SensorDescription as D;
    let solar = model.has_solar_sensors();

    let mut sensors = vec![
        D::new("Datetime", "Last Fetch Time").timestamp(),
        D::new("LastSuccessTime", "Last Success Time").timestamp(),
        D::new("LastErrorTime", "Last Error Time").timestamp().enabled(false),
        D::new("LastError", "Last Error Message")
            .icon("mdi:message-alert-outline")
            .diagnostic(),
        D::new("ArchiveInterval", "Archive Interval")
            .icon("mdi:archive-clock-outline")
            .unit("min")
            .diagnostic(),
        D::new("TempOut", "Temperature").temperature(),
        D::new("TempOutHiDay", "Temperature High (Day)")
            .temperature()
            .icon("mdi:thermometer-chevron-up"),
        D::new("TempOutHiTime", "Temperature High Time").time_of_day(),
        D::new("TempOutLowDay", "Temperature Low (Day)")
            .temperature()
            .icon("mdi:thermometer-chevron-down"),
        D::new("TempOutLowTime", "Temperature Low Time").time_of_day(),
        D::new("TempIn", "Temperature (Inside)")
            .device_class("temperature")
            .unit("°F")
            .precision(1)
            .enabled(false),
        D::new("HeatIndex", "Heat Index")
            .temperature()
            .icon("mdi:sun-thermometer-outline"),
        D::new("WindChill", "Wind Chill")
            .temperature()
            .icon("mdi:snowflake-thermometer"),
        D::new("FeelsLike", "Feels Like")
            .temperature()
            .icon("mdi:download-circle-outline"),
        D::new("DewPoint", "Dew Point")
            .temperature()
            .icon("mdi:water-thermometer-outline"),
        D::new("DewPointHiDay", "Dew Point High (Day)")
            .temperature()
            .icon("mdi:water-thermometer-outline"),
        D::new("DewPointHiTime", "Dew Point High Time").time_of_day(),
        D::new("DewPointLowDay", "Dew Point Low (Day)")
            .temperature()
            .icon("mdi:water-thermometer-outline"),
        D::new("DewPointLowTime", "Dew Point Low Time").time_of_day(),
        D::new("Barometer", "Barometric Pressure").pressure(),
        D::new("BarometerHiDay", "Barometric Pressure High (Day)").pressure(),
        D::new("BarometerHiTime", "Barometric Pressure High Time").time_of_day(),
        D::new("BarometerLowDay", "Barometric Pressure Low (Day)").pressure(),
        D::new("BarometerLoTime", "Barometric Pressure Low Time").time_of_day(),
        D::new("BarTrend", "Barometric Trend").options(&BarTrend::OPTIONS),
        D::new("HumIn", "Humidity (Inside)")
            .device_class("humidity")
            .unit("%")
            .precision(0)
            .enabled(false),
        D::new("HumOut", "Humidity")
            .device_class("humidity")
            .measurement()
            .unit("%")
            .precision(0),
        D::new("WindSpeed", "Wind Speed").wind_speed(),
        D::new("WindSpeed10Min", "Wind Speed (Average)").wind_speed(),
        D::new("WindSpeedAvg", "Wind Speed (Average) (AI)").wind_speed(),
        D::new("WindGust", "Wind Gust").wind_speed().icon("mdi:windsock"),
        D::new("WindGustDay", "Wind Gust (Day)")
            .wind_speed()
            .icon("mdi:windsock"),
        D::new("WindGustTime", "Wind Gust Time").time_of_day(),
        D::new("WindDir", "Wind Direction").wind_direction(),
        D::new("WindAvgDir", "Wind Direction (Average)").wind_direction(),
        D::new("WindDirRose", "Wind Direction Rose").options(&WindRose::OPTIONS),
        D::new("WindAvgDirRose", "Wind Direction Rose (Average)").options(&WindRose::OPTIONS),
        D::new("WindSpeedBft", "Wind Speed (Bft)")
            .icon("mdi:weather-windy")
            .measurement(),
        D::new("RainDay", "Rain (Day)").rain(),
        D::new("RainMonth", "Rain (Month)").rain(),
        D::new("RainYear", "Rain (Year)").rain(),
        D::new("RainRate", "Rain Rate").rain_rate(),
        D::new("RainRateDay", "Rain Rate (Day)").rain_rate(),
        D::new("RainRateTime", "Rain Rate Time").time_of_day(),
        D::new("UV", "UV Level")
            .icon("mdi:sun-wireless-outline")
            .measurement()
            .enabled(solar),
        D::new("UVDay", "UV Level (Day)")
            .icon("mdi:sun-wireless-outline")
            .measurement()
            .enabled(solar),
        D::new("UVTime", "UV Level Time").time_of_day().enabled(solar),
        D::new("SolarRad", "Solar Radiation")
            .icon("mdi:sun-wireless-outline")
            .measurement()
            .unit("W/m²")
            .enabled(solar),
        D::new("SolarRadDay", "Solar Radiation (Day)")
            .icon("mdi:sun-wireless-outline")
            .measurement()
            .unit("W/m²")
            .enabled(solar),
        D::new("SolarRadTime", "Solar Radiation Time")
            .time_of_day()
            .enabled(solar),
        D::new("BatteryVolts", "Battery Voltage")
            .device_class("voltage")
            .unit("V")
            .precision(1)
            .diagnostic()
            .enabled(false),
        D::new("ForecastIcon", "Forecast Icon").enabled(false),
        D::new("ForecastRuleNo", "Forecast Rule").icon("mdi:binoculars"),
        D::new("RainCollector", "Rain Collector")
            .icon("mdi:bucket-outline")
            .diagnostic()
            .options(&RAIN_COLLECTOR_OPTIONS),
        D::new("RainStorm", "Rain Storm").rain().precision(1),
        D::new("StormStartDate", "Rain Storm Start Date")
            .device_class("date")
            .icon("mdi:calendar-outline"),
    ];

    sensors.extend((1..=7).map(|probe| {
        D::new(
            format!("ExtraTemps{probe:02}"),
            format!("Extra Temperature {probe}"),
        )
        .temperature()
        .enabled(false)
    }));
    sensors.extend((1..=7).map(|probe| {
        D::new(format!("HumExtra{probe:02}"), format!("Extra Humidity {probe}"))
            .device_class("humidity")
            .unit("%")
            .precision(0)
            .enabled(false)
    }));

    sensors.extend([
        D::new("Latitude", "Latitude")
            .icon("mdi:latitude")
            .unit("°")
            .diagnostic()
            .enabled(false),
        D::new("Longitude", "Longitude")
            .icon("mdi:longitude")
            .unit("°")
            .diagnostic()
            .enabled(false),
        D::new("Elevation", "Elevation")
            .device_class("distance")
            .icon("mdi:image-filter-hdr-outline")
            .unit("ft")
            .diagnostic()
            .enabled(false),
        D::new("LastReadoutDuration", "Last Readout Duration")
            .icon("mdi:timer-outline")
            .unit("s")
            .precision(1)
            .diagnostic()
            .enabled(false),
        D::new("SunRise", "Sunrise")
            .icon("mdi:sun-clock-outline")
            .enabled(false),
        D::new("SunSet", "Sunset")
            .icon("mdi:sun-clock-outline")
            .enabled(false),
        D::binary("IsRaining", "Is Raining"),
    ]);
    sensors
}

/// Renders a value as a Home Assistant state string.
pub fn render_state(platform: Platform, value: Option<&Value>) -> String {
    match (platform, value) {
        (_, None | Some(Value::Null)) => "unknown".to_string(),
        (Platform::BinarySensor, Some(Value::Bool(true))) => "on".to_string(),
        (Platform::BinarySensor, Some(Value::Bool(false))) => "off".to_string(),
        (_, Some(Value::String(s))) => s.clone(),
        (_, Some(other)) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(sensors: &[SensorDescription], key: &str) -> SensorDescription {
        sensors
            .iter()
            .find(|s| s.key == key)
            .cloned()
            .unwrap_or_else(|| panic!("no sensor {key}"))
    }

    #[test]
    fn entity_and_unique_ids() {
        let sensors = sensor_descriptions(StationModel::VantagePro2);
        let hi = find(&sensors, "TempOutHiDay");
        assert_eq!(hi.entity_id(), "sensor.davis_vantage_temperature_high_day");
        assert_eq!(
            hi.unique_id("abc123"),
            "abc123-Davis Vantage Temperature High (Day)"
        );
        let rain = find(&sensors, "IsRaining");
        assert_eq!(rain.entity_id(), "binary_sensor.davis_vantage_is_raining");
        assert_eq!(
            find(&sensors, "WindSpeedAvg").entity_id(),
            "sensor.davis_vantage_wind_speed_average_ai"
        );
    }

    #[test]
    fn solar_sensors_depend_on_model() {
        let plain = sensor_descriptions(StationModel::VantagePro2);
        let plus = sensor_descriptions(StationModel::VantagePro2Plus);
        for key in ["UV", "UVDay", "UVTime", "SolarRad", "SolarRadDay", "SolarRadTime"] {
            assert!(!find(&plain, key).enabled_by_default, "{key}");
            assert!(find(&plus, key).enabled_by_default, "{key}");
        }
    }

    #[test]
    fn probes_are_disabled_by_default() {
        let sensors = sensor_descriptions(StationModel::VantageVue);
        let probes: Vec<_> = sensors
            .iter()
            .filter(|s| s.key.starts_with("ExtraTemps") || s.key.starts_with("HumExtra"))
            .collect();
        assert_eq!(probes.len(), 14);
        assert!(probes.iter().all(|s| !s.enabled_by_default));
        assert_eq!(find(&sensors, "ExtraTemps07").name, "Extra Temperature 7");
    }

    #[test]
    fn keys_are_unique() {
        let sensors = sensor_descriptions(StationModel::VantagePro2Plus);
        let mut keys: Vec<_> = sensors.iter().map(|s| s.key.as_str()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), sensors.len());
    }

    #[test]
    fn enum_sensors_carry_options() {
        let sensors = sensor_descriptions(StationModel::VantagePro2);
        let collector = find(&sensors, "RainCollector");
        assert_eq!(collector.device_class, Some("enum"));
        assert_eq!(collector.options.map(|o| o.len()), Some(3));
        assert_eq!(
            find(&sensors, "WindDirRose").options,
            Some(&WindRose::OPTIONS[..])
        );
    }

    #[test]
    fn state_rendering() {
        let data = Observation {
            temp_out: Some(71.3),
            is_raining: Some(false),
            bar_trend: Some(BarTrend::Steady),
            ..Default::default()
        };
        let sensors = sensor_descriptions(StationModel::VantagePro2);
        let render = |key: &str| {
            let desc = find(&sensors, key);
            render_state(desc.platform, desc.value(&data).as_ref())
        };
        assert_eq!(render("TempOut"), "71.3");
        assert_eq!(render("IsRaining"), "off");
        assert_eq!(render("BarTrend"), "steady");
        assert_eq!(render("HumOut"), "unknown");
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("Davis Vantage Rain (Day)"), "davis_vantage_rain_day");
        assert_eq!(slugify("  UV Level  "), "uv_level");
        assert_eq!(new_entry_id().len(), 32);
    }
}
