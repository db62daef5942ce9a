use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, TimeDelta};
use serde_json::{json, Map, Value};
use tracing::{debug, error, trace, warn};

use crate::console::Console;
use crate::diff::observation_events;
use crate::forecast::forecast_text;
use crate::link::{Connector, Link, LinkConnector};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::parser::{ArchiveRecord, HiLows, LoopPacket, RawRecord};
use crate::types::*;
use crate::weather;
use crate::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const PARTIAL_DATA_ERROR: &str = "Received partly incorrect data";

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&Observation) + Send + Sync>;

pub struct VantageClientBuilder {
    link: Link,
    connector: Option<Box<dyn Connector>>,
    timeout: Duration,
    persistent: bool,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl VantageClientBuilder {
    pub fn new(link: Link) -> Self {
        Self {
            link,
            connector: None,
            timeout: DEFAULT_TIMEOUT,
            persistent: false,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    /// Per-read timeout on the console link.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep the link open between polls instead of reconnecting each time.
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Replace the TCP/serial connector, e.g. with an in-memory console.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&Observation) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<VantageClient> {
        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };
        let connector = match self.connector {
            Some(connector) => connector,
            None => Box::new(LinkConnector::new(self.link, self.timeout)),
        };

        Ok(VantageClient {
            connector,
            timeout: self.timeout,
            persistent: self.persistent,
            console: None,
            info: StationInfo::default(),
            rain_collector: None,
            last_data: Observation::default(),
            last_raw: RawRecord::default(),
            last_raw_hilows: RawRecord::default(),
            previous_json: Value::Object(Map::new()),
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
            logger,
        })
    }
}

/// Everything read from the console in one poll.
struct StationReading {
    current: LoopPacket,
    raw: RawRecord,
    hilows: Option<(HiLows, RawRecord)>,
    archives: Vec<ArchiveRecord>,
    archive_period: Option<u16>,
}

pub struct VantageClient {
    connector: Box<dyn Connector>,
    timeout: Duration,
    persistent: bool,
    console: Option<Console>,
    info: StationInfo,
    rain_collector: Option<RainCollector>,
    last_data: Observation,
    last_raw: RawRecord,
    last_raw_hilows: RawRecord,
    previous_json: Value,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    logger: Option<MessageLogger>,
}

/// Runs `$body` against an open console and releases the link afterwards.
macro_rules! with_console {
    ($client:ident, $console:ident => $body:expr) => {{
        let result = match $client.open().await {
            Ok($console) => $body,
            Err(e) => Err(e),
        };
        $client.release(result.is_err());
        result
    }};
}

impl VantageClient {
    pub fn builder(link: Link) -> VantageClientBuilder {
        VantageClientBuilder::new(link)
    }

    /// Human readable link, as used in error messages.
    pub fn link(&self) -> String {
        self.connector.describe()
    }

    pub fn station_info(&self) -> &StationInfo {
        &self.info
    }

    pub fn last_data(&self) -> &Observation {
        &self.last_data
    }

    pub fn rain_collector(&self) -> Option<RainCollector> {
        self.rain_collector
    }

    async fn open(&mut self) -> Result<&mut Console> {
        if self.console.is_none() {
            let io = self.connector.open().await?;
            self.console = Some(Console::new(io, self.timeout));
        }
        self.console.as_mut().ok_or(Error::NotConnected)
    }

    /// Drops the link unless it is persistent. A failed exchange always drops it.
    fn release(&mut self, failed: bool) {
        if (!self.persistent || failed) && self.console.take().is_some() {
            trace!(link = %self.connector.describe(), "link closed");
        }
    }

    /// Opens the link and checks that the console answers.
    pub async fn connect_to_station(&mut self) -> Result<()> {
        debug!(link = %self.connector.describe(), "connecting to station");
        let result = with_console!(self, console => console.test().await);
        if let Err(ref e) = result {
            error!(link = %self.connector.describe(), error = %e, "error opening station link");
        }
        result
    }

    /// Reads the firmware version, archive period and location once.
    /// Failures of individual reads are logged and keep the previous value.
    pub async fn refresh_station_info(&mut self) -> Result<&StationInfo> {
        let reads = match self.open().await {
            Ok(console) => {
                let version = console.firmware_version().await;
                let period = console.archive_period().await;
                let location = console.location().await;
                Ok((version, period, location))
            }
            Err(e) => Err(e),
        };
        let failed = !matches!(reads, Ok((Ok(_), Ok(_), Ok(_))));
        self.release(failed);
        let (version, period, location) = reads?;

        match version {
            Ok(v) => self.info.firmware_version = Some(v),
            Err(e) => error!(error = %e, "couldn't read firmware version"),
        }
        match period {
            Ok(p) => self.info.archive_period = Some(p),
            Err(e) => error!(error = %e, "couldn't read archive period"),
        }
        match location {
            Ok(loc) => {
                if loc.latitude != 0.0 {
                    self.info.location.latitude = loc.latitude;
                }
                if loc.longitude != 0.0 {
                    self.info.location.longitude = loc.longitude;
                }
                if loc.elevation != 0 {
                    self.info.location.elevation = loc.elevation;
                }
            }
            Err(e) => error!(error = %e, "couldn't read latitude, longitude and elevation"),
        }
        Ok(&self.info)
    }

    /// Firmware version and archive period.
    pub async fn static_info(&mut self) -> Result<StationInfo> {
        let result = with_console!(self, console => {
            match console.firmware_version().await {
                Ok(version) => console.archive_period().await.map(|p| (version, p)),
                Err(e) => Err(e),
            }
        });
        let (version, period) = result?;
        self.info.firmware_version = Some(version);
        self.info.archive_period = Some(period);
        Ok(self.info.clone())
    }

    pub async fn info(&mut self) -> Result<StationDetails> {
        let result = with_console!(self, console => read_details(console).await);
        if let Ok(ref details) = result {
            self.info.firmware_version = Some(details.version.clone());
            self.info.archive_period = Some(details.archive_period);
        }
        result
    }

    pub async fn davis_time(&mut self) -> Result<NaiveDateTime> {
        with_console!(self, console => console.time().await)
    }

    /// Sets the console clock to `time` (local time).
    pub async fn set_davis_time(&mut self, time: NaiveDateTime) -> Result<()> {
        self.log_command("set_davis_time", json!({ "time": time.to_string() }));
        with_console!(self, console => console.set_time(time).await)
    }

    pub async fn set_yearly_rain(&mut self, clicks: u16) -> Result<()> {
        self.log_command("set_yearly_rain", json!({ "rain_clicks": clicks }));
        with_console!(self, console => console.set_yearly_rain(clicks).await)
    }

    /// Changes the archive interval. The console erases its archive memory.
    pub async fn set_archive_period(&mut self, period: ArchivePeriod) -> Result<()> {
        self.log_command("set_archive_period", json!({ "archive_period": period.minutes() }));
        with_console!(self, console => console.set_archive_period(period).await)?;
        self.info.archive_period = Some(period.minutes());
        Ok(())
    }

    pub async fn read_rain_collector(&mut self) -> Result<Option<RainCollector>> {
        let collector = with_console!(self, console => console.rain_collector().await)?;
        self.rain_collector = collector;
        Ok(collector)
    }

    pub async fn set_rain_collector(&mut self, collector: RainCollector) -> Result<()> {
        self.log_command("set_rain_collector", json!({ "rain_collector": collector.label() }));
        with_console!(self, console => console.set_rain_collector(collector).await)?;
        self.rain_collector = Some(collector);
        Ok(())
    }

    pub async fn location(&mut self) -> Result<Location> {
        with_console!(self, console => console.location().await)
    }

    /// Last raw LOOP fields merged with the last raw HILOWS fields.
    pub fn raw_data(&self) -> Value {
        let mut raw = self.last_raw.clone();
        raw.merge(&self.last_raw_hilows);
        raw.to_json()
    }

    async fn read_station(&mut self) -> Result<StationReading> {
        let cached_period = self.info.archive_period;
        let console = self.open().await?;

        let (current, raw) = console.current_data().await?;

        let hilows = match console.hilows().await {
            Ok(h) => Some(h),
            Err(e) => {
                error!(error = %e, "couldn't get hilows");
                None
            }
        };

        let archive_period = match cached_period {
            Some(p) => Some(p),
            None => console
                .archive_period()
                .await
                .inspect_err(|e| warn!(error = %e, "couldn't read archive period"))
                .ok(),
        };

        let mut archives = Vec::new();
        if let Some(period) = archive_period {
            let since = Local::now().naive_local() - TimeDelta::minutes(2 * i64::from(period));
            match console.archives(since).await {
                Ok(records) => archives = records,
                Err(e) => debug!(error = %e, "couldn't get archives"),
            }
        }

        let rain_collector = console.rain_collector().await?;
        self.rain_collector = rain_collector;

        Ok(StationReading {
            current,
            raw,
            hilows,
            archives,
            archive_period,
        })
    }

    /// Polls the station and returns the refreshed observation.
    ///
    /// A failed poll keeps the previous values and only updates the error fields.
    pub async fn update(&mut self) -> &Observation {
        let started = Instant::now();
        let now = Local::now();

        let result = self.read_station().await;
        self.release(result.is_err());

        let mut data = match result {
            Ok(reading) => {
                if let Some(period) = reading.archive_period {
                    self.info.archive_period = Some(period);
                }
                let complete = reading.raw.is_complete();
                let mut data = build_observation(&reading, &self.info, self.rain_collector);
                self.last_raw = reading.raw;
                if let Some((_, raw_hilows)) = reading.hilows {
                    self.last_raw_hilows = raw_hilows;
                }

                data.datetime = Some(now);
                data.last_success_time = self.last_data.last_success_time;
                data.last_error_time = self.last_data.last_error_time;
                if complete {
                    data.last_success_time = Some(now);
                } else {
                    data.last_error = PARTIAL_DATA_ERROR.to_string();
                }
                data
            }
            Err(e) => {
                let link = self.connector.describe();
                error!(link = %link, error = %e, "couldn't acquire data");
                if let Some(ref mut logger) = self.logger {
                    logger.log_failure(&link, &e.to_string());
                }
                let mut data = self.last_data.clone();
                data.last_error = format!("Couldn't acquire data on {link}: {e}");
                data
            }
        };

        if !data.last_error.is_empty() {
            data.last_error_time = Some(now);
        }
        data.last_readout_duration = Some((started.elapsed().as_secs_f64() * 100.0).round() / 100.0);

        self.process_observation(data);
        &self.last_data
    }

    fn process_observation(&mut self, data: Observation) {
        let current = data.to_json();
        let events = observation_events(&self.previous_json, &current);

        if let Some(ref mut logger) = self.logger {
            logger.log_reading(&self.connector.describe(), &current);
        }

        for event in &events {
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
        for cb in &self.snapshot_callbacks {
            cb(&data);
        }

        self.previous_json = current;
        self.last_data = data;
    }

    fn log_command(&mut self, action: &str, body: Value) {
        debug!(action, %body, "station command");
        if let Some(ref mut logger) = self.logger {
            logger.log_command(action, &body);
        }
    }
}

async fn read_details(console: &mut Console) -> Result<StationDetails> {
    Ok(StationDetails {
        version: console.firmware_version().await?,
        date: console.firmware_date().await?,
        diagnostics: console.diagnostics().await?,
        archive_period: console.archive_period().await?,
    })
}

fn build_observation(
    reading: &StationReading,
    info: &StationInfo,
    rain_collector: Option<RainCollector>,
) -> Observation {
    let p = &reading.current;
    let mut data = Observation {
        temp_out: p.temp_out,
        temp_in: p.temp_in,
        hum_in: p.hum_in,
        hum_out: p.hum_out,
        barometer: p.barometer,
        wind_speed: p.wind_speed,
        wind_speed_10_min: p.wind_speed_10_min,
        wind_dir: p.wind_dir,
        rain_day: p.rain_day,
        rain_month: p.rain_month,
        rain_year: p.rain_year,
        rain_rate: p.rain_rate,
        rain_storm: p.rain_storm,
        storm_start_date: p.storm_start_date,
        et_day: p.et_day,
        et_month: p.et_month,
        et_year: p.et_year,
        uv: p.uv.map(|v| (v * 10.0).round() / 10.0),
        solar_rad: p.solar_rad,
        bar_trend: p.bar_trend.and_then(|b| BarTrend::from_code(i16::from(b))),
        battery_status: p.battery_status,
        battery_volts: p.battery_volts,
        forecast_icon: p.forecast_icon,
        forecast_rule_no: p.forecast_rule_no,
        forecast: p.forecast_rule_no.map(|r| forecast_text(r).to_string()),
        sun_rise: p.sun_rise,
        sun_set: p.sun_set,
        rain_collector,
        archive_interval: reading.archive_period,
        latitude: Some(info.location.latitude),
        longitude: Some(info.location.longitude),
        elevation: Some(info.location.elevation),
        probes: p.probes.clone(),
        ..Default::default()
    };

    add_derived_values(&mut data);
    add_archive_values(&mut data, &reading.archives);
    if let Some((hilows, _)) = &reading.hilows {
        add_hilows(&mut data, hilows);
    }
    correct_rain_values(&mut data);
    data
}

pub(crate) fn add_derived_values(data: &mut Observation) {
    if let Some(temp) = data.temp_out {
        if let Some(hum) = data.hum_out.map(f64::from) {
            data.heat_index = Some(weather::heat_index(temp, hum));
            data.dew_point = weather::dew_point(temp, hum);
        }
        if let Some(wind) = data.wind_speed {
            data.wind_chill = Some(weather::wind_chill(temp, wind));
            if let Some(hum) = data.hum_out.map(f64::from) {
                data.feels_like = Some(weather::feels_like(temp, hum, wind));
            }
        }
    }
    data.wind_dir_rose = data.wind_dir.map(|d| WindRose::from_bearing(f64::from(d)));
    data.wind_speed_bft = data
        .wind_speed_10_min
        .map(|w| weather::kmh_to_beaufort(weather::mph_to_kmh(w)));
    data.is_raining = data.rain_rate.map(|r| r > 0.0);
}

/// Gust and average wind from the newest archive record.
pub(crate) fn add_archive_values(data: &mut Observation, archives: &[ArchiveRecord]) {
    let Some(last) = archives.last() else {
        return;
    };
    data.wind_gust = last.wind_hi;
    data.wind_speed_avg = last.wind_avg;
    data.wind_avg_dir = last.wind_avg_bearing();
    data.wind_avg_dir_rose = data.wind_avg_dir.map(WindRose::from_bearing);
}

pub(crate) fn add_hilows(data: &mut Observation, hilows: &HiLows) {
    data.temp_out_hi_day = hilows.temp_hi_day;
    data.temp_out_hi_time = hilows.temp_hi_time;
    data.temp_out_low_day = hilows.temp_lo_day;
    data.temp_out_low_time = hilows.temp_lo_time;

    data.dew_point_hi_day = hilows.dew_hi_day;
    data.dew_point_hi_time = hilows.dew_hi_time;
    data.dew_point_low_day = hilows.dew_lo_day;
    data.dew_point_low_time = hilows.dew_lo_time;

    data.rain_rate_day = hilows.rain_hi_day;
    data.rain_rate_time = hilows.rain_hi_time;

    data.barometer_hi_day = hilows.baro_hi_day;
    data.barometer_hi_time = hilows.baro_hi_time;
    data.barometer_low_day = hilows.baro_lo_day;
    data.barometer_lo_time = hilows.baro_lo_time;

    data.solar_rad_day = hilows.solar_hi_day;
    data.solar_rad_time = hilows.solar_hi_time;

    data.uv_day = hilows.uv_hi_day;
    data.uv_time = hilows.uv_hi_time;

    data.wind_gust_day = hilows.wind_hi_day;
    data.wind_gust_time = hilows.wind_hi_time;
}

/// Rescales rain values, which the console reports in 0.01" clicks, for metric buckets.
pub(crate) fn correct_rain_values(data: &mut Observation) {
    let factor = data.rain_collector.map_or(1.0, |rc| rc.inch_factor());
    for value in [
        &mut data.rain_day,
        &mut data.rain_month,
        &mut data.rain_year,
        &mut data.rain_rate,
        &mut data.rain_storm,
        &mut data.rain_rate_day,
    ] {
        if let Some(v) = value.as_mut() {
            *v *= factor;
        }
    }
}
