//! Binary record layouts of the Vantage console.
//!
//! Every record is first decoded into a [`RawRecord`] holding the untouched
//! integers keyed by field name. Typed records are then built from the raw
//! view, treating the console's "no data" sentinels as missing values.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use nom::bytes::complete::{tag, take};
use nom::number::complete::{le_i16, le_u16, le_u8};
use nom::IResult;
use serde_json::{Map, Value};

use crate::protocol::{check_crc, decode_archive_date, decode_hhmm, decode_storm_date, to_hex};
use crate::{Error, Result};

pub const LOOP_PACKET_LEN: usize = 99;
pub const HILOWS_LEN: usize = 436;
pub const ARCHIVE_RECORD_LEN: usize = 52;
pub const ARCHIVE_PAGE_LEN: usize = 267;
pub const RECORDS_PER_PAGE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    U8,
    U16,
    I16,
    Bytes(usize),
    /// Run of `u8` probes, stored as `Name01..NameNN`.
    Array(usize),
    Skip(usize),
}

type Layout = &'static [(&'static str, FieldKind)];

use FieldKind::*;

// Starts after the "LOO" header.
const LOOP_LAYOUT: Layout = &[
    ("BarTrend", U8),
    ("PacketType", U8),
    ("NextRec", U16),
    ("Barometer", U16),
    ("TempIn", I16),
    ("HumIn", U8),
    ("TempOut", I16),
    ("WindSpeed", U8),
    ("WindSpeed10Min", U8),
    ("WindDir", U16),
    ("ExtraTemps", Array(7)),
    ("SoilTemps", Array(4)),
    ("LeafTemps", Array(4)),
    ("HumOut", U8),
    ("HumExtra", Array(7)),
    ("RainRate", U16),
    ("UV", U8),
    ("SolarRad", I16),
    ("RainStorm", U16),
    ("StormStartDate", U16),
    ("RainDay", U16),
    ("RainMonth", U16),
    ("RainYear", U16),
    ("ETDay", U16),
    ("ETMonth", U16),
    ("ETYear", U16),
    ("SoilMoist", Array(4)),
    ("LeafWetness", Array(4)),
    ("AlarmIn", U8),
    ("AlarmRain", U8),
    ("AlarmOut", Bytes(2)),
    ("AlarmExTempHum", Bytes(8)),
    ("AlarmSoilLeaf", Bytes(4)),
    ("BatteryStatus", U8),
    ("BatteryVolts", U16),
    ("ForecastIcon", U8),
    ("ForecastRuleNo", U8),
    ("SunRise", U16),
    ("SunSet", U16),
    ("EOL", Bytes(2)),
];

const HILOWS_LAYOUT: Layout = &[
    ("BaroLoDay", U16),
    ("BaroHiDay", U16),
    ("BaroLoMonth", U16),
    ("BaroHiMonth", U16),
    ("BaroLoYear", U16),
    ("BaroHiYear", U16),
    ("BaroLoTime", U16),
    ("BaroHiTime", U16),
    ("WindHiDay", U8),
    ("WindHiTime", U16),
    ("WindHiMonth", U8),
    ("WindHiYear", U8),
    ("InTempHiDay", I16),
    ("InTempLoDay", I16),
    ("InTempHiTime", U16),
    ("InTempLoTime", U16),
    ("InTempLoMonth", I16),
    ("InTempHiMonth", I16),
    ("InTempLoYear", I16),
    ("InTempHiYear", I16),
    ("InHumHiDay", U8),
    ("InHumLoDay", U8),
    ("InHumHiTime", U16),
    ("InHumLoTime", U16),
    ("InHumHiMonth", U8),
    ("InHumLoMonth", U8),
    ("InHumHiYear", U8),
    ("InHumLoYear", U8),
    ("TempLoDay", I16),
    ("TempHiDay", I16),
    ("TempLoTime", U16),
    ("TempHiTime", U16),
    ("TempHiMonth", I16),
    ("TempLoMonth", I16),
    ("TempHiYear", I16),
    ("TempLoYear", I16),
    ("DewLoDay", I16),
    ("DewHiDay", I16),
    ("DewLoTime", U16),
    ("DewHiTime", U16),
    ("DewHiMonth", I16),
    ("DewLoMonth", I16),
    ("DewHiYear", I16),
    ("DewLoYear", I16),
    ("ChillLoDay", I16),
    ("ChillLoTime", U16),
    ("ChillLoMonth", I16),
    ("ChillLoYear", I16),
    ("HeatHiDay", I16),
    ("HeatHiTime", U16),
    ("HeatHiMonth", I16),
    ("HeatHiYear", I16),
    ("THSWHiDay", I16),
    ("THSWHiTime", U16),
    ("THSWHiMonth", I16),
    ("THSWHiYear", I16),
    ("SolarHiDay", U16),
    ("SolarHiTime", U16),
    ("SolarHiMonth", U16),
    ("SolarHiYear", U16),
    ("UVHiDay", U8),
    ("UVHiTime", U16),
    ("UVHiMonth", U8),
    ("UVHiYear", U8),
    ("RainHiDay", U16),
    ("RainHiTime", U16),
    ("RainHiHour", U16),
    ("RainHiMonth", U16),
    ("RainHiYear", U16),
    // extra temperature, humidity, soil and leaf extremes
    ("Extras", Skip(310)),
];

const ARCHIVE_LAYOUT: Layout = &[
    ("DateStamp", U16),
    ("TimeStamp", U16),
    ("TempOut", I16),
    ("TempOutHi", I16),
    ("TempOutLow", I16),
    ("RainFall", U16),
    ("RainRateHi", U16),
    ("Barometer", U16),
    ("SolarRad", I16),
    ("WindSamps", U16),
    ("TempIn", I16),
    ("HumIn", U8),
    ("HumOut", U8),
    ("WindAvg", U8),
    ("WindHi", U8),
    ("WindHiDir", U8),
    ("WindAvgDir", U8),
    ("UV", U8),
    ("ETHour", U8),
    ("SolarRadHi", I16),
    ("UVHi", U8),
    ("ForecastRuleNo", U8),
    ("LeafTemps", Array(2)),
    ("LeafWetness", Array(2)),
    ("SoilTemps", Array(4)),
    ("RecType", U8),
    ("HumExtra", Array(2)),
    ("ExtraTemps", Array(3)),
    ("SoilMoist", Array(4)),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    U8(u8),
    U16(u16),
    I16(i16),
    Bytes(Vec<u8>),
}

impl RawValue {
    /// The console's "no data" markers.
    pub fn is_missing(&self) -> bool {
        match self {
            RawValue::U8(v) => *v == u8::MAX,
            RawValue::U16(v) => *v == u16::MAX,
            RawValue::I16(v) => v.unsigned_abs() == 32767 || *v == i16::MIN,
            RawValue::Bytes(_) => false,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::U8(v) => Some(f64::from(*v)),
            RawValue::U16(v) => Some(f64::from(*v)),
            RawValue::I16(v) => Some(f64::from(*v)),
            RawValue::Bytes(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            RawValue::U8(v) => Value::from(*v),
            RawValue::U16(v) => Value::from(*v),
            RawValue::I16(v) => Value::from(*v),
            RawValue::Bytes(b) => Value::from(to_hex(b)),
        }
    }
}

/// Undecoded record fields keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.fields.get(key)
    }

    /// Numeric value of `key`, `None` when absent or a sentinel.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields
            .get(key)
            .filter(|v| !v.is_missing())
            .and_then(RawValue::as_f64)
    }

    pub fn scaled(&self, key: &str, divisor: f64) -> Option<f64> {
        self.number(key).map(|v| v / divisor)
    }

    pub fn u8(&self, key: &str) -> Option<u8> {
        match self.fields.get(key) {
            Some(RawValue::U8(b)) if *b != u8::MAX => Some(*b),
            _ => None,
        }
    }

    pub fn u16(&self, key: &str) -> Option<u16> {
        match self.fields.get(key) {
            Some(RawValue::U16(w)) if *w != u16::MAX => Some(*w),
            _ => None,
        }
    }

    fn time(&self, key: &str) -> Option<NaiveTime> {
        self.u16(key).and_then(decode_hhmm)
    }

    /// True when none of the core outdoor readings carry a sentinel.
    pub fn is_complete(&self) -> bool {
        let raw_is = |key: &str, sentinel: i64| match self.fields.get(key) {
            Some(RawValue::U8(v)) => i64::from(*v) != sentinel,
            Some(RawValue::U16(v)) => i64::from(*v) != sentinel,
            Some(RawValue::I16(v)) => i64::from(*v) != sentinel,
            _ => false,
        };
        raw_is("TempOut", 32767)
            && raw_is("RainRate", 32767)
            && raw_is("WindSpeed", 255)
            && raw_is("HumOut", 255)
            && raw_is("WindSpeed10Min", 255)
    }

    pub fn merge(&mut self, other: &RawRecord) {
        self.fields
            .extend(other.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }

    fn probes(&self, prefix: &str, convert: impl Fn(f64) -> f64) -> Vec<(String, Option<f64>)> {
        self.fields
            .keys()
            .filter(|k| {
                k.strip_prefix(prefix)
                    .is_some_and(|n| n.len() == 2 && n.bytes().all(|b| b.is_ascii_digit()))
            })
            .map(|k| (k.clone(), self.number(k).map(&convert)))
            .collect()
    }
}

fn u8_field(input: &[u8]) -> IResult<&[u8], u8> {
    le_u8(input)
}

fn u16_field(input: &[u8]) -> IResult<&[u8], u16> {
    le_u16(input)
}

fn i16_field(input: &[u8]) -> IResult<&[u8], i16> {
    le_i16(input)
}

fn bytes_field(input: &[u8], n: usize) -> IResult<&[u8], &[u8]> {
    take(n)(input)
}

fn loop_header(input: &[u8]) -> IResult<&[u8], &[u8]> {
    tag(&b"LOO"[..])(input)
}

fn parse_layout(mut input: &[u8], layout: Layout) -> IResult<&[u8], RawRecord> {
    let mut record = RawRecord::default();
    for &(name, kind) in layout {
        input = match kind {
            U8 => {
                let (rest, v) = u8_field(input)?;
                record.fields.insert(name.to_string(), RawValue::U8(v));
                rest
            }
            U16 => {
                let (rest, v) = u16_field(input)?;
                record.fields.insert(name.to_string(), RawValue::U16(v));
                rest
            }
            I16 => {
                let (rest, v) = i16_field(input)?;
                record.fields.insert(name.to_string(), RawValue::I16(v));
                rest
            }
            Bytes(n) => {
                let (rest, v) = bytes_field(input, n)?;
                record.fields.insert(name.to_string(), RawValue::Bytes(v.to_vec()));
                rest
            }
            Array(n) => {
                let (rest, v) = bytes_field(input, n)?;
                for (i, b) in v.iter().enumerate() {
                    record
                        .fields
                        .insert(format!("{name}{:02}", i + 1), RawValue::U8(*b));
                }
                rest
            }
            Skip(n) => bytes_field(input, n)?.0,
        };
    }
    Ok((input, record))
}

fn run_layout(input: &[u8], layout: Layout, what: &str) -> Result<RawRecord> {
    parse_layout(input, layout)
        .map(|(_, record)| record)
        .map_err(|e| Error::Parse(format!("{what}: {e}")))
}

/// Decoded LOOP packet in station units. Rain values assume 0.01" clicks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoopPacket {
    pub bar_trend: Option<u8>,
    pub next_record: Option<u16>,
    pub barometer: Option<f64>,
    pub temp_in: Option<f64>,
    pub hum_in: Option<u8>,
    pub temp_out: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_speed_10_min: Option<f64>,
    pub wind_dir: Option<u16>,
    pub hum_out: Option<u8>,
    pub rain_rate: Option<f64>,
    pub uv: Option<f64>,
    pub solar_rad: Option<f64>,
    pub rain_storm: Option<f64>,
    pub storm_start_date: Option<NaiveDate>,
    pub rain_day: Option<f64>,
    pub rain_month: Option<f64>,
    pub rain_year: Option<f64>,
    pub et_day: Option<f64>,
    pub et_month: Option<f64>,
    pub et_year: Option<f64>,
    pub battery_status: Option<u8>,
    pub battery_volts: Option<f64>,
    pub forecast_icon: Option<u8>,
    pub forecast_rule_no: Option<u8>,
    pub sun_rise: Option<NaiveTime>,
    pub sun_set: Option<NaiveTime>,
    /// Extra probes keyed `ExtraTemps01`, `HumExtra01`, `SoilTemps01`, ...
    pub probes: BTreeMap<String, Option<f64>>,
}

impl LoopPacket {
    fn from_raw(raw: &RawRecord) -> Self {
        let mut probes = BTreeMap::new();
        // temperature probes carry a +90 °F offset
        for prefix in ["ExtraTemps", "SoilTemps", "LeafTemps"] {
            probes.extend(raw.probes(prefix, |v| v - 90.0));
        }
        for prefix in ["HumExtra", "SoilMoist", "LeafWetness"] {
            probes.extend(raw.probes(prefix, |v| v));
        }

        Self {
            bar_trend: raw.u8("BarTrend"),
            next_record: raw.u16("NextRec"),
            barometer: raw.scaled("Barometer", 1000.0),
            temp_in: raw.scaled("TempIn", 10.0),
            hum_in: raw.u8("HumIn"),
            temp_out: raw.scaled("TempOut", 10.0),
            wind_speed: raw.number("WindSpeed"),
            wind_speed_10_min: raw.number("WindSpeed10Min"),
            wind_dir: raw.u16("WindDir"),
            hum_out: raw.u8("HumOut"),
            rain_rate: raw.scaled("RainRate", 100.0),
            uv: raw.scaled("UV", 10.0),
            solar_rad: raw.number("SolarRad"),
            rain_storm: raw.scaled("RainStorm", 100.0),
            storm_start_date: raw.u16("StormStartDate").and_then(decode_storm_date),
            rain_day: raw.scaled("RainDay", 100.0),
            rain_month: raw.scaled("RainMonth", 100.0),
            rain_year: raw.scaled("RainYear", 100.0),
            et_day: raw.scaled("ETDay", 1000.0),
            et_month: raw.scaled("ETMonth", 100.0),
            et_year: raw.scaled("ETYear", 100.0),
            battery_status: raw.u8("BatteryStatus"),
            battery_volts: raw.number("BatteryVolts").map(|v| v * 300.0 / 512.0 / 100.0),
            forecast_icon: raw.u8("ForecastIcon"),
            forecast_rule_no: raw.u8("ForecastRuleNo"),
            sun_rise: raw.time("SunRise"),
            sun_set: raw.time("SunSet"),
            probes,
        }
    }
}

pub fn parse_loop(data: &[u8]) -> Result<(LoopPacket, RawRecord)> {
    if data.len() != LOOP_PACKET_LEN {
        return Err(Error::Parse(format!(
            "loop packet has {} bytes, expected {LOOP_PACKET_LEN}",
            data.len()
        )));
    }
    if !check_crc(data) {
        return Err(Error::Crc("loop packet"));
    }
    let (body, _) =
        loop_header(data).map_err(|e| Error::Parse(format!("loop header: {e}")))?;
    let raw = run_layout(body, LOOP_LAYOUT, "loop packet")?;
    Ok((LoopPacket::from_raw(&raw), raw))
}

/// Daily extremes from the HILOWS block, in station units.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HiLows {
    pub baro_hi_day: Option<f64>,
    pub baro_hi_time: Option<NaiveTime>,
    pub baro_lo_day: Option<f64>,
    pub baro_lo_time: Option<NaiveTime>,
    pub wind_hi_day: Option<f64>,
    pub wind_hi_time: Option<NaiveTime>,
    pub temp_hi_day: Option<f64>,
    pub temp_hi_time: Option<NaiveTime>,
    pub temp_lo_day: Option<f64>,
    pub temp_lo_time: Option<NaiveTime>,
    pub dew_hi_day: Option<f64>,
    pub dew_hi_time: Option<NaiveTime>,
    pub dew_lo_day: Option<f64>,
    pub dew_lo_time: Option<NaiveTime>,
    pub solar_hi_day: Option<f64>,
    pub solar_hi_time: Option<NaiveTime>,
    pub uv_hi_day: Option<f64>,
    pub uv_hi_time: Option<NaiveTime>,
    pub rain_hi_day: Option<f64>,
    pub rain_hi_time: Option<NaiveTime>,
}

impl HiLows {
    fn from_raw(raw: &RawRecord) -> Self {
        Self {
            baro_hi_day: raw.scaled("BaroHiDay", 1000.0),
            baro_hi_time: raw.time("BaroHiTime"),
            baro_lo_day: raw.scaled("BaroLoDay", 1000.0),
            baro_lo_time: raw.time("BaroLoTime"),
            wind_hi_day: raw.number("WindHiDay"),
            wind_hi_time: raw.time("WindHiTime"),
            temp_hi_day: raw.scaled("TempHiDay", 10.0),
            temp_hi_time: raw.time("TempHiTime"),
            temp_lo_day: raw.scaled("TempLoDay", 10.0),
            temp_lo_time: raw.time("TempLoTime"),
            dew_hi_day: raw.number("DewHiDay"),
            dew_hi_time: raw.time("DewHiTime"),
            dew_lo_day: raw.number("DewLoDay"),
            dew_lo_time: raw.time("DewLoTime"),
            solar_hi_day: raw.number("SolarHiDay"),
            solar_hi_time: raw.time("SolarHiTime"),
            uv_hi_day: raw.scaled("UVHiDay", 10.0),
            uv_hi_time: raw.time("UVHiTime"),
            rain_hi_day: raw.scaled("RainHiDay", 100.0),
            rain_hi_time: raw.time("RainHiTime"),
        }
    }
}

/// Parses the HILOWS block including its trailing CRC.
pub fn parse_hilows(data: &[u8]) -> Result<(HiLows, RawRecord)> {
    if data.len() != HILOWS_LEN + 2 {
        return Err(Error::Parse(format!(
            "hilows block has {} bytes, expected {}",
            data.len(),
            HILOWS_LEN + 2
        )));
    }
    if !check_crc(data) {
        return Err(Error::Crc("hilows block"));
    }
    let raw = run_layout(&data[..HILOWS_LEN], HILOWS_LAYOUT, "hilows block")?;
    Ok((HiLows::from_raw(&raw), raw))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRecord {
    pub timestamp: NaiveDateTime,
    pub temp_out: Option<f64>,
    pub temp_out_hi: Option<f64>,
    pub temp_out_low: Option<f64>,
    pub rain_fall: Option<f64>,
    pub rain_rate_hi: Option<f64>,
    pub barometer: Option<f64>,
    pub solar_rad: Option<f64>,
    pub temp_in: Option<f64>,
    pub hum_in: Option<u8>,
    pub hum_out: Option<u8>,
    pub wind_avg: Option<f64>,
    pub wind_hi: Option<f64>,
    /// Compass index 0..15.
    pub wind_hi_dir: Option<u8>,
    /// Prevailing direction as a compass index 0..15.
    pub wind_avg_dir: Option<u8>,
    pub uv: Option<f64>,
    pub forecast_rule_no: Option<u8>,
}

impl ArchiveRecord {
    fn from_raw(raw: &RawRecord) -> Option<Self> {
        let date = raw.u16("DateStamp").and_then(decode_archive_date)?;
        let time = raw.u16("TimeStamp").and_then(decode_hhmm)?;
        Some(Self {
            timestamp: NaiveDateTime::new(date, time),
            temp_out: raw.scaled("TempOut", 10.0),
            temp_out_hi: raw.scaled("TempOutHi", 10.0),
            temp_out_low: raw.scaled("TempOutLow", 10.0),
            rain_fall: raw.scaled("RainFall", 100.0),
            rain_rate_hi: raw.scaled("RainRateHi", 100.0),
            barometer: raw.scaled("Barometer", 1000.0),
            solar_rad: raw.number("SolarRad"),
            temp_in: raw.scaled("TempIn", 10.0),
            hum_in: raw.u8("HumIn"),
            hum_out: raw.u8("HumOut"),
            wind_avg: raw.number("WindAvg"),
            wind_hi: raw.number("WindHi"),
            wind_hi_dir: raw.u8("WindHiDir").filter(|d| *d < 16),
            wind_avg_dir: raw.u8("WindAvgDir").filter(|d| *d < 16),
            uv: raw.scaled("UV", 10.0),
            forecast_rule_no: raw.u8("ForecastRuleNo"),
        })
    }

    /// Prevailing direction in degrees.
    pub fn wind_avg_bearing(&self) -> Option<f64> {
        self.wind_avg_dir.map(|d| f64::from(d) * 22.5)
    }
}

/// Decodes one 52-byte archive record. Unused slots (erased flash) yield `None`.
pub fn parse_archive_record(data: &[u8]) -> Result<Option<ArchiveRecord>> {
    if data.len() != ARCHIVE_RECORD_LEN {
        return Err(Error::Parse(format!(
            "archive record has {} bytes, expected {ARCHIVE_RECORD_LEN}",
            data.len()
        )));
    }
    let raw = run_layout(data, ARCHIVE_LAYOUT, "archive record")?;
    Ok(ArchiveRecord::from_raw(&raw))
}

/// Splits a DMPAFT page into its sequence number and record slots.
pub fn parse_archive_page(page: &[u8]) -> Result<(u8, Vec<&[u8]>)> {
    if page.len() != ARCHIVE_PAGE_LEN {
        return Err(Error::Parse(format!(
            "archive page has {} bytes, expected {ARCHIVE_PAGE_LEN}",
            page.len()
        )));
    }
    if !check_crc(page) {
        return Err(Error::Crc("archive page"));
    }
    let records = page[1..1 + RECORDS_PER_PAGE * ARCHIVE_RECORD_LEN]
        .chunks_exact(ARCHIVE_RECORD_LEN)
        .collect();
    Ok((page[0], records))
}
