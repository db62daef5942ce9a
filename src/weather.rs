//! Unit conversions and derived weather values.
//!
//! Inputs are in station units: °F, mph, percent relative humidity, inHg.

fn round1(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    round1((f - 32.0) * (5.0 / 9.0))
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    round1(c * 1.8 + 32.0)
}

pub fn mph_to_kmh(mph: f64) -> f64 {
    round1(mph * 1.609344)
}

pub fn kmh_to_ms(kmh: f64) -> f64 {
    round1(kmh / 3.6)
}

pub fn mph_to_ms(mph: f64) -> f64 {
    kmh_to_ms(mph_to_kmh(mph))
}

pub fn inhg_to_mbar(inhg: f64) -> f64 {
    round1(inhg * 33.8637526)
}

/// Millimetres for a metric tipping bucket modification.
pub fn inches_to_mm(inches: f64) -> f64 {
    round1(inches * 20.0)
}

const BEAUFORT_LIMITS_MS: [f64; 12] = [
    0.2, 1.6, 3.4, 5.5, 8.0, 10.8, 13.9, 17.2, 20.8, 24.5, 28.5, 32.7,
];

pub fn ms_to_beaufort(ms: f64) -> u8 {
    BEAUFORT_LIMITS_MS
        .iter()
        .position(|limit| ms < *limit)
        .unwrap_or(BEAUFORT_LIMITS_MS.len()) as u8
}

pub fn kmh_to_beaufort(kmh: f64) -> u8 {
    ms_to_beaufort(kmh_to_ms(kmh))
}

/// Rothfusz regression.
fn rothfusz(t: f64, rh: f64) -> f64 {
    -42.379 + 2.04901523 * t + 10.14333127 * rh
        - 0.22475541 * t * rh
        - 0.00683783 * t.powi(2)
        - 0.05481717 * rh.powi(2)
        + 0.00122874 * t.powi(2) * rh
        + 0.00085282 * t * rh.powi(2)
        - 0.00000199 * t.powi(2) * rh.powi(2)
}

/// Heat index in °F, never below the air temperature.
pub fn heat_index(temp_f: f64, humidity: f64) -> f64 {
    if temp_f < 80.0 || humidity < 40.0 {
        return temp_f;
    }
    rothfusz(temp_f, humidity).max(temp_f)
}

fn chill_formula(temp_f: f64, wind_mph: f64) -> f64 {
    let v = wind_mph.powf(0.16);
    35.74 + 0.6215 * temp_f - 35.75 * v + 0.4275 * temp_f * v
}

/// Wind chill in °F, never above the air temperature.
pub fn wind_chill(temp_f: f64, wind_mph: f64) -> f64 {
    if wind_mph == 0.0 {
        return temp_f;
    }
    chill_formula(temp_f, wind_mph).min(temp_f)
}

/// Apparent temperature in °F combining wind chill and heat index.
pub fn feels_like(temp_f: f64, humidity: f64, wind_mph: f64) -> f64 {
    let wind_mph = if wind_mph == 0.0 { 1.0 } else { wind_mph };
    let mut fl = temp_f;
    if temp_f <= 50.0 && humidity >= 3.0 {
        fl = chill_formula(temp_f, wind_mph);
    }
    if fl == temp_f && temp_f >= 80.0 {
        fl = 0.5 * (temp_f + 61.0 + (temp_f - 68.0) * 1.2 + humidity * 0.094);
    }
    if fl >= 80.0 {
        fl = rothfusz(temp_f, humidity);
    }
    if humidity < 13.0 && (80.0..=112.0).contains(&temp_f) {
        fl -= ((13.0 - humidity) / 4.0) * ((17.0 - (temp_f - 95.0).abs()) / 17.0).sqrt();
    }
    if humidity > 85.0 && (80.0..=87.0).contains(&temp_f) {
        fl += ((humidity - 85.0) / 10.0) * ((87.0 - temp_f) / 5.0);
    }
    fl
}

/// Magnus dew point in °F. Undefined at zero humidity.
pub fn dew_point(temp_f: f64, humidity: f64) -> Option<f64> {
    if humidity <= 0.0 {
        return None;
    }
    let t = fahrenheit_to_celsius(temp_f);
    let a = (humidity / 100.0).ln() + 17.62 * t / (243.12 + t);
    Some(celsius_to_fahrenheit(243.12 * a / (17.62 - a)))
}
