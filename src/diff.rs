use serde_json::Value;

use crate::forecast::forecast_text;
use crate::types::*;

/// Keys that change on every poll and would only add noise as events.
const VOLATILE_KEYS: &[&str] = &[
    "Datetime",
    "LastSuccessTime",
    "LastErrorTime",
    "LastReadoutDuration",
];

/// Keys reported only through their typed event.
const TYPED_KEYS: &[&str] = &["TempOut", "IsRaining", "BarTrend", "ForecastRuleNo", "LastError"];

pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None if curr_val.is_object() => {
                        diff_json(&Value::Object(Default::default()), curr_val, &path, changes)
                    }
                    None => changes.push((path, Value::Null, curr_val.clone())),
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

pub(crate) fn map_typed_event(
    key: &str,
    old_value: &Value,
    new_value: &Value,
    current: &Value,
) -> Option<Event> {
    match key {
        "TempOut" => Some(Event::OutsideTemperatureChanged {
            temp_f: new_value.as_f64()?,
        }),
        "IsRaining" => match new_value.as_bool()? {
            true => Some(Event::RainStarted),
            false if old_value.as_bool() == Some(true) => Some(Event::RainStopped),
            false => None,
        },
        "BarTrend" => Some(Event::BarTrendChanged {
            trend: serde_json::from_value(new_value.clone()).ok(),
        }),
        "ForecastRuleNo" => {
            let rule = u8::try_from(new_value.as_u64()?).ok()?;
            let text = current
                .get("Forecast")
                .and_then(Value::as_str)
                .unwrap_or_else(|| forecast_text(rule));
            Some(Event::ForecastChanged {
                rule,
                text: text.to_string(),
            })
        }
        "LastError" => match new_value.as_str()? {
            "" if old_value.as_str().is_some_and(|s| !s.is_empty()) => {
                Some(Event::StationRecovered)
            }
            "" => None,
            message => Some(Event::StationError {
                message: message.to_string(),
            }),
        },
        _ => None,
    }
}

pub(crate) fn generic_event(key: &str, value: &Value) -> Option<Event> {
    if VOLATILE_KEYS.contains(&key) {
        return None;
    }
    match value {
        Value::Number(n) => Some(Event::Numeric {
            key: key.to_string(),
            value: n.as_f64()?,
        }),
        Value::String(s) => Some(Event::Text {
            key: key.to_string(),
            value: s.clone(),
        }),
        Value::Bool(b) => Some(Event::Bool {
            key: key.to_string(),
            value: *b,
        }),
        _ => None,
    }
}

/// Events for everything that changed between two serialized observations.
pub(crate) fn observation_events(previous: &Value, current: &Value) -> Vec<Event> {
    let mut changes = Vec::new();
    diff_json(previous, current, "", &mut changes);
    changes
        .iter()
        .filter_map(|(key, old, new)| {
            if TYPED_KEYS.contains(&key.as_str()) {
                map_typed_event(key, old, new, current)
            } else {
                generic_event(key, new)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_detects_leaf_change() {
        let prev = json!({"TempOut": 71.0});
        let curr = json!({"TempOut": 72.0});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "TempOut");
        assert_eq!(changes[0].1, json!(71.0));
        assert_eq!(changes[0].2, json!(72.0));
    }

    #[test]
    fn diff_ignores_unchanged() {
        let val = json!({"TempOut": 71.0, "HumOut": 45});
        let mut changes = vec![];
        diff_json(&val, &val, "", &mut changes);
        assert!(changes.is_empty());
    }

    #[test]
    fn rain_start_and_stop() {
        let dry = json!({"IsRaining": false});
        let wet = json!({"IsRaining": true});
        assert_eq!(observation_events(&dry, &wet), vec![Event::RainStarted]);
        assert_eq!(observation_events(&wet, &dry), vec![Event::RainStopped]);
        // first reading of a dry day is not a stop
        assert!(observation_events(&json!({}), &dry).is_empty());
    }

    #[test]
    fn bar_trend_to_unknown() {
        let prev = json!({"BarTrend": "steady"});
        let curr = json!({"BarTrend": null});
        assert_eq!(
            observation_events(&prev, &curr),
            vec![Event::BarTrendChanged { trend: None }]
        );
        let events = observation_events(&curr, &json!({"BarTrend": "rising_slowly"}));
        assert_eq!(
            events,
            vec![Event::BarTrendChanged {
                trend: Some(BarTrend::RisingSlowly)
            }]
        );
    }

    #[test]
    fn forecast_change_carries_text() {
        let curr = json!({"ForecastRuleNo": 0, "Forecast": "Mostly clear and cooler."});
        let events = observation_events(&json!({"ForecastRuleNo": 44}), &curr);
        assert!(events.contains(&Event::ForecastChanged {
            rule: 0,
            text: "Mostly clear and cooler.".into()
        }));
    }

    #[test]
    fn error_then_recovery() {
        let ok = json!({"LastError": ""});
        let failed = json!({"LastError": "Received partly incorrect data"});
        assert_eq!(
            observation_events(&ok, &failed),
            vec![Event::StationError {
                message: "Received partly incorrect data".into()
            }]
        );
        assert_eq!(observation_events(&failed, &ok), vec![Event::StationRecovered]);
        assert!(observation_events(&json!({}), &ok).is_empty());
    }

    #[test]
    fn volatile_keys_suppressed() {
        assert!(generic_event("Datetime", &json!("2024-06-01T10:00:00+02:00")).is_none());
        match generic_event("HumOut", &json!(61)) {
            Some(Event::Numeric { key, value }) => {
                assert_eq!(key, "HumOut");
                assert_eq!(value, 61.0);
            }
            other => panic!("expected Numeric, got {other:?}"),
        }
    }
}
