mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Datelike, Local, NaiveTime};
use common::*;
use davis_vantage::services::{self, ServiceCall, DAVIS_TIME_ERROR, INFO_ERROR};
use davis_vantage::{
    forecast_text, BarTrend, Connector, Console, Coordinator, Error, Event, RainCollector,
    WindRose, PARTIAL_DATA_ERROR,
};
use serde_json::json;

#[tokio::test]
async fn poll_builds_observation() {
    let connector = FakeConnector::new(StationState::default());
    let mut client = client_for(&connector);

    let info = client.refresh_station_info().await.unwrap().clone();
    assert_eq!(info.firmware_version.as_deref(), Some("3.12"));
    assert_eq!(info.archive_period, Some(5));
    assert_eq!(info.location.latitude, 52.3);
    assert_eq!(info.location.longitude, 4.9);
    assert_eq!(info.location.elevation, 10);

    let data = client.update().await.clone();
    assert_eq!(data.last_error, "");
    assert!(data.datetime.is_some());
    assert!(data.last_success_time.is_some());
    assert_eq!(data.last_error_time, None);
    assert!(data.last_readout_duration.is_some());

    assert_eq!(data.temp_out, Some(85.0));
    assert_eq!(data.temp_in, Some(71.3));
    assert_eq!(data.hum_out, Some(60));
    assert_eq!(data.barometer, Some(29.875));
    assert_eq!(data.bar_trend, Some(BarTrend::FallingRapidly));
    assert!(data.heat_index.is_some());
    assert!(data.dew_point.is_some());
    assert!(data.feels_like.is_some());
    assert_eq!(data.wind_dir_rose, Some(WindRose::S));
    assert_eq!(data.wind_speed_bft, Some(2));
    assert_eq!(data.is_raining, Some(true));
    assert_eq!(data.rain_collector, Some(RainCollector::Imperial));
    assert_eq!(data.rain_day, Some(0.2));
    assert_eq!(data.rain_rate_day, Some(1.5));
    assert_eq!(data.forecast_rule_no, Some(44));
    assert_eq!(data.forecast.as_deref(), Some(forecast_text(44)));
    assert_eq!(data.archive_interval, Some(5));
    assert_eq!(data.latitude, Some(52.3));

    // gust and average wind come from the newest archive record
    assert_eq!(data.wind_gust, Some(13.0));
    assert_eq!(data.wind_speed_avg, Some(3.0));
    assert_eq!(data.wind_avg_dir, Some(135.0));
    assert_eq!(data.wind_avg_dir_rose, Some(WindRose::SE));

    assert_eq!(data.temp_out_hi_day, Some(87.2));
    assert_eq!(data.temp_out_hi_time, NaiveTime::from_hms_opt(15, 10, 0));
    assert_eq!(data.barometer_low_day, Some(29.5));
    assert_eq!(data.wind_gust_day, Some(23.0));

    assert_eq!(client.last_data(), &data);
}

#[tokio::test]
async fn metric_collector_corrects_rain() {
    let connector = FakeConnector::new(StationState {
        setup_bits: 0x20,
        ..Default::default()
    });
    let mut client = client_for(&connector);
    let data = client.update().await;
    assert_eq!(data.rain_collector, Some(RainCollector::MetricTenth));
    let rain_day = data.rain_day.unwrap();
    assert!((rain_day - 0.2 / 2.54).abs() < 1e-9);
    let rate_day = data.rain_rate_day.unwrap();
    assert!((rate_day - 1.5 / 2.54).abs() < 1e-9);
}

#[tokio::test]
async fn dashed_sensor_marks_partial_data() {
    let connector = FakeConnector::new(StationState {
        loop_packet: loop_packet(32767),
        ..Default::default()
    });
    let mut client = client_for(&connector);
    let data = client.update().await;
    assert_eq!(data.temp_out, None);
    assert_eq!(data.heat_index, None);
    assert_eq!(data.last_error, PARTIAL_DATA_ERROR);
    assert_eq!(data.last_success_time, None);
    assert!(data.last_error_time.is_some());
}

#[tokio::test]
async fn missing_hilows_does_not_fail_poll() {
    let connector = FakeConnector::new(StationState {
        hilows: None,
        ..Default::default()
    });
    let mut client = client_for(&connector);
    let data = client.update().await;
    assert_eq!(data.last_error, "");
    assert_eq!(data.temp_out, Some(85.0));
    assert_eq!(data.temp_out_hi_day, None);
}

fn corrupted(mut block: Vec<u8>, at: usize) -> Vec<u8> {
    block[at] ^= 0x40;
    block
}

#[tokio::test]
async fn corrupted_hilows_keeps_poll_alive() {
    let connector = FakeConnector::new(StationState {
        hilows: Some(corrupted(hilows_block(), 14)),
        ..Default::default()
    });
    let mut client = client_for(&connector);
    let data = client.update().await;
    assert_eq!(data.last_error, "");
    assert_eq!(data.temp_out, Some(85.0));
    assert_eq!(data.temp_out_hi_day, None);
    assert_eq!(data.barometer_low_day, None);
    assert_eq!(data.wind_gust_day, None);
}

#[tokio::test]
async fn corrupted_loop_packet_fails_poll() {
    let connector = FakeConnector::new(StationState {
        loop_packet: corrupted(loop_packet(850), 12),
        ..Default::default()
    });
    let mut client = client_for(&connector);
    let data = client.update().await;
    assert!(
        data.last_error
            .starts_with("Couldn't acquire data on fake:station: CRC mismatch"),
        "{}",
        data.last_error
    );
    assert_eq!(data.temp_out, None);
    assert_eq!(data.last_success_time, None);
    assert!(data.last_error_time.is_some());
}

#[tokio::test]
async fn short_loop_packet_fails_poll() {
    let mut packet = loop_packet(850);
    packet.truncate(60);
    let connector = FakeConnector::new(StationState {
        loop_packet: packet,
        ..Default::default()
    });
    let mut client = client_for(&connector);
    let data = client.update().await;
    assert!(
        data.last_error.starts_with("Couldn't acquire data on fake:station: "),
        "{}",
        data.last_error
    );
    assert_eq!(data.datetime, None);
}

#[tokio::test]
async fn failed_rain_collector_read_fails_poll() {
    let connector = FakeConnector::new(StationState::default());
    let mut client = client_for(&connector);
    let first = client.update().await.clone();
    assert_eq!(first.last_error, "");

    connector.state.lock().unwrap().nak_reads.push(0x2B);
    let failed = client.update().await.clone();
    assert!(
        failed
            .last_error
            .starts_with("Couldn't acquire data on fake:station: "),
        "{}",
        failed.last_error
    );
    assert_eq!(failed.last_success_time, first.last_success_time);
    assert!(failed.last_error_time.is_some());
    assert_eq!(failed.rain_collector, Some(RainCollector::Imperial));
    assert_eq!(failed.rain_day, first.rain_day);
}

#[tokio::test]
async fn failed_poll_keeps_values_and_reports_error() {
    let connector = FakeConnector::new(StationState::default());
    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(vec![]));
    let events_clone = events.clone();
    let mut client = builder_for(&connector)
        .on_event(move |event| events_clone.lock().unwrap().push(event.clone()))
        .build()
        .unwrap();

    let first = client.update().await.clone();
    assert!(events.lock().unwrap().contains(&Event::RainStarted));
    events.lock().unwrap().clear();

    connector.state.lock().unwrap().refuse = true;
    let failed = client.update().await.clone();
    assert!(
        failed
            .last_error
            .starts_with("Couldn't acquire data on fake:station: "),
        "{}",
        failed.last_error
    );
    assert_eq!(failed.temp_out, first.temp_out);
    assert_eq!(failed.datetime, first.datetime);
    assert_eq!(failed.last_success_time, first.last_success_time);
    assert!(failed.last_error_time.is_some());
    assert!(matches!(
        events.lock().unwrap().as_slice(),
        [Event::StationError { .. }]
    ));
    events.lock().unwrap().clear();

    connector.state.lock().unwrap().refuse = false;
    let recovered = client.update().await.clone();
    assert_eq!(recovered.last_error, "");
    // error time is kept after recovery
    assert_eq!(recovered.last_error_time, failed.last_error_time);
    assert!(events.lock().unwrap().contains(&Event::StationRecovered));
}

#[tokio::test]
async fn snapshot_callback_sees_each_poll() {
    let connector = FakeConnector::new(StationState::default());
    let temps: Arc<Mutex<Vec<Option<f64>>>> = Arc::new(Mutex::new(vec![]));
    let temps_clone = temps.clone();
    let mut client = builder_for(&connector)
        .on_snapshot(move |data| temps_clone.lock().unwrap().push(data.temp_out))
        .build()
        .unwrap();
    client.update().await;
    client.update().await;
    assert_eq!(*temps.lock().unwrap(), vec![Some(85.0), Some(85.0)]);
}

#[tokio::test]
async fn link_reopened_unless_persistent() {
    let connector = FakeConnector::new(StationState::default());
    let mut client = client_for(&connector);
    client.update().await;
    client.update().await;
    assert_eq!(connector.state.lock().unwrap().connections, 2);

    let persistent = FakeConnector::new(StationState::default());
    let mut client = builder_for(&persistent).persistent(true).build().unwrap();
    client.update().await;
    client.update().await;
    assert_eq!(persistent.state.lock().unwrap().connections, 1);
}

#[tokio::test]
async fn archive_download_skips_leading_and_old_records() {
    let state = StationState {
        pages: vec![
            archive_page(
                0,
                &[
                    archive_record(minutes_ago(3), 30),
                    archive_record(minutes_ago(40), 31),
                    archive_record(minutes_ago(4), 12),
                ],
            ),
            archive_page(1, &[archive_record(minutes_ago(2), 14)]),
        ],
        first_index: 1,
        ..Default::default()
    };
    let connector = FakeConnector::new(state);
    let io = connector.open().await.unwrap();
    let mut console = Console::new(io, Duration::from_secs(1));

    let records = console.archives(minutes_ago(10)).await.unwrap();
    let gusts: Vec<_> = records.iter().map(|r| r.wind_hi).collect();
    assert_eq!(gusts, vec![Some(12.0), Some(14.0)]);
}

#[tokio::test]
async fn empty_archive_download_sends_escape() {
    let connector = FakeConnector::new(StationState {
        pages: vec![],
        ..Default::default()
    });
    let io = connector.open().await.unwrap();
    let mut console = Console::new(io, Duration::from_secs(1));
    assert!(console.archives(minutes_ago(10)).await.unwrap().is_empty());
    // give the fake a moment to record the reply
    tokio::time::sleep(Duration::from_millis(20)).await;
    let commands = connector.state.lock().unwrap().commands.clone();
    assert!(commands.contains(&"DMPAFT reply 1B".to_string()), "{commands:?}");
}

#[tokio::test]
async fn sleeping_console_fails_wake_up() {
    let connector = FakeConnector::new(StationState {
        asleep: true,
        ..Default::default()
    });
    let io = connector.open().await.unwrap();
    let mut console = Console::new(io, Duration::from_secs(1));
    assert!(matches!(console.wake_up().await, Err(Error::WakeUp)));
}

#[tokio::test]
async fn setter_services_reach_the_console() {
    let connector = FakeConnector::new(StationState::default());
    let client = tokio::sync::Mutex::new(client_for(&connector));

    let reply = services::handle(&client, ServiceCall::SetYearlyRain { rain_clicks: 1200 })
        .await
        .unwrap();
    assert_eq!(reply, None);
    assert_eq!(connector.state.lock().unwrap().yearly_rain, Some(1200));

    services::handle(
        &client,
        ServiceCall::SetArchivePeriod {
            archive_period: "10".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(connector.state.lock().unwrap().archive_period, 10);
    assert_eq!(client.lock().await.station_info().archive_period, Some(10));
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_console() {
    let connector = FakeConnector::new(StationState::default());
    let client = tokio::sync::Mutex::new(client_for(&connector));

    let result = services::handle(
        &client,
        ServiceCall::SetArchivePeriod {
            archive_period: "7".into(),
        },
    )
    .await;
    assert!(matches!(result, Err(Error::InvalidArchivePeriod(7))));
    let result = services::handle(&client, ServiceCall::SetYearlyRain { rain_clicks: 70000 }).await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(connector.state.lock().unwrap().connections, 0);
}

#[tokio::test]
async fn rain_collector_rewrites_setup_bits_once() {
    let connector = FakeConnector::new(StationState::default());
    let client = tokio::sync::Mutex::new(client_for(&connector));

    let call = || ServiceCall::SetRainCollector {
        rain_collector: "0.2 mm".into(),
    };
    services::handle(&client, call()).await.unwrap();
    {
        let state = connector.state.lock().unwrap();
        assert_eq!(state.setup_bits, 0x1F);
        assert!(state.commands.iter().any(|c| c == "NEWSETUP"));
    }
    assert_eq!(client.lock().await.rain_collector(), Some(RainCollector::Metric));

    connector.state.lock().unwrap().commands.clear();
    services::handle(&client, call()).await.unwrap();
    let commands = connector.state.lock().unwrap().commands.clone();
    assert!(!commands.iter().any(|c| c.starts_with("EEBWR")), "{commands:?}");
}

#[tokio::test]
async fn davis_time_services() {
    let connector = FakeConnector::new(StationState::default());
    let client = tokio::sync::Mutex::new(client_for(&connector));

    let reply = services::handle(&client, ServiceCall::GetDavisTime)
        .await
        .unwrap()
        .unwrap();
    let time = reply["davis_time"].as_str().unwrap();
    assert!(time.starts_with("2024-06-01T10:15:30"), "{time}");

    services::handle(&client, ServiceCall::SetDavisTime).await.unwrap();
    let clock = connector.state.lock().unwrap().clock;
    assert_eq!(clock.year(), Local::now().year());

    connector.state.lock().unwrap().refuse = true;
    let reply = services::handle(&client, ServiceCall::GetDavisTime)
        .await
        .unwrap();
    assert_eq!(reply, Some(json!({ "error": DAVIS_TIME_ERROR })));
}

#[tokio::test]
async fn info_service() {
    let connector = FakeConnector::new(StationState::default());
    let client = tokio::sync::Mutex::new(client_for(&connector));

    let info = services::handle(&client, ServiceCall::GetInfo)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info["version"], "3.12");
    assert_eq!(info["date"], "Apr 24 2002");
    assert_eq!(info["diagnostics"]["total_received"], 21629);
    assert_eq!(info["diagnostics"]["crc_errors"], 128);
    assert_eq!(info["archive_period"], 5);

    connector.state.lock().unwrap().refuse = true;
    let reply = services::handle(&client, ServiceCall::GetInfo).await.unwrap();
    assert_eq!(reply, Some(json!({ "error": INFO_ERROR })));
}

#[tokio::test]
async fn raw_data_merges_loop_and_hilows() {
    let connector = FakeConnector::new(StationState::default());
    let client = tokio::sync::Mutex::new(client_for(&connector));
    client.lock().await.update().await;

    let raw = services::handle(&client, ServiceCall::GetRawData)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw["TempOut"], 850);
    assert_eq!(raw["EOL"], "0A 0D");
    assert_eq!(raw["TempHiDay"], 872);
    assert_eq!(raw["WindHiDay"], 23);
}

#[tokio::test]
async fn coordinator_shares_observations() {
    let connector = FakeConnector::new(StationState::default());
    let client = Arc::new(tokio::sync::Mutex::new(client_for(&connector)));

    assert!(Coordinator::new(client.clone(), Duration::from_secs(4)).is_err());

    let coordinator = Coordinator::new(client, Duration::from_secs(5)).unwrap();
    assert!(coordinator.data().is_none());
    let mut updates = coordinator.subscribe();

    let first = coordinator.first_refresh().await;
    assert_eq!(first.latitude, Some(52.3));
    assert!(updates.has_changed().unwrap());
    let seen = updates.borrow_and_update().clone().unwrap();
    assert_eq!(seen.temp_out, Some(85.0));
    assert_eq!(coordinator.data().unwrap().temp_out, Some(85.0));

    // returns once the shutdown future completes
    tokio::time::timeout(
        Duration::from_secs(2),
        coordinator.run(tokio::time::sleep(Duration::from_millis(50))),
    )
    .await
    .unwrap();
}
