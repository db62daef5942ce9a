use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use davis_vantage::sensors::new_entry_id;
use davis_vantage::services::{self, ServiceCall};
use davis_vantage::{Config, Coordinator, HassPublisher, VantageClient, VantageClientBuilder};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "davis-vantage")]
#[command(about = "Poll a Davis Vantage weather station over TCP or serial")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "davis-vantage.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously, optionally publishing to Home Assistant
    Run,
    /// Print one observation as JSON
    Current,
    GetTime,
    /// Set the console clock to the local time
    SetTime,
    Info,
    /// Last raw LOOP and HILOWS fields
    RawData,
    SetYearlyRain {
        rain_clicks: i64,
    },
    SetArchivePeriod {
        /// Minutes: 1, 5, 10, 15, 30, 60 or 120
        archive_period: String,
    },
    SetRainCollector {
        /// 0.01", 0.2 mm or 0.1 mm
        rain_collector: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli.command, config).await {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

fn build_client(config: &Config) -> davis_vantage::Result<VantageClient> {
    let mut builder = VantageClientBuilder::new(config.link()?)
        .timeout(config.station.timeout())
        .persistent(config.station.persistent_connection);
    if let Some(path) = &config.logging.message_log {
        builder = builder.message_log(config.logging.message_log_mode, path.clone());
    }
    builder.build()
}

async fn run(command: Commands, config: Config) -> davis_vantage::Result<()> {
    let client = Arc::new(Mutex::new(build_client(&config)?));

    let call = match command {
        Commands::Run => return poll_forever(client, &config).await,
        Commands::Current => {
            let coordinator = Coordinator::new(client, config.station.interval())?;
            let data = coordinator.first_refresh().await;
            println!("{}", pretty(&data.to_json()));
            return Ok(());
        }
        Commands::RawData => {
            // raw data comes from the last poll
            client.lock().await.update().await;
            ServiceCall::GetRawData
        }
        Commands::GetTime => ServiceCall::GetDavisTime,
        Commands::SetTime => ServiceCall::SetDavisTime,
        Commands::Info => ServiceCall::GetInfo,
        Commands::SetYearlyRain { rain_clicks } => ServiceCall::SetYearlyRain { rain_clicks },
        Commands::SetArchivePeriod { archive_period } => {
            ServiceCall::SetArchivePeriod { archive_period }
        }
        Commands::SetRainCollector { rain_collector } => {
            ServiceCall::SetRainCollector { rain_collector }
        }
    };

    let name = call.name();
    match services::handle(&client, call).await? {
        Some(response) => println!("{}", pretty(&response)),
        None => println!("{}", pretty(&json!({ "service": name, "result": "ok" }))),
    }
    Ok(())
}

async fn poll_forever(client: Arc<Mutex<VantageClient>>, config: &Config) -> davis_vantage::Result<()> {
    let publisher = match &config.home_assistant {
        Some(ha) => {
            let entry_id = ha.entry_id.clone().unwrap_or_else(new_entry_id);
            Some(HassPublisher::new(&ha.url, ha.token.clone(), config.station.model)?.entry_id(entry_id))
        }
        None => None,
    };

    {
        let mut client = client.lock().await;
        if let Err(e) = client.connect_to_station().await {
            warn!(error = %e, "station not reachable yet, polling anyway");
        }
    }

    let coordinator = Coordinator::new(client, config.station.interval())?;
    let first = coordinator.first_refresh().await;
    let link = coordinator.client().lock().await.link();
    info!(link = %link, "station polling started");

    if let Some(publisher) = publisher {
        let mut updates = coordinator.subscribe();
        if let Err(e) = publisher.publish(&first).await {
            warn!(error = %e, "couldn't publish states");
        }
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let data = updates.borrow_and_update().clone();
                if let Some(data) = data
                    && let Err(e) = publisher.publish(&data).await
                {
                    warn!(error = %e, "couldn't publish states");
                }
            }
        });
    }

    coordinator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "couldn't listen for shutdown signal");
            }
        })
        .await;
    Ok(())
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
