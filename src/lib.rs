mod client;
mod config;
mod console;
mod coordinator;
mod diff;
mod error;
mod forecast;
mod hass;
mod link;
mod logger;
mod parser;
mod protocol;
pub mod sensors;
pub mod services;
mod types;
pub mod weather;

pub use client::{VantageClient, VantageClientBuilder, DEFAULT_TIMEOUT, PARTIAL_DATA_ERROR};
pub use config::{Config, HomeAssistantConfig, LoggingConfig, StationConfig};
pub use console::Console;
pub use coordinator::{Coordinator, DEFAULT_SYNC_INTERVAL, MINIMAL_SYNC_INTERVAL};
pub use error::{Error, Result};
pub use forecast::forecast_text;
pub use hass::HassPublisher;
pub use link::{Connector, Link, LinkConnector, Transport, DEFAULT_BAUD_RATE};
pub use logger::MessageLogMode;
pub use parser::{ArchiveRecord, HiLows, LoopPacket, RawRecord, RawValue};
pub use services::ServiceCall;
pub use types::*;
