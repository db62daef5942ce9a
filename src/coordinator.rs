//! Periodic polling of a station.
//!
//! The client sits behind an async mutex shared with service calls, so a poll
//! and a command never use the link at the same time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::VantageClient;
use crate::types::Observation;
use crate::{Error, Result};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
pub const MINIMAL_SYNC_INTERVAL: Duration = Duration::from_secs(5);

pub struct Coordinator {
    client: Arc<Mutex<VantageClient>>,
    interval: Duration,
    tx: watch::Sender<Option<Arc<Observation>>>,
}

impl Coordinator {
    pub fn new(client: Arc<Mutex<VantageClient>>, interval: Duration) -> Result<Self> {
        if interval < MINIMAL_SYNC_INTERVAL {
            return Err(Error::InvalidArgument(format!(
                "sync interval {}s is below the minimum of {}s",
                interval.as_secs(),
                MINIMAL_SYNC_INTERVAL.as_secs()
            )));
        }
        let (tx, _) = watch::channel(None);
        Ok(Self {
            client,
            interval,
            tx,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn client(&self) -> Arc<Mutex<VantageClient>> {
        Arc::clone(&self.client)
    }

    /// Latest observation, if any poll has run.
    pub fn data(&self) -> Option<Arc<Observation>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Observation>>> {
        self.tx.subscribe()
    }

    /// Initial poll. Station info is read first so the observation carries location
    /// and archive interval.
    pub async fn first_refresh(&self) -> Arc<Observation> {
        {
            let mut client = self.client.lock().await;
            if let Err(e) = client.refresh_station_info().await {
                warn!(error = %e, "couldn't read station info");
            }
        }
        self.refresh().await
    }

    pub async fn refresh(&self) -> Arc<Observation> {
        let observation = {
            let mut client = self.client.lock().await;
            Arc::new(client.update().await.clone())
        };
        if !observation.last_error.is_empty() {
            debug!(error = %observation.last_error, "poll finished with error");
        }
        self.tx.send_replace(Some(Arc::clone(&observation)));
        observation
    }

    /// Polls every interval until `shutdown` completes.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        info!(interval_secs = self.interval.as_secs(), "starting station polling");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("stopping station polling");
                    break;
                }
                _ = ticker.tick() => {
                    self.refresh().await;
                }
            }
        }
    }
}
