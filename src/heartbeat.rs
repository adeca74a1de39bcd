//! Background worker that runs the periodic maintenance tasks
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::atlas::Atlas;
use crate::error::{AtlasError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatCommand {
    /// Run the tasks now, without waiting for the next tick
    Force,
    Stop,
}

/// Handle to a running heartbeat worker. Runs never overlap: a forced
/// run or a tick arriving mid-run waits for it to finish.
#[derive(Debug)]
pub struct Heartbeat {
    command_tx: mpsc::Sender<HeartbeatCommand>,
    handle: JoinHandle<()>,
    rate: Duration,
}

impl Heartbeat {
    /// Spawn the worker. The first scheduled run happens one `rate` from
    /// now.
    pub fn start(atlas: Arc<Atlas>, rate: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::channel(8);
        let handle = tokio::spawn(run(atlas, rate, command_rx));
        debug!("Heartbeat started");
        Self {
            command_tx,
            handle,
            rate,
        }
    }

    pub fn rate(&self) -> Duration {
        self.rate
    }

    pub async fn force(&self) -> Result<()> {
        self.command_tx
            .send(HeartbeatCommand::Force)
            .await
            .map_err(|_| AtlasError::Config("heartbeat is not running".to_string()))
    }

    /// Stop the worker and wait for any run in progress to finish.
    pub async fn stop(self) {
        if self.command_tx.send(HeartbeatCommand::Stop).await.is_err() {
            warn!("Heartbeat already stopped");
        }
        if let Err(e) = self.handle.await {
            warn!("Heartbeat task ended abnormally: {}", e);
        }
    }

    /// Replace this worker with one ticking at `rate`.
    pub async fn restart(self, atlas: Arc<Atlas>, rate: Duration) -> Self {
        self.stop().await;
        Self::start(atlas, rate)
    }
}

async fn run(atlas: Arc<Atlas>, rate: Duration, mut command_rx: mpsc::Receiver<HeartbeatCommand>) {
    info!("Heartbeat every {}s", rate.as_secs());
    let mut ticker = time::interval_at(Instant::now() + rate, rate);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(HeartbeatCommand::Force) => {
                    info!("Forced heartbeat");
                    atlas.heartbeat_tasks().await;
                }
                Some(HeartbeatCommand::Stop) | None => break,
            },
            _ = ticker.tick() => {
                atlas.heartbeat_tasks().await;
            }
        }
    }
    warn!("Heartbeat stopped");
}
