//! Periodic health reports to the controller.
//!
//! Every `interval` the task snapshots the health of all local blocks
//! and sends it through the [`ControllerClient`]. Failures are logged
//! and counted but never stop the loop; the controller treats a volume
//! with a stale heartbeat as dead, so the task keeps trying.

use std::sync::Arc;
use std::time::Duration;

use eventflow_core::ControllerClient;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::server::VolumeServer;

pub struct HeartbeatTask {
    server: Arc<VolumeServer>,
    controller: Arc<dyn ControllerClient>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl HeartbeatTask {
    pub fn new(
        server: Arc<VolumeServer>,
        controller: Arc<dyn ControllerClient>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            server,
            controller,
            interval,
            shutdown,
        }
    }

    /// Runs until the shutdown signal fires.
    pub async fn run(mut self) {
        info!(
            volume_id = %self.server.volume_id(),
            interval_ms = self.interval.as_millis() as u64,
            "heartbeat task started"
        );

        let mut sent: u64 = 0;
        let mut failures: u64 = 0;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.changed() => {
                    break;
                }
            }

            let healths = self.server.health();
            match self
                .controller
                .heartbeat(
                    self.server.volume_id(),
                    self.server.address().to_string(),
                    healths,
                )
                .await
            {
                Ok(()) => {
                    sent += 1;
                    failures = 0;
                    debug!(volume_id = %self.server.volume_id(), sent, "heartbeat sent");
                }
                Err(err) => {
                    failures += 1;
                    error!(
                        volume_id = %self.server.volume_id(),
                        error = %err,
                        failures,
                        "heartbeat failed"
                    );
                    if failures >= 3 {
                        warn!(
                            volume_id = %self.server.volume_id(),
                            failures,
                            "repeated heartbeat failures; controller may mark this volume dead"
                        );
                    }
                }
            }
        }

        info!(
            volume_id = %self.server.volume_id(),
            total = sent,
            "heartbeat task stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StoreConfig, VolumeInfo};
    use async_trait::async_trait;
    use eventflow_core::rpc::RpcResult;
    use eventflow_core::{Id, SegmentHealth};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingController {
        beats: Mutex<Vec<(Id, usize)>>,
    }

    #[async_trait]
    impl ControllerClient for RecordingController {
        async fn heartbeat(
            &self,
            volume_id: Id,
            _address: String,
            healths: Vec<SegmentHealth>,
        ) -> RpcResult<()> {
            self.beats.lock().unwrap().push((volume_id, healths.len()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_heartbeat_reports_and_stops() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            controllers: vec![],
            ip: "127.0.0.1".to_string(),
            port: 11811,
            volume: VolumeInfo {
                id: Id(3),
                dir: dir.path().to_path_buf(),
                capacity: 1 << 30,
            },
            heartbeat_interval_ms: 20,
        };
        let server = Arc::new(VolumeServer::recover(&config).await.unwrap());
        let controller = Arc::new(RecordingController::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = HeartbeatTask::new(
            Arc::clone(&server),
            Arc::clone(&controller) as Arc<dyn ControllerClient>,
            Duration::from_millis(20),
            shutdown_rx,
        );
        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(110)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let beats = controller.beats.lock().unwrap();
        assert!(beats.len() >= 3, "expected several beats, got {}", beats.len());
        assert!(beats.iter().all(|(id, _)| *id == Id(3)));
        let count = beats.len();
        drop(beats);

        // No more beats after shutdown.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(controller.beats.lock().unwrap().len(), count);
    }
}
