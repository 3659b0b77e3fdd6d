use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::collector::Collector;
use crate::config::Config;
use crate::export::MetricsServer;
use crate::snapshot::SnapshotStore;
use crate::source;

/// Daemon orchestrates the metrics server and the collection loop.
pub struct Daemon {
    cfg: Config,
    store: Arc<SnapshotStore>,
    server: MetricsServer,
    collector_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Daemon {
    /// Creates a new daemon with an empty snapshot store.
    pub fn new(cfg: Config) -> Self {
        let store = Arc::new(SnapshotStore::new());
        let server = MetricsServer::new(&cfg.metrics.addr, Arc::clone(&store));

        Self {
            cfg,
            store,
            server,
            collector_task: parking_lot::Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Start the metrics server and the collection loop.
    ///
    /// The first collection cycle runs immediately; the /metrics endpoint
    /// responds from the start, serving whatever groups have committed.
    pub async fn start(&self) -> Result<()> {
        self.server
            .start()
            .await
            .context("starting metrics server")?;

        let client = source::Client::new(&self.cfg.source)
            .context("creating source client")?
            .with_metrics(Box::new(|endpoint, status, duration| {
                debug!(endpoint, status, ?duration, "source request");
            }));

        let collector = Collector::new(
            Arc::new(client),
            Arc::clone(&self.store),
            self.cfg.refresh_interval,
            self.cfg.scoring.top_k,
            self.cfg.scoring.bucket_width,
            self.cfg.scoring.policy,
        );

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move {
            collector.run(cancel).await;
        });
        *self.collector_task.lock() = Some(handle);

        info!(
            refresh_interval = ?self.cfg.refresh_interval,
            top_k = self.cfg.scoring.top_k,
            "daemon fully started",
        );

        Ok(())
    }

    /// Gracefully stop the collection loop and the metrics server.
    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();

        let task = self.collector_task.lock().take();
        if let Some(handle) = task {
            let _ = handle.await;
        }

        self.server.stop().await?;

        Ok(())
    }
}
