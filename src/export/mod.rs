use std::net::SocketAddr;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::snapshot::{MetricGroup, SnapshotStore};
use crate::units::wei_to_eth_signed;

/// Metric namespace for all exported families.
const NAMESPACE: &str = "stakewatch";

/// Renders the snapshot store in Prometheus text exposition format.
///
/// A fresh registry is built per scrape from whatever each group last
/// committed, so rendering never blocks on the data source and there is no
/// process-global gauge state to reset between cycles. Groups that have
/// never committed are omitted entirely; stale groups render their previous
/// values.
pub fn render(store: &SnapshotStore) -> Result<String> {
    let registry = Registry::new();

    if let Some(slice) = store.node_counts() {
        let total = register_gauge(
            &registry,
            "node",
            "total_count",
            "Total number of registered nodes.",
        )?;
        total.set(slice.value.total_nodes as f64);
    }

    if let Some(slice) = store.balances() {
        let balance = register_gauge_vec(
            &registry,
            "minipool",
            "balance_eth",
            "Balance of a minipool's validator in ETH.",
            &["address", "validator_pubkey"],
        )?;
        for mp in &slice.value.minipools {
            balance
                .with_label_values(&[mp.node_address.as_str(), &mp.validator_pubkey])
                .set(mp.balance_eth);
        }
    }

    if let Some(slice) = store.leaderboard() {
        let board = &slice.value;

        let scores = register_gauge_vec(
            &registry,
            "node",
            "score_eth",
            "Sum of rewards/penalties of the top minipools for this node.",
            &["address", "rank"],
        )?;
        let minipool_counts = register_gauge_vec(
            &registry,
            "node",
            "minipool_count",
            "Number of minipools running for this node.",
            &["address"],
        )?;
        for standing in &board.standings {
            // Non-participating nodes export no score sample; their rank is
            // the sentinel and carries no information.
            if let Some(score) = standing.score {
                scores
                    .with_label_values(&[standing.address.as_str(), &standing.rank.to_string()])
                    .set(wei_to_eth_signed(score));
            }
            minipool_counts
                .with_label_values(&[standing.address.as_str()])
                .set(standing.minipools.len() as f64);
        }

        let hist = register_gauge_vec(
            &registry,
            "node",
            "score_hist_eth",
            "Cumulative distribution of node scores.",
            &["le"],
        )?;
        for &(upper, cumulative) in &board.histogram.buckets {
            hist.with_label_values(&[&format!("{upper:.3}")])
                .set(cumulative as f64);
        }
        let hist_sum = register_gauge(
            &registry,
            "node",
            "score_hist_eth_sum",
            "Sum of all node scores in ETH.",
        )?;
        hist_sum.set(board.histogram.sum);
        let hist_count = register_gauge(
            &registry,
            "node",
            "score_hist_eth_count",
            "Number of scored nodes.",
        )?;
        hist_count.set(board.histogram.count as f64);

        let status_counts = register_gauge_vec(
            &registry,
            "minipool",
            "count",
            "Minipool counts with various aggregations.",
            &["status"],
        )?;
        let counts = &board.status_counts;
        for (status, count) in [
            ("total", counts.total),
            ("initialized", counts.initialized),
            ("prelaunch", counts.prelaunch),
            ("staking", counts.staking),
            ("withdrawable", counts.withdrawable),
            ("dissolved", counts.dissolved),
            ("validator_exists", counts.validator_exists),
            ("validator_active", counts.validator_active),
        ] {
            status_counts.with_label_values(&[status]).set(count as f64);
        }
    }

    if let Some(slice) = store.network() {
        let stats = &slice.value;

        let fees = register_gauge_vec(
            &registry,
            "network",
            "fee_rate",
            "Network fees as a rate of amount staked.",
            &["range"],
        )?;
        for (range, value) in [
            ("current", stats.fee_current),
            ("min", stats.fee_min),
            ("target", stats.fee_target),
            ("max", stats.fee_max),
        ] {
            fees.with_label_values(&[range]).set(value);
        }

        let block = register_gauge(
            &registry,
            "network",
            "updated_block",
            "Block of the latest submitted balances.",
        )?;
        block.set(stats.balances_block as f64);

        let balances = register_gauge_vec(
            &registry,
            "network",
            "balance_eth",
            "Network balances and supplies in the given unit.",
            &["unit"],
        )?;
        for (unit, value) in [
            ("total_eth", stats.total_eth),
            ("staking_eth", stats.staking_eth),
            ("total_reth", stats.total_reth),
            ("withdraw", stats.withdrawal_eth),
        ] {
            balances.with_label_values(&[unit]).set(value);
        }
    }

    if let Some(slice) = store.deposit() {
        let stats = &slice.value;

        let pool = register_gauge(
            &registry,
            "deposit",
            "pool_balance_eth",
            "Deposit pool balance in ETH.",
        )?;
        pool.set(stats.pool_balance_eth);

        let queue = register_gauge(
            &registry,
            "deposit",
            "queue_length",
            "Number of minipools waiting for user deposit assignment.",
        )?;
        queue.set(stats.queue_length as f64);

        let settings = register_gauge_vec(
            &registry,
            "network",
            "setting_enabled",
            "Boolean protocol settings (1=enabled, 0=disabled).",
            &["setting"],
        )?;
        for (setting, enabled) in [
            ("deposits", stats.deposits_enabled),
            ("assignments", stats.assignments_enabled),
        ] {
            settings
                .with_label_values(&[setting])
                .set(if enabled { 1.0 } else { 0.0 });
        }
    }

    // Commit times per group, so scrapers can see which slices went stale.
    let updated = register_gauge_vec(
        &registry,
        "snapshot",
        "updated_timestamp_seconds",
        "Unix time of each metric group's last successful commit.",
        &["group"],
    )?;
    for group in MetricGroup::ALL {
        if let Some(at) = store.updated_at(group) {
            let secs = at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64();
            updated.with_label_values(&[group.as_str()]).set(secs);
        }
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;

    String::from_utf8(buffer).context("metrics output is not UTF-8")
}

fn register_gauge(registry: &Registry, subsystem: &str, name: &str, help: &str) -> Result<Gauge> {
    let gauge = Gauge::with_opts(
        Opts::new(name, help)
            .namespace(NAMESPACE)
            .subsystem(subsystem),
    )?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn register_gauge_vec(
    registry: &Registry,
    subsystem: &str,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec> {
    let vec = GaugeVec::new(
        Opts::new(name, help)
            .namespace(NAMESPACE)
            .subsystem(subsystem),
        labels,
    )?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

/// HTTP server exposing the snapshot store on /metrics.
pub struct MetricsServer {
    addr: String,
    store: Arc<SnapshotStore>,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
}

/// Shared state for axum handlers.
struct AppState {
    store: Arc<SnapshotStore>,
}

impl MetricsServer {
    pub fn new(addr: &str, store: Arc<SnapshotStore>) -> Self {
        Self {
            addr: addr.to_string(),
            store,
            shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":2112"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            store: Arc::clone(&self.store),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// GET /metrics - Prometheus text format, rendered from the snapshot store.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match render(&state.store) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "rendering error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
