use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::histogram::ScoreHistogram;
use crate::rank::rank_nodes;
use crate::score::ScorePolicy;
use crate::snapshot::{
    BalanceSet, DepositStats, Leaderboard, MetricGroup, MinipoolBalance, MinipoolStatusCounts,
    NetworkStats, NodeCounts, SnapshotStore,
};
use crate::source::{AggregateKind, FeatureFlag, StakingSource};
use crate::units::wei_to_eth;

/// One metric group's failure within a cycle.
#[derive(Debug)]
pub struct GroupFailure {
    pub group: MetricGroup,
    pub error: anyhow::Error,
}

/// Combined diagnostic for a cycle in which one or more groups failed.
///
/// Group failures never cross group boundaries: the groups that succeeded
/// have already committed, and the scheduler proceeds to the next tick.
#[derive(Debug, Error)]
#[error("{summary}")]
pub struct CycleError {
    summary: String,
    pub failures: Vec<GroupFailure>,
}

impl CycleError {
    fn new(failures: Vec<GroupFailure>) -> Self {
        let detail = failures
            .iter()
            .map(|f| format!("{}: {:#}", f.group, f.error))
            .collect::<Vec<_>>()
            .join("; ");

        let summary = format!(
            "{} of {} metric groups failed: {}",
            failures.len(),
            MetricGroup::ALL.len(),
            detail,
        );

        Self { summary, failures }
    }
}

/// Periodically fetches all metric groups and commits them to the snapshot
/// store.
///
/// Each tick fans out one independent task per group; a group's failure is
/// captured without cancelling its siblings, and only that group's snapshot
/// slice goes stale.
pub struct Collector<S> {
    source: Arc<S>,
    store: Arc<SnapshotStore>,
    interval: Duration,
    top_k: usize,
    bucket_width: f64,
    policy: ScorePolicy,
}

impl<S: StakingSource> Collector<S> {
    pub fn new(
        source: Arc<S>,
        store: Arc<SnapshotStore>,
        interval: Duration,
        top_k: usize,
        bucket_width: f64,
        policy: ScorePolicy,
    ) -> Self {
        Self {
            source,
            store,
            interval,
            top_k,
            bucket_width,
            policy,
        }
    }

    /// Runs the refresh loop until cancelled.
    ///
    /// The first cycle runs immediately; cycle failures are logged and never
    /// terminate the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval = ?self.interval, "collector started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("collector stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.collect_cycle().await {
                        Ok(()) => debug!("collection cycle complete"),
                        Err(e) => warn!(
                            failed_groups = e.failures.len(),
                            error = %e,
                            "collection cycle incomplete",
                        ),
                    }
                }
            }
        }
    }

    /// Runs one full collection cycle: all groups concurrently, failures
    /// combined into a single [`CycleError`] after every task has finished.
    pub async fn collect_cycle(&self) -> Result<(), CycleError> {
        let (node_counts, balances, leaderboard, network, deposit) = tokio::join!(
            self.collect_node_counts(),
            self.collect_balances(),
            self.collect_leaderboard(),
            self.collect_network(),
            self.collect_deposit(),
        );

        let results = [
            (MetricGroup::NodeCounts, node_counts),
            (MetricGroup::Balances, balances),
            (MetricGroup::Leaderboard, leaderboard),
            (MetricGroup::Network, network),
            (MetricGroup::Deposit, deposit),
        ];

        let failures: Vec<GroupFailure> = results
            .into_iter()
            .filter_map(|(group, result)| result.err().map(|error| GroupFailure { group, error }))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CycleError::new(failures))
        }
    }

    async fn collect_node_counts(&self) -> Result<()> {
        let total_nodes = self
            .source
            .node_count()
            .await
            .context("fetching node count")?;

        self.store
            .commit_node_counts(NodeCounts { total_nodes }, SystemTime::now());
        Ok(())
    }

    async fn collect_balances(&self) -> Result<()> {
        let minipools = self
            .source
            .minipool_details()
            .await
            .context("fetching minipool balances")?;

        let minipools = minipools
            .into_iter()
            .map(|mp| MinipoolBalance {
                balance_eth: wei_to_eth(mp.validator_balance),
                node_address: mp.node_address,
                validator_pubkey: mp.validator_pubkey,
            })
            .collect();

        self.store
            .commit_balances(BalanceSet { minipools }, SystemTime::now());
        Ok(())
    }

    async fn collect_leaderboard(&self) -> Result<()> {
        let (minipools, addresses) =
            tokio::join!(self.source.minipool_details(), self.source.node_addresses());
        let minipools = minipools.context("fetching minipool details")?;
        let addresses = addresses.context("fetching node addresses")?;

        let standings = rank_nodes(&minipools, &addresses, self.top_k, self.policy);

        let scores_eth: Vec<f64> = standings
            .iter()
            .filter_map(|s| s.score)
            .map(crate::units::wei_to_eth_signed)
            .collect();
        let histogram = ScoreHistogram::build(&scores_eth, self.bucket_width);

        let status_counts =
            MinipoolStatusCounts::tally(standings.iter().flat_map(|s| s.minipools.iter()));

        self.store.commit_leaderboard(
            Leaderboard {
                standings,
                histogram,
                status_counts,
            },
            SystemTime::now(),
        );
        Ok(())
    }

    async fn collect_network(&self) -> Result<()> {
        // Sub-fan within the group: independent reads, committed only once
        // all of them have succeeded.
        let (
            fee_current,
            fee_min,
            fee_target,
            fee_max,
            balances_block,
            total_eth,
            staking_eth,
            total_reth,
            withdrawal_eth,
        ) = tokio::join!(
            self.source.network_aggregate(AggregateKind::NodeFee),
            self.source.network_aggregate(AggregateKind::MinNodeFee),
            self.source.network_aggregate(AggregateKind::TargetNodeFee),
            self.source.network_aggregate(AggregateKind::MaxNodeFee),
            self.source.network_aggregate(AggregateKind::BalancesBlock),
            self.source.network_aggregate(AggregateKind::TotalEth),
            self.source.network_aggregate(AggregateKind::StakingEth),
            self.source.network_aggregate(AggregateKind::TotalRethSupply),
            self.source.network_aggregate(AggregateKind::WithdrawalBalance),
        );

        let stats = NetworkStats {
            fee_current: fee_current.context("fetching node fee")?,
            fee_min: fee_min.context("fetching min node fee")?,
            fee_target: fee_target.context("fetching target node fee")?,
            fee_max: fee_max.context("fetching max node fee")?,
            balances_block: balances_block.context("fetching balances block")? as u64,
            total_eth: total_eth.context("fetching total ETH")?,
            staking_eth: staking_eth.context("fetching staking ETH")?,
            total_reth: total_reth.context("fetching rETH supply")?,
            withdrawal_eth: withdrawal_eth.context("fetching withdrawal balance")?,
        };

        self.store.commit_network(stats, SystemTime::now());
        Ok(())
    }

    async fn collect_deposit(&self) -> Result<()> {
        let (pool_balance, queue_length, deposits_enabled, assignments_enabled) = tokio::join!(
            self.source
                .network_aggregate(AggregateKind::DepositPoolBalance),
            self.source
                .network_aggregate(AggregateKind::DepositQueueLength),
            self.source.feature_flag(FeatureFlag::DepositsEnabled),
            self.source.feature_flag(FeatureFlag::AssignmentsEnabled),
        );

        let stats = DepositStats {
            pool_balance_eth: pool_balance.context("fetching deposit pool balance")?,
            queue_length: queue_length.context("fetching deposit queue length")? as u64,
            deposits_enabled: deposits_enabled.context("fetching deposits flag")?,
            assignments_enabled: assignments_enabled.context("fetching assignments flag")?,
        };

        self.store.commit_deposit(stats, SystemTime::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    use super::*;
    use crate::source::{Address, MinipoolDetails, MinipoolStatus};
    use crate::units::Wei;

    const ETH: Wei = 1_000_000_000_000_000_000;

    /// In-memory source with per-call failure switches.
    struct MockSource {
        minipools: Vec<MinipoolDetails>,
        addresses: Vec<Address>,
        fail_aggregates: Mutex<bool>,
        fail_minipools: Mutex<bool>,
    }

    impl MockSource {
        fn new() -> Self {
            let mp = MinipoolDetails {
                node_address: Address::new("0xaa"),
                validator_pubkey: "0xpk1".to_string(),
                status: MinipoolStatus::Staking,
                status_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                validator_exists: true,
                validator_active: true,
                validator_balance: 33 * ETH,
                node_deposit: 16 * ETH,
                user_deposit: 16 * ETH,
            };

            Self {
                minipools: vec![mp],
                addresses: vec![Address::new("0xaa"), Address::new("0xbb")],
                fail_aggregates: Mutex::new(false),
                fail_minipools: Mutex::new(false),
            }
        }
    }

    impl StakingSource for MockSource {
        async fn minipool_details(&self) -> Result<Vec<MinipoolDetails>> {
            if *self.fail_minipools.lock() {
                bail!("minipools unavailable");
            }
            Ok(self.minipools.clone())
        }

        async fn node_addresses(&self) -> Result<Vec<Address>> {
            Ok(self.addresses.clone())
        }

        async fn node_count(&self) -> Result<u64> {
            Ok(self.addresses.len() as u64)
        }

        async fn network_aggregate(&self, kind: AggregateKind) -> Result<f64> {
            if *self.fail_aggregates.lock() {
                bail!("aggregate {} unavailable", kind.as_path());
            }
            Ok(match kind {
                AggregateKind::BalancesBlock => 1234.0,
                AggregateKind::TotalEth => 5000.0,
                _ => 1.0,
            })
        }

        async fn feature_flag(&self, _flag: FeatureFlag) -> Result<bool> {
            Ok(true)
        }
    }

    fn collector(source: Arc<MockSource>, store: Arc<SnapshotStore>) -> Collector<MockSource> {
        Collector::new(
            source,
            store,
            Duration::from_secs(300),
            2,
            0.025,
            ScorePolicy::StakingOnly,
        )
    }

    #[tokio::test]
    async fn test_full_cycle_commits_all_groups() {
        let source = Arc::new(MockSource::new());
        let store = Arc::new(SnapshotStore::new());

        collector(source, Arc::clone(&store))
            .collect_cycle()
            .await
            .expect("cycle should succeed");

        for group in MetricGroup::ALL {
            assert!(
                store.updated_at(group).is_some(),
                "group {group} not committed",
            );
        }

        let board = store.leaderboard().expect("committed");
        assert_eq!(board.value.standings.len(), 2);
        assert_eq!(board.value.standings[0].score, Some(ETH as i128));
        assert_eq!(board.value.status_counts.staking, 1);
    }

    #[tokio::test]
    async fn test_partial_failure_isolated_to_group() {
        let source = Arc::new(MockSource::new());
        let store = Arc::new(SnapshotStore::new());
        let collector = collector(Arc::clone(&source), Arc::clone(&store));

        collector.collect_cycle().await.expect("first cycle");
        let network_before = store.updated_at(MetricGroup::Network).expect("committed");
        let balances_before = store.updated_at(MetricGroup::Balances).expect("committed");

        *source.fail_aggregates.lock() = true;
        let err = collector
            .collect_cycle()
            .await
            .expect_err("network and deposit should fail");

        // Failed groups keep their previous slices...
        assert_eq!(
            store.updated_at(MetricGroup::Network).expect("retained"),
            network_before,
        );
        assert_eq!(store.network().expect("retained").value.total_eth, 5000.0);

        // ...while the others committed fresh values.
        assert!(store.updated_at(MetricGroup::Balances).expect("fresh") >= balances_before);

        let failed: Vec<MetricGroup> = err.failures.iter().map(|f| f.group).collect();
        assert!(failed.contains(&MetricGroup::Network));
        assert!(failed.contains(&MetricGroup::Deposit));
        assert_eq!(failed.len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_error_summary() {
        let source = Arc::new(MockSource::new());
        let store = Arc::new(SnapshotStore::new());
        *source.fail_minipools.lock() = true;

        let err = collector(source, store)
            .collect_cycle()
            .await
            .expect_err("balances and leaderboard should fail");

        let msg = err.to_string();
        assert!(msg.contains("2 of 5 metric groups failed"), "got: {msg}");
        assert!(msg.contains("balances"), "got: {msg}");
        assert!(msg.contains("leaderboard"), "got: {msg}");
    }

    #[tokio::test]
    async fn test_empty_population_is_not_an_error() {
        let source = Arc::new(MockSource {
            minipools: Vec::new(),
            addresses: Vec::new(),
            fail_aggregates: Mutex::new(false),
            fail_minipools: Mutex::new(false),
        });
        let store = Arc::new(SnapshotStore::new());

        collector(source, Arc::clone(&store))
            .collect_cycle()
            .await
            .expect("empty population is well-defined");

        let board = store.leaderboard().expect("committed");
        assert!(board.value.standings.is_empty());
        assert_eq!(board.value.histogram.count, 0);
    }
}
