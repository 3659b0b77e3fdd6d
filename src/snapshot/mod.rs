use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::histogram::ScoreHistogram;
use crate::rank::NodeStanding;
use crate::source::{Address, MinipoolDetails};

/// The independently fetched and committed metric groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricGroup {
    NodeCounts,
    Balances,
    Leaderboard,
    Network,
    Deposit,
}

impl MetricGroup {
    pub const ALL: [MetricGroup; 5] = [
        MetricGroup::NodeCounts,
        MetricGroup::Balances,
        MetricGroup::Leaderboard,
        MetricGroup::Network,
        MetricGroup::Deposit,
    ];

    /// Group name as used in logs and staleness labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeCounts => "node_counts",
            Self::Balances => "balances",
            Self::Leaderboard => "leaderboard",
            Self::Network => "network",
            Self::Deposit => "deposit",
        }
    }
}

impl std::fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node count group payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeCounts {
    pub total_nodes: u64,
}

/// Per-minipool balance observation.
#[derive(Debug, Clone)]
pub struct MinipoolBalance {
    pub node_address: Address,
    pub validator_pubkey: String,
    pub balance_eth: f64,
}

/// Balance group payload.
#[derive(Debug, Clone, Default)]
pub struct BalanceSet {
    pub minipools: Vec<MinipoolBalance>,
}

/// Minipool counts by lifecycle status and validator state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinipoolStatusCounts {
    pub total: u64,
    pub initialized: u64,
    pub prelaunch: u64,
    pub staking: u64,
    pub withdrawable: u64,
    pub dissolved: u64,
    pub validator_exists: u64,
    pub validator_active: u64,
}

impl MinipoolStatusCounts {
    /// Tallies counts over a set of minipools.
    pub fn tally<'a>(minipools: impl Iterator<Item = &'a MinipoolDetails>) -> Self {
        use crate::source::MinipoolStatus;

        let mut counts = Self::default();
        for mp in minipools {
            counts.total += 1;
            match mp.status {
                MinipoolStatus::Initialized => counts.initialized += 1,
                MinipoolStatus::Prelaunch => counts.prelaunch += 1,
                MinipoolStatus::Staking => counts.staking += 1,
                MinipoolStatus::Withdrawable => counts.withdrawable += 1,
                MinipoolStatus::Dissolved => counts.dissolved += 1,
            }
            if mp.validator_exists {
                counts.validator_exists += 1;
            }
            if mp.validator_active {
                counts.validator_active += 1;
            }
        }
        counts
    }
}

/// Leaderboard group payload: ranking plus its derived aggregations.
#[derive(Debug, Clone, Default)]
pub struct Leaderboard {
    pub standings: Vec<NodeStanding>,
    pub histogram: ScoreHistogram,
    pub status_counts: MinipoolStatusCounts,
}

/// Network aggregate group payload. Fee values are rates; balances are ETH.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkStats {
    pub fee_current: f64,
    pub fee_min: f64,
    pub fee_target: f64,
    pub fee_max: f64,
    pub balances_block: u64,
    pub total_eth: f64,
    pub staking_eth: f64,
    pub total_reth: f64,
    pub withdrawal_eth: f64,
}

/// Deposit queue group payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepositStats {
    pub pool_balance_eth: f64,
    pub queue_length: u64,
    pub deposits_enabled: bool,
    pub assignments_enabled: bool,
}

/// A committed group value with its commit time.
#[derive(Debug)]
pub struct GroupSlice<T> {
    pub value: Arc<T>,
    pub updated_at: SystemTime,
}

impl<T> Clone for GroupSlice<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            updated_at: self.updated_at,
        }
    }
}

/// One group's slot in the store.
///
/// Commit replaces the whole slice; readers clone the `Arc`, so a slice is
/// never observed mid-update.
#[derive(Debug, Default)]
struct Slot<T> {
    inner: RwLock<Option<GroupSlice<T>>>,
}

impl<T> Slot<T> {
    fn commit(&self, value: T, at: SystemTime) {
        *self.inner.write() = Some(GroupSlice {
            value: Arc::new(value),
            updated_at: at,
        });
    }

    fn read(&self) -> Option<GroupSlice<T>> {
        self.inner.read().clone()
    }
}

/// Holds the last successfully computed value for each metric group.
///
/// Each group is committed independently; a failed fetch for one group
/// leaves its previous slice in place (stale but available) and never
/// touches the others.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    node_counts: Slot<NodeCounts>,
    balances: Slot<BalanceSet>,
    leaderboard: Slot<Leaderboard>,
    network: Slot<NetworkStats>,
    deposit: Slot<DepositStats>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit_node_counts(&self, value: NodeCounts, at: SystemTime) {
        self.node_counts.commit(value, at);
    }

    pub fn commit_balances(&self, value: BalanceSet, at: SystemTime) {
        self.balances.commit(value, at);
    }

    pub fn commit_leaderboard(&self, value: Leaderboard, at: SystemTime) {
        self.leaderboard.commit(value, at);
    }

    pub fn commit_network(&self, value: NetworkStats, at: SystemTime) {
        self.network.commit(value, at);
    }

    pub fn commit_deposit(&self, value: DepositStats, at: SystemTime) {
        self.deposit.commit(value, at);
    }

    pub fn node_counts(&self) -> Option<GroupSlice<NodeCounts>> {
        self.node_counts.read()
    }

    pub fn balances(&self) -> Option<GroupSlice<BalanceSet>> {
        self.balances.read()
    }

    pub fn leaderboard(&self) -> Option<GroupSlice<Leaderboard>> {
        self.leaderboard.read()
    }

    pub fn network(&self) -> Option<GroupSlice<NetworkStats>> {
        self.network.read()
    }

    pub fn deposit(&self) -> Option<GroupSlice<DepositStats>> {
        self.deposit.read()
    }

    /// Commit time per group, for staleness reporting.
    pub fn updated_at(&self, group: MetricGroup) -> Option<SystemTime> {
        match group {
            MetricGroup::NodeCounts => self.node_counts.read().map(|s| s.updated_at),
            MetricGroup::Balances => self.balances.read().map(|s| s.updated_at),
            MetricGroup::Leaderboard => self.leaderboard.read().map(|s| s.updated_at),
            MetricGroup::Network => self.network.read().map(|s| s.updated_at),
            MetricGroup::Deposit => self.deposit.read().map(|s| s.updated_at),
        }
    }
}
