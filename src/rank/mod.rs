use std::collections::BTreeMap;

use crate::score::{node_score, ScorePolicy};
use crate::source::{Address, MinipoolDetails};

/// Rank assigned to nodes with no qualifying minipools, guaranteed greater
/// than any real rank.
pub const SENTINEL_RANK: u32 = 999_999_999;

/// One node's position in the leaderboard.
#[derive(Debug, Clone)]
pub struct NodeStanding {
    pub address: Address,
    /// Top-K profit/loss in wei; `None` for non-participating nodes.
    pub score: Option<i128>,
    pub rank: u32,
    /// The node's minipools, as grouped for this cycle.
    pub minipools: Vec<MinipoolDetails>,
}

impl NodeStanding {
    /// Whether this node had at least one qualifying minipool.
    pub fn participating(&self) -> bool {
        self.score.is_some()
    }
}

/// Ranks all nodes by score.
///
/// Minipools are grouped by owning node address; each node is scored via
/// [`node_score`]; participating nodes are stable-sorted by score descending
/// and assigned dense ranks 1..=P. Non-participating nodes (including
/// addresses with no minipools at all) follow with [`SENTINEL_RANK`].
///
/// Tie-break among equal scores, and ordering among sentinel-ranked nodes,
/// is node address ascending: grouping happens in a `BTreeMap`, so the
/// pre-sort order is deterministic and the stable sort preserves it.
pub fn rank_nodes(
    minipools: &[MinipoolDetails],
    node_addresses: &[Address],
    top_k: usize,
    policy: ScorePolicy,
) -> Vec<NodeStanding> {
    let mut by_node: BTreeMap<Address, Vec<MinipoolDetails>> = BTreeMap::new();
    for mp in minipools {
        by_node
            .entry(mp.node_address.clone())
            .or_default()
            .push(mp.clone());
    }

    // Addresses with no minipools still get a (non-participating) standing.
    for address in node_addresses {
        by_node.entry(address.clone()).or_default();
    }

    let mut participating = Vec::with_capacity(by_node.len());
    let mut benched = Vec::new();

    for (address, pools) in by_node {
        match node_score(&pools, top_k, policy) {
            Some(score) => participating.push(NodeStanding {
                address,
                score: Some(score),
                rank: 0,
                minipools: pools,
            }),
            None => benched.push(NodeStanding {
                address,
                score: None,
                rank: SENTINEL_RANK,
                minipools: pools,
            }),
        }
    }

    participating.sort_by(|a, b| b.score.cmp(&a.score));
    for (i, standing) in participating.iter_mut().enumerate() {
        standing.rank = i as u32 + 1;
    }

    participating.extend(benched);
    participating
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::source::MinipoolStatus;
    use crate::units::Wei;

    const ETH: Wei = 1_000_000_000_000_000_000;

    fn minipool(node: &str, balance_milli_eth: u64) -> MinipoolDetails {
        MinipoolDetails {
            node_address: Address::new(node),
            validator_pubkey: format!("0x{node}{balance_milli_eth:x}"),
            status: MinipoolStatus::Staking,
            status_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            validator_exists: true,
            validator_active: true,
            validator_balance: Wei::from(balance_milli_eth) * ETH / 1000,
            node_deposit: 16 * ETH,
            user_deposit: 16 * ETH,
        }
    }

    fn addresses(names: &[&str]) -> Vec<Address> {
        names.iter().map(|n| Address::new(n)).collect()
    }

    #[test]
    fn test_rank_concrete_scenario() {
        // A: 33.1 + 33.0 against 32 each => +2.1 ETH.
        // B: 31.5 against 32 => -0.5 ETH.
        // C: no minipools => sentinel.
        let pools = vec![
            minipool("0xaa", 33_100),
            minipool("0xaa", 33_000),
            minipool("0xbb", 31_500),
        ];

        let ranking = rank_nodes(
            &pools,
            &addresses(&["0xaa", "0xbb", "0xcc"]),
            2,
            ScorePolicy::StakingOnly,
        );

        assert_eq!(ranking.len(), 3);

        assert_eq!(ranking[0].address, Address::new("0xaa"));
        assert_eq!(ranking[0].rank, 1);
        assert_eq!(ranking[0].score, Some(2_100_000_000_000_000_000));

        assert_eq!(ranking[1].address, Address::new("0xbb"));
        assert_eq!(ranking[1].rank, 2);
        assert_eq!(ranking[1].score, Some(-500_000_000_000_000_000));

        assert_eq!(ranking[2].address, Address::new("0xcc"));
        assert_eq!(ranking[2].rank, SENTINEL_RANK);
        assert!(!ranking[2].participating());
    }

    #[test]
    fn test_rank_dense_permutation() {
        let pools = vec![
            minipool("0x01", 33_000),
            minipool("0x02", 32_500),
            minipool("0x03", 34_000),
            minipool("0x04", 31_000),
        ];

        let ranking = rank_nodes(&pools, &[], 2, ScorePolicy::StakingOnly);

        let mut ranks: Vec<u32> = ranking
            .iter()
            .filter(|s| s.participating())
            .map(|s| s.rank)
            .collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rank_equal_scores_tie_break_by_address() {
        let pools = vec![minipool("0xbb", 33_000), minipool("0xaa", 33_000)];

        let ranking = rank_nodes(&pools, &[], 2, ScorePolicy::StakingOnly);

        assert_eq!(ranking[0].address, Address::new("0xaa"));
        assert_eq!(ranking[0].rank, 1);
        assert_eq!(ranking[1].address, Address::new("0xbb"));
        assert_eq!(ranking[1].rank, 2);
        // Equal scores never share a rank.
        assert_eq!(ranking[0].score, ranking[1].score);
    }

    #[test]
    fn test_rank_empty_input() {
        let ranking = rank_nodes(&[], &[], 2, ScorePolicy::StakingOnly);
        assert!(ranking.is_empty());
    }

    #[test]
    fn test_rank_idempotent() {
        let pools = vec![
            minipool("0x01", 33_000),
            minipool("0x02", 32_500),
            minipool("0x03", 33_000),
        ];
        let addrs = addresses(&["0x01", "0x02", "0x03", "0x04"]);

        let first = rank_nodes(&pools, &addrs, 2, ScorePolicy::StakingOnly);
        let second = rank_nodes(&pools, &addrs, 2, ScorePolicy::StakingOnly);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.address, b.address);
            assert_eq!(a.score, b.score);
            assert_eq!(a.rank, b.rank);
        }
    }

    #[test]
    fn test_rank_sentinel_nodes_ordered_by_address() {
        let ranking = rank_nodes(
            &[],
            &addresses(&["0xcc", "0xaa", "0xbb"]),
            2,
            ScorePolicy::StakingOnly,
        );

        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking[0].address, Address::new("0xaa"));
        assert_eq!(ranking[2].address, Address::new("0xcc"));
        assert!(ranking.iter().all(|s| s.rank == SENTINEL_RANK));
    }

    #[test]
    fn test_rank_node_with_only_unqualified_minipools_is_benched() {
        let mut mp = minipool("0x01", 33_000);
        mp.status = MinipoolStatus::Prelaunch;

        let ranking = rank_nodes(&[mp], &[], 2, ScorePolicy::StakingOnly);

        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking[0].rank, SENTINEL_RANK);
        assert_eq!(ranking[0].minipools.len(), 1);
    }
}
