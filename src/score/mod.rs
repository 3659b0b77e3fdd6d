use serde::Deserialize;

use crate::source::{MinipoolDetails, MinipoolStatus};

/// Which minipools qualify for scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorePolicy {
    /// Only minipools that are actively staking with a confirmed validator.
    StakingOnly,
    /// Any minipool with a confirmed validator, regardless of lifecycle
    /// status.
    AnyExisting,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self::StakingOnly
    }
}

impl ScorePolicy {
    /// Whether a minipool qualifies under this policy.
    pub fn qualifies(&self, mp: &MinipoolDetails) -> bool {
        match self {
            Self::StakingOnly => mp.validator_exists && mp.status == MinipoolStatus::Staking,
            Self::AnyExisting => mp.validator_exists,
        }
    }
}

/// Computes a node's score from its minipools.
///
/// The score is the summed profit/loss of the node's top `top_k` qualifying
/// minipools by balance: Σ (balance − node deposit − user deposit), in wei.
/// Fewer than `top_k` qualifying minipools sum over what is available.
///
/// Returns `None` when no minipool qualifies: a node with no data is
/// non-participating, which is distinct from a genuine zero score where
/// deposits exactly cancel the balance.
///
/// Selection is stable: ties in balance keep the input order, so callers
/// that pass a deterministically ordered slice get reproducible output.
pub fn node_score(minipools: &[MinipoolDetails], top_k: usize, policy: ScorePolicy) -> Option<i128> {
    let mut qualifying: Vec<&MinipoolDetails> =
        minipools.iter().filter(|mp| policy.qualifies(mp)).collect();

    if qualifying.is_empty() {
        return None;
    }

    // Full sort-then-take; minipool counts per node are small.
    qualifying.sort_by(|a, b| b.validator_balance.cmp(&a.validator_balance));

    let score = qualifying
        .iter()
        .take(top_k)
        .map(|mp| {
            mp.validator_balance as i128 - mp.node_deposit as i128 - mp.user_deposit as i128
        })
        .sum();

    Some(score)
}

/// The best qualifying minipool by balance, if any.
///
/// Used as the representative minipool for a node in reports.
pub fn best_minipool<'a>(
    minipools: &'a [MinipoolDetails],
    policy: ScorePolicy,
) -> Option<&'a MinipoolDetails> {
    let mut best: Option<&MinipoolDetails> = None;

    for mp in minipools.iter().filter(|mp| policy.qualifies(mp)) {
        // Strictly-greater replacement keeps the first of a balance tie.
        match best {
            Some(b) if mp.validator_balance <= b.validator_balance => {}
            _ => best = Some(mp),
        }
    }

    best
}
