use crate::rank::NodeStanding;
use crate::score::{best_minipool, ScorePolicy};
use crate::source::{MinipoolDetails, MinipoolStatus};
use crate::units::{wei_to_eth, wei_to_eth_signed};

/// Timestamp format for status-change times in report rows.
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Renders a node leaderboard as a delimited text table.
///
/// Row order matches the input exactly; each row carries the node's
/// representative (best qualifying) minipool and its last status-change
/// time. Non-participating nodes render their sentinel rank with no score.
pub fn render_nodes(standings: &[NodeStanding], policy: ScorePolicy) -> String {
    if standings.is_empty() {
        return "No registered nodes\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!("{} ranked nodes\n\n", standings.len()));
    out.push_str("Rank,Node address,Validator pubkey,Status update time,Score (ETH)\n");

    for standing in standings {
        let best = best_minipool(&standing.minipools, policy);
        let pubkey = best.map_or("-", |mp| mp.validator_pubkey.as_str());
        let status_time = best.map_or_else(
            || "-".to_string(),
            |mp| mp.status_time.format(TIME_FORMAT).to_string(),
        );
        let score = standing.score.map_or_else(
            || "n/a".to_string(),
            |wei| format!("{:+.10}", wei_to_eth_signed(wei)),
        );

        out.push_str(&format!(
            "{:4},{},{},{},{}\n",
            standing.rank, standing.address, pubkey, status_time, score,
        ));
    }

    out
}

/// Renders the minipool leaderboard: every actively staking minipool with a
/// confirmed validator, ordered by balance descending, with its accumulated
/// reward or penalty.
pub fn render_minipools(minipools: &[MinipoolDetails]) -> String {
    let mut active: Vec<&MinipoolDetails> = minipools
        .iter()
        .filter(|mp| mp.status == MinipoolStatus::Staking && mp.validator_exists)
        .collect();

    if active.is_empty() {
        return "No active minipools\n".to_string();
    }

    active.sort_by(|a, b| b.validator_balance.cmp(&a.validator_balance));

    let mut out = String::new();
    out.push_str(&format!("{} active and staking minipools\n\n", active.len()));
    out.push_str(
        "Rank,Node address,Validator pubkey,Status update time,Accumulated reward/penalty (ETH)\n",
    );

    for (i, mp) in active.iter().enumerate() {
        let diff = wei_to_eth(mp.validator_balance)
            - wei_to_eth(mp.node_deposit)
            - wei_to_eth(mp.user_deposit);

        out.push_str(&format!(
            "{:4},{},{},{},{:+.10}\n",
            i + 1,
            mp.node_address,
            mp.validator_pubkey,
            mp.status_time.format(TIME_FORMAT),
            diff,
        ));
    }

    out
}
