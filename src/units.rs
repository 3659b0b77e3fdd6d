/// Raw balance unit: wei, the smallest denomination.
pub type Wei = u128;

/// Wei per ETH (10^18).
pub const WEI_PER_ETH: f64 = 1e18;

/// Converts an unsigned wei amount to ETH.
pub fn wei_to_eth(wei: Wei) -> f64 {
    wei as f64 / WEI_PER_ETH
}

/// Converts a signed wei amount (e.g. a score) to ETH.
pub fn wei_to_eth_signed(wei: i128) -> f64 {
    wei as f64 / WEI_PER_ETH
}
