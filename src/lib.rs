//! Staking network observer: ranks registered nodes by validator profit
//! and exposes leaderboard, balance, and network metrics over Prometheus.

pub mod collector;
pub mod config;
pub mod daemon;
pub mod export;
pub mod histogram;
pub mod rank;
pub mod report;
pub mod score;
pub mod snapshot;
pub mod source;
pub mod units;
