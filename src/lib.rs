//! Polls weighing scales over TCP, keeps the stable weights they report and
//! exports them for later analysis.

pub mod config;
pub mod export;
pub mod models;
pub mod network;
pub mod scale;
pub mod simulator;
pub mod utils;
