pub mod backtest;
pub mod config;
pub mod indicators;
pub mod logging;
pub mod market;
pub mod notify;
pub mod persistence;
pub mod quality;
pub mod risk;
pub mod scanner;
pub mod session;
pub mod signal;
pub mod tracker;
pub mod utils;
pub mod web_server;

#[cfg(test)]
mod persistence_test;
