//! Historical market data sources

pub mod binance;
pub mod file;

pub use binance::BinanceClient;
pub use file::{load_klines, save_klines};
