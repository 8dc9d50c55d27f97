pub mod binance;

pub use binance::{run_price_feed, BinanceFeed};
