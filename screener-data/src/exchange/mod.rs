/// `Binance` spot [`MarketData`](crate::market::MarketData) implementation.
pub mod binance;
