use crate::{error::DataError, symbol::Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalised live price update received from a market data subscription.
#[derive(Debug, Clone, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub price: f64,
    /// Rolling volume snapshot reported by the provider (not an increment).
    pub volume: f64,
    pub time: DateTime<Utc>,
}

impl Tick {
    pub fn new(
        symbol: Symbol,
        price: f64,
        volume: f64,
        time: DateTime<Utc>,
    ) -> Result<Self, DataError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(DataError::InvalidTick {
                symbol: symbol.to_string(),
                reason: format!("invalid price {price}"),
            });
        }
        if !volume.is_finite() || volume < 0.0 {
            return Err(DataError::InvalidTick {
                symbol: symbol.to_string(),
                reason: format!("invalid volume {volume}"),
            });
        }

        Ok(Self {
            symbol,
            price,
            volume,
            time,
        })
    }
}
