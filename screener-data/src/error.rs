use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `screener-data`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum DataError {
    #[error("invalid Symbol {input:?}: {reason}")]
    InvalidSymbol { input: String, reason: String },

    #[error("invalid Candle for {symbol}: {reason}")]
    InvalidCandle { symbol: String, reason: String },

    #[error("invalid Tick for {symbol}: {reason}")]
    InvalidTick { symbol: String, reason: String },

    #[error("unknown Timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("rate limited by market data provider: {0}")]
    RateLimited(String),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("failed to parse market data payload: {0}")]
    Parse(String),
}

impl DataError {
    /// Determine if an error is worth retrying with backoff (eg/ network or provider throttling).
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transient(&self) -> bool {
        match self {
            DataError::Http(_) | DataError::RateLimited(_) | DataError::Socket(_) => true,
            _ => false,
        }
    }

    /// Determine if an error requires a live tick subscription to re-initialise.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            DataError::Socket(error_msg) => {
                // Socket termination errors require reconnection
                let error_lower = error_msg.to_lowercase();
                error_lower.contains("terminated")
                    || error_lower.contains("connectionclosed")
                    || error_lower.contains("alreadyclosed")
                    || error_lower.contains("sendafterclosing")
                    || error_lower.contains("io(")
                    || error_lower.contains("timeout")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for DataError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Parse(value.to_string())
        } else {
            Self::Http(value.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DataError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(format!("{value:?}"))
    }
}

impl From<serde_json::Error> for DataError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}
