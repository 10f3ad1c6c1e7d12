use crate::{bus::BusError, queue::QueueError, store::StoreError};
use screener_data::{DataError, Symbol};
use thiserror::Error;

/// All errors generated in `screener-engine`.
///
/// Variants follow how a failure must be handled rather than where it came from:
/// * [`EngineError::Transient`]: retry with backoff, nothing is lost.
/// * [`EngineError::DataInsufficient`]: skip the symbol, keep prior snapshot values.
/// * [`EngineError::Persist`]: store write failed. Workers must not acknowledge the task.
/// * [`EngineError::QueueGroupMissing`]: recreate the consumer group, then retry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("insufficient data for {symbol}: {reason}")]
    DataInsufficient { symbol: Symbol, reason: String },

    #[error("failed to persist: {0}")]
    Persist(String),

    #[error("work queue consumer group missing: {0}")]
    QueueGroupMissing(String),

    #[error("invalid market data: {0}")]
    Data(DataError),
}

impl EngineError {
    pub fn transient(error: impl std::fmt::Display) -> Self {
        Self::Transient(error.to_string())
    }

    pub fn persist(error: impl std::fmt::Display) -> Self {
        Self::Persist(error.to_string())
    }

    pub fn insufficient(symbol: &Symbol, reason: impl Into<String>) -> Self {
        Self::DataInsufficient {
            symbol: symbol.clone(),
            reason: reason.into(),
        }
    }

    /// Determine if a task that failed with this error should still be acknowledged.
    ///
    /// Re-processing cannot fix insufficient or invalid data, whereas transient & persist
    /// failures must be left unacknowledged so the task is redelivered.
    pub fn should_ack(&self) -> bool {
        matches!(
            self,
            EngineError::DataInsufficient { .. } | EngineError::Data(_)
        )
    }
}

impl From<DataError> for EngineError {
    fn from(value: DataError) -> Self {
        if value.is_transient() {
            Self::Transient(value.to_string())
        } else {
            Self::Data(value)
        }
    }
}

impl From<QueueError> for EngineError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::GroupMissing(group) => Self::QueueGroupMissing(group),
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<BusError> for EngineError {
    fn from(value: BusError) -> Self {
        Self::Transient(value.to_string())
    }
}

impl From<StoreError> for EngineError {
    /// Store reads are retryable. Writes are mapped explicitly with [`EngineError::persist`].
    fn from(value: StoreError) -> Self {
        Self::Transient(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_should_ack() {
        struct TestCase {
            input: EngineError,
            expected: bool,
        }

        let btc = Symbol::new("BTC/USDT").unwrap();

        let tests = vec![
            TestCase {
                // TC0: insufficient history is acknowledged
                input: EngineError::insufficient(&btc, "no candles"),
                expected: true,
            },
            TestCase {
                // TC1: persist failure is left for redelivery
                input: EngineError::persist("connection reset"),
                expected: false,
            },
            TestCase {
                // TC2: transient failure is left for redelivery
                input: EngineError::from(StoreError::Backend("timeout".to_string())),
                expected: false,
            },
            TestCase {
                // TC3: invalid data is acknowledged
                input: EngineError::from(DataError::UnknownTimeframe("2w".to_string())),
                expected: true,
            },
            TestCase {
                // TC4: transient DataError is mapped to Transient
                input: EngineError::from(DataError::Http("503".to_string())),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.should_ack();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_queue_group_missing_maps() {
        let error = EngineError::from(QueueError::GroupMissing("workers".to_string()));
        assert_eq!(error, EngineError::QueueGroupMissing("workers".to_string()));
    }
}
