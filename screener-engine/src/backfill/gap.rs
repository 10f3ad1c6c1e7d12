use chrono::{DateTime, TimeDelta, Utc};
use screener_data::Symbol;
use serde::{Deserialize, Serialize};

/// Contiguous run of missing 1m candles `[start, end)` of a symbol.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Gap {
    pub symbol: Symbol,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Gap {
    pub fn new(symbol: Symbol, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { symbol, start, end }
    }

    /// Number of missing minutes.
    pub fn len(&self) -> usize {
        (self.end - self.start).num_minutes().max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last missing minute.
    pub fn last(&self) -> DateTime<Utc> {
        self.end - TimeDelta::minutes(1)
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time < self.end
    }
}

/// Detect interior gaps in ascending minute-aligned `timestamps`.
///
/// Only the span between the first & last present timestamp is inspected. Duplicates are
/// tolerated.
pub fn detect_gaps(symbol: &Symbol, timestamps: &[DateTime<Utc>]) -> Vec<Gap> {
    let minute = TimeDelta::minutes(1);

    timestamps
        .windows(2)
        .filter_map(|pair| {
            let (previous, current) = (pair[0], pair[1]);
            (current - previous > minute)
                .then(|| Gap::new(symbol.clone(), previous + minute, current))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minute(index: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::minutes(index)
    }

    #[test]
    fn test_detect_gaps() {
        struct TestCase {
            input: Vec<i64>,
            expected: Vec<(i64, i64)>,
        }

        let tests = vec![
            TestCase {
                // TC0: no rows
                input: vec![],
                expected: vec![],
            },
            TestCase {
                // TC1: contiguous
                input: vec![0, 1, 2, 3],
                expected: vec![],
            },
            TestCase {
                // TC2: single interior gap of two minutes
                input: vec![0, 1, 2, 5, 6],
                expected: vec![(3, 5)],
            },
            TestCase {
                // TC3: several gaps & duplicates
                input: vec![0, 0, 2, 3, 3, 7],
                expected: vec![(1, 2), (4, 7)],
            },
        ];

        let btc = Symbol::new("BTC/USDT").unwrap();
        for (index, test) in tests.into_iter().enumerate() {
            let timestamps = test.input.into_iter().map(minute).collect::<Vec<_>>();
            let actual = detect_gaps(&btc, &timestamps);
            let expected = test
                .expected
                .into_iter()
                .map(|(start, end)| Gap::new(btc.clone(), minute(start), minute(end)))
                .collect::<Vec<_>>();
            assert_eq!(actual, expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_gap_bounds() {
        let gap = Gap::new(Symbol::new("BTC/USDT").unwrap(), minute(3), minute(5));

        assert_eq!(gap.len(), 2);
        assert_eq!(gap.last(), minute(4));
        assert!(gap.contains(minute(3)));
        assert!(gap.contains(minute(4)));
        assert!(!gap.contains(minute(5)));
        assert!(!gap.contains(minute(2)));
    }
}
