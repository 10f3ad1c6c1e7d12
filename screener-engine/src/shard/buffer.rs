//! Bounded per-symbol buffer of 1m bars fed by live price updates.
//!
//! Bars are bucketed by the update's own timestamp (not wall clock), so late & replayed updates
//! land in the minute they belong to.

use crate::resample::Bar;
use std::collections::VecDeque;

/// Effect of [`BarBuffer::apply`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Applied {
    /// Merged into an existing bar of the same minute.
    Merged,
    /// Appended as a new latest bar.
    Appended,
    /// Older than every buffered bar of a missing minute, dropped.
    Ignored,
}

/// Ring buffer of the most recent 1m bars, ascending by time.
#[derive(Debug, Clone)]
pub struct BarBuffer {
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl BarBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bars: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Seed with historical bars (ascending), keeping only the newest `capacity`.
    pub fn extend_history(&mut self, history: impl IntoIterator<Item = Bar>) {
        for bar in history {
            match self.bars.back() {
                Some(last) if bar.time <= last.time => {
                    self.apply(bar);
                }
                _ => self.push(bar),
            }
        }
    }

    /// Apply a live minute bar.
    pub fn apply(&mut self, bar: Bar) -> Applied {
        let Some(last) = self.bars.back_mut() else {
            self.push(bar);
            return Applied::Appended;
        };

        if bar.time == last.time {
            last.merge(&bar);
            return Applied::Merged;
        }
        if bar.time > last.time {
            self.push(bar);
            return Applied::Appended;
        }

        match self.bars.binary_search_by_key(&bar.time, |existing| existing.time) {
            Ok(index) => {
                self.bars[index].merge(&bar);
                Applied::Merged
            }
            Err(_) => Applied::Ignored,
        }
    }

    fn push(&mut self, bar: Bar) {
        if self.bars.len() >= self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
    }

    /// Contiguous ascending view of the buffered bars.
    pub fn as_slice(&mut self) -> &[Bar] {
        self.bars.make_contiguous()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    fn minute(index: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::minutes(index)
    }

    fn bar(index: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            time: minute(index),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn test_bar_buffer_apply() {
        struct TestCase {
            input: Bar,
            expected: Applied,
            expected_len: usize,
        }

        let mut buffer = BarBuffer::new(10);
        buffer.extend_history([
            bar(0, 100.0, 101.0, 99.0, 100.5, 1.0),
            bar(2, 100.5, 102.0, 100.0, 101.0, 2.0),
        ]);

        let tests = vec![
            TestCase {
                // TC0: same minute as last bar merges
                input: bar(2, 101.0, 103.0, 100.5, 102.5, 3.0),
                expected: Applied::Merged,
                expected_len: 2,
            },
            TestCase {
                // TC1: newer minute appends
                input: bar(3, 102.5, 102.5, 102.0, 102.0, 1.0),
                expected: Applied::Appended,
                expected_len: 3,
            },
            TestCase {
                // TC2: older minute already buffered merges in place
                input: bar(0, 100.0, 104.0, 100.0, 100.7, 4.0),
                expected: Applied::Merged,
                expected_len: 3,
            },
            TestCase {
                // TC3: older minute not buffered is ignored
                input: bar(1, 100.0, 100.0, 100.0, 100.0, 1.0),
                expected: Applied::Ignored,
                expected_len: 3,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = buffer.apply(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
            assert_eq!(buffer.len(), test.expected_len, "TC{} failed", index);
        }

        let bars = buffer.as_slice();
        assert_eq!(bars[0].high, 104.0);
        assert_eq!(bars[0].close, 100.7);
        assert_eq!(bars[0].volume, 4.0);
        assert_eq!(bars[1].high, 103.0);
        assert_eq!(bars[1].low, 100.0);
        assert_eq!(bars[1].close, 102.5);
        assert_eq!(bars[1].open, 100.5);
    }

    #[test]
    fn test_bar_buffer_evicts_oldest() {
        let mut buffer = BarBuffer::new(3);
        for index in 0..5 {
            buffer.apply(bar(index, 1.0, 1.0, 1.0, index as f64 + 1.0, 1.0));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.as_slice()[0].time, minute(2));
        assert_eq!(buffer.last().map(|bar| bar.close), Some(5.0));
    }
}
