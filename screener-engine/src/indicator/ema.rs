/// Exponential Moving Average with `alpha = 2 / (period + 1)`.
///
/// Seeded with the first observation and updated with `alpha * price + (1 - alpha) * prev`
/// (no bias adjustment of early values).
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: f64,
    current: f64,
    count: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            current: 0.0,
            count: 0,
        }
    }

    /// Weighted with an explicit smoothing factor, eg/ Wilder's `1 / period`.
    pub fn with_alpha(period: usize, alpha: f64) -> Self {
        Self {
            alpha,
            ..Self::new(period)
        }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        self.current = if self.count == 0 {
            price
        } else {
            self.alpha * price + (1.0 - self.alpha) * self.current
        };
        self.count += 1;
        self.current
    }

    /// Latest value, `None` until `period` observations have been seen.
    pub fn value(&self) -> Option<f64> {
        (self.count >= self.period).then_some(self.current)
    }

    /// Latest value regardless of warm up.
    pub fn raw(&self) -> f64 {
        self.current
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::tests::assert_close;

    #[test]
    fn test_ema_recursive_values() {
        struct TestCase {
            input: f64,
            expected: f64,
            warm: bool,
        }

        // span 3 over [10, 11, 12, 13, 9]
        let tests = vec![
            TestCase {
                // TC0: seeded with first price
                input: 10.0,
                expected: 10.0,
                warm: false,
            },
            TestCase {
                // TC1
                input: 11.0,
                expected: 10.5,
                warm: false,
            },
            TestCase {
                // TC2: warm after 3 observations
                input: 12.0,
                expected: 11.25,
                warm: true,
            },
            TestCase {
                // TC3
                input: 13.0,
                expected: 12.125,
                warm: true,
            },
            TestCase {
                // TC4
                input: 9.0,
                expected: 10.5625,
                warm: true,
            },
        ];

        let mut ema = Ema::new(3);
        for (index, test) in tests.into_iter().enumerate() {
            let actual = ema.update(test.input);
            assert_close(actual, test.expected);
            assert_eq!(ema.value().is_some(), test.warm, "TC{} failed", index);
        }
    }

    #[test]
    fn test_ema_constant_series() {
        let mut ema = Ema::new(50);
        (0..60).for_each(|_| {
            ema.update(42.0);
        });
        assert_close(ema.value().unwrap(), 42.0);
    }
}
