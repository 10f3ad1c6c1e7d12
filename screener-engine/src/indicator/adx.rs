/// Average Directional Index.
///
/// +DM, -DM and true range are summed over the first `period` bar pairs then Wilder smoothed.
/// The ADX is seeded with the mean of the first `period` DX values and Wilder smoothed after.
#[derive(Debug, Clone)]
pub struct Adx {
    period: usize,
    prev: Option<(f64, f64, f64)>,
    plus_dm: f64,
    minus_dm: f64,
    tr: f64,
    pairs: usize,
    dx_sum: f64,
    dx_count: usize,
    current: f64,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev: None,
            plus_dm: 0.0,
            minus_dm: 0.0,
            tr: 0.0,
            pairs: 0,
            dx_sum: 0.0,
            dx_count: 0,
            current: 0.0,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let Some((prev_high, prev_low, prev_close)) = self.prev.replace((high, low, close)) else {
            return None;
        };

        let up = high - prev_high;
        let down = prev_low - low;
        let plus_dm = if up > down && up > 0.0 { up } else { 0.0 };
        let minus_dm = if down > up && down > 0.0 { down } else { 0.0 };
        let tr = super::atr::true_range(high, low, Some(prev_close));

        let period = self.period as f64;
        self.pairs += 1;

        if self.pairs <= self.period {
            self.plus_dm += plus_dm;
            self.minus_dm += minus_dm;
            self.tr += tr;
            if self.pairs < self.period {
                return None;
            }
        } else {
            self.plus_dm = self.plus_dm - self.plus_dm / period + plus_dm;
            self.minus_dm = self.minus_dm - self.minus_dm / period + minus_dm;
            self.tr = self.tr - self.tr / period + tr;
        }

        let dx = self.dx();
        if self.dx_count < self.period {
            self.dx_sum += dx;
            self.dx_count += 1;
            if self.dx_count == self.period {
                self.current = self.dx_sum / period;
            }
        } else {
            self.current = (self.current * (period - 1.0) + dx) / period;
        }

        self.value()
    }

    fn dx(&self) -> f64 {
        if self.tr == 0.0 {
            return 0.0;
        }
        let plus_di = 100.0 * self.plus_dm / self.tr;
        let minus_di = 100.0 * self.minus_dm / self.tr;
        let sum = plus_di + minus_di;
        if sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / sum
        }
    }

    /// Latest value, `None` until `period` DX values have been averaged (`2 * period` bars).
    pub fn value(&self) -> Option<f64> {
        (self.dx_count >= self.period).then_some(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::tests::assert_close;

    #[test]
    fn test_adx_strong_uptrend() {
        let mut adx = Adx::new(3);

        let outputs = (0..8)
            .map(|i| {
                let base = 100.0 + i as f64;
                adx.update(base + 1.0, base - 1.0, base)
            })
            .collect::<Vec<_>>();

        // Warm after 2 * period bars
        assert!(outputs[..5].iter().all(Option::is_none));
        assert_close(outputs[5].unwrap(), 100.0);
        assert_close(outputs[7].unwrap(), 100.0);
    }

    #[test]
    fn test_adx_flat_market() {
        let mut adx = Adx::new(3);
        let output = (0..10).filter_map(|_| adx.update(10.0, 9.0, 9.5)).last();
        assert_close(output.unwrap(), 0.0);
    }
}
