/// Average True Range, seeded with the mean of the first `period` true ranges then Wilder
/// smoothed.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    tr_sum: f64,
    current: f64,
    count: usize,
}

/// True range of a bar given the previous close (`high - low` for the first bar).
pub fn true_range(high: f64, low: f64, prev_close: Option<f64>) -> f64 {
    match prev_close {
        Some(prev) => (high - low).max((high - prev).abs()).max((low - prev).abs()),
        None => high - low,
    }
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            tr_sum: 0.0,
            current: 0.0,
            count: 0,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let tr = true_range(high, low, self.prev_close);
        self.prev_close = Some(close);
        self.count += 1;

        let period = self.period as f64;
        if self.count < self.period {
            self.tr_sum += tr;
        } else if self.count == self.period {
            self.current = (self.tr_sum + tr) / period;
        } else {
            self.current = (self.current * (period - 1.0) + tr) / period;
        }

        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        (self.count >= self.period).then_some(self.current)
    }
}
