/// Relative Strength Index.
///
/// Gains and losses are smoothed recursively with `alpha = 1 / period`:
/// `avg += (observation - avg) / period`. The first close contributes a zero gain & zero loss
/// observation, so the first value is available once `period` closes have been seen.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
    observations: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            observations: 0,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        let change = self
            .prev_close
            .replace(close)
            .map_or(0.0, |prev| close - prev);
        let (gain, loss) = (change.max(0.0), (-change).max(0.0));

        if self.observations == 0 {
            self.avg_gain = gain;
            self.avg_loss = loss;
        } else {
            let alpha = 1.0 / self.period as f64;
            self.avg_gain += alpha * (gain - self.avg_gain);
            self.avg_loss += alpha * (loss - self.avg_loss);
        }
        self.observations += 1;

        self.value()
    }

    /// Latest value, `None` during warm up or while no price change has been seen.
    pub fn value(&self) -> Option<f64> {
        if self.observations < self.period {
            return None;
        }

        if self.avg_loss == 0.0 {
            return (self.avg_gain > 0.0).then_some(100.0);
        }

        let rs = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}
