use super::RingBuf;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StochasticOutput {
    pub k: f64,
    pub d: Option<f64>,
}

/// Stochastic Oscillator: %K over the rolling `period` high/low range, %D the `smoothing` bar
/// mean of %K.
#[derive(Debug, Clone)]
pub struct Stochastic {
    highs: RingBuf,
    lows: RingBuf,
    k_values: RingBuf,
    last_k: Option<f64>,
}

impl Stochastic {
    pub fn new(period: usize, smoothing: usize) -> Self {
        Self {
            highs: RingBuf::new(period),
            lows: RingBuf::new(period),
            k_values: RingBuf::new(smoothing),
            last_k: None,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<StochasticOutput> {
        self.highs.push(high);
        self.lows.push(low);
        if !self.highs.is_full() {
            return None;
        }

        let highest = self.highs.max();
        let lowest = self.lows.min();
        let k = if highest > lowest {
            100.0 * (close - lowest) / (highest - lowest)
        } else {
            50.0
        };

        self.k_values.push(k);
        self.last_k = Some(k);
        self.value()
    }

    pub fn value(&self) -> Option<StochasticOutput> {
        self.last_k.map(|k| StochasticOutput {
            k,
            d: self.k_values.is_full().then(|| self.k_values.mean()),
        })
    }
}
