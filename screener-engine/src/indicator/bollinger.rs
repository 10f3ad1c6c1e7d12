use super::RingBuf;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BollingerOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger Bands: rolling mean ± `multiplier` rolling sample standard deviations.
#[derive(Debug, Clone)]
pub struct Bollinger {
    window: RingBuf,
    multiplier: f64,
}

impl Bollinger {
    pub fn new(period: usize, multiplier: f64) -> Self {
        Self {
            window: RingBuf::new(period),
            multiplier,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<BollingerOutput> {
        self.window.push(close);
        self.value()
    }

    pub fn value(&self) -> Option<BollingerOutput> {
        if !self.window.is_full() {
            return None;
        }

        let middle = self.window.mean();
        let width = self.window.std_sample() * self.multiplier;
        Some(BollingerOutput {
            upper: middle + width,
            middle,
            lower: middle - width,
        })
    }
}
