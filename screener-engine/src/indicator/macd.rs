use super::ema::Ema;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MacdOutput {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line (`ema_fast - ema_slow`), its signal EMA and the histogram.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    warm_after: usize,
    count: usize,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            warm_after: slow.max(fast) + signal.max(1) - 1,
            count: 0,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<MacdOutput> {
        let line = self.fast.update(close) - self.slow.update(close);
        self.signal.update(line);
        self.count += 1;
        self.value()
    }

    /// Latest output, `None` until the signal line is backed by a warm slow EMA.
    pub fn value(&self) -> Option<MacdOutput> {
        if self.count < self.warm_after {
            return None;
        }

        let macd = self.fast.raw() - self.slow.raw();
        let signal = self.signal.raw();
        Some(MacdOutput {
            macd,
            signal,
            histogram: macd - signal,
        })
    }
}
