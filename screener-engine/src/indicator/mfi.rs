use super::RingBuf;

/// Money Flow Index: volume weighted RSI over typical price `(high + low + close) / 3`.
#[derive(Debug, Clone)]
pub struct Mfi {
    prev_typical: Option<f64>,
    positive: RingBuf,
    negative: RingBuf,
}

impl Mfi {
    pub fn new(period: usize) -> Self {
        Self {
            prev_typical: None,
            positive: RingBuf::new(period),
            negative: RingBuf::new(period),
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64, volume: f64) -> Option<f64> {
        let typical = (high + low + close) / 3.0;
        let Some(prev) = self.prev_typical.replace(typical) else {
            return None;
        };

        let flow = typical * volume;
        let (positive, negative) = if typical > prev {
            (flow, 0.0)
        } else if typical < prev {
            (0.0, flow)
        } else {
            (0.0, 0.0)
        };

        self.positive.push(positive);
        self.negative.push(negative);
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if !self.positive.is_full() {
            return None;
        }

        let positive = self.positive.sum();
        let negative = self.negative.sum();
        if negative == 0.0 {
            return Some(if positive == 0.0 { 50.0 } else { 100.0 });
        }

        Some(100.0 - 100.0 / (1.0 + positive / negative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::tests::assert_close;

    #[test]
    fn test_mfi() {
        let mut mfi = Mfi::new(2);

        // high == low == close, so typical price == close
        assert!(mfi.update(10.0, 10.0, 10.0, 1.0).is_none());
        assert!(mfi.update(11.0, 11.0, 11.0, 2.0).is_none());

        // flows: +22, -10
        assert_close(mfi.update(10.0, 10.0, 10.0, 1.0).unwrap(), 68.75);

        // window rolls: -10, +12
        assert_close(
            mfi.update(12.0, 12.0, 12.0, 1.0).unwrap(),
            100.0 - 100.0 / (1.0 + 1.2),
        );
    }

    #[test]
    fn test_mfi_no_negative_flow() {
        let mut mfi = Mfi::new(2);
        let output = [1.0, 2.0, 3.0]
            .iter()
            .filter_map(|price| mfi.update(*price, *price, *price, 5.0))
            .last();
        assert_close(output.unwrap(), 100.0);
    }
}
