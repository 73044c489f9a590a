// atr.rs — Wilder average true range.
//
// The TP Controller needs a concrete volatility estimate to size wall
// detection against. Implements the standard Wilder rolling true-range
// average: a rolling volatility estimate derived from OHLC candle data.

#[derive(Debug, Clone, Copy)]
pub struct Candle {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// True range of `current` against the prior close.
fn true_range(prev_close: f64, current: Candle) -> f64 {
    let a = current.high - current.low;
    let b = (current.high - prev_close).abs();
    let c = (current.low - prev_close).abs();
    a.max(b).max(c)
}

/// Wilder's smoothed ATR over `candles`, seeded with a simple average of
/// the first `period` true ranges. Returns `None` if there are fewer than
/// `period + 1` candles (one extra for the seed's prior close).
pub fn wilder_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let trs: Vec<f64> = candles
        .windows(2)
        .map(|w| true_range(w[0].close, w[1]))
        .collect();

    let seed: f64 = trs[..period].iter().sum::<f64>() / period as f64;
    let mut atr = seed;
    for tr in &trs[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
    }
    Some(atr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_candles(n: usize, price: f64, range: f64) -> Vec<Candle> {
        (0..n)
            .map(|_| Candle { high: price + range / 2.0, low: price - range / 2.0, close: price })
            .collect()
    }

    #[test]
    fn constant_range_candles_converge_to_that_range() {
        let candles = flat_candles(20, 100.0, 2.0);
        let atr = wilder_atr(&candles, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-6);
    }

    #[test]
    fn too_few_candles_returns_none() {
        let candles = flat_candles(5, 100.0, 2.0);
        assert!(wilder_atr(&candles, 14).is_none());
    }

    #[test]
    fn gap_up_widens_true_range_beyond_high_low_span() {
        let mut candles = flat_candles(15, 100.0, 1.0);
        candles[14] = Candle { high: 110.0, low: 109.0, close: 109.5 };
        let atr = wilder_atr(&candles, 14).unwrap();
        assert!(atr > 1.0);
    }
}
