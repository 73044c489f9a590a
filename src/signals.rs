// signals.rs — Signal Source contract.
//
// A closed tagged enum plus a table-driven combination rule, instead of
// free-form string matching scattered through the reconciler — mirrors
// replacing loose JSON fields with typed structs at the ingestor boundary.

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTag {
    Long,
    Short,
    Neutral,
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy)]
pub struct Signal {
    pub mfi_signal: SignalTag,
    pub trend: SignalTag,
    pub ema_trend: SignalTag,
    pub eri_trend: SignalTag,
    pub one_minute_volume: f64,
    pub five_minute_distance: f64,
}

impl Signal {
    pub fn neutral() -> Self {
        Self {
            mfi_signal: SignalTag::Neutral,
            trend: SignalTag::Neutral,
            ema_trend: SignalTag::Neutral,
            eri_trend: SignalTag::Neutral,
            one_minute_volume: 0.0,
            five_minute_distance: 0.0,
        }
    }
}

/// Supplies the current signal for a symbol. Concrete sources (indicator
/// stack driving `mfi_signal`/`trend`/etc.) live outside this crate's
/// scope — a pure function producing labelled signals; this
/// trait is the seam the reconciler calls against, modeled so tests can
/// inject fixed signals without depending on indicator math.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn latest(&self, symbol: &str) -> Option<Signal>;
}

/// Fixed signal source used by tests and as a manual-override fallback.
pub struct StaticSignalSource(pub Signal);

#[async_trait]
impl SignalSource for StaticSignalSource {
    async fn latest(&self, _symbol: &str) -> Option<Signal> {
        Some(self.0)
    }
}

/// Table-driven combination rule: `Long` entry requires
/// `mfi_signal ∈ {Long, Bullish}` and `trend != Short`; `Short` entry is
/// the mirror image.
pub fn should_enter(signal: &Signal, side: Side) -> bool {
    match side {
        Side::Long => {
            matches!(signal.mfi_signal, SignalTag::Long | SignalTag::Bullish)
                && signal.trend != SignalTag::Short
        }
        Side::Short => {
            matches!(signal.mfi_signal, SignalTag::Short | SignalTag::Bearish)
                && signal.trend != SignalTag::Long
        }
    }
}

/// Optional volume floor check against `volume_check`/`min_vol`/`min_dist`.
pub fn volume_ok(signal: &Signal, min_vol: f64, min_dist: f64) -> bool {
    signal.one_minute_volume >= min_vol && signal.five_minute_distance >= min_dist
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal_with(mfi: SignalTag, trend: SignalTag) -> Signal {
        Signal { mfi_signal: mfi, trend, ..Signal::neutral() }
    }

    #[test]
    fn neutral_blocks_both_sides() {
        let neutral = Signal::neutral();
        assert!(!should_enter(&neutral, Side::Long));
        assert!(!should_enter(&neutral, Side::Short));
    }

    #[test]
    fn long_requires_bullish_mfi_and_non_short_trend() {
        let sig = signal_with(SignalTag::Long, SignalTag::Neutral);
        assert!(should_enter(&sig, Side::Long));
        let sig = signal_with(SignalTag::Bullish, SignalTag::Bullish);
        assert!(should_enter(&sig, Side::Long));
        let blocked = signal_with(SignalTag::Long, SignalTag::Short);
        assert!(!should_enter(&blocked, Side::Long));
    }

    #[test]
    fn short_requires_bearish_mfi_and_non_long_trend() {
        let sig = signal_with(SignalTag::Short, SignalTag::Neutral);
        assert!(should_enter(&sig, Side::Short));
        let blocked = signal_with(SignalTag::Bearish, SignalTag::Long);
        assert!(!should_enter(&blocked, Side::Short));
    }

    #[test]
    fn volume_floor_blocks_below_thresholds() {
        let sig = Signal { one_minute_volume: 10.0, five_minute_distance: 0.001, ..Signal::neutral() };
        assert!(volume_ok(&sig, 5.0, 0.0005));
        assert!(!volume_ok(&sig, 20.0, 0.0005));
    }

    #[tokio::test]
    async fn static_source_returns_fixed_signal() {
        let src = StaticSignalSource(signal_with(SignalTag::Long, SignalTag::Neutral));
        let sig = src.latest("BTCUSDT").await.unwrap();
        assert_eq!(sig.mfi_signal, SignalTag::Long);
    }
}
