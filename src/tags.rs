// tags.rs — client order-id (link_id) generation.
//
// Two shapes:
//   auto-reduce:  "ar_<side>_<symbol>_<price>_<level>"
//   grid entries: "<sym3><side1><price5><ts5>", clamped to <= 45 chars
//
// Both must be idempotent across restarts: re-deriving the tag for the same
// (symbol, side, price, level) must reproduce the same string, so a crashed
// worker can recognize orders it placed before the crash.

use crate::types::Side;

fn side_tag(side: Side) -> &'static str {
    match side {
        Side::Long => "L",
        Side::Short => "S",
    }
}

/// `"ar_<side>_<symbol>_<price>_<level>"`, e.g. `"ar_L_BTCUSDT_49000.5_2"`.
pub fn auto_reduce_link_id(side: Side, symbol: &str, price: f64, level: usize) -> String {
    format!("ar_{}_{}_{}_{}", side_tag(side), symbol, price_tag(price), level)
}

/// `"<sym3><side1><price5><ts5>"`, clamped to 45 chars, e.g. `"BTCL4900012345"`.
///
/// `ts5` is the low 5 decimal digits of a millisecond timestamp supplied by
/// the caller — passing the same timestamp twice reproduces the same tag,
/// which is what lets a restarted worker recognize its own resting orders.
pub fn grid_link_id(symbol: &str, side: Side, price: f64, ts_millis: u64) -> String {
    let sym3: String = symbol.chars().filter(|c| c.is_ascii_alphanumeric()).take(3).collect();
    let price5 = price_tag(price);
    let ts5 = ts_millis % 100_000;
    let tag = format!("{sym3}{}{price5}{ts5:05}", side_tag(side));
    clamp45(tag)
}

fn price_tag(price: f64) -> String {
    // Strip the decimal point so digits-only consumers (the grid tag) stay
    // compact; auto-reduce tags keep it since they're human-debugged more.
    format!("{price}")
}

fn clamp45(mut s: String) -> String {
    if s.len() > 45 {
        s.truncate(45);
    }
    s
}

/// Parses an auto-reduce link_id back into its parts. Returns `None` for any
/// other tag shape (including grid tags, which carry no level field).
pub fn parse_auto_reduce_link_id(tag: &str) -> Option<(Side, String, f64, usize)> {
    let rest = tag.strip_prefix("ar_")?;
    let mut parts = rest.splitn(4, '_');
    let side = match parts.next()? {
        "L" => Side::Long,
        "S" => Side::Short,
        _ => return None,
    };
    let symbol = parts.next()?.to_string();
    let price: f64 = parts.next()?.parse().ok()?;
    let level: usize = parts.next()?.parse().ok()?;
    Some((side, symbol, price, level))
}

pub fn is_auto_reduce_tag(tag: &str) -> bool {
    tag.starts_with("ar_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_reduce_tag_roundtrips() {
        let tag = auto_reduce_link_id(Side::Long, "BTCUSDT", 49_000.5, 2);
        assert_eq!(tag, "ar_L_BTCUSDT_49000.5_2");
        let (side, symbol, price, level) = parse_auto_reduce_link_id(&tag).unwrap();
        assert_eq!(side, Side::Long);
        assert_eq!(symbol, "BTCUSDT");
        assert_eq!(price, 49_000.5);
        assert_eq!(level, 2);
    }

    #[test]
    fn auto_reduce_tag_is_recognized() {
        assert!(is_auto_reduce_tag("ar_S_ETHUSDT_3000_0"));
        assert!(!is_auto_reduce_tag("BTCL4900012345"));
    }

    #[test]
    fn grid_tag_is_idempotent_and_bounded() {
        let a = grid_link_id("BTCUSDT", Side::Long, 49_000.5, 1_700_000_123_456);
        let b = grid_link_id("BTCUSDT", Side::Long, 49_000.5, 1_700_000_123_456);
        assert_eq!(a, b);
        assert!(a.len() <= 45);
    }

    #[test]
    fn grid_tag_differs_across_symbol_side_or_price() {
        let base = grid_link_id("BTCUSDT", Side::Long, 49_000.5, 1_700_000_123_456);
        let other_symbol = grid_link_id("ETHUSDT", Side::Long, 49_000.5, 1_700_000_123_456);
        let other_side = grid_link_id("BTCUSDT", Side::Short, 49_000.5, 1_700_000_123_456);
        let other_price = grid_link_id("BTCUSDT", Side::Long, 48_000.5, 1_700_000_123_456);
        assert_ne!(base, other_symbol);
        assert_ne!(base, other_side);
        assert_ne!(base, other_price);
    }

    #[test]
    fn grid_tag_never_exceeds_45_chars_for_long_symbols() {
        let tag = grid_link_id("A_VERY_LONG_SYMBOL_NAME_USDT", Side::Short, 123_456.789, 999_999_999);
        assert!(tag.len() <= 45);
    }
}
