//! Book integrity checksum.
//!
//! Venues that publish a checksum with each diff compute it over the top of
//! their book; we compute the same value over our merged book and discard
//! the channel on any mismatch.
//!
//! ```text
//! bid0.price:bid0.qty:ask0.price:ask0.qty:bid1.price:...   (25 levels)
//! checksum = crc32(text)
//! ```
//!
//! When one side is shorter than the other its missing levels are skipped.

use crate::types::DepthLevel;

/// Number of levels per side covered by the checksum.
pub const CHECKSUM_LEVELS: usize = 25;

pub fn depth_checksum(bids: &[DepthLevel], asks: &[DepthLevel]) -> u32 {
    let mut parts: Vec<String> = Vec::with_capacity(CHECKSUM_LEVELS * 4);

    for i in 0..CHECKSUM_LEVELS {
        if let Some(bid) = bids.get(i) {
            parts.push(bid.price.to_string());
            parts.push(bid.quantity.to_string());
        }
        if let Some(ask) = asks.get(i) {
            parts.push(ask.price.to_string());
            parts.push(ask.quantity.to_string());
        }
    }

    crc32fast::hash(parts.join(":").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lvl(p: rust_decimal::Decimal, q: rust_decimal::Decimal) -> DepthLevel {
        DepthLevel::new(p, q)
    }

    #[test]
    fn matches_reference_string() {
        let bids = [lvl(dec!(3366.1), dec!(7)), lvl(dec!(3366), dec!(6))];
        let asks = [lvl(dec!(3366.8), dec!(9))];

        let expected = crc32fast::hash(b"3366.1:7:3366.8:9:3366:6");
        assert_eq!(depth_checksum(&bids, &asks), expected);
    }

    #[test]
    fn only_top_levels_count() {
        let bids: Vec<_> = (0..30)
            .map(|i| lvl(dec!(100) - rust_decimal::Decimal::from(i), dec!(1)))
            .collect();
        let asks: Vec<_> = (0..30)
            .map(|i| lvl(dec!(101) + rust_decimal::Decimal::from(i), dec!(1)))
            .collect();

        let base = depth_checksum(&bids, &asks);

        let mut deep_change = bids.clone();
        deep_change[27].quantity = dec!(5);
        assert_eq!(depth_checksum(&deep_change, &asks), base);

        let mut top_change = bids.clone();
        top_change[3].quantity = dec!(5);
        assert_ne!(depth_checksum(&top_change, &asks), base);
    }
}
