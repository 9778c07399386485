use crate::sync::ONE_DOGE;

/// Formats a koinu amount as whole coins to exactly 8 decimal places, the
/// way balances and values appear on the wire.
pub fn koinu_decimal(value: i64) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();

    let whole = abs / ONE_DOGE as u64;
    let fraction = abs % ONE_DOGE as u64;

    format!("{sign}{whole}.{fraction:08}")
}

/// Display form of a transaction hash: the raw bytes reversed, hex-encoded.
pub fn display_hash(hash: &[u8; 32]) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_koinu_with_eight_decimals() {
        assert_eq!(koinu_decimal(0), "0.00000000");
        assert_eq!(koinu_decimal(1), "0.00000001");
        assert_eq!(koinu_decimal(1_000_000), "0.01000000");
        assert_eq!(koinu_decimal(ONE_DOGE), "1.00000000");
        assert_eq!(koinu_decimal(420 * ONE_DOGE + 69), "420.00000069");
        assert_eq!(koinu_decimal(-1_500_000_000), "-15.00000000");
    }

    #[test]
    fn display_hash_reverses_bytes() {
        let mut hash = [0u8; 32];
        hash[0] = 0xAB;
        hash[31] = 0x01;

        let display = display_hash(&hash);
        assert!(display.starts_with("01"));
        assert!(display.ends_with("ab"));
        assert_eq!(display.len(), 64);
    }
}
