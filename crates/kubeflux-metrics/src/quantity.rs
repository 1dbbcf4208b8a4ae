//! Resource quantity parsing.
//!
//! CPU is normalised to nanocores, memory to KiB. Only plain decimal
//! numbers with an optional suffix are accepted; signs, exponents and
//! unknown suffixes are errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),

    #[error("unknown suffix in quantity {0:?}")]
    UnknownSuffix(String),

    #[error("quantity {0:?} out of range")]
    OutOfRange(String),
}

const CPU_SUFFIXES: &[(&str, f64)] = &[("n", 1.0), ("u", 1e3), ("m", 1e6), ("", 1e9)];

/// Multipliers to bytes. Binary suffixes come first so `Ki` is never read
/// as a number ending in `K`.
const MEMORY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("", 1.0),
];

/// Parse a CPU quantity (`250000n`, `12m`, `1`, `0.5`) into nanocores.
pub fn parse_cpu_nanocores(quantity: &str) -> Result<u64, QuantityError> {
    let nanocores = parse_scaled(quantity, CPU_SUFFIXES)?;
    to_u64(nanocores.round(), quantity)
}

/// Parse a memory quantity (`1024Ki`, `64Mi`, `1G`, `4096`) into KiB.
///
/// Byte amounts that are not a whole number of KiB round to nearest.
pub fn parse_memory_kib(quantity: &str) -> Result<u64, QuantityError> {
    let bytes = parse_scaled(quantity, MEMORY_SUFFIXES)?;
    to_u64((bytes / 1024.0).round(), quantity)
}

fn parse_scaled(quantity: &str, suffixes: &[(&str, f64)]) -> Result<f64, QuantityError> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return Err(QuantityError::Empty);
    }

    let digits_end = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(digits_end);

    if number.is_empty() || !number.bytes().any(|b| b.is_ascii_digit()) {
        return Err(QuantityError::InvalidNumber(quantity.to_string()));
    }
    let value: f64 = number
        .parse()
        .map_err(|_| QuantityError::InvalidNumber(quantity.to_string()))?;

    let multiplier = suffixes
        .iter()
        .find(|(s, _)| *s == suffix)
        .map(|(_, m)| *m)
        .ok_or_else(|| QuantityError::UnknownSuffix(quantity.to_string()))?;

    Ok(value * multiplier)
}

fn to_u64(value: f64, quantity: &str) -> Result<u64, QuantityError> {
    if !value.is_finite() || value < 0.0 || value > u64::MAX as f64 {
        return Err(QuantityError::OutOfRange(quantity.to_string()));
    }
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_suffixes() {
        assert_eq!(parse_cpu_nanocores("250000n"), Ok(250_000));
        assert_eq!(parse_cpu_nanocores("15u"), Ok(15_000));
        assert_eq!(parse_cpu_nanocores("12m"), Ok(12_000_000));
        assert_eq!(parse_cpu_nanocores("1"), Ok(1_000_000_000));
        assert_eq!(parse_cpu_nanocores("0.5"), Ok(500_000_000));
        assert_eq!(parse_cpu_nanocores("0n"), Ok(0));
    }

    #[test]
    fn memory_suffixes() {
        assert_eq!(parse_memory_kib("1024Ki"), Ok(1024));
        assert_eq!(parse_memory_kib("64Mi"), Ok(65_536));
        assert_eq!(parse_memory_kib("1Gi"), Ok(1_048_576));
        assert_eq!(parse_memory_kib("1Ti"), Ok(1_073_741_824));
        assert_eq!(parse_memory_kib("2048"), Ok(2));
        assert_eq!(parse_memory_kib("1024k"), Ok(1000));
        assert_eq!(parse_memory_kib("1M"), Ok(977));
        assert_eq!(parse_memory_kib("1G"), Ok(976_563));
        assert_eq!(parse_memory_kib("1T"), Ok(976_562_500));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_cpu_nanocores(""), Err(QuantityError::Empty));
        assert_eq!(parse_memory_kib("   "), Err(QuantityError::Empty));
        assert!(matches!(
            parse_cpu_nanocores("-5m"),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_cpu_nanocores("abc"),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_cpu_nanocores("1.2.3"),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_cpu_nanocores("5Ki"),
            Err(QuantityError::UnknownSuffix(_))
        ));
        assert!(matches!(
            parse_memory_kib("12m"),
            Err(QuantityError::UnknownSuffix(_))
        ));
        assert!(matches!(
            parse_memory_kib("1e3"),
            Err(QuantityError::UnknownSuffix(_))
        ));
        assert!(matches!(
            parse_memory_kib("."),
            Err(QuantityError::InvalidNumber(_))
        ));
    }
}
