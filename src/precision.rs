//! Decimal-string arithmetic
//!
//! Money values arrive from the venue as decimal strings. Arithmetic on them
//! (ticker change/percentage/average) goes through these helpers so no
//! binary float ever sits between input and output. Results are normalized,
//! i.e. trailing zeros are stripped: `sub("110", "100") == "10"`.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::errors::ExchangeError;

fn parse(operand: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(operand.trim())
        .or_else(|_| Decimal::from_scientific(operand.trim()))
        .map_err(|_| ExchangeError::InvalidDecimal(operand.to_string()))
}

pub fn add(a: &str, b: &str) -> Result<String, ExchangeError> {
    Ok((parse(a)? + parse(b)?).normalize().to_string())
}

pub fn sub(a: &str, b: &str) -> Result<String, ExchangeError> {
    Ok((parse(a)? - parse(b)?).normalize().to_string())
}

pub fn mul(a: &str, b: &str) -> Result<String, ExchangeError> {
    Ok((parse(a)? * parse(b)?).normalize().to_string())
}

/// Exact division. Callers guard known-zero denominators (the ticker math
/// checks `open != 0` before computing a percentage); dividing by a zero
/// string here is an error, not a silent zero.
pub fn div(a: &str, b: &str) -> Result<String, ExchangeError> {
    let numerator = parse(a)?;
    let denominator = parse(b)?;
    let quotient = numerator
        .checked_div(denominator)
        .ok_or(ExchangeError::DivisionByZero)?;
    Ok(quotient.normalize().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sub() {
        assert_eq!(add("0.1", "0.2").unwrap(), "0.3");
        assert_eq!(sub("110", "100").unwrap(), "10");
        assert_eq!(sub("100", "110").unwrap(), "-10");
    }

    #[test]
    fn test_mul_strips_trailing_zeros() {
        assert_eq!(mul("0.1", "100").unwrap(), "10");
        assert_eq!(mul("1.50", "2").unwrap(), "3");
    }

    #[test]
    fn test_div() {
        assert_eq!(div("10", "100").unwrap(), "0.1");
        assert_eq!(div("210", "2").unwrap(), "105");
    }

    #[test]
    fn test_div_by_zero() {
        assert!(matches!(
            div("1", "0"),
            Err(ExchangeError::DivisionByZero)
        ));
        assert!(matches!(
            div("1", "0.000"),
            Err(ExchangeError::DivisionByZero)
        ));
    }

    #[test]
    fn test_invalid_operand() {
        assert!(matches!(
            add("abc", "1"),
            Err(ExchangeError::InvalidDecimal(_))
        ));
    }

    #[test]
    fn test_no_float_rounding() {
        // the classic 0.1 + 0.2 case stays exact
        assert_eq!(add("0.1", "0.2").unwrap(), "0.3");
        assert_eq!(
            sub("1.000000000000000001", "1").unwrap(),
            "0.000000000000000001"
        );
    }
}
